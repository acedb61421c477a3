use wiremail_domain::Email;

use crate::folders::FolderTree;
use crate::service::SendReport;
use crate::summary::MessageSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Compact,
    Json,
}

pub fn format_folders(tree: &FolderTree, fmt: Format) -> String {
    match fmt {
        Format::Compact => {
            let nodes = tree.walk();
            let mut lines: Vec<String> = Vec::with_capacity(nodes.len() + 1);
            lines.push(format!("{} folders:", nodes.len()));
            for (depth, node) in nodes {
                let marker = if node.selectable { "" } else { " (noselect)" };
                lines.push(format!("{}{}{}", "  ".repeat(depth + 1), node.name, marker));
            }
            lines.join("\n")
        }
        Format::Json => to_json(tree),
    }
}

pub fn format_summaries(folder: &str, summaries: &[MessageSummary], fmt: Format) -> String {
    match fmt {
        Format::Compact => {
            let mut lines: Vec<String> = Vec::with_capacity(summaries.len() + 1);
            lines.push(format!("{} messages in {folder}:", summaries.len()));
            for s in summaries {
                lines.push(format_summary_line(s));
            }
            lines.join("\n")
        }
        Format::Json => to_json(summaries),
    }
}

pub fn format_email(email: &Email, fmt: Format) -> String {
    match fmt {
        Format::Compact => {
            let mut lines = Vec::new();
            let fields = [
                ("From", &email.from),
                ("To", &email.to),
                ("Cc", &email.cc),
                ("Date", &email.date),
                ("Subject", &email.subject),
            ];
            for (name, value) in fields {
                if let Some(value) = value {
                    lines.push(format!("{name}: {}", clean_text(value)));
                }
            }
            lines.push(String::new());
            match email.body() {
                Some(body) => lines.push(body.replace('\r', "")),
                None => lines.push("(no body)".to_string()),
            }
            if email.has_attachments() {
                lines.push(String::new());
                lines.push(format!("{} attachments:", email.attachments.len()));
                for a in &email.attachments {
                    lines.push(format!(
                        "  {} [{}] {} id:{}",
                        a.filename(),
                        a.part.mime_type,
                        format_size(a.size as u64),
                        a.key
                    ));
                }
            }
            lines.join("\n")
        }
        Format::Json => to_json(email),
    }
}

pub fn format_send_report(report: &SendReport, fmt: Format) -> String {
    match fmt {
        Format::Compact => format!(
            "sent {} to {} recipient(s): {}",
            report.message_id,
            report.recipients.len(),
            report.recipients.join(", ")
        ),
        Format::Json => to_json(report),
    }
}

fn format_summary_line(s: &MessageSummary) -> String {
    let unread = if s.is_seen() { " " } else { "*" };
    let size = s.size.map(|n| format!(" {}", format_size(n))).unwrap_or_default();
    format!(
        " {unread}#{seq} [{date}] {from}: {subject}{size}",
        seq = s.seq,
        date = format_date(&s.date),
        from = truncate(&s.from, 40),
        subject = truncate(&s.subject, 80),
    )
}

/// RFC 2822 dates as `Oct 01 10:00` (UTC); anything unparsable as-is.
pub fn format_date(date: &str) -> String {
    match chrono::DateTime::parse_from_rfc2822(date.trim()) {
        Ok(dt) => dt.with_timezone(&chrono::Utc).format("%b %d %H:%M").to_string(),
        Err(_) => clean_text(date),
    }
}

pub fn format_size(bytes: u64) -> String {
    match bytes {
        0..=1023 => format!("{bytes}B"),
        1024..=1_048_575 => format!("{:.1}K", bytes as f64 / 1024.0),
        _ => format!("{:.1}M", bytes as f64 / 1_048_576.0),
    }
}

fn clean_text(s: &str) -> String {
    let clean: String = s.chars().filter(|c| *c != '\r').collect();
    clean.replace('\n', " ")
}

fn truncate(s: &str, max: usize) -> String {
    let oneline = clean_text(s);
    if oneline.chars().count() > max {
        let truncated: String = oneline.chars().take(max).collect();
        format!("{truncated}...")
    } else {
        oneline
    }
}

fn to_json<T: serde::Serialize + ?Sized>(val: &T) -> String {
    serde_json::to_string(val).unwrap_or_else(|e| format!("serialization error: {e}"))
}
