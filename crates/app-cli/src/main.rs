mod config;

use std::env;
use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};
use wiremail_domain::{ComposeAttachment, ComposeData, Recipient};
use wiremail_error::{ErrorResponse, MailError};
use wiremail_imap::ImapClient;
use wiremail_mailbox::format::{self, Format};
use wiremail_mailbox::MailService;
use wiremail_mime::EmailComposer;
use wiremail_smtp::SmtpClient;
use wiremail_transport::WebSocketConnector;

use crate::config::CliConfig;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wiremail=info")),
        )
        .compact()
        .init();
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Folders,
    List { folder: String, limit: usize },
    Read { folder: String, seq: u32 },
    Send {
        to: String,
        subject: String,
        html_file: String,
        attachments: Vec<String>,
    },
    Help,
}

fn parse_args(args: &[String]) -> Result<(Command, Format), String> {
    let fmt = if args.iter().any(|a| a == "--json") {
        Format::Json
    } else {
        Format::Compact
    };
    let args: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .filter(|a| *a != "--json")
        .collect();

    let arg = |i: usize, name: &str| {
        args.get(i)
            .map(|s| s.to_string())
            .ok_or_else(|| format!("missing <{name}>"))
    };

    let cmd = match args.first().copied().unwrap_or("help") {
        "folders" => Command::Folders,
        "list" => Command::List {
            folder: arg(1, "folder")?,
            limit: match args.get(2) {
                Some(n) => n.parse().map_err(|e| format!("invalid limit: {e}"))?,
                None => 20,
            },
        },
        "read" => Command::Read {
            folder: arg(1, "folder")?,
            seq: arg(2, "seq")?
                .parse()
                .map_err(|e| format!("invalid seq: {e}"))?,
        },
        "send" => Command::Send {
            to: arg(1, "to")?,
            subject: arg(2, "subject")?,
            html_file: arg(3, "html-file")?,
            attachments: args.iter().skip(4).map(|s| s.to_string()).collect(),
        },
        "help" | "--help" | "-h" => Command::Help,
        unknown => return Err(format!("Unknown command: {unknown}")),
    };
    Ok((cmd, fmt))
}

fn guess_mime_type(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "zip" => "application/zip",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

fn read_attachment(path: &str) -> Result<ComposeAttachment, MailError> {
    let data = std::fs::read(path).map_err(|e| MailError::invalid_input(format!("{path}: {e}")))?;
    let filename = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string();
    Ok(ComposeAttachment {
        filename,
        mime_type: guess_mime_type(path).to_string(),
        data,
    })
}

fn build_service(config: &CliConfig) -> MailService {
    let connector = Arc::new(WebSocketConnector);
    MailService::new(
        ImapClient::new(config.session(&config.imap_url), connector.clone()),
        SmtpClient::new(config.session(&config.smtp_url), connector),
        EmailComposer::new(config.domain()),
    )
}

async fn run(cmd: Command, fmt: Format) -> Result<String, MailError> {
    let config = CliConfig::from_env().map_err(MailError::invalid_input)?;
    let service = build_service(&config);

    if let Command::Send {
        to,
        subject,
        html_file,
        attachments,
    } = cmd
    {
        let body_html = std::fs::read_to_string(&html_file)
            .map_err(|e| MailError::invalid_input(format!("{html_file}: {e}")))?;
        let data = ComposeData {
            from: config.from.clone(),
            subject,
            recipients: to.split(',').map(|a| Recipient::to(a.trim())).collect(),
            body_html,
            attachments: attachments
                .iter()
                .map(String::as_str)
                .map(read_attachment)
                .collect::<Result<_, _>>()?,
        };
        let report = service.send(&data).await?;
        return Ok(format::format_send_report(&report, fmt));
    }

    service.connect().await?;
    info!(url = %config.imap_url, "imap session ready");
    let output = match cmd {
        Command::Folders => service
            .folders()
            .await
            .map(|tree| format::format_folders(&tree, fmt)),
        Command::List { folder, limit } => service
            .summaries(&folder, limit)
            .await
            .map(|s| format::format_summaries(&folder, &s, fmt)),
        Command::Read { folder, seq } => service
            .read(&folder, seq)
            .await
            .map(|email| format::format_email(&email, fmt)),
        Command::Send { .. } | Command::Help => Ok(String::new()),
    };
    if let Err(e) = service.logout().await {
        info!(%e, "logout failed");
    }
    output
}

fn print_help() {
    eprintln!("wiremail: mail over a WebSocket tunnel");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  wiremail folders                                   List folders as a tree");
    eprintln!("  wiremail list <folder> [limit]                     Newest messages first");
    eprintln!("  wiremail read <folder> <seq>                       Print one message");
    eprintln!("  wiremail send <to> <subject> <html-file> [file...] Compose and send");
    eprintln!("  wiremail help                                      Show this help");
    eprintln!();
    eprintln!("Add --json for machine-readable output.");
    eprintln!();
    eprintln!("Environment variables:");
    eprintln!("  WIREMAIL_IMAP_URL     WebSocket URL of the IMAP tunnel");
    eprintln!("  WIREMAIL_SMTP_URL     WebSocket URL of the SMTP tunnel");
    eprintln!("  WIREMAIL_USERNAME     Account user name");
    eprintln!("  WIREMAIL_PASSWORD     Account password");
    eprintln!("  WIREMAIL_FROM         Sender address (default: username)");
    eprintln!("  WIREMAIL_RETRY_MS     Reconnect delay, 0 disables (default: 3000)");
    eprintln!("  WIREMAIL_SUBPROTOCOL  WebSocket sub-protocol (default: binary)");
    eprintln!("  WIREMAIL_DEBUG        Log every frame at debug level");
    eprintln!("  RUST_LOG              Log level (default: wiremail=info)");
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    let (cmd, fmt) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("Run `wiremail help` for usage");
            std::process::exit(2);
        }
    };
    if cmd == Command::Help {
        print_help();
        return;
    }

    match run(cmd, fmt).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            let response = ErrorResponse::from(&e);
            error!(%e, "command failed");
            match fmt {
                Format::Json => println!(
                    "{}",
                    serde_json::to_string(&response).unwrap_or_else(|_| response.to_compact())
                ),
                Format::Compact => eprintln!("{}", response.to_compact()),
            }
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_commands_and_json_flag() {
        let (cmd, fmt) = parse_args(&args(&["list", "INBOX", "--json"])).unwrap();
        assert_eq!(
            cmd,
            Command::List {
                folder: "INBOX".into(),
                limit: 20
            }
        );
        assert_eq!(fmt, Format::Json);

        let (cmd, fmt) = parse_args(&args(&["send", "a@x", "Hi", "body.html", "a.pdf", "b.png"])).unwrap();
        assert_eq!(fmt, Format::Compact);
        assert!(matches!(
            cmd,
            Command::Send { ref attachments, .. } if attachments == &["a.pdf", "b.png"]
        ));

        assert_eq!(parse_args(&[]).unwrap().0, Command::Help);
    }

    #[rstest]
    #[case(&["read", "INBOX"], "missing <seq>")]
    #[case(&["read", "INBOX", "x"], "invalid seq")]
    #[case(&["list"], "missing <folder>")]
    #[case(&["frobnicate"], "Unknown command")]
    fn rejects_bad_arguments(#[case] input: &[&str], #[case] expected: &str) {
        let err = parse_args(&args(input)).unwrap_err();
        assert!(err.starts_with(expected), "{err}");
    }

    #[rstest]
    #[case("report.PDF", "application/pdf")]
    #[case("photo.jpeg", "image/jpeg")]
    #[case("notes", "application/octet-stream")]
    fn mime_type_follows_extension(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(guess_mime_type(path), expected);
    }
}
