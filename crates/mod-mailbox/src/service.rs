use serde::Serialize;
use tracing::info;
use wiremail_domain::{ComposeData, Email};
use wiremail_error::MailError;
use wiremail_imap::{ImapClient, ImapResponse};
use wiremail_mime::{process_email_bytes, EmailComposer};
use wiremail_smtp::SmtpClient;

use crate::folders::FolderTree;
use crate::summary::{exists_count, newest_range, summaries_from_fetch, MessageSummary, SUMMARY_ITEMS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReport {
    pub message_id: String,
    pub recipients: Vec<String>,
    pub reply: Vec<String>,
}

/// Read and send paths over one IMAP and one SMTP client.
pub struct MailService {
    imap: ImapClient,
    smtp: SmtpClient,
    composer: EmailComposer,
}

impl MailService {
    pub fn new(imap: ImapClient, smtp: SmtpClient, composer: EmailComposer) -> Self {
        Self {
            imap,
            smtp,
            composer,
        }
    }

    /// Connects and logs in on the IMAP side. SMTP connects per message.
    pub async fn connect(&self) -> Result<(), MailError> {
        self.imap.connect(true).await
    }

    pub async fn folders(&self) -> Result<FolderTree, MailError> {
        let response = ensure_ok(self.imap.list("", "*").await?, "LIST")?;
        let tree = FolderTree::from_response(&response);
        info!(count = tree.len(), "listed folders");
        Ok(tree)
    }

    /// The newest `limit` messages of `folder`, newest first.
    pub async fn summaries(&self, folder: &str, limit: usize) -> Result<Vec<MessageSummary>, MailError> {
        validate_not_empty(folder, "folder")?;
        let limit = clamp(limit, 1, 200, 20);
        let selected = ensure_ok(self.imap.select(folder).await?, "SELECT")?;
        let exists = exists_count(&selected).unwrap_or(0);
        let Some(range) = newest_range(exists, u32::try_from(limit).unwrap_or(u32::MAX)) else {
            return Ok(Vec::new());
        };

        let fetched = ensure_ok(self.imap.fetch(&range, SUMMARY_ITEMS).await?, "FETCH")?;
        let mut summaries = summaries_from_fetch(&fetched);
        summaries.sort_by(|a, b| b.seq.cmp(&a.seq));
        info!(folder, exists, count = summaries.len(), "fetched summaries");
        Ok(summaries)
    }

    pub async fn read(&self, folder: &str, seq: u32) -> Result<Email, MailError> {
        validate_not_empty(folder, "folder")?;
        if seq == 0 {
            return Err(MailError::invalid_input("sequence numbers start at 1"));
        }
        ensure_ok(self.imap.select(folder).await?, "SELECT")?;
        let fetched = ensure_ok(self.imap.fetch(&seq.to_string(), "BODY[]").await?, "FETCH")?;
        let raw = fetched
            .literals()
            .next()
            .ok_or_else(|| MailError::protocol(format!("message {seq} has no body in {folder}")))?;
        let email = process_email_bytes(raw);
        info!(folder, seq, attachments = email.attachments.len(), "read message");
        Ok(email)
    }

    pub async fn send(&self, data: &ComposeData) -> Result<SendReport, MailError> {
        validate_not_empty(&data.from, "from")?;
        let composed = self.composer.compose(data);
        let recipients = composed.envelope_recipients();
        if recipients.is_empty() {
            return Err(MailError::invalid_input("at least one recipient is required"));
        }

        self.smtp.connect(true).await?;
        let response = self
            .smtp
            .send_mail(&composed.from, &recipients, &composed.payload)
            .await?;
        if !response.is_success() {
            self.smtp.close();
            return Err(MailError::protocol(format!(
                "expected {}, got: {}",
                response.expected,
                response.lines.join(" | ")
            )));
        }
        info!(message_id = %composed.message_id, recipients = recipients.len(), "sent message");
        Ok(SendReport {
            message_id: composed.message_id,
            recipients,
            reply: response.lines,
        })
    }

    pub async fn logout(&self) -> Result<(), MailError> {
        self.imap.logout().await.map(|_| ())
    }
}

fn ensure_ok(response: ImapResponse, command: &str) -> Result<ImapResponse, MailError> {
    if response.is_ok() {
        return Ok(response);
    }
    Err(MailError::protocol(format!(
        "{command} {}: {}",
        response.status, response.text
    )))
}

fn validate_not_empty(val: &str, name: &str) -> Result<(), MailError> {
    if val.trim().is_empty() {
        return Err(MailError::invalid_input(format!("{name} cannot be empty")));
    }
    Ok(())
}

fn clamp(val: usize, min: usize, max: usize, default: usize) -> usize {
    if val == 0 {
        default
    } else {
        val.max(min).min(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremail_domain::{Credentials, Recipient};
    use wiremail_transport::{MemoryConnector, SessionConfig};

    const MESSAGE: &str = "Subject: Lunch\r\nFrom: Ann <ann@example.com>\r\nContent-Type: text/plain\r\n\r\nNoon?\r\n";
    const LATIN1: &[u8] = b"Subject: Menu\r\nContent-Type: text/plain; charset=iso-8859-1\r\n\
Content-Transfer-Encoding: 8bit\r\n\r\nCaf\xE9\r\n";

    fn imap_server() -> MemoryConnector {
        let connector = MemoryConnector::new().with_greeting(b"* OK ready\r\n".to_vec());
        connector.respond_with(|frame| {
            let (tag, command) = frame.trim_end().split_once(' ').unwrap_or(("", ""));
            if command == "FETCH 1 BODY[]" {
                let mut reply = format!("* 1 FETCH (BODY[] {{{}}}\r\n", LATIN1.len()).into_bytes();
                reply.extend_from_slice(LATIN1);
                reply.extend_from_slice(format!(")\r\n{tag} OK FETCH done\r\n").as_bytes());
                return vec![reply];
            }
            let reply = match command {
                c if c.starts_with("LOGIN") => format!("{tag} OK logged in\r\n"),
                c if c.starts_with("LIST") => format!(
                    "* LIST (\\HasChildren) \"/\" Archive\r\n\
                     * LIST () \"/\" Archive/2024\r\n\
                     * LIST () \"/\" INBOX\r\n\
                     {tag} OK LIST done\r\n"
                ),
                "SELECT \"INBOX\"" => format!("* 2 EXISTS\r\n* 0 RECENT\r\n{tag} OK [READ-WRITE] SELECT\r\n"),
                "SELECT \"Empty\"" => format!("* 0 EXISTS\r\n{tag} OK SELECT\r\n"),
                c if c.starts_with("FETCH 1:2 ") => {
                    let h1 = "Subject: first\r\n\r\n";
                    let h2 = "Subject: second\r\n\r\n";
                    format!(
                        "* 1 FETCH (UID 7 FLAGS (\\Seen) RFC822.SIZE 100 BODY[HEADER.FIELDS (SUBJECT FROM DATE)] {{{}}}\r\n{h1})\r\n\
                         * 2 FETCH (UID 8 FLAGS () RFC822.SIZE 200 BODY[HEADER.FIELDS (SUBJECT FROM DATE)] {{{}}}\r\n{h2})\r\n\
                         {tag} OK FETCH done\r\n",
                        h1.len(),
                        h2.len()
                    )
                }
                "FETCH 2 BODY[]" => format!(
                    "* 2 FETCH (BODY[] {{{}}}\r\n{MESSAGE})\r\n{tag} OK FETCH done\r\n",
                    MESSAGE.len()
                ),
                _ => format!("{tag} NO nope\r\n"),
            };
            vec![reply.into_bytes()]
        });
        connector
    }

    fn smtp_server() -> MemoryConnector {
        let connector = MemoryConnector::new().with_greeting(b"220 ready\r\n".to_vec());
        connector.respond_with(|frame| {
            let reply: &[u8] = if frame.starts_with("AUTH") || frame.starts_with("dQ") {
                b"334 go\r\n"
            } else if frame.starts_with("cHc") {
                b"235 ok\r\n"
            } else if frame.starts_with("DATA") {
                b"354 send\r\n"
            } else if frame.starts_with("QUIT") {
                b"221 bye\r\n"
            } else {
                b"250 ok\r\n"
            };
            vec![reply.to_vec()]
        });
        connector
    }

    fn service(imap: &MemoryConnector, smtp: &MemoryConnector) -> MailService {
        let config = |url: &str| {
            SessionConfig::new(url, Credentials::new("u", "pw")).with_retry_interval(Duration::ZERO)
        };
        MailService::new(
            ImapClient::new(config("memory://imap"), Arc::new(imap.clone())),
            SmtpClient::new(config("memory://smtp"), Arc::new(smtp.clone())),
            EmailComposer::new("example.com"),
        )
    }

    #[tokio::test]
    async fn folders_come_back_as_a_tree() {
        let (imap, smtp) = (imap_server(), smtp_server());
        let service = service(&imap, &smtp);
        service.connect().await.unwrap();

        let tree = service.folders().await.unwrap();
        let names: Vec<&str> = tree.roots.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Archive", "INBOX"]);
        assert_eq!(tree.roots[0].children[0].path, "Archive/2024");
    }

    #[tokio::test]
    async fn summaries_are_newest_first() {
        let (imap, smtp) = (imap_server(), smtp_server());
        let service = service(&imap, &smtp);
        service.connect().await.unwrap();

        let summaries = service.summaries("INBOX", 10).await.unwrap();
        let subjects: Vec<&str> = summaries.iter().map(|s| s.subject.as_str()).collect();
        assert_eq!(subjects, vec!["second", "first"]);
        assert_eq!(summaries[1].uid, Some(7));
        assert!(service.summaries("Empty", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_parses_the_fetched_literal() {
        let (imap, smtp) = (imap_server(), smtp_server());
        let service = service(&imap, &smtp);
        service.connect().await.unwrap();

        let email = service.read("INBOX", 2).await.unwrap();
        assert_eq!(email.subject.as_deref(), Some("Lunch"));
        assert_eq!(email.body_text.as_deref(), Some("Noon?\r\n"));
    }

    #[tokio::test]
    async fn read_keeps_eight_bit_bodies_intact() {
        let (imap, smtp) = (imap_server(), smtp_server());
        let service = service(&imap, &smtp);
        service.connect().await.unwrap();

        let email = service.read("INBOX", 1).await.unwrap();
        assert_eq!(email.subject.as_deref(), Some("Menu"));
        assert_eq!(email.body_text.as_deref(), Some("Caf\u{e9}\r\n"));
    }

    #[tokio::test]
    async fn rejected_commands_become_protocol_errors() {
        let (imap, smtp) = (imap_server(), smtp_server());
        let service = service(&imap, &smtp);
        service.connect().await.unwrap();
        let err = service.read("Missing", 1).await.unwrap_err();
        assert!(matches!(err, MailError::Protocol(_)));
    }

    #[tokio::test]
    async fn send_composes_and_delivers() {
        let (imap, smtp) = (imap_server(), smtp_server());
        let service = service(&imap, &smtp);
        let data = ComposeData {
            from: "me@example.com".into(),
            subject: "Hi".into(),
            recipients: vec![Recipient::to("a@example.com"), Recipient::bcc("b@example.com")],
            body_html: "<p>hello</p>".into(),
            attachments: Vec::new(),
        };

        let report = service.send(&data).await.unwrap();
        assert_eq!(report.recipients, vec!["a@example.com", "b@example.com"]);
        assert!(report.message_id.ends_with("@example.com>"));
        assert_eq!(report.reply, vec!["221 bye"]);

        let written = smtp.written();
        assert!(written.contains(&"RCPT TO:<b@example.com>\r\n".to_string()));
        assert!(written.iter().any(|w| w.contains("Subject: Hi\r\n")));
    }

    #[test]
    fn clamp_applies_default_and_bounds() {
        assert_eq!(clamp(0, 1, 200, 20), 20);
        assert_eq!(clamp(500, 1, 200, 20), 200);
        assert_eq!(clamp(5, 1, 200, 20), 5);
    }
}
