use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};
use wiremail_domain::{Connector, ReadyState};
use wiremail_error::MailError;
use wiremail_transport::{Authorizer, Correlation, Frame, Session, SessionConfig};

use crate::handler::{ImapHandler, ImapResponse};

pub const TAG_LEN: usize = 6;

/// Tagged command client. One instance owns one session.
pub struct ImapClient {
    session: Session<ImapHandler>,
}

impl ImapClient {
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            session: Session::with_authorizer(
                config,
                connector,
                ImapHandler::new(),
                Arc::new(LoginAuthorizer),
            ),
        }
    }

    /// Opens the session and waits for the greeting. With `authorize`
    /// the LOGIN command runs now and after every reconnect.
    pub async fn connect(&self, authorize: bool) -> Result<(), MailError> {
        self.session.connect(authorize).await
    }

    /// Sends `TAG COMMAND` and resolves with everything the server said up
    /// to the matching completion line. NO and BAD come back as statuses.
    pub async fn request(&self, command: &str) -> Result<ImapResponse, MailError> {
        reject_line_breaks(command)?;
        send_command(&self.session, command, command).await
    }

    /// LOGIN with the configured credentials; succeeds iff the status is OK.
    pub async fn authorize(&self) -> Result<ImapResponse, MailError> {
        login(&self.session).await
    }

    pub async fn capability(&self) -> Result<ImapResponse, MailError> {
        self.request("CAPABILITY").await
    }

    pub async fn noop(&self) -> Result<ImapResponse, MailError> {
        self.request("NOOP").await
    }

    pub async fn list(&self, reference: &str, pattern: &str) -> Result<ImapResponse, MailError> {
        self.request(&format!("LIST {} {}", quote(reference), quote(pattern)))
            .await
    }

    pub async fn select(&self, mailbox: &str) -> Result<ImapResponse, MailError> {
        self.request(&format!("SELECT {}", quote(mailbox))).await
    }

    pub async fn fetch(&self, sequence: &str, items: &str) -> Result<ImapResponse, MailError> {
        self.request(&format!("FETCH {sequence} {items}")).await
    }

    pub async fn logout(&self) -> Result<ImapResponse, MailError> {
        let response = self.request("LOGOUT").await;
        self.session.close();
        response
    }

    pub fn close(&self) {
        self.session.close();
    }

    pub fn ready_state(&self) -> ReadyState {
        self.session.ready_state()
    }

    pub fn backlog(&self) -> usize {
        self.session.backlog()
    }

    pub fn session(&self) -> &Session<ImapHandler> {
        &self.session
    }
}

struct LoginAuthorizer;

#[async_trait]
impl Authorizer<ImapHandler> for LoginAuthorizer {
    async fn authorize(&self, session: &Session<ImapHandler>) -> Result<(), MailError> {
        let response = login(session).await?;
        if response.is_ok() {
            Ok(())
        } else {
            Err(MailError::auth(format!("LOGIN {}: {}", response.status, response.text)))
        }
    }
}

async fn login(session: &Session<ImapHandler>) -> Result<ImapResponse, MailError> {
    let credentials = &session.config().credentials;
    let command = format!(
        "LOGIN {} {}",
        quote(&credentials.username),
        quote(&credentials.password)
    );
    reject_line_breaks(&command)?;
    let display = format!("LOGIN {} ****", quote(&credentials.username));
    send_command(session, &command, &display).await
}

/// Prefixes a fresh tag and waits for the matching completion line.
async fn send_command(
    session: &Session<ImapHandler>,
    command: &str,
    display: &str,
) -> Result<ImapResponse, MailError> {
    let tag = generate_tag();
    let frame = Frame::sensitive(format!("{tag} {command}\r\n"), format!("{tag} {display}"));
    let response = session.request(frame, Correlation::Tag(tag.clone())).await?;
    debug!(tag = %tag, status = %response.status, entries = response.data.len(), "imap response");
    if !response.is_ok() {
        info!(tag = %tag, status = %response.status, text = %response.text, "imap command rejected");
    }
    Ok(response)
}

fn reject_line_breaks(command: &str) -> Result<(), MailError> {
    if command.contains(['\r', '\n']) {
        return Err(MailError::invalid_input("IMAP command must be a single line"));
    }
    Ok(())
}

pub fn generate_tag() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TAG_LEN)
        .map(char::from)
        .collect()
}

/// IMAP quoted string.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ImapStatus, ResponseEntry};
    use std::time::Duration;
    use wiremail_domain::Credentials;
    use wiremail_transport::MemoryConnector;

    const GREETING: &[u8] = b"* OK IMAP4rev1 ready\r\n";

    fn tag_of(frame: &str) -> String {
        frame.split(' ').next().unwrap_or_default().to_string()
    }

    /// A small IMAP server: accepts LOGIN for alice, serves one folder
    /// listing and a single literal-carrying FETCH.
    fn server() -> MemoryConnector {
        let connector = MemoryConnector::new().with_greeting(GREETING.to_vec());
        connector.respond_with(|frame| {
            let tag = tag_of(frame);
            let command = frame[tag.len() + 1..].trim_end();
            let reply = if command.starts_with("LOGIN \"alice\"") {
                if command.ends_with("\"secret\"") {
                    format!("{tag} OK LOGIN completed\r\n")
                } else {
                    format!("{tag} NO [AUTHENTICATIONFAILED] bad credentials\r\n")
                }
            } else if command.starts_with("LIST") {
                format!(
                    "* LIST (\\HasNoChildren) \"/\" INBOX\r\n\
                     * LIST (\\HasChildren) \"/\" Archive\r\n\
                     {tag} OK LIST completed\r\n"
                )
            } else if command.starts_with("FETCH 1 BODY[]") {
                let msg = "Subject: hi\r\n\r\n* not untagged\r\n";
                format!("* 1 FETCH (BODY[] {{{}}}\r\n{msg})\r\n{tag} OK FETCH done\r\n", msg.len())
            } else if command == "NOOP" {
                format!("{tag} OK NOOP\r\n")
            } else if command == "LOGOUT" {
                format!("* BYE logging out\r\n{tag} OK LOGOUT\r\n")
            } else {
                format!("{tag} BAD unknown command\r\n")
            };
            // Split replies to exercise reassembly across chunks.
            let bytes = reply.into_bytes();
            let mid = bytes.len() / 2;
            vec![bytes[..mid].to_vec(), bytes[mid..].to_vec()]
        });
        connector
    }

    fn client(connector: &MemoryConnector, password: &str) -> ImapClient {
        let config = SessionConfig::new("memory://imap", Credentials::new("alice", password))
            .with_retry_interval(Duration::ZERO);
        ImapClient::new(config, Arc::new(connector.clone()))
    }

    #[test]
    fn tags_are_short_alphanumeric_and_vary() {
        let a = generate_tag();
        let b = generate_tag();
        assert_eq!(a.len(), TAG_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn quoting_escapes_specials() {
        assert_eq!(quote("INBOX"), "\"INBOX\"");
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[tokio::test]
    async fn connect_with_authorize_logs_in() {
        let connector = server();
        let client = client(&connector, "secret");
        client.connect(true).await.unwrap();

        let written = connector.written();
        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with(" LOGIN \"alice\" \"secret\"\r\n"));
        assert_eq!(client.ready_state(), ReadyState::Open);
    }

    #[tokio::test]
    async fn rejected_login_fails_connect_with_auth_error() {
        let connector = server();
        let client = client(&connector, "wrong");
        let err = client.connect(true).await.unwrap_err();
        assert!(matches!(err, MailError::Auth(_)));
    }

    #[tokio::test]
    async fn explicit_authorize_returns_status_instead_of_error() {
        let connector = server();
        let client = client(&connector, "wrong");
        client.connect(false).await.unwrap();
        let response = client.authorize().await.unwrap();
        assert_eq!(response.status, ImapStatus::No);
        assert_eq!(response.text, "[AUTHENTICATIONFAILED] bad credentials");
    }

    #[tokio::test]
    async fn request_frames_tag_and_matches_completion() {
        let connector = server();
        let client = client(&connector, "secret");
        client.connect(false).await.unwrap();

        let response = client.list("", "*").await.unwrap();
        let written = connector.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0], format!("{} LIST \"\" \"*\"\r\n", response.tag));
        assert!(response.is_ok());
        assert_eq!(response.data.len(), 2);
        assert!(response.data.iter().all(ResponseEntry::is_untagged));
    }

    #[tokio::test]
    async fn fetch_reassembles_literal_body() {
        let connector = server();
        let client = client(&connector, "secret");
        client.connect(true).await.unwrap();

        let response = client.fetch("1", "BODY[]").await.unwrap();
        assert!(response.is_ok());
        assert_eq!(
            response.literals().next(),
            Some(&b"Subject: hi\r\n\r\n* not untagged\r\n"[..])
        );
    }

    #[tokio::test]
    async fn protocol_failures_are_statuses() {
        let connector = server();
        let client = client(&connector, "secret");
        client.connect(false).await.unwrap();
        let response = client.request("XYZZY").await.unwrap();
        assert_eq!(response.status, ImapStatus::Bad);
        assert_eq!(client.noop().await.unwrap().status, ImapStatus::Ok);
    }

    #[tokio::test]
    async fn multi_line_commands_are_rejected_before_sending() {
        let connector = server();
        let client = client(&connector, "secret");
        client.connect(false).await.unwrap();
        let err = client.select("INBOX\r\nA1 DELETE INBOX").await.unwrap_err();
        assert!(matches!(err, MailError::InvalidInput(_)));
        assert!(connector.written().is_empty());
    }

    #[tokio::test]
    async fn logout_closes_the_session() {
        let connector = server();
        let client = client(&connector, "secret");
        client.connect(false).await.unwrap();
        let response = client.logout().await.unwrap();
        assert!(response.is_ok());
        assert_eq!(client.ready_state(), ReadyState::Closed);
    }
}
