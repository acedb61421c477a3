use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, info};
use wiremail_domain::{Connector, ReadyState};
use wiremail_error::MailError;
use wiremail_transport::{Authorizer, Correlation, Frame, Session, SessionConfig};

use crate::handler::{SmtpHandler, SmtpResponse};

pub const DEFAULT_EHLO_NAME: &str = "localhost";

pub mod codes {
    pub const READY: u16 = 220;
    pub const CLOSING: u16 = 221;
    pub const AUTH_OK: u16 = 235;
    pub const OK: u16 = 250;
    pub const AUTH_CONTINUE: u16 = 334;
    pub const START_DATA: u16 = 354;
}

/// Sequential reply-code client. One instance owns one session.
pub struct SmtpClient {
    session: Session<SmtpHandler>,
    ehlo_name: String,
}

impl SmtpClient {
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_ehlo_name(config, connector, DEFAULT_EHLO_NAME)
    }

    pub fn with_ehlo_name(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        ehlo_name: impl Into<String>,
    ) -> Self {
        let ehlo_name = ehlo_name.into();
        Self {
            session: Session::with_authorizer(
                config,
                connector,
                SmtpHandler::new(),
                Arc::new(AuthLogin {
                    ehlo_name: ehlo_name.clone(),
                }),
            ),
            ehlo_name,
        }
    }

    pub async fn connect(&self, authorize: bool) -> Result<(), MailError> {
        self.session.connect(authorize).await
    }

    /// Sends `COMMAND` and judges the reply against `expected`. A mismatch
    /// is a failed response, not an error.
    pub async fn request(&self, command: &str, expected: u16) -> Result<SmtpResponse, MailError> {
        reject_line_breaks(command)?;
        exchange(&self.session, Frame::new(format!("{command}\r\n")), expected).await
    }

    /// EHLO, AUTH LOGIN, username, password. Returns the first failing
    /// step's response or the final 235.
    pub async fn authorize(&self) -> Result<SmtpResponse, MailError> {
        auth_login(&self.session, &self.ehlo_name).await
    }

    /// MAIL FROM, RCPT TO for each recipient, DATA, payload, QUIT. Stops at
    /// the first step whose reply does not match.
    pub async fn send_mail(
        &self,
        from: &str,
        recipients: &[String],
        payload: &str,
    ) -> Result<SmtpResponse, MailError> {
        if recipients.is_empty() {
            return Err(MailError::invalid_input("at least one recipient is required"));
        }

        let response = self.request(&format!("MAIL FROM:<{}>", bare_address(from)), codes::OK).await?;
        if !response.is_success() {
            return Ok(response);
        }
        for recipient in recipients {
            let response = self
                .request(&format!("RCPT TO:<{}>", bare_address(recipient)), codes::OK)
                .await?;
            if !response.is_success() {
                return Ok(response);
            }
        }
        let response = self.request("DATA", codes::START_DATA).await?;
        if !response.is_success() {
            return Ok(response);
        }

        let data = dot_stuff(payload);
        let frame = Frame::sensitive(data, format!("<message body, {} bytes>", payload.len()));
        let response = exchange(&self.session, frame, codes::OK).await?;
        if !response.is_success() {
            return Ok(response);
        }
        info!(recipients = recipients.len(), bytes = payload.len(), "message accepted");
        self.quit().await
    }

    pub async fn noop(&self) -> Result<SmtpResponse, MailError> {
        self.request("NOOP", codes::OK).await
    }

    /// The server hangs up after QUIT, so the session is closed for good
    /// instead of being reconnected.
    pub async fn quit(&self) -> Result<SmtpResponse, MailError> {
        let response = self.request("QUIT", codes::CLOSING).await;
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

    pub fn session(&self) -> &Session<SmtpHandler> {
        &self.session
    }
}

struct AuthLogin {
    ehlo_name: String,
}

#[async_trait]
impl Authorizer<SmtpHandler> for AuthLogin {
    async fn authorize(&self, session: &Session<SmtpHandler>) -> Result<(), MailError> {
        let response = auth_login(session, &self.ehlo_name).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(MailError::auth(response.lines.join(" ")))
        }
    }
}

async fn auth_login(session: &Session<SmtpHandler>, ehlo_name: &str) -> Result<SmtpResponse, MailError> {
    let credentials = &session.config().credentials;
    let steps = [
        (Frame::new(format!("EHLO {ehlo_name}\r\n")), codes::OK),
        (Frame::new("AUTH LOGIN\r\n"), codes::AUTH_CONTINUE),
        (
            Frame::sensitive(format!("{}\r\n", STANDARD.encode(&credentials.username)), "<username>"),
            codes::AUTH_CONTINUE,
        ),
        (
            Frame::sensitive(format!("{}\r\n", STANDARD.encode(&credentials.password)), "<password>"),
            codes::AUTH_OK,
        ),
    ];

    let mut last = None;
    for (frame, expected) in steps {
        let response = exchange(session, frame, expected).await?;
        if !response.is_success() {
            return Ok(response);
        }
        last = Some(response);
    }
    last.ok_or_else(|| MailError::internal("empty authorization sequence"))
}

async fn exchange(
    session: &Session<SmtpHandler>,
    frame: Frame,
    expected: u16,
) -> Result<SmtpResponse, MailError> {
    let shown = frame.display().to_string();
    let lines = session.request(frame, Correlation::Ordered).await?;
    let response = SmtpResponse::judge(lines, expected);
    debug!(command = %shown, expected, code = ?response.code, status = ?response.status, "smtp reply");
    Ok(response)
}

fn reject_line_breaks(command: &str) -> Result<(), MailError> {
    if command.contains(['\r', '\n']) {
        return Err(MailError::invalid_input("SMTP command must be a single line"));
    }
    Ok(())
}

/// `Name <a@b>` to `a@b`; bare addresses pass through.
fn bare_address(address: &str) -> &str {
    let address = address.trim();
    match (address.rfind('<'), address.rfind('>')) {
        (Some(open), Some(close)) if open < close => &address[open + 1..close],
        _ => address,
    }
}

/// Doubles leading dots and appends the `CRLF.CRLF` terminator.
pub fn dot_stuff(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len() + 16);
    let mut at_line_start = true;
    for c in payload.chars() {
        if at_line_start && c == '.' {
            out.push('.');
        }
        out.push(c);
        at_line_start = c == '\n';
    }
    if !out.ends_with("\r\n") {
        if out.ends_with('\n') {
            out.pop();
        }
        out.push_str("\r\n");
    }
    out.push_str(".\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::SmtpStatus;
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremail_domain::Credentials;
    use wiremail_transport::MemoryConnector;

    /// Replies by command; `fail_on` makes the first command with that
    /// prefix answer 550.
    fn server(fail_on: Option<&'static str>) -> MemoryConnector {
        let connector = MemoryConnector::new().with_greeting(b"220 smtp.example.com ESMTP\r\n".to_vec());
        let in_data = Arc::new(Mutex::new(false));
        connector.respond_with(move |frame| {
            let mut in_data = in_data.lock().unwrap();
            if *in_data {
                *in_data = false;
                return vec![b"250 2.0.0 queued as 42\r\n".to_vec()];
            }
            if fail_on.is_some_and(|prefix| frame.starts_with(prefix)) {
                return vec![b"550 5.1.1 rejected\r\n".to_vec()];
            }
            let reply: &[u8] = match frame.trim_end() {
                f if f.starts_with("EHLO") => b"250-smtp.example.com\r\n250 AUTH LOGIN\r\n",
                "AUTH LOGIN" => b"334 VXNlcm5hbWU6\r\n",
                "Ym9i" => b"334 UGFzc3dvcmQ6\r\n",
                "aHVudGVyMg==" => b"235 2.7.0 accepted\r\n",
                "DATA" => {
                    *in_data = true;
                    b"354 go ahead\r\n"
                }
                "QUIT" => b"221 bye\r\n",
                _ if frame.starts_with("MAIL") || frame.starts_with("RCPT") || frame.starts_with("NOOP") => {
                    b"250 ok\r\n"
                }
                _ => b"535 5.7.8 authentication failed\r\n",
            };
            vec![reply.to_vec()]
        });
        connector
    }

    fn client(connector: &MemoryConnector, password: &str) -> SmtpClient {
        let config = SessionConfig::new("memory://smtp", Credentials::new("bob", password))
            .with_retry_interval(Duration::ZERO);
        SmtpClient::with_ehlo_name(config, Arc::new(connector.clone()), "client.test")
    }

    #[tokio::test]
    async fn authorize_runs_the_login_sequence() {
        let connector = server(None);
        let client = client(&connector, "hunter2");
        client.connect(true).await.unwrap();
        assert_eq!(
            connector.written(),
            vec!["EHLO client.test\r\n", "AUTH LOGIN\r\n", "Ym9i\r\n", "aHVudGVyMg==\r\n"]
        );
    }

    #[tokio::test]
    async fn wrong_password_surfaces_the_failing_step() {
        let connector = server(None);
        let client = client(&connector, "nope");
        client.connect(false).await.unwrap();

        let response = client.authorize().await.unwrap();
        assert_eq!(response.status, SmtpStatus::Failure);
        assert_eq!(response.expected, codes::AUTH_OK);
        assert_eq!(response.code, Some(535));

        let err = client.session().connect(true).await.unwrap_err();
        assert!(matches!(err, MailError::Auth(_)));
    }

    #[tokio::test]
    async fn multi_line_replies_are_captured_whole() {
        let connector = server(None);
        let client = client(&connector, "hunter2");
        client.connect(false).await.unwrap();
        let response = client.request("EHLO x", codes::OK).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.lines, vec!["250-smtp.example.com", "250 AUTH LOGIN"]);
    }

    #[tokio::test]
    async fn send_mail_returns_the_quit_reply() {
        let connector = server(None);
        let client = client(&connector, "hunter2");
        client.connect(true).await.unwrap();

        let recipients = vec!["a@example.com".to_string(), "Bee <b@example.com>".to_string()];
        let payload = "Subject: hi\r\n\r\n.leading dot\r\nbody\r\n";
        let response = client.send_mail("me@example.com", &recipients, payload).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.code, Some(codes::CLOSING));

        let written = connector.written();
        let tail: Vec<&str> = written[4..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "MAIL FROM:<me@example.com>\r\n",
                "RCPT TO:<a@example.com>\r\n",
                "RCPT TO:<b@example.com>\r\n",
                "DATA\r\n",
                "Subject: hi\r\n\r\n..leading dot\r\nbody\r\n.\r\n",
                "QUIT\r\n",
            ]
        );
    }

    #[tokio::test]
    async fn failing_step_short_circuits() {
        let connector = server(Some("RCPT"));
        let client = client(&connector, "hunter2");
        client.connect(false).await.unwrap();

        let recipients = vec!["a@example.com".to_string(), "b@example.com".to_string()];
        let response = client.send_mail("me@example.com", &recipients, "x").await.unwrap();
        assert_eq!(response.status, SmtpStatus::Failure);
        assert_eq!(response.lines, vec!["550 5.1.1 rejected"]);
        assert_eq!(connector.written().len(), 2);
    }

    #[tokio::test]
    async fn send_mail_needs_recipients() {
        let connector = server(None);
        let client = client(&connector, "hunter2");
        client.connect(false).await.unwrap();
        let err = client.send_mail("me@example.com", &[], "x").await.unwrap_err();
        assert!(matches!(err, MailError::InvalidInput(_)));
    }

    #[test]
    fn dot_stuffing_terminates_once() {
        assert_eq!(dot_stuff("a\r\n.b\r\n"), "a\r\n..b\r\n.\r\n");
        assert_eq!(dot_stuff(".x"), "..x\r\n.\r\n");
        assert_eq!(dot_stuff("tail\n"), "tail\r\n.\r\n");
    }

    #[test]
    fn addresses_are_unwrapped() {
        assert_eq!(bare_address("Ann <ann@x.org>"), "ann@x.org");
        assert_eq!(bare_address(" ann@x.org "), "ann@x.org");
    }
}
