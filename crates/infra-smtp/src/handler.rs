use serde::Serialize;
use tracing::trace;
use wiremail_error::MailError;
use wiremail_transport::{Correlation, ResponseHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpStatus {
    Success,
    Failure,
}

/// One complete SMTP reply judged against the code the command expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmtpResponse {
    pub status: SmtpStatus,
    pub expected: u16,
    /// Numeric prefix of the first line, when it has one.
    pub code: Option<u16>,
    pub lines: Vec<String>,
}

impl SmtpResponse {
    pub fn judge(lines: Vec<String>, expected: u16) -> Self {
        let code = lines.first().and_then(|line| reply_code(line));
        let status = if code == Some(expected) {
            SmtpStatus::Success
        } else {
            SmtpStatus::Failure
        };
        Self {
            status,
            expected,
            code,
            lines,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SmtpStatus::Success
    }

    /// Reply text without the code prefixes, one entry per line.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.get(4..).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The 3-digit prefix of a reply line.
pub fn reply_code(line: &str) -> Option<u16> {
    let prefix = line.get(..3)?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}

/// `NNN-text` continues a reply; anything else closes it.
fn is_continuation(line: &str) -> bool {
    line.len() >= 4 && line.as_bytes()[3] == b'-'
}

/// Collects reply lines until the window closes. Replies are matched to
/// commands purely by arrival order.
#[derive(Debug, Default)]
pub struct SmtpHandler {
    buffer: Vec<u8>,
    lines: Vec<String>,
    armed: bool,
}

impl SmtpHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every complete line still buffered; a partial tail stays.
    fn discard_complete_lines(&mut self) {
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\r\n") {
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            trace!(line = %String::from_utf8_lossy(&raw[..end]), "discarding unsolicited smtp line");
        }
    }
}

impl ResponseHandler for SmtpHandler {
    type Response = Vec<String>;

    fn expect(&mut self, _correlation: Correlation) {
        self.armed = true;
        self.lines.clear();
    }

    fn feed(&mut self, bytes: &[u8]) -> Option<Vec<String>> {
        self.buffer.extend_from_slice(bytes);
        loop {
            let end = self.buffer.windows(2).position(|w| w == b"\r\n")?;
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let line = String::from_utf8_lossy(&raw[..end]).into_owned();
            if !self.armed {
                trace!(line = %line, "discarding unsolicited smtp line");
                continue;
            }
            let last = !is_continuation(&line);
            self.lines.push(line);
            if last {
                self.armed = false;
                self.discard_complete_lines();
                return Some(std::mem::take(&mut self.lines));
            }
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn check_greeting(&self, greeting: &Vec<String>) -> Result<(), MailError> {
        match greeting.first().and_then(|line| reply_code(line)) {
            Some(code) if (200..300).contains(&code) => Ok(()),
            _ => Err(MailError::protocol(format!(
                "server refused session: {}",
                greeting.join(" ")
            ))),
        }
    }
}
