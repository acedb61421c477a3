use serde::Serialize;
use std::fmt;
use tracing::trace;
use wiremail_error::MailError;
use wiremail_transport::{Correlation, ResponseHandler};

pub const UNTAGGED: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImapStatus {
    Ok,
    No,
    Bad,
}

impl ImapStatus {
    /// Unknown completion codes are treated as BAD.
    pub fn from_code(code: &str) -> Self {
        match code.to_ascii_uppercase().as_str() {
            "OK" | "PREAUTH" => Self::Ok,
            "NO" => Self::No,
            _ => Self::Bad,
        }
    }
}

impl fmt::Display for ImapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::No => write!(f, "NO"),
            Self::Bad => write!(f, "BAD"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResponseEntry {
    /// A queued line split into marker, subcode and remainder.
    Line {
        marker: String,
        code: String,
        text: String,
    },
    /// Continuation text or literal octets, byte for byte.
    Literal { octets: Vec<u8> },
}

impl ResponseEntry {
    fn line(raw: &str) -> Self {
        let mut parts = raw.splitn(3, ' ');
        Self::Line {
            marker: parts.next().unwrap_or("").to_string(),
            code: parts.next().unwrap_or("").to_string(),
            text: parts.next().unwrap_or("").to_string(),
        }
    }

    pub fn is_untagged(&self) -> bool {
        matches!(self, Self::Line { marker, .. } if marker == UNTAGGED)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImapResponse {
    pub tag: String,
    pub status: ImapStatus,
    /// Text after the status code on the completion line.
    pub text: String,
    pub data: Vec<ResponseEntry>,
}

impl ImapResponse {
    pub fn is_ok(&self) -> bool {
        self.status == ImapStatus::Ok
    }

    /// Untagged lines whose subcode or first word of the remainder is
    /// `name`, e.g. `LIST` in `* LIST (...)` or `FETCH` in `* 3 FETCH (...)`.
    pub fn untagged<'a>(&'a self, name: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.data.iter().filter_map(move |entry| match entry {
            ResponseEntry::Line { marker, code, text } if marker == UNTAGGED => {
                if code.eq_ignore_ascii_case(name) {
                    Some((code.as_str(), text.as_str()))
                } else {
                    let (word, rest) = text.split_once(' ').unwrap_or((text.as_str(), ""));
                    word.eq_ignore_ascii_case(name).then_some((code.as_str(), rest))
                }
            }
            _ => None,
        })
    }

    pub fn literals(&self) -> impl Iterator<Item = &[u8]> {
        self.data.iter().filter_map(|entry| match entry {
            ResponseEntry::Literal { octets } => Some(octets.as_slice()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Awaiting {
    Greeting,
    Tag(String),
}

/// Splits the inbound stream into lines, queues untagged and tagged lines,
/// and folds everything else (including literal octets) into a
/// continuation buffer until the pending tag completes.
#[derive(Debug, Default)]
pub struct ImapHandler {
    buffer: Vec<u8>,
    awaiting: Option<Awaiting>,
    queue: Vec<ResponseEntry>,
    continuation: Vec<u8>,
    literal_remaining: usize,
}

impl ImapHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush_continuation(&mut self) {
        let octets = std::mem::take(&mut self.continuation);
        if octets.is_empty() || octets == b"\r\n" {
            return;
        }
        self.queue.push(ResponseEntry::Literal { octets });
    }

    fn process_line(&mut self, line: &str) -> Option<ImapResponse> {
        let untagged = line == UNTAGGED || line.starts_with("* ");
        let tagged = match &self.awaiting {
            Some(Awaiting::Tag(tag)) => line
                .strip_prefix(tag.as_str())
                .is_some_and(|rest| rest.starts_with(' ')),
            _ => false,
        };

        if !untagged && !tagged {
            self.continuation.extend_from_slice(line.as_bytes());
            self.continuation.extend_from_slice(b"\r\n");
            self.start_literal(line);
            return None;
        }

        self.flush_continuation();
        let entry = ResponseEntry::line(line);

        if tagged {
            let ResponseEntry::Line { marker, code, text } = entry else {
                return None;
            };
            self.awaiting = None;
            return Some(ImapResponse {
                tag: marker,
                status: ImapStatus::from_code(&code),
                text,
                data: std::mem::take(&mut self.queue),
            });
        }

        self.queue.push(entry);
        if self.awaiting == Some(Awaiting::Greeting) {
            self.awaiting = None;
            let data = std::mem::take(&mut self.queue);
            let (status, text) = match data.last() {
                Some(ResponseEntry::Line { code, text, .. }) => {
                    (ImapStatus::from_code(code), text.clone())
                }
                _ => (ImapStatus::Bad, String::new()),
            };
            return Some(ImapResponse {
                tag: UNTAGGED.to_string(),
                status,
                text,
                data,
            });
        }
        self.start_literal(line);
        None
    }

    /// A line ending in `{N}` announces N octets that belong to it
    /// regardless of what they look like.
    fn start_literal(&mut self, line: &str) {
        let Some(size) = literal_size(line) else {
            return;
        };
        self.flush_continuation();
        self.literal_remaining = size;
        if size == 0 {
            self.queue.push(ResponseEntry::Literal { octets: Vec::new() });
        }
    }
}

impl ResponseHandler for ImapHandler {
    type Response = ImapResponse;

    fn expect(&mut self, correlation: Correlation) {
        self.awaiting = Some(match correlation {
            Correlation::Tag(tag) => Awaiting::Tag(tag),
            Correlation::Greeting | Correlation::Ordered => Awaiting::Greeting,
        });
    }

    fn feed(&mut self, bytes: &[u8]) -> Option<ImapResponse> {
        self.buffer.extend_from_slice(bytes);
        loop {
            if self.literal_remaining > 0 {
                let take = self.literal_remaining.min(self.buffer.len());
                self.continuation.extend(self.buffer.drain(..take));
                self.literal_remaining -= take;
                if self.literal_remaining > 0 {
                    return None;
                }
                // The literal is complete: keep it as its own entry.
                let octets = std::mem::take(&mut self.continuation);
                self.queue.push(ResponseEntry::Literal { octets });
                continue;
            }

            let end = self.buffer.windows(2).position(|w| w == b"\r\n")?;
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let line = String::from_utf8_lossy(&raw[..end]).into_owned();
            trace!(line = %line, "imap line");
            if let Some(response) = self.process_line(&line) {
                return Some(response);
            }
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn check_greeting(&self, greeting: &ImapResponse) -> Result<(), MailError> {
        if greeting.is_ok() {
            return Ok(());
        }
        Err(MailError::protocol(format!(
            "server refused session: {} {}",
            greeting
                .data
                .last()
                .and_then(|e| match e {
                    ResponseEntry::Line { code, .. } => Some(code.as_str()),
                    _ => None,
                })
                .unwrap_or(""),
            greeting.text
        )))
    }
}

fn literal_size(line: &str) -> Option<usize> {
    let open = line.strip_suffix('}')?.rfind('{')?;
    let digits = &line[open + 1..line.len() - 1];
    let digits = digits.strip_suffix('+').unwrap_or(digits);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
