use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MailError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MailError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::NotConnected(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Only transport failures are worth reconnecting for. Protocol level
    /// rejections come back as response statuses and never reach here.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
    pub retryable: bool,
}

impl From<&MailError> for ErrorResponse {
    fn from(err: &MailError) -> Self {
        let (code, suggestion) = match err {
            MailError::Transport(_) => (
                "TRANSPORT_ERROR",
                Some("Check the tunnel URL and network; the session reconnects while WIREMAIL_RETRY_MS > 0"),
            ),
            MailError::NotConnected(_) => (
                "NOT_CONNECTED",
                Some("Connect the session before issuing commands"),
            ),
            MailError::Auth(_) => (
                "AUTH_ERROR",
                Some("Check WIREMAIL_USERNAME and WIREMAIL_PASSWORD"),
            ),
            MailError::Protocol(_) => ("PROTOCOL_ERROR", None),
            MailError::InvalidInput(_) => ("INVALID_INPUT", None),
            MailError::Internal(_) => ("INTERNAL_ERROR", Some("Unexpected error")),
        };
        Self {
            code,
            message: err.to_string(),
            suggestion,
            retryable: err.is_retryable(),
        }
    }
}

impl ErrorResponse {
    pub fn to_compact(&self) -> String {
        let mut parts = vec![format!("[{}] {}", self.code, self.message)];
        if let Some(s) = self.suggestion {
            parts.push(format!("Suggestion: {s}"));
        }
        if self.retryable {
            parts.push("(retryable)".to_string());
        }
        parts.join(" | ")
    }
}
