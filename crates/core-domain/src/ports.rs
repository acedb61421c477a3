use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;
use wiremail_error::MailError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// What the stream reports back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Data(Vec<u8>),
    Error(String),
    Closed,
}

/// Write half of an open duplex stream.
pub trait StreamWriter: Send + Sync {
    /// Queues bytes for delivery. Never blocks.
    fn send(&self, bytes: Vec<u8>) -> Result<(), MailError>;

    /// Bytes queued but not yet written to the wire.
    fn backlog(&self) -> usize;

    fn ready_state(&self) -> ReadyState;

    fn close(&self);
}

pub struct Connection {
    pub writer: Box<dyn StreamWriter>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("ready_state", &self.writer.ready_state())
            .field("backlog", &self.writer.backlog())
            .finish()
    }
}

/// Opens message-based duplex streams. The session layer only ever sees
/// this trait, so tests can swap the tunnel for an in-memory peer.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str, sub_protocol: &str) -> Result<Connection, MailError>;
}
