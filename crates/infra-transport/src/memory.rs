//! Scripted in-memory peer. Tests and offline demos drive protocol clients
//! through it without a network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use wiremail_domain::{Connection, Connector, ReadyState, StreamWriter, TransportEvent};
use wiremail_error::MailError;

type Responder = Arc<dyn Fn(&str) -> Vec<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct Peer {
    greeting: Option<Vec<u8>>,
    responder: Option<Responder>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    open: Option<Arc<AtomicBool>>,
    written: Vec<String>,
    connects: usize,
    refuse: usize,
}

/// Cheap to clone; every clone drives the same peer.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    peer: Arc<Mutex<Peer>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes pushed to the client as soon as each connection opens.
    pub fn with_greeting(self, greeting: impl Into<Vec<u8>>) -> Self {
        self.lock().greeting = Some(greeting.into());
        self
    }

    /// Installs a server: called with every frame the client writes, its
    /// return value is delivered back as separate chunks.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&str) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        self.lock().responder = Some(Arc::new(responder));
    }

    /// Refuses the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.lock().refuse = n;
    }

    /// Delivers bytes on the current connection.
    pub fn push(&self, bytes: impl Into<Vec<u8>>) {
        self.emit(TransportEvent::Data(bytes.into()));
    }

    /// Fails the current connection with a transport error.
    pub fn fail(&self, reason: &str) {
        self.emit(TransportEvent::Error(reason.to_string()));
        self.drop_connection();
    }

    /// Closes the current connection from the server side.
    pub fn close_remote(&self) {
        self.emit(TransportEvent::Closed);
        self.drop_connection();
    }

    /// Every frame written by the client, across all connections.
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    /// Connection attempts so far, refused ones included.
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(events) = &self.lock().events {
            let _ = events.send(event);
        }
    }

    fn drop_connection(&self) {
        let mut peer = self.lock();
        peer.events = None;
        if let Some(open) = peer.open.take() {
            open.store(false, Ordering::SeqCst);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Peer> {
        // A poisoned peer only happens after a panicking test thread.
        self.peer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str, _sub_protocol: &str) -> Result<Connection, MailError> {
        let mut peer = self.lock();
        peer.connects += 1;
        if peer.refuse > 0 {
            peer.refuse -= 1;
            return Err(MailError::transport(format!("connection refused: {url}")));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(greeting) = &peer.greeting {
            let _ = tx.send(TransportEvent::Data(greeting.clone()));
        }
        let open = Arc::new(AtomicBool::new(true));
        peer.events = Some(tx.clone());
        peer.open = Some(open.clone());

        Ok(Connection {
            writer: Box::new(MemoryWriter {
                peer: self.clone(),
                events: tx,
                open,
            }),
            events: rx,
        })
    }
}

struct MemoryWriter {
    peer: MemoryConnector,
    events: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
}

impl StreamWriter for MemoryWriter {
    fn send(&self, bytes: Vec<u8>) -> Result<(), MailError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(MailError::transport("stream is closed"));
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let responder = {
            let mut peer = self.peer.lock();
            peer.written.push(text.clone());
            peer.responder.clone()
        };
        if let Some(responder) = responder {
            for chunk in responder(&text) {
                let _ = self.events.send(TransportEvent::Data(chunk));
            }
        }
        Ok(())
    }

    fn backlog(&self) -> usize {
        0
    }

    fn ready_state(&self) -> ReadyState {
        if self.open.load(Ordering::SeqCst) {
            ReadyState::Open
        } else {
            ReadyState::Closed
        }
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn greeting_and_responses_arrive_in_order() {
        let connector = MemoryConnector::new().with_greeting(b"hi\r\n".to_vec());
        connector.respond_with(|frame| vec![frame.to_uppercase().into_bytes()]);

        let mut conn = connector.connect("memory://", "binary").await.unwrap();
        conn.writer.send(b"abc\r\n".to_vec()).unwrap();

        assert_eq!(conn.events.recv().await, Some(TransportEvent::Data(b"hi\r\n".to_vec())));
        assert_eq!(conn.events.recv().await, Some(TransportEvent::Data(b"ABC\r\n".to_vec())));
        assert_eq!(connector.written(), vec!["abc\r\n".to_string()]);
    }

    #[tokio::test]
    async fn closed_writer_rejects_sends() {
        let connector = MemoryConnector::new();
        let mut conn = connector.connect("memory://", "binary").await.unwrap();
        connector.close_remote();

        assert_eq!(conn.events.recv().await, Some(TransportEvent::Closed));
        assert_eq!(conn.writer.ready_state(), ReadyState::Closed);
        assert!(conn.writer.send(b"x".to_vec()).is_err());
    }

    #[tokio::test]
    async fn refused_attempts_are_counted() {
        let connector = MemoryConnector::new();
        connector.refuse_next(1);
        assert!(connector.connect("memory://", "").await.is_err());
        assert!(connector.connect("memory://", "").await.is_ok());
        assert_eq!(connector.connects(), 2);
    }
}
