use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use wiremail_domain::{Connection, Connector, ReadyState, StreamWriter, TransportEvent};
use wiremail_error::MailError;

/// Opens `ws://` / `wss://` tunnels. TLS comes from the `wss` scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str, sub_protocol: &str) -> Result<Connection, MailError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| MailError::invalid_input(format!("bad tunnel url {url}: {e}")))?;
        if !sub_protocol.is_empty() {
            request.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                sub_protocol
                    .parse()
                    .map_err(|_| MailError::invalid_input(format!("bad sub-protocol {sub_protocol:?}")))?,
            );
        }

        let (stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| MailError::transport(format!("connect {url}: {e}")))?;
        debug!(url, sub_protocol, "websocket open");

        let (mut sink, mut source) = stream.split();
        let state = Arc::new(AtomicU8::new(encode_state(ReadyState::Open)));
        let backlog = Arc::new(AtomicUsize::new(0));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

        let writer_state = state.clone();
        let writer_backlog = backlog.clone();
        let writer_events = events_tx.clone();
        tokio::spawn(async move {
            while let Some(outbound) = out_rx.recv().await {
                match outbound {
                    Outbound::Frame(bytes) => {
                        let n = bytes.len();
                        let result = sink.send(Message::Binary(bytes)).await;
                        writer_backlog.fetch_sub(n, Ordering::SeqCst);
                        if let Err(e) = result {
                            warn!(error = %e, "websocket write failed");
                            writer_state.store(encode_state(ReadyState::Closed), Ordering::SeqCst);
                            let _ = writer_events.send(TransportEvent::Error(e.to_string()));
                            return;
                        }
                    }
                    Outbound::Close => {
                        writer_state.store(encode_state(ReadyState::Closing), Ordering::SeqCst);
                        let _ = sink.close().await;
                        writer_state.store(encode_state(ReadyState::Closed), Ordering::SeqCst);
                        return;
                    }
                }
            }
        });

        let reader_state = state.clone();
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Binary(data)) => {
                        let _ = events_tx.send(TransportEvent::Data(data));
                    }
                    Ok(Message::Text(text)) => {
                        let _ = events_tx.send(TransportEvent::Data(text.into_bytes()));
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "websocket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        reader_state.store(encode_state(ReadyState::Closed), Ordering::SeqCst);
                        let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                }
            }
            reader_state.store(encode_state(ReadyState::Closed), Ordering::SeqCst);
            let _ = events_tx.send(TransportEvent::Closed);
        });

        Ok(Connection {
            writer: Box::new(WebSocketWriter {
                outbound: out_tx,
                state,
                backlog,
            }),
            events: events_rx,
        })
    }
}

enum Outbound {
    Frame(Vec<u8>),
    Close,
}

struct WebSocketWriter {
    outbound: mpsc::UnboundedSender<Outbound>,
    state: Arc<AtomicU8>,
    backlog: Arc<AtomicUsize>,
}

impl StreamWriter for WebSocketWriter {
    fn send(&self, bytes: Vec<u8>) -> Result<(), MailError> {
        if self.ready_state() != ReadyState::Open {
            return Err(MailError::transport("websocket is not open"));
        }
        let n = bytes.len();
        self.backlog.fetch_add(n, Ordering::SeqCst);
        self.outbound.send(Outbound::Frame(bytes)).map_err(|_| {
            self.backlog.fetch_sub(n, Ordering::SeqCst);
            MailError::transport("websocket writer stopped")
        })
    }

    fn backlog(&self) -> usize {
        self.backlog.load(Ordering::SeqCst)
    }

    fn ready_state(&self) -> ReadyState {
        decode_state(self.state.load(Ordering::SeqCst))
    }

    fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

fn encode_state(state: ReadyState) -> u8 {
    match state {
        ReadyState::Connecting => 0,
        ReadyState::Open => 1,
        ReadyState::Closing => 2,
        ReadyState::Closed => 3,
    }
}

fn decode_state(raw: u8) -> ReadyState {
    match raw {
        0 => ReadyState::Connecting,
        1 => ReadyState::Open,
        2 => ReadyState::Closing,
        _ => ReadyState::Closed,
    }
}
