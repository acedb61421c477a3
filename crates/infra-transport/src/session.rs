use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use wiremail_domain::{Connector, Credentials, ReadyState, StreamWriter, TransportEvent};
use wiremail_error::MailError;

pub const DEFAULT_SUB_PROTOCOL: &str = "binary";
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub sub_protocol: String,
    /// Delay before reconnecting after a transport failure. Zero disables
    /// reconnection.
    pub retry_interval: Duration,
    /// Log every outbound frame and inbound chunk at debug level.
    pub debug: bool,
    pub credentials: Credentials,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            url: url.into(),
            sub_protocol: DEFAULT_SUB_PROTOCOL.to_string(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            debug: false,
            credentials,
        }
    }

    pub fn with_sub_protocol(mut self, sub_protocol: impl Into<String>) -> Self {
        self.sub_protocol = sub_protocol.into();
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// How the response handler recognizes the end of the pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    /// The server's unsolicited banner, expected right after connecting.
    Greeting,
    /// Resolved by the line carrying this tag.
    Tag(String),
    /// Resolved by the next complete reply, in arrival order.
    Ordered,
}

/// Protocol specific framing of inbound bytes. Lives inside the session
/// and is driven by the reader task.
pub trait ResponseHandler: Send + 'static {
    type Response: Send + 'static;

    /// Arms the handler for the request about to be sent.
    fn expect(&mut self, correlation: Correlation);

    /// Consumes an inbound chunk. Returns the response once the armed
    /// request is complete; partial input is kept for the next chunk.
    fn feed(&mut self, bytes: &[u8]) -> Option<Self::Response>;

    /// Drops buffered input and the armed request.
    fn reset(&mut self);

    /// Rejects a banner that announces the server will not talk to us.
    fn check_greeting(&self, _greeting: &Self::Response) -> Result<(), MailError> {
        Ok(())
    }
}

/// Runs a protocol's login sequence over an open session.
#[async_trait]
pub trait Authorizer<H: ResponseHandler>: Send + Sync {
    async fn authorize(&self, session: &Session<H>) -> Result<(), MailError>;
}

/// One outbound command. `display` is what the debug log shows, so
/// secrets can be masked without touching the wire bytes.
#[derive(Clone)]
pub struct Frame {
    bytes: Vec<u8>,
    display: String,
}

impl Frame {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            display: text.trim_end().to_string(),
            bytes: text.into_bytes(),
        }
    }

    pub fn sensitive(text: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            bytes: text.into().into_bytes(),
            display: display.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn display(&self) -> &str {
        &self.display
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Frame").field(&self.display).finish()
    }
}

type Pending<R> = oneshot::Sender<Result<R, MailError>>;

struct State<H: ResponseHandler> {
    handler: H,
    pending: Option<Pending<H::Response>>,
    writer: Option<Box<dyn StreamWriter>>,
}

struct Inner<H: ResponseHandler> {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    authorizer: Option<Arc<dyn Authorizer<H>>>,
    state: Mutex<State<H>>,
    /// Single-flight guard: held from send until the response resolves.
    flight: tokio::sync::Mutex<()>,
    /// Bumped on every (re)connect and close so stale reader tasks are ignored.
    generation: AtomicU64,
    request_bytes: AtomicU64,
    total_bytes: AtomicU64,
    closed: AtomicBool,
    reconnecting: AtomicBool,
    authorize_on_connect: AtomicBool,
}

/// A reconnecting duplex stream with at most one request in flight.
/// Cloning yields another handle to the same session.
pub struct Session<H: ResponseHandler> {
    inner: Arc<Inner<H>>,
}

impl<H: ResponseHandler> Clone for Session<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: ResponseHandler> Session<H> {
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>, handler: H) -> Self {
        Self::build(config, connector, handler, None)
    }

    /// Same as [`Session::new`] with a login sequence run after every
    /// successful (re)connect when `connect(true)` was requested.
    pub fn with_authorizer(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        handler: H,
        authorizer: Arc<dyn Authorizer<H>>,
    ) -> Self {
        Self::build(config, connector, handler, Some(authorizer))
    }

    fn build(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        handler: H,
        authorizer: Option<Arc<dyn Authorizer<H>>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                authorizer,
                state: Mutex::new(State {
                    handler,
                    pending: None,
                    writer: None,
                }),
                flight: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                request_bytes: AtomicU64::new(0),
                total_bytes: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                authorize_on_connect: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Opens the stream, waits for the server greeting and, when
    /// `authorize` is set, runs the login sequence. Transport failures
    /// schedule a reconnect (unless disabled) and are still reported.
    pub async fn connect(&self, authorize: bool) -> Result<(), MailError> {
        self.inner.closed.store(false, Ordering::SeqCst);
        self.inner
            .authorize_on_connect
            .store(authorize, Ordering::SeqCst);
        self.establish().await
    }

    async fn establish(&self) -> Result<(), MailError> {
        let result = self.open().await;
        if let Err(err) = &result {
            if err.is_retryable() {
                self.schedule_reconnect();
            }
        }
        result
    }

    async fn open(&self) -> Result<(), MailError> {
        let config = &self.inner.config;
        {
            let _flight = self.inner.flight.lock().await;
            info!(url = %config.url, sub_protocol = %config.sub_protocol, "connecting");
            let connection = self
                .inner
                .connector
                .connect(&config.url, &config.sub_protocol)
                .await?;

            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let (tx, rx) = oneshot::channel();
            {
                let mut state = self.state()?;
                if let Some(old) = state.writer.take() {
                    old.close();
                }
                state.handler.reset();
                state.handler.expect(Correlation::Greeting);
                state.pending = Some(tx);
                state.writer = Some(connection.writer);
            }
            self.inner.request_bytes.store(0, Ordering::SeqCst);
            tokio::spawn(pump(self.clone(), generation, connection.events));

            // The guard stays held until the banner arrives so it cannot
            // end up in the first real request's response.
            let greeting = rx
                .await
                .map_err(|_| MailError::transport("connection lost before greeting"))??;
            let mut state = self.state()?;
            if let Err(err) = state.handler.check_greeting(&greeting) {
                // Retire the pump so the close below is not taken for a drop.
                self.inner.generation.fetch_add(1, Ordering::SeqCst);
                if let Some(writer) = state.writer.take() {
                    writer.close();
                }
                state.handler.reset();
                warn!(url = %config.url, error = %err, "greeting rejected");
                return Err(err);
            }
            debug!(url = %config.url, "greeting received");
        }

        if self.inner.authorize_on_connect.load(Ordering::SeqCst) {
            if let Some(authorizer) = self.inner.authorizer.clone() {
                authorizer.authorize(self).await?;
                info!(user = %config.credentials.username, "authorized");
            }
        }
        Ok(())
    }

    /// Sends one command and waits for the handler to resolve it. Callers
    /// queue behind any request already in flight.
    pub async fn request(
        &self,
        frame: Frame,
        correlation: Correlation,
    ) -> Result<H::Response, MailError> {
        let _flight = self.inner.flight.lock().await;
        let rx = {
            let mut guard = self.state()?;
            let state = &mut *guard;
            let Some(writer) = state.writer.as_ref() else {
                return Err(MailError::not_connected(&self.inner.config.url));
            };
            if self.inner.config.debug {
                debug!(frame = %frame.display(), "send");
            }
            state.handler.expect(correlation);
            let (tx, rx) = oneshot::channel();
            state.pending = Some(tx);
            self.inner.request_bytes.store(0, Ordering::SeqCst);
            if let Err(err) = writer.send(frame.bytes) {
                state.pending = None;
                return Err(err);
            }
            rx
        };
        rx.await
            .map_err(|_| MailError::transport("request abandoned: connection lost"))?
    }

    /// Closes the stream for good: no reconnect, pending request fails.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut state) = self.state() {
            if let Some(writer) = state.writer.take() {
                writer.close();
            }
            state.handler.reset();
            if let Some(pending) = state.pending.take() {
                let _ = pending.send(Err(MailError::transport("session closed")));
            }
        }
        info!(url = %self.inner.config.url, "session closed");
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state()
            .ok()
            .and_then(|state| state.writer.as_ref().map(|w| w.ready_state()))
            .unwrap_or(ReadyState::Closed)
    }

    /// Bytes handed to the stream but not yet flushed.
    pub fn backlog(&self) -> usize {
        self.state()
            .ok()
            .and_then(|state| state.writer.as_ref().map(|w| w.backlog()))
            .unwrap_or(0)
    }

    /// Bytes received since the current request was sent.
    pub fn request_bytes(&self) -> u64 {
        self.inner.request_bytes.load(Ordering::SeqCst)
    }

    /// Bytes received over the lifetime of the session, across reconnects.
    pub fn total_bytes(&self) -> u64 {
        self.inner.total_bytes.load(Ordering::SeqCst)
    }

    fn state(&self) -> Result<MutexGuard<'_, State<H>>, MailError> {
        self.inner
            .state
            .lock()
            .map_err(|e| MailError::internal(format!("session state poisoned: {e}")))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    fn on_data(&self, generation: u64, bytes: &[u8]) {
        if !self.is_current(generation) {
            return;
        }
        let n = bytes.len() as u64;
        self.inner.request_bytes.fetch_add(n, Ordering::SeqCst);
        self.inner.total_bytes.fetch_add(n, Ordering::SeqCst);
        if self.inner.config.debug {
            debug!(bytes = n, chunk = %String::from_utf8_lossy(bytes), "recv");
        } else {
            trace!(bytes = n, "recv");
        }

        let Ok(mut state) = self.state() else {
            warn!("dropping inbound chunk: session state poisoned");
            return;
        };
        if let Some(response) = state.handler.feed(bytes) {
            match state.pending.take() {
                Some(pending) => {
                    let _ = pending.send(Ok(response));
                }
                None => trace!("response with no pending request"),
            }
        }
    }

    fn on_failure(&self, generation: u64, err: MailError) {
        if !self.is_current(generation) {
            return;
        }
        warn!(url = %self.inner.config.url, error = %err, "transport failure");
        if let Ok(mut state) = self.state() {
            state.writer = None;
            state.handler.reset();
            if let Some(pending) = state.pending.take() {
                let _ = pending.send(Err(err));
            }
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        let interval = self.inner.config.retry_interval;
        if interval.is_zero() || self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(url = %self.inner.config.url, delay_ms = interval.as_millis() as u64, "reconnect scheduled");
        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            session.inner.reconnecting.store(false, Ordering::SeqCst);
            if session.inner.closed.load(Ordering::SeqCst) {
                return;
            }
            if let Err(err) = session.establish().await {
                warn!(error = %err, "reconnect failed");
            }
        });
    }
}

/// Reader task: forwards stream events into the session until the stream
/// ends or fails.
async fn pump<H: ResponseHandler>(
    session: Session<H>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Data(bytes) => session.on_data(generation, &bytes),
            TransportEvent::Error(reason) => {
                session.on_failure(generation, MailError::transport(reason));
                return;
            }
            TransportEvent::Closed => {
                session.on_failure(generation, MailError::transport("connection closed by peer"));
                return;
            }
        }
    }
    session.on_failure(generation, MailError::transport("event stream ended"));
}
