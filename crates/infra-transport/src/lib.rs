pub mod memory;
pub mod session;
pub mod websocket;

pub use memory::MemoryConnector;
pub use session::{
    Authorizer, Correlation, Frame, ResponseHandler, Session, SessionConfig,
    DEFAULT_RETRY_INTERVAL, DEFAULT_SUB_PROTOCOL,
};
pub use websocket::WebSocketConnector;
