pub mod folders;
pub mod format;
pub mod service;
pub mod summary;

pub use folders::{FolderNode, FolderTree, ListEntry};
pub use format::Format;
pub use service::{MailService, SendReport};
pub use summary::MessageSummary;
