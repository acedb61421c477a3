pub mod client;
pub mod handler;

pub use client::{generate_tag, quote, ImapClient, TAG_LEN};
pub use handler::{ImapHandler, ImapResponse, ImapStatus, ResponseEntry, UNTAGGED};
