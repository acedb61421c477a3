pub mod codec;
pub mod composer;
pub mod header;
pub mod parser;

pub use composer::{compose_email, EmailComposer};
pub use parser::{process_email, process_email_bytes, sanitize_html, split_boundary};
