pub mod client;
pub mod handler;

pub use client::{codes, dot_stuff, SmtpClient, DEFAULT_EHLO_NAME};
pub use handler::{reply_code, SmtpHandler, SmtpResponse, SmtpStatus};
