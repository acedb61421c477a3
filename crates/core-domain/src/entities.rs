use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Lower-cased header name to folded value.
pub type Headers = HashMap<String, String>;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A fully decomposed RFC822 message. Built once by the parser and never
/// mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Email {
    #[serde(skip)]
    pub raw: String,
    #[serde(skip)]
    pub headers_raw: String,
    #[serde(skip)]
    pub content_raw: String,
    pub headers: Headers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    pub boundary_ids: Vec<String>,
    pub boundaries: Vec<Boundary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_text_headers: Option<Headers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_html_headers: Option<Headers>,
    pub attachments: Vec<Attachment>,
}

impl Email {
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Best available body: plain text when present, otherwise the HTML.
    pub fn body(&self) -> Option<&str> {
        self.body_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(self.body_html.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Boundary {
    pub id: String,
    pub contents: Vec<BoundaryContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoundaryContent {
    #[serde(skip)]
    pub raw: String,
    pub headers: Headers,
    pub content: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    pub is_attachment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_boundary_id: Option<String>,
}

impl BoundaryContent {
    pub fn is_multipart(&self) -> bool {
        self.sub_boundary_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub key: String,
    pub size: usize,
    #[serde(flatten)]
    pub part: BoundaryContent,
}

impl Attachment {
    pub fn filename(&self) -> &str {
        self.part.filename.as_deref().unwrap_or("Untitled")
    }

    pub fn bytes(&self) -> &[u8] {
        &self.part.data
    }
}

impl fmt::Display for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} bytes)",
            self.filename(),
            self.part.mime_type,
            self.size
        )
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            self.from.as_deref().unwrap_or("unknown"),
            self.subject.as_deref().unwrap_or("(no subject)")
        )
    }
}
