use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecipientKind {
    To,
    Cc,
    Bcc,
}

impl fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::To => write!(f, "To"),
            Self::Cc => write!(f, "Cc"),
            Self::Bcc => write!(f, "Bcc"),
        }
    }
}

impl FromStr for RecipientKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "to" => Ok(Self::To),
            "cc" => Ok(Self::Cc),
            "bcc" => Ok(Self::Bcc),
            _ => Err(format!("unknown recipient type: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub kind: RecipientKind,
    pub address: String,
}

impl Recipient {
    pub fn to(address: impl Into<String>) -> Self {
        Self {
            kind: RecipientKind::To,
            address: address.into(),
        }
    }

    pub fn cc(address: impl Into<String>) -> Self {
        Self {
            kind: RecipientKind::Cc,
            address: address.into(),
        }
    }

    pub fn bcc(address: impl Into<String>) -> Self {
        Self {
            kind: RecipientKind::Bcc,
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeAttachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// What the compose surface hands over for serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeData {
    pub from: String,
    pub subject: String,
    pub recipients: Vec<Recipient>,
    pub body_html: String,
    pub attachments: Vec<ComposeAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedEmail {
    pub boundary_id: String,
    pub message_id: String,
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
    pub text_part: String,
    pub html_part: String,
    pub attachment_parts: Vec<String>,
    pub payload: String,
}

impl ComposedEmail {
    /// Every address the SMTP envelope needs, bcc included.
    pub fn envelope_recipients(&self) -> Vec<String> {
        [Some(&self.to), self.cc.as_ref(), self.bcc.as_ref()]
            .into_iter()
            .flatten()
            .flat_map(|list| list.split(','))
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_kind_parses_case_insensitively() {
        assert_eq!("BCC".parse::<RecipientKind>(), Ok(RecipientKind::Bcc));
        assert!("reply-to".parse::<RecipientKind>().is_err());
    }

    #[test]
    fn envelope_includes_every_list() {
        let composed = ComposedEmail {
            boundary_id: "b".into(),
            message_id: "<m@x>".into(),
            from: "me@x".into(),
            to: "a@x".into(),
            cc: Some("b@x, c@x".into()),
            bcc: Some("d@x".into()),
            text_part: String::new(),
            html_part: String::new(),
            attachment_parts: vec![],
            payload: String::new(),
        };
        assert_eq!(
            composed.envelope_recipients(),
            vec!["a@x", "b@x", "c@x", "d@x"]
        );
    }
}
