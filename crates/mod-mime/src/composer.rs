use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use wiremail_domain::{ComposeAttachment, ComposeData, ComposedEmail, RecipientKind};

use crate::codec::{
    encode_base64_wrapped, encode_header_value, encode_quoted_printable, BASE64_LINE_WIDTH,
};

/// Builds `multipart/alternative` payloads ready for SMTP `DATA`.
pub struct EmailComposer {
    domain: String,
}

impl Default for EmailComposer {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl EmailComposer {
    /// `domain` ends up on the right-hand side of generated Message-IDs.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    pub fn compose(&self, data: &ComposeData) -> ComposedEmail {
        self.compose_at(data, &random_token(28), Utc::now())
    }

    fn compose_at(&self, data: &ComposeData, boundary_id: &str, date: DateTime<Utc>) -> ComposedEmail {
        let recipients = Recipients::fold(data);
        let message_id = format!("<{}.{}@{}>", random_token(16), date.timestamp(), self.domain);

        let text_part = text_part(boundary_id);
        let html_part = html_part(boundary_id, &data.body_html);
        let attachment_parts: Vec<String> = data
            .attachments
            .iter()
            .map(|a| attachment_part(boundary_id, a))
            .collect();

        let mut payload = String::new();
        push_header(&mut payload, "From", &data.from);
        push_header(&mut payload, "To", &recipients.to);
        if let Some(cc) = &recipients.cc {
            push_header(&mut payload, "Cc", cc);
        }
        push_header(&mut payload, "Subject", &encode_header_value(&data.subject));
        push_header(&mut payload, "Date", &date.to_rfc2822());
        push_header(&mut payload, "Message-ID", &message_id);
        push_header(&mut payload, "MIME-Version", "1.0");
        push_header(
            &mut payload,
            "Content-Type",
            &format!("multipart/alternative; boundary=\"{boundary_id}\""),
        );
        payload.push_str("\r\n");
        payload.push_str(&text_part);
        payload.push_str(&html_part);
        for part in &attachment_parts {
            payload.push_str(part);
        }
        payload.push_str(&format!("--{boundary_id}--\r\n"));

        ComposedEmail {
            boundary_id: boundary_id.to_string(),
            message_id,
            from: data.from.clone(),
            to: recipients.to,
            cc: recipients.cc,
            bcc: recipients.bcc,
            text_part,
            html_part,
            attachment_parts,
            payload,
        }
    }
}

/// Serializes with a fresh boundary and the current time.
pub fn compose_email(data: &ComposeData) -> ComposedEmail {
    EmailComposer::default().compose(data)
}

struct Recipients {
    to: String,
    cc: Option<String>,
    bcc: Option<String>,
}

impl Recipients {
    /// Entries of each kind are comma-joined in declaration order.
    fn fold(data: &ComposeData) -> Self {
        let collect = |kind: RecipientKind| -> Vec<&str> {
            data.recipients
                .iter()
                .filter(|r| r.kind == kind)
                .map(|r| r.address.trim())
                .filter(|a| !a.is_empty())
                .collect()
        };
        let joined = |list: Vec<&str>| (!list.is_empty()).then(|| list.join(", "));

        Self {
            to: collect(RecipientKind::To).join(", "),
            cc: joined(collect(RecipientKind::Cc)),
            bcc: joined(collect(RecipientKind::Bcc)),
        }
    }
}

fn push_header(out: &mut String, name: &str, value: &str) {
    // Header injection guard: values are single logical lines.
    let value = value.replace(['\r', '\n'], " ");
    out.push_str(&format!("{name}: {value}\r\n"));
}

fn text_part(boundary_id: &str) -> String {
    format!(
        "--{boundary_id}\r\n\
Content-Type: text/plain; charset=\"utf-8\"\r\n\
Content-Transfer-Encoding: 7bit\r\n\
\r\n\
\r\n"
    )
}

fn html_part(boundary_id: &str, html: &str) -> String {
    format!(
        "--{boundary_id}\r\n\
Content-Type: text/html; charset=\"utf-8\"\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
{}\r\n",
        encode_quoted_printable(html.as_bytes())
    )
}

fn attachment_part(boundary_id: &str, attachment: &ComposeAttachment) -> String {
    let filename = attachment.filename.replace(['"', '\r', '\n'], "");
    let mime_type = if attachment.mime_type.trim().is_empty() {
        "application/octet-stream"
    } else {
        attachment.mime_type.trim()
    };
    format!(
        "--{boundary_id}\r\n\
Content-Type: {mime_type}; name=\"{filename}\"\r\n\
Content-Transfer-Encoding: base64\r\n\
Content-Disposition: attachment; filename=\"{filename}\"\r\n\
\r\n\
{}\r\n",
        encode_base64_wrapped(&attachment.data, BASE64_LINE_WIDTH)
    )
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::process_email;
    use mailparse::MailHeaderMap;
    use wiremail_domain::Recipient;

    fn sample() -> ComposeData {
        ComposeData {
            from: "me@example.com".into(),
            subject: "Quarterly numbers".into(),
            recipients: vec![
                Recipient::to("boss@example.com"),
                Recipient::cc("a@example.com"),
                Recipient::bcc("hidden@example.com"),
                Recipient::cc("b@example.com"),
            ],
            body_html: "<p>See the attached report.</p>".into(),
            attachments: vec![ComposeAttachment {
                filename: "report.csv".into(),
                mime_type: "text/csv".into(),
                data: b"q,total\n1,100\n".to_vec(),
            }],
        }
    }

    #[test]
    fn folds_recipients_by_kind() {
        let composed = compose_email(&sample());
        assert_eq!(composed.to, "boss@example.com");
        assert_eq!(composed.cc.as_deref(), Some("a@example.com, b@example.com"));
        assert_eq!(composed.bcc.as_deref(), Some("hidden@example.com"));
        assert!(composed.payload.contains("Cc: a@example.com, b@example.com\r\n"));
        assert!(!composed.payload.contains("hidden@example.com"));
    }

    #[test]
    fn every_to_recipient_is_kept() {
        let mut data = sample();
        data.recipients = vec![
            Recipient::to("first@example.com"),
            Recipient::cc("copy@example.com"),
            Recipient::to("second@example.com"),
        ];
        let composed = compose_email(&data);
        assert_eq!(composed.to, "first@example.com, second@example.com");
        assert!(composed
            .payload
            .contains("To: first@example.com, second@example.com\r\n"));
        assert_eq!(
            composed.envelope_recipients(),
            vec!["first@example.com", "second@example.com", "copy@example.com"]
        );
    }

    #[test]
    fn boundaries_are_random() {
        let a = compose_email(&sample());
        let b = compose_email(&sample());
        assert_ne!(a.boundary_id, b.boundary_id);
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn payload_is_well_formed_mime() {
        let composed = compose_email(&sample());
        let parsed = mailparse::parse_mail(composed.payload.as_bytes()).unwrap();

        assert_eq!(parsed.ctype.mimetype, "multipart/alternative");
        assert_eq!(
            parsed.get_headers().get_first_value("Subject").as_deref(),
            Some("Quarterly numbers")
        );
        assert_eq!(parsed.subparts.len(), 3);
        assert_eq!(parsed.subparts[0].ctype.mimetype, "text/plain");
        assert_eq!(parsed.subparts[0].get_body().unwrap().trim(), "");
        assert_eq!(
            parsed.subparts[1].get_body().unwrap().trim_end(),
            "<p>See the attached report.</p>"
        );
        assert_eq!(
            parsed.subparts[2].get_body_raw().unwrap(),
            b"q,total\n1,100\n".to_vec()
        );
    }

    #[test]
    fn composed_payload_parses_back() {
        let mut data = sample();
        data.subject = "Grüße aus Köln".into();
        data.body_html = "<p>Schöne Grüße = viele Grüße</p>\r\n<p>line two</p>".into();
        let composed = compose_email(&data);

        let email = process_email(&composed.payload);
        assert_eq!(email.subject.as_deref(), Some("Grüße aus Köln"));
        assert_eq!(email.mime_type, "multipart/alternative");
        assert_eq!(email.boundary_ids, vec![composed.boundary_id.clone()]);
        assert_eq!(email.body_html.as_deref(), Some(data.body_html.as_str()));
        assert_eq!(email.body_text.as_deref(), Some(""));
        assert_eq!(email.attachments.len(), 1);
        assert_eq!(email.attachments[0].filename(), "report.csv");
        assert_eq!(email.attachments[0].bytes(), b"q,total\n1,100\n");
    }

    #[test]
    fn header_values_cannot_inject_lines() {
        let mut data = sample();
        data.subject = "hi\r\nBcc: victim@example.com".into();
        let composed = compose_email(&data);
        assert!(!composed.payload.contains("\r\nBcc:"));
    }
}
