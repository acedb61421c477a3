//! Decomposes a raw RFC822 message into an [`Email`].
//!
//! The boundary tree is built bottom-up: every [`BoundaryContent`] is fully
//! decoded when it is created and every [`Boundary`] is complete before it is
//! returned, so nothing is patched after the fact.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tracing::{debug, warn};
use wiremail_domain::{Attachment, Boundary, BoundaryContent, Email, Headers};

use crate::codec::{
    binary_string_to_bytes, bytes_to_binary_string, bytes_to_text, decode_base64,
    decode_encoded_words, decode_quoted_printable,
};
use crate::header::{parameter, parse_headers, primary_value, read_header_block};

/// Multipart nesting deeper than this is not descended into.
const MAX_DEPTH: usize = 16;

/// Prepended to every literal `http` in an HTML body so remote content
/// cannot load.
pub const DEFUSED_LINK_PREFIX: &str = "x-";

#[derive(Debug, Default)]
struct Envelope {
    date: Option<String>,
    to: Option<String>,
    cc: Option<String>,
    bcc: Option<String>,
    from: Option<String>,
    reply_to: Option<String>,
    subject: Option<String>,
    mime_type: String,
    charset: Option<String>,
    encoding: Option<String>,
    boundary_ids: Vec<String>,
}

type FieldHandler = fn(&mut Envelope, &str);

/// Known header names and where their values land, in dispatch order.
const FIELD_HANDLERS: &[(&str, FieldHandler)] = &[
    ("date", set_date),
    ("to", set_to),
    ("cc", set_cc),
    ("bcc", set_bcc),
    ("from", set_from),
    ("reply-to", set_reply_to),
    ("subject", set_subject),
    ("content-type", set_content_type),
    ("content-transfer-encoding", set_encoding),
];

fn set_date(e: &mut Envelope, v: &str) {
    e.date = Some(decode_encoded_words(v));
}

fn set_to(e: &mut Envelope, v: &str) {
    e.to = Some(decode_encoded_words(v));
}

fn set_cc(e: &mut Envelope, v: &str) {
    e.cc = Some(decode_encoded_words(v));
}

fn set_bcc(e: &mut Envelope, v: &str) {
    e.bcc = Some(decode_encoded_words(v));
}

fn set_from(e: &mut Envelope, v: &str) {
    e.from = Some(decode_encoded_words(v));
}

fn set_reply_to(e: &mut Envelope, v: &str) {
    e.reply_to = Some(decode_encoded_words(v));
}

fn set_subject(e: &mut Envelope, v: &str) {
    e.subject = Some(decode_encoded_words(v));
}

fn set_content_type(e: &mut Envelope, v: &str) {
    e.mime_type = primary_value(v);
    e.charset = parameter(v, "charset");
    if let Some(id) = parameter(v, "boundary").filter(|id| !id.is_empty()) {
        e.boundary_ids.push(id);
    }
}

fn set_encoding(e: &mut Envelope, v: &str) {
    e.encoding = Some(v.trim().to_ascii_lowercase());
}

impl Envelope {
    fn from_headers(headers: &Headers) -> Self {
        let mut envelope = Self::default();
        for (name, handler) in FIELD_HANDLERS {
            if let Some(value) = headers.get(*name) {
                handler(&mut envelope, value);
            }
        }
        envelope
    }
}

/// How the text handed to the parser maps back to the octets on the wire.
#[derive(Debug, Clone, Copy)]
enum Octets {
    Utf8,
    /// One char per byte, see [`bytes_to_binary_string`].
    Binary,
}

impl Octets {
    fn of(self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Binary => binary_string_to_bytes(text),
        }
    }
}

/// Parses a raw message. Never fails: malformed input degrades to fewer
/// populated fields.
pub fn process_email(raw: &str) -> Email {
    parse_message(raw, Octets::Utf8)
}

/// Parses a message exactly as fetched. Input that is not UTF-8 is read one
/// byte per char, so 8-bit bodies reach their charset decoder unchanged and
/// `raw` holds a binary string.
pub fn process_email_bytes(raw: &[u8]) -> Email {
    match std::str::from_utf8(raw) {
        Ok(text) => parse_message(text, Octets::Utf8),
        Err(_) => {
            debug!(len = raw.len(), "message is not utf-8, reading it byte per char");
            parse_message(&bytes_to_binary_string(raw), Octets::Binary)
        }
    }
}

fn parse_message(raw: &str, octets: Octets) -> Email {
    let (headers_raw, content_raw) = split_message(raw);
    let headers = parse_headers(headers_raw);
    let envelope = Envelope::from_headers(&headers);

    let boundaries: Vec<Boundary> = envelope
        .boundary_ids
        .iter()
        .flat_map(|id| split_tree(content_raw, id, 0, octets))
        .collect();

    let bodies = if boundaries.iter().any(|b| !b.contents.is_empty()) {
        Bodies::from_boundaries(&boundaries)
    } else {
        if !envelope.boundary_ids.is_empty() {
            debug!("no boundary markers found, reading body as a single part");
        }
        Bodies::single_part(content_raw, &envelope, &headers, octets)
    };

    let body_html = bodies
        .html
        .map(|html| if html.is_empty() { html } else { sanitize_html(&html) });

    Email {
        raw: raw.to_string(),
        headers_raw: headers_raw.to_string(),
        content_raw: content_raw.to_string(),
        headers,
        date: envelope.date,
        to: envelope.to,
        cc: envelope.cc,
        bcc: envelope.bcc,
        from: envelope.from,
        reply_to: envelope.reply_to,
        subject: envelope.subject,
        mime_type: envelope.mime_type,
        charset: envelope.charset,
        encoding: envelope.encoding,
        boundary_ids: envelope.boundary_ids,
        boundaries,
        body_text: bodies.text,
        body_text_headers: bodies.text_headers,
        body_html,
        body_html_headers: bodies.html_headers,
        attachments: bodies.attachments,
    }
}

fn split_message(raw: &str) -> (&str, &str) {
    if let Some(i) = raw.find("\r\n\r\n") {
        return (&raw[..i], &raw[i + 4..]);
    }
    if let Some(i) = raw.find("\n\n") {
        return (&raw[..i], &raw[i + 2..]);
    }
    (raw, "")
}

/// Splits `text` on `id` and then on every nested boundary its parts
/// declare. The boundary for `id` comes first, nested ones follow in
/// document order.
fn split_tree(text: &str, id: &str, depth: usize, octets: Octets) -> Vec<Boundary> {
    let boundary = split_sections(text, id, octets);
    let nested: Vec<Boundary> = if depth >= MAX_DEPTH {
        warn!(depth, boundary = id, "multipart nesting too deep, not descending");
        Vec::new()
    } else {
        boundary
            .contents
            .iter()
            .filter_map(|part| {
                part.sub_boundary_id
                    .as_deref()
                    .filter(|sub| *sub != id)
                    .map(|sub| (part, sub))
            })
            .flat_map(|(part, sub)| split_tree(&part.raw, sub, depth + 1, octets))
            .collect()
    };

    let mut out = Vec::with_capacity(1 + nested.len());
    out.push(boundary);
    out.extend(nested);
    out
}

/// Collects the sections between `--id` markers. Text before the first
/// marker is preamble and text after `--id--` is discarded.
pub fn split_boundary(text: &str, id: &str) -> Boundary {
    split_sections(text, id, Octets::Utf8)
}

fn split_sections(text: &str, id: &str, octets: Octets) -> Boundary {
    let open = format!("--{id}");
    let close = format!("--{id}--");

    let mut sections: Vec<String> = Vec::new();
    for line in text.lines() {
        if line == close {
            break;
        }
        if line == open {
            sections.push(String::new());
            continue;
        }
        if let Some(current) = sections.last_mut() {
            current.push_str(line);
            current.push_str("\r\n");
        }
    }

    Boundary {
        id: id.to_string(),
        contents: sections
            .into_iter()
            .map(|raw| parse_part(raw, octets))
            .collect(),
    }
}

fn parse_part(raw: String, octets: Octets) -> BoundaryContent {
    let block = read_header_block(&raw);
    let headers = block.headers;

    let content_type = headers.get("content-type").map(String::as_str);
    let mime_type = content_type.map(primary_value).unwrap_or_default();
    let charset = content_type.and_then(|v| parameter(v, "charset"));
    let sub_boundary_id = content_type
        .filter(|_| mime_type.starts_with("multipart/"))
        .and_then(|v| parameter(v, "boundary"))
        .filter(|id| !id.is_empty());
    let encoding = headers
        .get("content-transfer-encoding")
        .map(|v| v.trim().to_ascii_lowercase());

    let disposition = headers.get("content-disposition").map(String::as_str);
    let is_attachment = disposition.is_some_and(is_attachment_disposition);
    let named = disposition
        .and_then(|d| parameter(d, "filename"))
        .or_else(|| content_type.and_then(|v| parameter(v, "name")))
        .map(|name| decode_encoded_words(&name));
    let filename = if is_attachment {
        Some(named.unwrap_or_else(|| "Untitled".to_string()))
    } else {
        named
    };
    let content_id = headers.get("content-id").map(|id| {
        id.trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string()
    });

    let data = if sub_boundary_id.is_some() {
        Vec::new()
    } else {
        let body = &raw[block.body_start.min(raw.len())..];
        let body = body.strip_suffix("\r\n").unwrap_or(body);
        decode_body(body, encoding.as_deref(), octets)
    };
    let content = bytes_to_text(&data, charset.as_deref());

    BoundaryContent {
        raw,
        headers,
        content,
        data,
        mime_type,
        charset,
        encoding,
        is_attachment,
        filename,
        content_id,
        sub_boundary_id,
    }
}

fn is_attachment_disposition(value: &str) -> bool {
    primary_value(value) == "attachment"
}

fn decode_body(body: &str, encoding: Option<&str>, octets: Octets) -> Vec<u8> {
    match encoding {
        Some("quoted-printable") => decode_quoted_printable(body),
        Some("base64") => decode_base64(body).unwrap_or_else(|e| {
            debug!(%e, "undecodable base64 body, keeping it verbatim");
            octets.of(body)
        }),
        _ => octets.of(body),
    }
}

#[derive(Debug, Default)]
struct Bodies {
    text: Option<String>,
    text_headers: Option<Headers>,
    html: Option<String>,
    html_headers: Option<Headers>,
    attachments: Vec<Attachment>,
}

impl Bodies {
    fn single_part(content: &str, envelope: &Envelope, headers: &Headers, octets: Octets) -> Self {
        let data = decode_body(content, envelope.encoding.as_deref(), octets);
        let text = bytes_to_text(&data, envelope.charset.as_deref());
        let mut bodies = Self::default();
        if envelope.mime_type == "text/html" {
            bodies.html = Some(text);
            bodies.html_headers = Some(headers.clone());
        } else {
            bodies.text = Some(text);
            bodies.text_headers = Some(headers.clone());
        }
        bodies
    }

    fn from_boundaries(boundaries: &[Boundary]) -> Self {
        let mut bodies = Self::default();
        for boundary in boundaries {
            for (index, part) in boundary.contents.iter().enumerate() {
                bodies.take(boundary, index, part);
            }
        }
        bodies
    }

    fn take(&mut self, boundary: &Boundary, index: usize, part: &BoundaryContent) {
        if part.is_multipart() {
            return;
        }
        if part.is_attachment {
            self.attachments.push(attachment(boundary, index, part));
            return;
        }
        match part.mime_type.as_str() {
            "text/html" => {
                self.html.get_or_insert_with(String::new).push_str(&part.content);
                self.html_headers.get_or_insert_with(|| part.headers.clone());
            }
            "text/plain" | "" => {
                self.text.get_or_insert_with(String::new).push_str(&part.content);
                self.text_headers.get_or_insert_with(|| part.headers.clone());
            }
            _ if part.filename.is_some() => {
                self.attachments.push(attachment(boundary, index, part));
            }
            other => debug!(mime_type = other, "skipping inline part"),
        }
    }
}

/// Keys are derived from the part's position so parsing the same message
/// twice yields identical keys.
fn attachment(boundary: &Boundary, index: usize, part: &BoundaryContent) -> Attachment {
    let mut hasher = DefaultHasher::new();
    boundary.id.hash(&mut hasher);
    index.hash(&mut hasher);
    part.filename.hash(&mut hasher);
    part.data.len().hash(&mut hasher);
    Attachment {
        key: format!("{:016x}", hasher.finish()),
        size: part.data.len(),
        part: part.clone(),
    }
}

/// Removes `<script>` elements and defuses literal `http` references.
pub fn sanitize_html(html: &str) -> String {
    strip_scripts(html).replace("http", &format!("{DEFUSED_LINK_PREFIX}http"))
}

fn strip_scripts(html: &str) -> String {
    // ASCII lower-casing keeps byte offsets identical.
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;

    while let Some(found) = lower[pos..].find("<script") {
        let start = pos + found;
        let after = lower.as_bytes().get(start + "<script".len()).copied();
        if !matches!(after, None | Some(b'>' | b'/' | b' ' | b'\t' | b'\r' | b'\n')) {
            out.push_str(&html[pos..start + 1]);
            pos = start + 1;
            continue;
        }
        out.push_str(&html[pos..start]);
        pos = match lower[start..].find("</script") {
            Some(close) => {
                let close = start + close;
                lower[close..]
                    .find('>')
                    .map(|gt| close + gt + 1)
                    .unwrap_or(html.len())
            }
            None => html.len(),
        };
    }
    out.push_str(&html[pos..]);
    out
}
