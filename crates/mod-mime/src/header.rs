//! Header block folding and header-value parameter helpers.

use wiremail_domain::Headers;

/// Past this many characters a continuation is glued on without a space.
pub const FOLD_THRESHOLD: usize = 78;

/// Result of reading a header block off the front of some text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderBlock {
    pub headers: Headers,
    /// Byte offset where the body starts.
    pub body_start: usize,
}

enum Line<'a> {
    Blank,
    Continuation(&'a str),
    Field(&'a str, &'a str),
    Other,
}

fn classify(line: &str) -> Line<'_> {
    if line.is_empty() {
        return Line::Blank;
    }
    if line.starts_with([' ', '\t']) {
        return Line::Continuation(line.trim());
    }
    match line.split_once(':') {
        Some((name, value))
            if !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic() && b != b':') =>
        {
            Line::Field(name, value.trim())
        }
        _ => Line::Other,
    }
}

fn fold_into(current: &mut String, continuation: &str) {
    if continuation.is_empty() {
        return;
    }
    if current.chars().count() > FOLD_THRESHOLD {
        current.push_str(continuation);
    } else {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(continuation);
    }
}

/// Reads header fields until a blank line or a line that is neither a field
/// nor a continuation. Repeated names are merged with a single space.
pub fn read_header_block(text: &str) -> HeaderBlock {
    let mut headers = Headers::new();
    let mut current: Option<String> = None;
    let mut offset = 0;

    while offset < text.len() {
        let (line, next) = match text[offset..].find('\n') {
            Some(i) => (&text[offset..offset + i], offset + i + 1),
            None => (&text[offset..], text.len()),
        };
        let line = line.strip_suffix('\r').unwrap_or(line);

        match classify(line) {
            Line::Blank => {
                return HeaderBlock {
                    headers,
                    body_start: next,
                };
            }
            Line::Continuation(cont) => match current.as_ref().and_then(|n| headers.get_mut(n)) {
                Some(value) => fold_into(value, cont),
                None => {
                    return HeaderBlock {
                        headers,
                        body_start: offset,
                    };
                }
            },
            Line::Field(name, value) => {
                let name = name.to_ascii_lowercase();
                headers
                    .entry(name.clone())
                    .and_modify(|existing| {
                        if !value.is_empty() {
                            if !existing.is_empty() {
                                existing.push(' ');
                            }
                            existing.push_str(value);
                        }
                    })
                    .or_insert_with(|| value.to_string());
                current = Some(name);
            }
            Line::Other => {
                return HeaderBlock {
                    headers,
                    body_start: offset,
                };
            }
        }
        offset = next;
    }

    HeaderBlock {
        headers,
        body_start: text.len(),
    }
}

pub fn parse_headers(text: &str) -> Headers {
    read_header_block(text).headers
}

/// The value before the first `;`, trimmed and lower-cased.
pub fn primary_value(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Looks up `name=value` among the `;`-separated parameters of a header
/// value. Names match case-insensitively and surrounding quotes are removed.
pub fn parameter(value: &str, name: &str) -> Option<String> {
    split_params(value).into_iter().skip(1).find_map(|param| {
        let (key, val) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case(name) {
            return None;
        }
        let val = val.trim();
        let val = val
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(val);
        Some(val.to_string())
    })
}

/// Splits on `;` outside of double quotes.
fn split_params(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}
