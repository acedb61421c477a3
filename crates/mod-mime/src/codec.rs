//! Low-level transfer encodings: RFC2047 encoded-words, quoted-printable,
//! base64 and conversions between binary strings and byte buffers.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use wiremail_error::MailError;

/// Mail bodies in the wild drop padding or leave junk bits behind.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Line width for base64 bodies (RFC 2045).
pub const BASE64_LINE_WIDTH: usize = 76;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Word(EncodedWord<'a>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EncodedWord<'a> {
    token: &'a str,
    charset: &'a str,
    encoding: char,
    data: &'a str,
}

impl EncodedWord<'_> {
    fn opening(&self) -> (String, char) {
        (self.charset.to_ascii_lowercase(), self.encoding)
    }

    fn decode(&self) -> Option<Vec<u8>> {
        match self.encoding {
            'B' => decode_base64(self.data).ok(),
            'Q' => Some(decode_hex_escapes(&self.data.replace('_', " "))),
            _ => None,
        }
    }
}

/// Parses `=?charset?X?data?=` starting at the beginning of `input`.
fn parse_encoded_word(input: &str) -> Option<EncodedWord<'_>> {
    let rest = input.strip_prefix("=?")?;
    let charset_end = rest.find('?')?;
    let charset = &rest[..charset_end];
    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }
    let rest = &rest[charset_end + 1..];
    let mut chars = rest.chars();
    let encoding = chars.next()?.to_ascii_uppercase();
    if !matches!(encoding, 'B' | 'Q') || chars.next()? != '?' {
        return None;
    }
    let rest = &rest[2..];
    let data_end = rest.find("?=")?;
    let data = &rest[..data_end];
    if data.contains(char::is_whitespace) {
        return None;
    }
    let token_len = 2 + charset_end + 1 + 2 + data_end + 2;
    Some(EncodedWord {
        token: &input[..token_len],
        charset,
        encoding,
        data,
    })
}

fn segments(input: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut text_start = 0;
    let mut pos = 0;
    while let Some(offset) = input[pos..].find("=?") {
        let at = pos + offset;
        match parse_encoded_word(&input[at..]) {
            Some(word) => {
                if at > text_start {
                    out.push(Segment::Text(&input[text_start..at]));
                }
                pos = at + word.token.len();
                text_start = pos;
                out.push(Segment::Word(word));
            }
            None => pos = at + 2,
        }
    }
    if text_start < input.len() {
        out.push(Segment::Text(&input[text_start..]));
    }
    out
}

/// Decodes every RFC2047 encoded-word in a header value. Adjacent base64
/// words that share an opening token are joined at the byte level first,
/// since long values get split mid-character. Anything that does not decode
/// is left exactly as it was.
pub fn decode_encoded_words(input: &str) -> String {
    if !input.contains("=?") {
        return input.to_string();
    }

    let segments = segments(input);
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < segments.len() {
        match &segments[i] {
            Segment::Text(text) => {
                out.push_str(text);
                i += 1;
            }
            Segment::Word(word) if word.encoding == 'B' => {
                let mut words = vec![word];
                let mut next = i + 1;
                loop {
                    let (gap, candidate) = match (segments.get(next), segments.get(next + 1)) {
                        (Some(Segment::Word(w)), _) => (0, w),
                        (Some(Segment::Text(t)), Some(Segment::Word(w)))
                            if t.trim().is_empty() =>
                        {
                            (1, w)
                        }
                        _ => break,
                    };
                    if candidate.opening() != word.opening() {
                        break;
                    }
                    words.push(candidate);
                    next += gap + 1;
                }

                let joined: Option<Vec<u8>> = words
                    .iter()
                    .map(|w| w.decode())
                    .collect::<Option<Vec<_>>>()
                    .map(|parts| parts.concat());
                match joined {
                    Some(bytes) => out.push_str(&bytes_to_text(&bytes, Some(word.charset))),
                    None => {
                        // One bad token must not take its neighbours down with it.
                        for w in &words {
                            push_word(&mut out, w);
                        }
                    }
                }
                i = next;
            }
            Segment::Word(word) => {
                push_word(&mut out, word);
                i += 1;
            }
        }
    }
    out
}

fn push_word(out: &mut String, word: &EncodedWord<'_>) {
    match word.decode() {
        Some(bytes) => out.push_str(&bytes_to_text(&bytes, Some(word.charset))),
        None => out.push_str(word.token),
    }
}

/// Encodes a header value as a single UTF-8 base64 encoded-word when it is
/// not plain printable ASCII.
pub fn encode_header_value(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii() && !c.is_control()) {
        return value.to_string();
    }
    format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
}

/// Substitutes `=XX` hex escapes. Malformed escapes are kept verbatim.
pub fn decode_hex_escapes(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'=' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Removes soft line breaks, then applies the hex-escape substitution.
pub fn decode_quoted_printable(input: &str) -> Vec<u8> {
    let unfolded = input.replace("=\r\n", "").replace("=\n", "");
    decode_hex_escapes(&unfolded)
}

pub fn encode_quoted_printable(input: &[u8]) -> String {
    String::from_utf8_lossy(&quoted_printable::encode(input)).into_owned()
}

/// Decodes base64 text, ignoring embedded whitespace and line breaks.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, MailError> {
    let compact: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    LENIENT
        .decode(compact.as_bytes())
        .map_err(|e| MailError::invalid_input(format!("base64: {e}")))
}

pub fn encode_base64(input: &[u8]) -> String {
    STANDARD.encode(input)
}

/// Base64 with CRLF line breaks every `width` characters, no trailing break.
pub fn encode_base64_wrapped(input: &[u8], width: usize) -> String {
    let encoded = STANDARD.encode(input);
    let width = width.max(4);
    chunk_str(&encoded, width).join("\r\n")
}

/// Splits ASCII text into pieces of at most `size` bytes.
fn chunk_str(text: &str, size: usize) -> Vec<&str> {
    let mut out = Vec::with_capacity(text.len() / size + 1);
    let mut rest = text;
    while rest.len() > size {
        let (head, tail) = rest.split_at(size);
        out.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

/// Splits a buffer into fixed-size slices for incremental materialization.
pub fn byte_chunks(data: &[u8], size: usize) -> impl Iterator<Item = &[u8]> {
    data.chunks(size.max(1))
}

/// Decodes base64 straight into a list of buffers of at most `size` bytes.
pub fn base64_to_buffers(input: &str, size: usize) -> Result<Vec<Vec<u8>>, MailError> {
    let bytes = decode_base64(input)?;
    Ok(byte_chunks(&bytes, size).map(<[u8]>::to_vec).collect())
}

/// A binary string holds one byte per char (U+0000..=U+00FF).
pub fn binary_string_to_bytes(input: &str) -> Vec<u8> {
    input
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

pub fn bytes_to_binary_string(input: &[u8]) -> String {
    input.iter().map(|&b| char::from(b)).collect()
}

/// Turns decoded bytes into text. UTF-8 (and anything that happens to be
/// valid UTF-8) decodes as such; everything else is read one byte per char.
pub fn bytes_to_text(bytes: &[u8], charset: Option<&str>) -> String {
    let single_byte = charset
        .map(|c| {
            let c = c.trim().to_ascii_lowercase();
            matches!(
                c.as_str(),
                "iso-8859-1" | "latin1" | "latin-1" | "iso8859-1" | "windows-1252" | "cp1252"
            )
        })
        .unwrap_or(false);

    if single_byte {
        return bytes_to_binary_string(bytes);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes_to_binary_string(bytes),
    }
}
