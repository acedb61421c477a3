use serde::Serialize;
use wiremail_imap::{ImapResponse, ResponseEntry};
use wiremail_mime::codec::decode_encoded_words;
use wiremail_mime::header::parse_headers;

/// FETCH items needed to build a [`MessageSummary`].
pub const SUMMARY_ITEMS: &str =
    "(UID FLAGS RFC822.SIZE BODY.PEEK[HEADER.FIELDS (SUBJECT FROM DATE)])";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    pub seq: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    pub subject: String,
    pub from: String,
    pub date: String,
    pub flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl MessageSummary {
    pub fn is_seen(&self) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case("\\Seen"))
    }
}

/// One summary per `* N FETCH` line. Attribute text may continue after the
/// header literal, so everything up to the next line is searched.
pub fn summaries_from_fetch(response: &ImapResponse) -> Vec<MessageSummary> {
    let mut out = Vec::new();
    let mut data = response.data.iter().peekable();

    while let Some(entry) = data.next() {
        let ResponseEntry::Line { marker, code, text } = entry else {
            continue;
        };
        if marker != "*" {
            continue;
        }
        let Some(attributes) = text.strip_prefix("FETCH ").or_else(|| text.strip_prefix("fetch ")) else {
            continue;
        };
        let Ok(seq) = code.parse::<u32>() else {
            continue;
        };

        let mut attributes = attributes.to_string();
        let mut headers = None;
        let expects_literal = attributes.trim_end().ends_with('}');
        while let Some(ResponseEntry::Literal { octets }) = data.peek() {
            let text = String::from_utf8_lossy(octets).into_owned();
            if expects_literal && headers.is_none() {
                headers = Some(parse_headers(&text));
            } else {
                attributes.push(' ');
                attributes.push_str(text.trim());
            }
            data.next();
        }

        let headers = headers.unwrap_or_default();
        let header = |name: &str| {
            headers
                .get(name)
                .map(|v| decode_encoded_words(v))
                .unwrap_or_default()
        };
        out.push(MessageSummary {
            seq,
            uid: number_after(&attributes, "UID").and_then(|n| u32::try_from(n).ok()),
            subject: header("subject"),
            from: header("from"),
            date: header("date"),
            flags: flags(&attributes),
            size: number_after(&attributes, "RFC822.SIZE"),
        });
    }
    out
}

/// `NAME 123` anywhere in the attribute list.
fn number_after(attributes: &str, name: &str) -> Option<u64> {
    let mut words = attributes
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .filter(|w| !w.is_empty());
    while let Some(word) = words.next() {
        if word.eq_ignore_ascii_case(name) {
            return words.next()?.parse().ok();
        }
    }
    None
}

fn flags(attributes: &str) -> Vec<String> {
    let upper = attributes.to_ascii_uppercase();
    let Some(start) = upper.find("FLAGS (") else {
        return Vec::new();
    };
    let rest = &attributes[start + "FLAGS (".len()..];
    let end = rest.find(')').unwrap_or(rest.len());
    rest[..end].split_whitespace().map(str::to_string).collect()
}

/// Sequence set for the newest `limit` of `exists` messages.
pub fn newest_range(exists: u32, limit: u32) -> Option<String> {
    if exists == 0 || limit == 0 {
        return None;
    }
    let first = exists.saturating_sub(limit - 1).max(1);
    Some(format!("{first}:{exists}"))
}

/// Message count from a SELECT reply (`* N EXISTS`).
pub fn exists_count(response: &ImapResponse) -> Option<u32> {
    response
        .untagged("EXISTS")
        .find_map(|(code, _)| code.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use wiremail_imap::ImapStatus;

    fn line(code: &str, text: &str) -> ResponseEntry {
        ResponseEntry::Line {
            marker: "*".into(),
            code: code.into(),
            text: text.into(),
        }
    }

    fn literal(text: &str) -> ResponseEntry {
        ResponseEntry::Literal {
            octets: text.as_bytes().to_vec(),
        }
    }

    fn response(data: Vec<ResponseEntry>) -> ImapResponse {
        ImapResponse {
            tag: "t".into(),
            status: ImapStatus::Ok,
            text: String::new(),
            data,
        }
    }

    #[test]
    fn builds_summaries_from_fetch_literals() {
        let headers = "Subject: =?UTF-8?Q?Caf=C3=A9?=\r\nFrom: Ann <ann@example.com>\r\nDate: Tue, 1 Oct 2024 10:00:00 +0000\r\n\r\n";
        let resp = response(vec![
            line("1", "FETCH (UID 101 FLAGS (\\Seen \\Answered) RFC822.SIZE 2048 BODY[HEADER.FIELDS (SUBJECT FROM DATE)] {120}"),
            literal(headers),
            literal(")\r\n"),
            line("2", "FETCH (UID 102 RFC822.SIZE 10 BODY[HEADER.FIELDS (SUBJECT FROM DATE)] {10}"),
            literal("Subject: x\r\n\r\n"),
            literal(" FLAGS ())\r\n"),
        ]);

        let summaries = summaries_from_fetch(&resp);
        assert_eq!(summaries.len(), 2);

        let first = &summaries[0];
        assert_eq!(first.seq, 1);
        assert_eq!(first.uid, Some(101));
        assert_eq!(first.subject, "Café");
        assert_eq!(first.from, "Ann <ann@example.com>");
        assert_eq!(first.date, "Tue, 1 Oct 2024 10:00:00 +0000");
        assert_eq!(first.flags, vec!["\\Seen", "\\Answered"]);
        assert_eq!(first.size, Some(2048));
        assert!(first.is_seen());

        let second = &summaries[1];
        assert_eq!(second.uid, Some(102));
        assert_eq!(second.subject, "x");
        assert!(second.flags.is_empty());
        assert!(!second.is_seen());
    }

    #[test]
    fn non_fetch_lines_are_ignored() {
        let resp = response(vec![line("3", "EXISTS"), line("OK", "[UIDVALIDITY 1]")]);
        assert!(summaries_from_fetch(&resp).is_empty());
        assert_eq!(exists_count(&resp), Some(3));
    }

    #[rstest]
    #[case(0, 10, None)]
    #[case(5, 0, None)]
    #[case(5, 10, Some("1:5"))]
    #[case(50, 10, Some("41:50"))]
    #[case(1, 1, Some("1:1"))]
    fn newest_range_cases(#[case] exists: u32, #[case] limit: u32, #[case] expected: Option<&str>) {
        assert_eq!(newest_range(exists, limit).as_deref(), expected);
    }
}
