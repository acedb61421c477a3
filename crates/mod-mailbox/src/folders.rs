use serde::Serialize;
use wiremail_imap::{ImapResponse, ResponseEntry};

/// One mailbox from a LIST reply, placed by its hierarchy path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderNode {
    pub name: String,
    /// Full mailbox name as the server knows it.
    pub path: String,
    pub flags: Vec<String>,
    /// False for intermediate levels the server did not list itself.
    pub selectable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FolderNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderTree {
    pub roots: Vec<FolderNode>,
}

/// A parsed `* LIST (flags) "delim" name` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub flags: Vec<String>,
    pub delimiter: Option<String>,
    pub name: String,
}

impl FolderTree {
    pub fn from_response(response: &ImapResponse) -> Self {
        Self::from_entries(list_entries(response))
    }

    pub fn from_entries(entries: Vec<ListEntry>) -> Self {
        let mut tree = Self::default();
        for entry in entries {
            tree.insert(entry);
        }
        tree
    }

    fn insert(&mut self, entry: ListEntry) {
        let segments: Vec<&str> = match entry.delimiter.as_deref() {
            Some(delim) if !delim.is_empty() => entry.name.split(delim).collect(),
            _ => vec![entry.name.as_str()],
        };
        let delim = entry.delimiter.as_deref().unwrap_or("");

        let mut level = &mut self.roots;
        for (depth, segment) in segments.iter().enumerate() {
            let path = segments[..=depth].join(delim);
            let index = match level.iter().position(|n| n.name == *segment) {
                Some(i) => i,
                None => {
                    level.push(FolderNode {
                        name: segment.to_string(),
                        path,
                        flags: Vec::new(),
                        selectable: false,
                        children: Vec::new(),
                    });
                    level.len() - 1
                }
            };
            if depth + 1 == segments.len() {
                let node = &mut level[index];
                node.selectable = !entry
                    .flags
                    .iter()
                    .any(|f| f.eq_ignore_ascii_case("\\Noselect"));
                node.flags = entry.flags.clone();
                return;
            }
            level = &mut level[index].children;
        }
    }

    /// Depth-first walk yielding `(depth, node)`.
    pub fn walk(&self) -> Vec<(usize, &FolderNode)> {
        fn visit<'a>(nodes: &'a [FolderNode], depth: usize, out: &mut Vec<(usize, &'a FolderNode)>) {
            for node in nodes {
                out.push((depth, node));
                visit(&node.children, depth + 1, out);
            }
        }
        let mut out = Vec::new();
        visit(&self.roots, 0, &mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.walk().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Extracts LIST lines. A name sent as a literal is taken from the entry
/// that follows the line.
pub fn list_entries(response: &ImapResponse) -> Vec<ListEntry> {
    let mut entries = Vec::new();
    let mut iter = response.data.iter().peekable();
    while let Some(entry) = iter.next() {
        let ResponseEntry::Line { marker, code, text } = entry else {
            continue;
        };
        if marker != "*" || !code.eq_ignore_ascii_case("LIST") {
            continue;
        }
        let Some(mut parsed) = parse_list_line(text) else {
            continue;
        };
        if parsed.name.starts_with('{') && parsed.name.ends_with('}') {
            if let Some(ResponseEntry::Literal { octets }) = iter.peek() {
                parsed.name = String::from_utf8_lossy(octets).into_owned();
                iter.next();
            }
        }
        entries.push(parsed);
    }
    entries
}

/// Parses the remainder after `LIST`: `(flags) delimiter name`.
pub fn parse_list_line(text: &str) -> Option<ListEntry> {
    let rest = text.trim_start().strip_prefix('(')?;
    let close = rest.find(')')?;
    let flags = rest[..close]
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let rest = rest[close + 1..].trim_start();

    let (delimiter, rest) = read_string(rest)?;
    let (name, _) = read_string(rest.trim_start())?;
    let delimiter = delimiter.filter(|d| !d.is_empty());
    let name = name?;
    if name.is_empty() {
        return None;
    }
    Some(ListEntry {
        flags,
        delimiter,
        name,
    })
}

/// Reads a quoted string, an atom, or NIL. NIL yields `None`.
fn read_string(input: &str) -> Option<(Option<String>, &str)> {
    if let Some(body) = input.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = body.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        value.push(escaped);
                    }
                }
                '"' => return Some((Some(value), &body[i + 1..])),
                _ => value.push(c),
            }
        }
        return None;
    }
    let end = input.find(' ').unwrap_or(input.len());
    let atom = &input[..end];
    if atom.is_empty() {
        return None;
    }
    let value = if atom.eq_ignore_ascii_case("NIL") {
        None
    } else {
        Some(atom.to_string())
    };
    Some((value, &input[end..]))
}
