//! Email-style header blocks as used by `METADATA` and `WHEEL`.

use crate::error::MetadataError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Parse the header block of `text`. Parsing stops at the first blank
    /// line; anything after it is the message body and is ignored.
    pub fn parse(member: &str, text: &str) -> Result<Self, MetadataError> {
        let mut entries: Vec<(String, String)> = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            let malformed = |reason: &str| MetadataError::Malformed {
                member: member.to_string(),
                line: idx + 1,
                reason: reason.to_string(),
            };

            if line.trim().is_empty() {
                break;
            }

            if line.starts_with([' ', '\t']) {
                let Some((_, value)) = entries.last_mut() else {
                    return Err(malformed("continuation line before any header"));
                };
                value.push('\n');
                value.push_str(line.trim());
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                return Err(malformed("expected 'Key: value'"));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(malformed("empty header name"));
            }
            entries.push((key.to_string(), value.trim().to_string()));
        }

        Ok(Headers { entries })
    }

    /// First value of `key`, compared case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).next()
    }

    pub fn get_all<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
