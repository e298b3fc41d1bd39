//! Parser for `entry_points.txt`.
//!
//! The file is INI-style: `[group]` headers followed by `name = value`
//! lines. Only `console_scripts` declarations end up in the summary, but
//! every group must be well formed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

pub const CONSOLE_SCRIPTS: &str = "console_scripts";

/// A `name = module:attribute` declaration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub module: String,
    pub attribute: String,
}

/// Parse `text` and return the `console_scripts` group in declaration order.
pub fn parse_console_scripts(member: &str, text: &str) -> Result<Vec<EntryPoint>, MetadataError> {
    let mut scripts = Vec::new();
    let mut group: Option<String> = None;
    let mut names: HashSet<String> = HashSet::new();

    for (idx, raw) in text.lines().enumerate() {
        let malformed = |reason: String| MetadataError::Malformed {
            member: member.to_string(),
            line: idx + 1,
            reason,
        };

        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let Some(name) = header.strip_suffix(']') else {
                return Err(malformed(format!("unterminated group header {:?}", line)));
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(malformed("empty group name".to_string()));
            }
            group = Some(name.to_string());
            names.clear();
            continue;
        }

        let Some(current) = group.as_deref() else {
            return Err(malformed("declaration outside of a group".to_string()));
        };
        let Some((name, value)) = line.split_once('=') else {
            return Err(malformed(format!("expected 'name = value', got {:?}", line)));
        };
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return Err(malformed("empty entry point name".to_string()));
        }
        if !names.insert(name.to_string()) {
            return Err(malformed(format!("duplicate entry point {:?}", name)));
        }

        if current == CONSOLE_SCRIPTS {
            let (module, attribute) = parse_object_reference(value).map_err(malformed)?;
            scripts.push(EntryPoint {
                name: name.to_string(),
                module,
                attribute,
            });
        } else if value.is_empty() {
            return Err(malformed(format!("entry point {:?} has no value", name)));
        }
    }

    Ok(scripts)
}

/// Split `module:attr [extras]` into module and attribute.
fn parse_object_reference(value: &str) -> Result<(String, String), String> {
    let reference = match value.find('[') {
        Some(start) => {
            if !value.ends_with(']') {
                return Err(format!("unterminated extras in {:?}", value));
            }
            value[..start].trim()
        }
        None => value,
    };

    let Some((module, attribute)) = reference.split_once(':') else {
        return Err(format!("expected 'module:attribute', got {:?}", value));
    };
    let (module, attribute) = (module.trim(), attribute.trim());

    if !is_dotted_identifier(module) {
        return Err(format!("invalid module name {:?}", module));
    }
    if !is_dotted_identifier(attribute) {
        return Err(format!("invalid attribute {:?}", attribute));
    }

    Ok((module.to_string(), attribute.to_string()))
}

fn is_dotted_identifier(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}
