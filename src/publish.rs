//! Persisted module → publish location mapping.
//!
//! The mapping lives in `publish.txt` under the server's state directory
//! and uses the properties-file encoding: `key=value` lines, `#` comments,
//! backslash escapes and `\uXXXX` for anything outside printable ASCII.
//!
//! Persistence is best effort. A missing or corrupt file loads as an empty
//! mapping and a failed save is only logged.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// File name of the mapping inside the state directory.
pub const PUBLISH_LOCATIONS_FILE: &str = "publish.txt";

const HEADER: &str = "App Engine publish data";

/// Module id → publish URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishLocations {
    entries: BTreeMap<String, String>,
}

impl PublishLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, module: &str) -> Option<&str> {
        self.entries.get(module).map(String::as_str)
    }

    pub fn insert(&mut self, module: impl Into<String>, location: impl Into<String>) -> Option<String> {
        self.entries.insert(module.into(), location.into())
    }

    pub fn remove(&mut self, module: &str) -> Option<String> {
        self.entries.remove(module)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Load the mapping, falling back to an empty one on any failure.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No publish locations loaded");
                return Self::default();
            }
        };
        Self::parse(&content).unwrap_or_else(|e| {
            tracing::debug!(path = %path.display(), error = %e, "Ignoring corrupt publish locations");
            Self::default()
        })
    }

    /// Store the mapping. Failures are logged, never returned.
    pub fn save(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if let Err(e) = self.try_save(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to save publish locations");
        }
    }

    fn try_save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_properties())?;
        Ok(())
    }

    /// Render in properties-file form.
    pub fn to_properties(&self) -> String {
        let mut out = format!("#{}\n", HEADER);
        for (key, value) in &self.entries {
            out.push_str(&escape(key, true));
            out.push('=');
            out.push_str(&escape(value, false));
            out.push('\n');
        }
        out
    }

    /// Parse properties-file content.
    pub fn parse(content: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for line in logical_lines(content) {
            let (key, value) = split_key_value(&line);
            entries.insert(unescape(key)?, unescape(value)?);
        }
        Ok(Self { entries })
    }
}

impl FromIterator<(String, String)> for PublishLocations {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Whether `line` ends with an odd number of backslashes.
fn continues(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

/// Join continuation lines and drop comments and blank lines.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Option<String> = None;

    for raw in content.lines() {
        let trimmed = raw.trim_start_matches([' ', '\t', '\x0c']);
        match current.as_mut() {
            Some(pending) => {
                pending.push_str(trimmed);
            }
            None => {
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                    continue;
                }
                current = Some(trimmed.to_string());
            }
        }

        if let Some(pending) = current.take() {
            if continues(&pending) {
                let mut pending = pending;
                pending.pop();
                current = Some(pending);
            } else {
                lines.push(pending);
            }
        }
    }

    if let Some(pending) = current {
        lines.push(pending);
    }
    lines
}

/// Split at the first unescaped `=`, `:` or whitespace.
fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' | ' ' | '\t' | '\x0c' => {
                key_end = i;
                break;
            }
            _ => {}
        }
    }

    let key = &line[..key_end];
    let rest = line[key_end..].trim_start_matches([' ', '\t', '\x0c']);
    let rest = rest
        .strip_prefix('=')
        .or_else(|| rest.strip_prefix(':'))
        .unwrap_or(rest);
    (key, rest.trim_start_matches([' ', '\t', '\x0c']))
}

fn unescape(raw: &str) -> Result<String> {
    let mut units: Vec<u16> = Vec::with_capacity(raw.len());
    let mut chars = raw.chars();
    let mut buf = [0u16; 2];

    while let Some(c) = chars.next() {
        if c != '\\' {
            units.extend_from_slice(c.encode_utf16(&mut buf));
            continue;
        }
        let decoded = match chars.next() {
            Some('t') => '\t',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('f') => '\x0c',
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let unit = (hex.len() == 4)
                    .then(|| u16::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .ok_or_else(|| Error::Serialization(format!("Malformed \\u{} escape", hex)))?;
                units.push(unit);
                continue;
            }
            Some(other) => other,
            None => break,
        };
        units.extend_from_slice(decoded.encode_utf16(&mut buf));
    }

    String::from_utf16(&units).map_err(|e| Error::Serialization(e.to_string()))
}

fn escape(raw: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for (i, c) in raw.chars().enumerate() {
        match c {
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            _ => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{:04X}", unit));
                }
            }
        }
    }
    out
}
