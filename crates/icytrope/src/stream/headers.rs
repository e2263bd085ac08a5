//! ICY header block parsing
//!
//! Turns the raw bytes in front of the header/body separator into a
//! case-insensitive header map and resolves the metadata interval from it.

use std::collections::hash_map::{self, HashMap};

use crate::config::protocol::{HEADER_BODY_SEPARATOR, MAX_META_INTERVAL, META_INTERVAL_HEADER};
use crate::error::{IcyError, Result};

/// Value(s) stored for one header name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Single(String),
    /// Repeated header, values in arrival order
    Multiple(Vec<String>),
}

impl HeaderValue {
    /// The value if the header occurred exactly once
    pub fn as_single(&self) -> Option<&str> {
        match self {
            HeaderValue::Single(v) => Some(v),
            HeaderValue::Multiple(_) => None,
        }
    }

    /// First value in arrival order
    pub fn first(&self) -> &str {
        match self {
            HeaderValue::Single(v) => v,
            HeaderValue::Multiple(values) => values.first().map(String::as_str).unwrap_or(""),
        }
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self, HeaderValue::Multiple(_))
    }

    fn push(&mut self, value: String) {
        match self {
            HeaderValue::Single(previous) => {
                let previous = std::mem::take(previous);
                *self = HeaderValue::Multiple(vec![previous, value]);
            }
            HeaderValue::Multiple(values) => values.push(value),
        }
    }
}

/// Parsed header block. Keys are lower-cased and trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    entries: HashMap<String, HeaderValue>,
}

impl HeaderBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, turning the entry into a list on repetition.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let key = name.trim().to_lowercase();
        let value = value.into();
        match self.entries.entry(key) {
            hash_map::Entry::Occupied(mut entry) => entry.get_mut().push(value),
            hash_map::Entry::Vacant(entry) => {
                entry.insert(HeaderValue::Single(value));
            }
        }
    }

    /// Look up a header by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries.get(&name.trim().to_lowercase())
    }

    /// Single value of a header, `None` if absent or repeated
    pub fn get_single(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValue::as_single)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Parse a raw header block (without the trailing blank line).
///
/// A leading `HTTP/...` or `ICY ...` status line is skipped. Every other line
/// must contain a colon.
pub fn parse_headers(raw: &[u8]) -> Result<HeaderBlock> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    let mut headers = HeaderBlock::new();

    if text.is_empty() {
        return Ok(headers);
    }

    for (i, line) in text.split('\n').enumerate() {
        if i == 0 && is_status_line(line) {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            return Err(IcyError::MalformedHeader(line.trim().to_string()));
        };

        headers.append(key, value.trim());
    }

    Ok(headers)
}

fn is_status_line(line: &str) -> bool {
    line.starts_with("HTTP") || line.starts_with("ICY")
}

/// Position of the header/body separator, if present.
pub fn find_separator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_BODY_SEPARATOR.len())
        .position(|w| w == HEADER_BODY_SEPARATOR)
}

/// Split an accumulated buffer into header bytes and leftover body bytes.
///
/// Returns `None` while the separator has not arrived.
pub fn split_header_chunk(buffer: &[u8]) -> Option<(&[u8], &[u8])> {
    let index = find_separator(buffer)?;
    Some((
        &buffer[..index],
        &buffer[index + HEADER_BODY_SEPARATOR.len()..],
    ))
}

/// Resolve the metadata interval from `icy-metaint`.
///
/// Values above [`MAX_META_INTERVAL`] are rejected as invalid.
pub fn resolve_meta_interval(headers: &HeaderBlock) -> Result<usize> {
    let value = match headers.get(META_INTERVAL_HEADER) {
        None => return Err(IcyError::MissingHeader(META_INTERVAL_HEADER.to_string())),
        Some(HeaderValue::Multiple(_)) => {
            return Err(IcyError::DuplicateHeader(META_INTERVAL_HEADER.to_string()));
        }
        Some(HeaderValue::Single(value)) => value,
    };

    let invalid = || IcyError::InvalidHeader {
        name: META_INTERVAL_HEADER.to_string(),
        value: value.clone(),
    };

    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    match value.parse::<usize>() {
        Ok(metaint) if metaint <= MAX_META_INTERVAL => Ok(metaint),
        _ => Err(invalid()),
    }
}

/// Station details advertised in the ICY header block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcyHeaders {
    pub metaint: usize,
    pub station_name: Option<String>,
    pub genre: Option<String>,
    pub station_url: Option<String>,
    pub description: Option<String>,
    pub content_type: Option<String>,
    pub bitrate: Option<u32>,
}

impl IcyHeaders {
    /// Build from a parsed block and its already-resolved interval.
    ///
    /// Optional fields are read leniently: repeated headers use their first
    /// value and an unparsable bitrate is dropped.
    pub fn from_block(headers: &HeaderBlock, metaint: usize) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .map(HeaderValue::first)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let bitrate = headers
            .get("icy-br")
            .map(HeaderValue::first)
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<u32>().ok());

        Self {
            metaint,
            station_name: text("icy-name"),
            genre: text("icy-genre"),
            station_url: text("icy-url"),
            description: text("icy-description"),
            content_type: text("content-type"),
            bitrate,
        }
    }
}
