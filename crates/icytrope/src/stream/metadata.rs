//! Metadata frame codec and ICY title parsing
//!
//! A metadata frame sits right after every `metaint` bytes of audio: one
//! length byte `L`, then `16 * L` bytes of NUL-padded text such as
//! `StreamTitle='Artist - Song';`.

use crate::config::protocol::{
    MAX_META_SIZE_BYTES, META_LENGTH_MULTIPLIER, STREAM_TITLE_PREFIX, STREAM_TITLE_SUFFIX,
};
use crate::error::{IcyError, Result};

/// One decoded metadata frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFrame {
    /// Title carried by the frame, `None` for an empty (L = 0) frame
    pub title: Option<String>,
    /// Bytes the frame occupied on the wire: length byte plus payload
    pub wire_len: usize,
}

impl MetadataFrame {
    /// Bytes to drop from the front of a buffer positioned at the start of
    /// an audio segment of `metaint` bytes followed by this frame.
    pub fn consumed(&self, metaint: usize) -> usize {
        metaint + self.wire_len
    }
}

/// Buffer length that guarantees a whole frame is available at `metaint`.
///
/// The session waits until its buffer is strictly longer than this.
pub fn worst_case_frame_end(metaint: usize) -> usize {
    metaint
        .saturating_add(1)
        .saturating_add(MAX_META_SIZE_BYTES)
}

/// Decode the frame whose length byte sits at offset `metaint`.
///
/// Only the bytes the frame announces need to be present; a shorter buffer
/// fails with [`IcyError::IncompleteFrame`].
pub fn decode_frame(buffer: &[u8], metaint: usize) -> Result<MetadataFrame> {
    let Some(&length_byte) = buffer.get(metaint) else {
        return Err(IcyError::IncompleteFrame {
            needed: metaint.saturating_add(1),
            available: buffer.len(),
        });
    };

    let payload_len = length_byte as usize * META_LENGTH_MULTIPLIER;
    if payload_len == 0 {
        return Ok(MetadataFrame {
            title: None,
            wire_len: 1,
        });
    }

    let start = metaint + 1;
    let end = start + payload_len;
    let payload = buffer.get(start..end).ok_or(IcyError::IncompleteFrame {
        needed: end,
        available: buffer.len(),
    })?;

    let title = extract_stream_title(payload)?;

    Ok(MetadataFrame {
        title: Some(title),
        wire_len: 1 + payload_len,
    })
}

/// Extract the title from a raw, NUL-padded metadata payload.
///
/// The whole payload (minus trailing NULs) must be exactly one
/// `StreamTitle='...';` field.
pub fn extract_stream_title(payload: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(trim_trailing_nuls(payload));
    parse_stream_title(&text)
        .map(str::to_string)
        .ok_or_else(|| IcyError::MetadataParse(text.into_owned()))
}

/// Match `StreamTitle='<value>';` anchored at both ends.
///
/// The value may contain quotes and semicolons (the last `';` closes it) but
/// no line terminators.
pub fn parse_stream_title(metadata: &str) -> Option<&str> {
    let value = metadata
        .strip_prefix(STREAM_TITLE_PREFIX)?
        .strip_suffix(STREAM_TITLE_SUFFIX)?;

    if value.contains(|c: char| matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')) {
        return None;
    }

    Some(value)
}

/// Slice of `bytes` without its trailing NUL padding
pub fn trim_trailing_nuls(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0)
        .map(|p| p + 1)
        .unwrap_or(0);
    &bytes[..end]
}

/// Encode a title as a complete, NUL-padded metadata frame.
pub fn encode_title_frame(title: &str) -> Result<Vec<u8>> {
    let field = format!("{STREAM_TITLE_PREFIX}{title}{STREAM_TITLE_SUFFIX}");
    let blocks = field.len().div_ceil(META_LENGTH_MULTIPLIER);
    if blocks * META_LENGTH_MULTIPLIER > MAX_META_SIZE_BYTES {
        return Err(IcyError::TitleTooLong(field.len()));
    }

    let mut frame = Vec::with_capacity(1 + blocks * META_LENGTH_MULTIPLIER);
    frame.push(blocks as u8);
    frame.extend_from_slice(field.as_bytes());
    frame.resize(1 + blocks * META_LENGTH_MULTIPLIER, 0);
    Ok(frame)
}

/// Parsed stream metadata with artist/title split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMetadata {
    /// Title exactly as carried by the stream
    pub raw: String,
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl StreamMetadata {
    /// Create metadata from an ICY title string.
    ///
    /// Splits on first ` - ` separator: "Artist - Title" → artist="Artist", title="Title".
    /// If no separator found, the whole string becomes the title.
    pub fn from_icy_title(raw: &str) -> Self {
        let trimmed = raw.trim();
        let (artist, title) = match trimmed.split_once(" - ") {
            Some((artist, title)) => (non_empty(artist), non_empty(title)),
            None => (None, non_empty(trimmed)),
        };

        Self {
            raw: raw.to_string(),
            title,
            artist,
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
