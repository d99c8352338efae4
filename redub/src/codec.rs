//! Chunk text codec: the `[index] text` line format exchanged with the
//! translation provider.
//!
//! Decoding never fails on malformed output. Each non-blank line is read as:
//!
//! 1. `[n] text` sets index `n`, replacing any earlier value;
//! 2. an unmarked line after a marked one is a continuation, appended with a
//!    space to the last marked index;
//! 3. any other unmarked line is assigned to the next unclaimed index of the
//!    positional cursor.
//!
//! Only empty or whitespace-only input is an error.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::types::{Segment, TranslationMap};

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\d+)\]\s*(.+)").expect("marker pattern is valid"));

/// One line of chunk text: `"[index] text"`.
///
/// Surrounding whitespace is not sent, since [`parse`] trims it.
pub fn format_line(segment: &Segment) -> String {
    format!("[{}] {}", segment.segment_index, segment.original_text.trim())
}

/// Encode a chunk as newline-joined `[index] text` lines.
pub fn build_text(chunk: &Chunk<'_>) -> String {
    encode(chunk.segments().iter().copied())
}

/// Encode segments in order, skipping those without text.
pub fn encode<'a>(segments: impl IntoIterator<Item = &'a Segment>) -> String {
    segments
        .into_iter()
        .filter(|s| s.has_text())
        .map(format_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a provider response into an index -> text map.
///
/// Unmarked lines without a preceding marker are numbered from 0.
pub fn parse(text: &str) -> Result<TranslationMap> {
    decode(text, 0u32..)
}

/// Parse a response to `chunk`.
///
/// The positional cursor walks the chunk's own indices, and indices outside
/// the chunk are discarded.
pub fn parse_for_chunk(chunk: &Chunk<'_>, text: &str) -> Result<TranslationMap> {
    let mut map = decode(text, chunk.indices())?;

    let expected: BTreeSet<u32> = chunk.indices().collect();
    let extra: Vec<u32> = map
        .keys()
        .copied()
        .filter(|i| !expected.contains(i))
        .collect();
    if !extra.is_empty() {
        warn!(?extra, "discarding translations for indices outside the chunk");
        map.retain(|i, _| expected.contains(i));
    }

    let missing = missing_indices(chunk.indices(), &map);
    if !missing.is_empty() {
        warn!(?missing, "response is missing translations");
    }

    debug!(parsed = map.len(), expected = expected.len(), "parsed chunk response");
    Ok(map)
}

/// Indices from `expected` that `map` does not cover.
pub fn missing_indices(expected: impl IntoIterator<Item = u32>, map: &TranslationMap) -> Vec<u32> {
    expected
        .into_iter()
        .filter(|i| !map.contains_key(i))
        .collect()
}

fn decode(text: &str, mut cursor: impl Iterator<Item = u32>) -> Result<TranslationMap> {
    if text.trim().is_empty() {
        return Err(Error::EmptyResult);
    }

    let mut map = TranslationMap::new();
    let mut last_marked: Option<u32> = None;
    let mut last_written: Option<u32> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some((index, body)) = split_marker(line) {
            map.insert(index, body.to_string());
            last_marked = Some(index);
            last_written = Some(index);
            continue;
        }

        if let Some(existing) = last_marked.and_then(|i| map.get_mut(&i)) {
            if !existing.is_empty() {
                existing.push(' ');
                existing.push_str(line);
                continue;
            }
        }

        match cursor.find(|i| !map.contains_key(i)) {
            Some(index) => {
                map.insert(index, line.to_string());
                last_written = Some(index);
            }
            None => match last_written.and_then(|i| map.get_mut(&i)) {
                Some(existing) => {
                    existing.push(' ');
                    existing.push_str(line);
                }
                None => debug!(line, "dropping unassignable line"),
            },
        }
    }

    Ok(map)
}

fn split_marker(line: &str) -> Option<(u32, &str)> {
    let caps = MARKER.captures(line)?;
    let index = caps.get(1)?.as_str().parse().ok()?;
    let body = caps.get(2)?.as_str().trim();
    Some((index, body))
}
