//! Chunk planner: groups segments into character-bounded translation batches.
//!
//! A chunk closes once the next segment would push it past
//! [`ChunkOptions::max_chars`]. The following chunk is seeded with the last
//! [`ChunkOptions::overlap_segments`] segments of the closed one so the model
//! sees local context; seeds may push the new chunk over budget. Duplicated
//! indices are resolved at merge time, later chunk wins.
//!
//! A segment that is over budget on its own becomes a singleton chunk. It
//! neither receives nor provides overlap seeds.

use tracing::{debug, info, warn};

use crate::codec;
use crate::config::ChunkOptions;
use crate::error::{Error, Result};
use crate::types::Segment;

/// An ordered batch of non-empty segments sent in one translation request.
#[derive(Debug, Clone)]
pub struct Chunk<'a> {
    segments: Vec<&'a Segment>,
    context: usize,
    chars: usize,
    oversized: bool,
}

impl<'a> Chunk<'a> {
    fn empty() -> Self {
        Self {
            segments: Vec::new(),
            context: 0,
            chars: 0,
            oversized: false,
        }
    }

    fn seeded_from(previous: &Chunk<'a>, overlap: usize) -> Self {
        let start = previous.segments.len().saturating_sub(overlap);
        let seeds = &previous.segments[start..];
        Self {
            segments: seeds.to_vec(),
            context: seeds.len(),
            chars: seeds.iter().map(|s| formatted_len(s)).sum(),
            oversized: false,
        }
    }

    fn push(&mut self, segment: &'a Segment, chars: usize) {
        self.segments.push(segment);
        self.chars += chars;
    }

    pub fn segments(&self) -> &[&'a Segment] {
        &self.segments
    }

    /// Segment indices in request order, overlap seeds included.
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.segments.iter().map(|s| s.segment_index)
    }

    /// Number of leading segments carried over from the previous chunk.
    pub fn context_len(&self) -> usize {
        self.context
    }

    /// Formatted character count (markers included, newlines excluded).
    pub fn chars(&self) -> usize {
        self.chars
    }

    /// Whether this is a singleton holding a segment larger than the budget.
    pub fn is_oversized(&self) -> bool {
        self.oversized
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether there's anything beyond the overlap seeds.
    fn has_fresh(&self) -> bool {
        self.segments.len() > self.context
    }
}

/// Character length of a segment as it appears in the chunk text.
pub fn formatted_len(segment: &Segment) -> usize {
    codec::format_line(segment).chars().count()
}

/// Partition `segments` into translation chunks.
///
/// Segments without text are skipped. Fails with [`Error::EmptyInput`] when no
/// segment has text.
pub fn plan_chunks<'a>(segments: &'a [Segment], options: &ChunkOptions) -> Result<Vec<Chunk<'a>>> {
    let mut chunks: Vec<Chunk<'a>> = Vec::new();
    let mut current = Chunk::empty();
    let mut with_text = 0usize;

    for segment in segments.iter().filter(|s| s.has_text()) {
        with_text += 1;
        let chars = formatted_len(segment);

        if chars > options.max_chars {
            warn!(
                segment_index = segment.segment_index,
                chars,
                max_chars = options.max_chars,
                "segment exceeds chunk budget, translating it on its own"
            );
            if current.has_fresh() {
                chunks.push(std::mem::replace(&mut current, Chunk::empty()));
            }
            let mut single = Chunk::empty();
            single.push(segment, chars);
            single.oversized = true;
            chunks.push(single);
            continue;
        }

        if current.chars + chars > options.max_chars && current.has_fresh() {
            let next = Chunk::seeded_from(&current, options.overlap_segments);
            debug!(
                segments = current.len(),
                chars = current.chars,
                "chunk closed"
            );
            chunks.push(std::mem::replace(&mut current, next));
        }

        current.push(segment, chars);
    }

    if current.has_fresh() {
        chunks.push(current);
    }

    if chunks.is_empty() {
        return Err(Error::EmptyInput);
    }

    info!(
        segments = with_text,
        chunks = chunks.len(),
        avg = format!("{:.1}", with_text as f64 / chunks.len() as f64),
        "chunking completed"
    );

    Ok(chunks)
}
