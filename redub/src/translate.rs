//! Concurrent chunked translation with per-chunk fallback.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunk::{plan_chunks, Chunk};
use crate::codec;
use crate::config::{Language, TranslateOptions};
use crate::error::Result;
use crate::types::{apply_translations, fill_untranslated, Segment, TranslationMap};

/// One chunk translation request.
#[derive(Debug, Clone)]
pub struct TranslationRequest<'a> {
    /// Chunk text in `[index] text` lines.
    pub text: &'a str,
    pub source: &'a Language,
    pub target: &'a Language,
}

/// A translation provider.
///
/// Returns the translated text, ideally in the same `[index] text` shape as
/// the request. Nothing about the shape is assumed by callers.
#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, request: &TranslationRequest<'_>) -> Result<String>;
}

/// Outcome of a [`translate_segments`] pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranslationReport {
    /// Number of chunks requested.
    pub chunks: usize,
    /// Ordinals of chunks whose request or response failed.
    pub failed_chunks: Vec<usize>,
    /// Segments that fell back to their original text.
    pub fallback_indices: Vec<u32>,
    /// Segments that received a translation.
    pub translated: usize,
}

impl TranslationReport {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty() && self.fallback_indices.is_empty()
    }
}

/// Translate every chunk and merge the results, without any fallback.
///
/// Chunks are requested with at most `options.concurrency` in flight, each
/// under `options.retry`. Results are merged in chunk order, so a segment
/// shared through overlap takes the later chunk's translation. Returns the
/// merged map and the ordinals of chunks that failed.
pub async fn merge_translations<T: Translator + ?Sized>(
    translator: &T,
    segments: &[Segment],
    options: &TranslateOptions,
) -> Result<(TranslationMap, Vec<usize>)> {
    let chunks = plan_chunks(segments, &options.chunk)?;
    Ok(translate_chunks(translator, &chunks, options).await)
}

/// Translate `segments` in place.
///
/// Every segment ends with `translated_text` set: segments the merged result
/// doesn't cover pass their original text through, including every segment
/// of a failed chunk. A translation already attached from an earlier run is
/// replaced, or discarded when this run doesn't cover it. Only
/// [`crate::Error::EmptyInput`] is fatal.
pub async fn translate_segments<T: Translator + ?Sized>(
    translator: &T,
    segments: &mut [Segment],
    options: &TranslateOptions,
) -> Result<TranslationReport> {
    let (chunk_count, merged, failed_chunks) = {
        let chunks = plan_chunks(segments, &options.chunk)?;
        let (merged, failed) = translate_chunks(translator, &chunks, options).await;
        (chunks.len(), merged, failed)
    };

    let missing = apply_translations(segments, &merged);
    let fallback_indices = fill_untranslated(segments);
    if !missing.is_empty() {
        warn!(
            count = missing.len(),
            indices = ?missing,
            "no translation for segments, using original text"
        );
    }

    Ok(TranslationReport {
        chunks: chunk_count,
        failed_chunks,
        translated: merged.len(),
        fallback_indices,
    })
}

async fn translate_chunks<T: Translator + ?Sized>(
    translator: &T,
    chunks: &[Chunk<'_>],
    options: &TranslateOptions,
) -> (TranslationMap, Vec<usize>) {
    let mut results: Vec<(usize, Option<TranslationMap>)> = stream::iter(chunks.iter().enumerate())
        .map(|(ordinal, chunk)| async move {
            (ordinal, translate_chunk(translator, chunk, ordinal, options).await)
        })
        .buffer_unordered(options.concurrency)
        .collect()
        .await;
    results.sort_by_key(|(ordinal, _)| *ordinal);

    let mut merged = TranslationMap::new();
    let mut failed = Vec::new();
    for (ordinal, result) in results {
        match result {
            Some(map) => merged.extend(map),
            None => failed.push(ordinal),
        }
    }

    info!(
        chunks = chunks.len(),
        failed = failed.len(),
        translated = merged.len(),
        "translation merged"
    );

    (merged, failed)
}

async fn translate_chunk<T: Translator + ?Sized>(
    translator: &T,
    chunk: &Chunk<'_>,
    ordinal: usize,
    options: &TranslateOptions,
) -> Option<TranslationMap> {
    let text = codec::build_text(chunk);
    let request = TranslationRequest {
        text: &text,
        source: &options.source,
        target: &options.target,
    };

    debug!(
        chunk = ordinal,
        segments = chunk.len(),
        context = chunk.context_len(),
        chars = chunk.chars(),
        "requesting chunk translation"
    );

    let operation = format!("translate chunk {ordinal}");
    let response = match options
        .retry
        .run(&operation, || translator.translate(&request))
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(chunk = ordinal, error = %e, "chunk translation failed, keeping original text");
            return None;
        }
    };

    match codec::parse_for_chunk(chunk, &response) {
        Ok(map) => Some(map),
        Err(e) => {
            warn!(chunk = ordinal, error = %e, "unusable chunk response, keeping original text");
            None
        }
    }
}
