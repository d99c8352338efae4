//! Dubbing engine core: segments in, translated text and a re-timed audio mix out.
//!
//! **redub** covers the two timing-sensitive halves of automatic video dubbing:
//!
//! - translation: segments are packed into character-bounded, overlapping
//!   chunks, sent to a [`Translator`] as `[index] text` lines, and the answers
//!   are merged back by index with per-segment fallback to the original text;
//! - mixing: synthesized clips are fitted into the gap before the next segment
//!   (sped up with chained `atempo` stages, or truncated past the quality
//!   floor) and mixed onto a silent track of the video's length.
//!
//! # Quick start
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> redub::Result<()> {
//! use redub::{OpenAiTranslator, Segment, TranslateOptions};
//!
//! let mut segments = vec![
//!     Segment::new(0, 0, 1800, "大家好"),
//!     Segment::new(1, 2000, 4100, "今天我们来聊聊 Rust"),
//! ];
//!
//! let translator = OpenAiTranslator::from_env()?;
//! let options = TranslateOptions::new("zh", "en")?;
//! let report = redub::translate_segments(&translator, &mut segments, &options).await?;
//! println!("{} chunks, {} fell back", report.chunks, report.fallback_indices.len());
//! # Ok(())
//! # }
//! ```
//!
//! Mixing goes through [`MediaTool`]; [`Ffmpeg`] is the subprocess-backed
//! implementation:
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> redub::Result<()> {
//! use redub::{Ffmpeg, ReconcileOptions, SynthesizedClip};
//!
//! let clips: Vec<SynthesizedClip> = serde_json::from_str(&std::fs::read_to_string("clips.json")?)?;
//! let options = ReconcileOptions::new().total_duration_ms(60_000);
//! let outcome = redub::assemble(&Ffmpeg::new(), &clips, "dub.wav".as_ref(), &options).await?;
//! println!("{} tracks mixed", outcome.tracks);
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod codec;
pub mod config;
pub mod error;
pub mod media;
pub mod mix;
#[cfg(feature = "openai")]
pub mod openai;
pub(crate) mod retry;
pub mod tempo;
pub mod timeline;
pub mod translate;
pub mod types;

pub use chunk::{plan_chunks, Chunk};
pub use config::{ChunkOptions, Language, ReconcileOptions, RetryPolicy, TranslateOptions};
pub use error::{Error, Result};
pub use media::{Ffmpeg, MediaTool, MixTrack};
pub use mix::{assemble, reconcile_clips, ClipDecision, ClipOutcome, MixOutcome, MixPlan, SynthesizedClip};
#[cfg(feature = "openai")]
pub use openai::OpenAiTranslator;
pub use tempo::{reconcile, Reconciliation, TempoAction};
pub use timeline::{compute_slots, TimelineSlot};
pub use translate::{merge_translations, translate_segments, TranslationReport, TranslationRequest, Translator};
pub use types::{Script, Segment, TranslationMap};

/// Translate a script in place with default chunking, concurrency and retry.
pub async fn translate_script<T: Translator + ?Sized>(
    translator: &T,
    script: &mut Script,
    source: &str,
    target: &str,
) -> Result<TranslationReport> {
    let options = TranslateOptions::new(source, target)?;
    translate_segments(translator, &mut script.segments, &options).await
}
