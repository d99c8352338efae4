use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Languages with a known display name for the translation prompt.
const KNOWN_LANGUAGES: &[(&str, &str)] = &[
    ("zh", "Chinese"),
    ("en", "English"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("ru", "Russian"),
    ("pt", "Portuguese"),
    ("it", "Italian"),
    ("ar", "Arabic"),
    ("hi", "Hindi"),
    ("th", "Thai"),
    ("vi", "Vietnamese"),
    ("id", "Indonesian"),
    ("tr", "Turkish"),
];

/// A validated source or target language.
///
/// Accepts the codes in [`Language::supported`] or their English names
/// ("german"), plus any other 2-3 letter ASCII code passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    code: String,
    name: Option<&'static str>,
}

impl Language {
    pub fn new(lang: &str) -> Result<Self> {
        let lower = lang.trim().to_lowercase();

        if let Some((code, name)) = KNOWN_LANGUAGES
            .iter()
            .find(|(code, name)| *code == lower || name.eq_ignore_ascii_case(&lower))
        {
            return Ok(Self {
                code: (*code).to_string(),
                name: Some(*name),
            });
        }

        let plausible = (2..=3).contains(&lower.len()) && lower.chars().all(|c| c.is_ascii_lowercase());
        if plausible {
            Ok(Self { code: lower, name: None })
        } else {
            Err(Error::UnsupportedLanguage(lang.to_string()))
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// English display name, or the code itself for unlisted languages.
    pub fn name(&self) -> &str {
        self.name.unwrap_or(&self.code)
    }

    /// List the languages with a known display name as (code, name) pairs.
    pub fn supported() -> &'static [(&'static str, &'static str)] {
        KNOWN_LANGUAGES
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

/// Chunk budget for translation requests.
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Character budget per chunk, counting the `[index] ` markers.
    pub max_chars: usize,
    /// Tail segments of a closed chunk repeated at the head of the next one.
    pub overlap_segments: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chars: 2000,
            overlap_segments: 2,
        }
    }
}

impl ChunkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_chars(mut self, max_chars: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(Error::InvalidOption("max_chars must be > 0".into()));
        }
        self.max_chars = max_chars;
        Ok(self)
    }

    pub fn overlap_segments(mut self, overlap: usize) -> Self {
        self.overlap_segments = overlap;
        self
    }
}

/// Retry schedule for calls to the translation provider.
///
/// Delays grow as `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Result<Self> {
        if attempts == 0 {
            return Err(Error::InvalidOption("max_attempts must be >= 1".into()));
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }
}

/// Options for the chunked translation pass.
#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub source: Language,
    pub target: Language,
    pub chunk: ChunkOptions,
    /// Maximum chunk requests in flight.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl TranslateOptions {
    /// Options for `source` -> `target` with default chunking and retry.
    pub fn new(source: &str, target: &str) -> Result<Self> {
        Ok(Self {
            source: Language::new(source)?,
            target: Language::new(target)?,
            chunk: ChunkOptions::default(),
            concurrency: 5,
            retry: RetryPolicy::default(),
        })
    }

    pub fn chunk(mut self, chunk: ChunkOptions) -> Self {
        self.chunk = chunk;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Result<Self> {
        if n == 0 {
            return Err(Error::InvalidOption("concurrency must be >= 1".into()));
        }
        self.concurrency = n;
        Ok(self)
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Options for fitting synthesized clips onto the output timeline.
///
/// Output encoding (sample rate, channels) belongs to the [`crate::MediaTool`].
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Beyond this speed-up a clip is truncated instead.
    pub max_speed_ratio: f64,
    /// Output length; defaults to the latest clip end time.
    pub total_duration_ms: Option<u64>,
    /// Directory for speed-adjusted and truncated clips.
    pub work_dir: Option<PathBuf>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            max_speed_ratio: 4.0,
            total_duration_ms: None,
            work_dir: None,
        }
    }
}

impl ReconcileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_speed_ratio(mut self, ratio: f64) -> Result<Self> {
        if !ratio.is_finite() || ratio < 1.0 {
            return Err(Error::InvalidOption(format!(
                "max_speed_ratio must be >= 1.0, got {ratio}"
            )));
        }
        self.max_speed_ratio = ratio;
        Ok(self)
    }

    pub fn total_duration_ms(mut self, ms: u64) -> Self {
        self.total_duration_ms = Some(ms);
        self
    }

    pub fn work_dir(mut self, dir: PathBuf) -> Self {
        self.work_dir = Some(dir);
        self
    }

    /// Resolve the scratch directory, defaulting to
    /// `~/.cache/redub/work/<pid>` so concurrent processes don't share files.
    pub fn resolve_work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("redub")
                .join("work")
                .join(std::process::id().to_string())
        })
    }
}
