use std::path::PathBuf;

/// All errors that can occur in redub.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no segment has text to translate")]
    EmptyInput,

    #[error("translation provider returned an empty response")]
    EmptyResult,

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("unsupported language: \"{0}\" — use a language code such as \"en\" or \"zh\"")]
    UnsupportedLanguage(String),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("media tool error: {0}")]
    MediaTool(String),

    #[error("{tool} not found — install with: apt install ffmpeg")]
    ToolNotFound { tool: &'static str },

    #[error("audio file not found: {path}")]
    AudioNotFound { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "openai")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
