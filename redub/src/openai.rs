//! OpenAI-compatible chat-completions translator.
//!
//! Defaults target the DashScope compatible-mode endpoint. Any server that
//! speaks `/chat/completions` works with [`OpenAiTranslator::base_url`].

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Language;
use crate::error::{Error, Result};
use crate::translate::{TranslationRequest, Translator};

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_MODEL: &str = "qwen-plus";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

const TEMPERATURE: f32 = 0.3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Environment variables checked for the API key, in order.
const API_KEY_VARS: &[&str] = &["REDUB_LLM_API_KEY", "DASHSCOPE_API_KEY", "OPENAI_API_KEY"];

/// Chat-completions client implementing [`Translator`].
pub struct OpenAiTranslator {
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    client: Client,
}

impl std::fmt::Debug for OpenAiTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiTranslator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

impl OpenAiTranslator {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Config("API key must not be empty".into()));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            client,
        })
    }

    /// Build from `REDUB_LLM_*` environment variables.
    ///
    /// The key falls back to `DASHSCOPE_API_KEY`, then `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = API_KEY_VARS
            .iter()
            .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                Error::Config(format!("no API key set (tried {})", API_KEY_VARS.join(", ")))
            })?;

        let mut translator = Self::new(api_key)?;
        if let Some(url) = lookup("REDUB_LLM_BASE_URL") {
            translator = translator.base_url(url);
        }
        if let Some(model) = lookup("REDUB_LLM_MODEL") {
            translator = translator.model(model);
        }
        if let Some(raw) = lookup("REDUB_LLM_MAX_TOKENS") {
            let max_tokens = raw.trim().parse().map_err(|_| {
                Error::Config(format!("REDUB_LLM_MAX_TOKENS must be a positive integer, got \"{raw}\""))
            })?;
            translator = translator.max_tokens(max_tokens)?;
        }

        info!(model = %translator.model, base_url = %translator.base_url, "LLM client configured");
        Ok(translator)
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Result<Self> {
        if max_tokens == 0 {
            return Err(Error::InvalidOption("max_tokens must be > 0".into()));
        }
        self.max_tokens = max_tokens;
        Ok(self)
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request<'a>(&'a self, system: &'a str, text: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: text,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: TEMPERATURE,
        }
    }
}

/// System prompt for subtitle translation in `[index] text` lines.
pub fn system_prompt(source: &Language, target: &Language) -> String {
    format!(
        "You are a professional video subtitle translator.\n\
         \n\
         Translate the following {source} subtitles into {target}.\n\
         \n\
         Rules:\n\
         1. Each input line starts with a marker like [12]. Keep every marker \
         unchanged and output exactly one line per marker.\n\
         2. Preserve meaning, tone and emotion, using natural {target} phrasing.\n\
         3. Keep proper nouns as-is or use their common translation.\n\
         4. Output only the translation, with no explanations.\n\
         5. Keep it concise: the spoken length of each line should stay close to \
         the original, because the result is used for dubbing.",
        source = source.name(),
        target = target.name(),
    )
}

#[async_trait::async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(&self, request: &TranslationRequest<'_>) -> Result<String> {
        let system = system_prompt(request.source, request.target);
        let body = self.build_request(&system, request.text);

        debug!(
            chars = request.text.chars().count(),
            source = %request.source,
            target = %request.target,
            "sending translation request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Translation(format!(
                "provider returned {status}: {}",
                truncate(&error_text, 500)
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        extract_content(parsed)
    }
}

fn extract_content(response: ChatResponse) -> Result<String> {
    let total_tokens = response.usage.as_ref().map(|u| u.total_tokens);
    let content = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Translation("response has no choices".into()))?
        .message
        .content
        .unwrap_or_default();

    debug!(chars = content.chars().count(), ?total_tokens, "translation received");
    Ok(content.trim().to_string())
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
