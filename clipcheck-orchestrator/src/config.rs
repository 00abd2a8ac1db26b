//! Orchestrator configuration
//!
//! Every setting can be given as a flag or through its environment variable.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::service::StoreSettings;
use crate::tools::transcribe::{DEFAULT_CHUNK_SECONDS, DEFAULT_MAX_WORKERS, MIN_CHUNK_SECONDS};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Whether a model name refers to Google's Gemini family
fn is_gemini_model(model: &str) -> bool {
    let model = model.trim().to_lowercase();
    model.starts_with("gemini") || model.starts_with("models/gemini")
}

#[derive(Debug, Clone, Parser)]
#[command(name = "clipcheck-orchestrator")]
#[command(about = "Fact-check jobs for social media videos", long_about = None)]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, env = "CLIPCHECK_BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: String,

    /// Directory holding job documents, indexes and media
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Netscape cookies file passed to yt-dlp; blank means none
    #[arg(long, env = "YTDLP_COOKIES_FILE")]
    pub ytdlp_cookies_file: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Any provider exposing the OpenAI transcription and Responses APIs
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, env = "TRANSCRIBE_MODEL", default_value = "gpt-4o-transcribe")]
    pub transcribe_model: String,

    /// Audio longer than this is split before transcription
    #[arg(long, env = "TRANSCRIBE_CHUNK_SECONDS", default_value_t = DEFAULT_CHUNK_SECONDS)]
    pub transcribe_chunk_seconds: u64,

    #[arg(long, env = "TRANSCRIBE_MAX_WORKERS", default_value_t = DEFAULT_MAX_WORKERS)]
    pub transcribe_max_workers: usize,

    #[arg(long, env = "FACTCHECK_MODEL", default_value = "gpt-5.2")]
    pub factcheck_model: String,

    #[arg(long, env = "FACTCHECK_REASONING_EFFORT", default_value = "medium")]
    pub factcheck_reasoning_effort: String,

    /// Model used for translation jobs; empty disables them
    #[arg(long, env = "TRANSLATION_MODEL", default_value = "")]
    pub translation_model: String,

    /// Output language used when a request names none
    #[arg(long, env = "DEFAULT_LANGUAGE", default_value = "ar")]
    pub default_language: String,

    /// Interval of the fake progress estimators, in milliseconds
    #[arg(long, env = "PROGRESS_TICK_MS", default_value_t = 1500)]
    pub progress_tick_ms: u64,
}

impl Config {
    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.trim().is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if !self.openai_base_url.starts_with("http://") && !self.openai_base_url.starts_with("https://") {
            anyhow::bail!("openai_base_url must start with http:// or https://");
        }

        if self.transcribe_chunk_seconds < MIN_CHUNK_SECONDS {
            anyhow::bail!("transcribe_chunk_seconds must be at least {}", MIN_CHUNK_SECONDS);
        }

        if self.transcribe_max_workers == 0 {
            anyhow::bail!("transcribe_max_workers must be greater than 0");
        }

        if self.factcheck_model.trim().is_empty() {
            anyhow::bail!("factcheck_model cannot be empty");
        }

        if self.default_language.trim().is_empty() {
            anyhow::bail!("default_language cannot be empty");
        }

        if self.progress_tick_ms == 0 {
            anyhow::bail!("progress_tick_ms must be greater than 0");
        }

        if self.openai_base_url.trim_end_matches('/') == DEFAULT_BASE_URL {
            let models = [&self.transcribe_model, &self.factcheck_model, &self.translation_model];
            if let Some(model) = models.into_iter().find(|m| is_gemini_model(m)) {
                anyhow::bail!(
                    "{} is a Gemini model; point OPENAI_BASE_URL at an OpenAI-compatible gateway serving it",
                    model.trim()
                );
            }
        }

        if let Some(cookies) = self.cookies_file() {
            if !cookies.is_file() {
                anyhow::bail!("YTDLP_COOKIES_FILE {} does not exist", cookies.display());
            }
        }

        Ok(())
    }

    /// Cookies file for yt-dlp, if one is set and not blank
    pub fn cookies_file(&self) -> Option<PathBuf> {
        self.ytdlp_cookies_file
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    /// API key, if one is set and not blank
    pub fn api_key(&self) -> Option<String> {
        self.openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    }

    pub fn translation_model(&self) -> Option<String> {
        let model = self.translation_model.trim();
        (!model.is_empty()).then(|| model.to_string())
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            default_language: self.default_language.trim().to_lowercase(),
            translation_enabled: self.translation_model().is_some(),
            progress_tick: Duration::from_millis(self.progress_tick_ms),
        }
    }
}
