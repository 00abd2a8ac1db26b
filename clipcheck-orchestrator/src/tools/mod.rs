//! External Collaborators
//!
//! The job store only talks to media tooling and the model provider through
//! these traits. Production implementations shell out to `yt-dlp`/`ffmpeg`
//! and call an OpenAI-compatible API.

pub mod openai;
pub mod transcribe;
pub mod ytdlp;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use clipcheck_core::domain::report::FactCheckReport;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::service::PipelineError;

pub use openai::OpenAiAnalysis;
pub use transcribe::ChunkedTranscriber;
pub use ytdlp::YtDlp;

/// Title and thumbnail of a video, when the platform exposes them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl VideoMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.thumbnail_url.is_none()
    }
}

/// Result of a combined caption and metadata fetch
#[derive(Debug, Clone, Default)]
pub struct CaptionFetch {
    /// `None` when the platform has no usable caption track
    pub transcript: Option<String>,
    pub metadata: VideoMetadata,
}

/// Download, caption and thumbnail tooling
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Whether the url belongs to a platform that may carry captions
    fn is_caption_platform(&self, url: &str) -> bool {
        clipcheck_core::url::is_caption_platform(url)
    }

    /// Downloads the audio track of a video into `out_dir`
    async fn download_audio(&self, url: &str, out_dir: &Path) -> Result<PathBuf, PipelineError>;

    /// Fetches the original-language captions plus metadata
    ///
    /// Never fails: tool errors degrade to an empty result.
    async fn fetch_captions_and_metadata(&self, url: &str, out_dir: &Path) -> CaptionFetch;

    /// Best-effort metadata lookup
    async fn fetch_metadata(&self, url: &str) -> VideoMetadata;

    /// Downloads an image url into `out_dir/thumbnail.<ext>`
    async fn fetch_thumbnail_bytes(&self, direct_url: &str, out_dir: &Path) -> Option<PathBuf>;

    /// Asks the download tool itself to write the thumbnail into `out_dir`
    async fn fetch_thumbnail_via_tool(&self, url: &str, out_dir: &Path) -> Option<PathBuf>;
}

/// Transcription and model-backed analysis
#[async_trait]
pub trait AnalysisTools: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<String, PipelineError>;

    /// Fact-checks a transcript, streaming reasoning summaries on `thoughts`
    ///
    /// Every thought is sent before this call returns.
    async fn fact_check_stream(
        &self,
        transcript: &str,
        url: &str,
        output_language: &str,
        thoughts: mpsc::Sender<String>,
    ) -> Result<(FactCheckReport, Value), PipelineError>;

    /// Translates the text fields of a report, keeping its scores
    async fn translate_report(
        &self,
        report: &FactCheckReport,
        target_language: &str,
    ) -> Result<(FactCheckReport, Value), PipelineError>;

    /// Translates one reasoning summary; returns the input on any failure
    async fn translate_thought(&self, text: &str, target_language: &str) -> String;
}
