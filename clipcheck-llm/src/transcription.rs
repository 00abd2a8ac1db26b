//! Audio transcription endpoint

use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::LlmClient;
use crate::error::{ClientError, Result};

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl LlmClient {
    /// Transcribe one audio file
    ///
    /// # Arguments
    /// * `path` - Local audio file (mp3, m4a, wav, ...)
    /// * `model` - Transcription model name
    /// * `prompt` - Optional style/vocabulary hint for the model
    pub async fn transcribe_file(
        &self,
        path: &Path,
        model: &str,
        prompt: Option<&str>,
    ) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(audio_mime(path))
            .map_err(|e| ClientError::ParseError(format!("Invalid MIME type: {}", e)))?;

        let mut form = Form::new()
            .part("file", part)
            .text("model", model.to_string())
            .text("response_format", "json");
        if let Some(prompt) = prompt {
            form = form.text("prompt", prompt.to_string());
        }

        let response = self
            .authorized(self.client.post(self.endpoint("audio/transcriptions")))?
            .multipart(form)
            .send()
            .await?;

        let body: TranscriptionResponse = self.handle_response(response).await?;
        Ok(body.text.trim().to_string())
    }
}

fn audio_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("wav") => "audio/wav",
        Some("webm") => "audio/webm",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("flac") => "audio/flac",
        _ => "audio/mpeg",
    }
}
