//! Chunked Transcription
//!
//! Long audio is split with `ffmpeg` into fixed-length segments that are
//! transcribed concurrently and stitched back together in order.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use clipcheck_llm::LlmClient;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::service::PipelineError;

pub const DEFAULT_CHUNK_SECONDS: u64 = 900;
pub const MIN_CHUNK_SECONDS: u64 = 60;
pub const DEFAULT_MAX_WORKERS: usize = 3;

const TRANSCRIBE_PROMPT: &str = "Transcribe the audio verbatim in the original language(s) spoken. \
Do not translate. Preserve wording, numbers, proper nouns, and slang as said. \
Use natural punctuation when clear, but do not paraphrase or summarize.";

/// Transcribes a single audio file
#[async_trait]
pub trait SegmentTranscriber: Send + Sync {
    async fn transcribe_segment(&self, audio: &Path) -> Result<String, String>;
}

/// Segment transcription through the provider's audio endpoint
#[derive(Debug, Clone)]
pub struct ApiSegmentTranscriber {
    client: LlmClient,
    model: String,
}

impl ApiSegmentTranscriber {
    pub fn new(client: LlmClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl SegmentTranscriber for ApiSegmentTranscriber {
    async fn transcribe_segment(&self, audio: &Path) -> Result<String, String> {
        self.client
            .transcribe_file(audio, &self.model, Some(TRANSCRIBE_PROMPT))
            .await
            .map_err(|e| e.to_string())
    }
}

/// Splits long audio and transcribes the parts with bounded concurrency
#[derive(Clone)]
pub struct ChunkedTranscriber {
    segments: Arc<dyn SegmentTranscriber>,
    chunk_seconds: u64,
    max_workers: usize,
}

impl ChunkedTranscriber {
    /// Create a new transcriber
    ///
    /// # Arguments
    /// * `segments` - Transcribes one file
    /// * `chunk_seconds` - Segment length, raised to at least 60 seconds
    /// * `max_workers` - Concurrent segment transcriptions, at least 1
    pub fn new(segments: Arc<dyn SegmentTranscriber>, chunk_seconds: u64, max_workers: usize) -> Self {
        Self {
            segments,
            chunk_seconds: chunk_seconds.max(MIN_CHUNK_SECONDS),
            max_workers: max_workers.max(1),
        }
    }

    pub fn chunk_seconds(&self) -> u64 {
        self.chunk_seconds
    }

    /// Transcribe an audio file, chunking it when it is long
    pub async fn transcribe(&self, audio: &Path) -> Result<String, PipelineError> {
        let duration = probe_duration(audio).await;

        let Some(duration) = duration.filter(|d| *d > self.chunk_seconds as f64) else {
            debug!("Transcribing {} as a single file", audio.display());
            let text = self
                .segments
                .transcribe_segment(audio)
                .await
                .map_err(PipelineError::Transcription)?;
            return Ok(text.trim().to_string());
        };

        let segments_dir = audio
            .parent()
            .map(|p| p.join("segments"))
            .unwrap_or_else(|| PathBuf::from("segments"));
        let mut parts = split_into_segments(audio, &segments_dir, self.chunk_seconds).await?;
        parts.truncate(expected_parts(duration, self.chunk_seconds));

        info!(
            "Transcribing {:.0}s of audio in {} part(s) of {}s",
            duration,
            parts.len(),
            self.chunk_seconds
        );
        transcribe_segments(self.segments.clone(), parts, self.max_workers).await
    }
}

/// Number of segments a clip of `duration` seconds should produce
fn expected_parts(duration: f64, chunk_seconds: u64) -> usize {
    ((duration / chunk_seconds as f64).ceil() as usize).max(1)
}

/// Transcribes every part concurrently and joins the texts in part order
///
/// Empty results are skipped. Any failed part fails the whole call.
pub(crate) async fn transcribe_segments(
    transcriber: Arc<dyn SegmentTranscriber>,
    parts: Vec<PathBuf>,
    max_workers: usize,
) -> Result<String, PipelineError> {
    let total = parts.len();
    let permits = Arc::new(Semaphore::new(max_workers.clamp(1, total.max(1))));
    let mut tasks = JoinSet::new();

    for (index, part) in parts.into_iter().enumerate() {
        let transcriber = transcriber.clone();
        let permits = permits.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(|e| e.to_string())?;
            let text = transcriber.transcribe_segment(&part).await?;
            Ok::<_, String>((index, text))
        });
    }

    let mut results: Vec<Option<String>> = vec![None; total];
    let mut failures = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok((index, text))) => results[index] = Some(text),
            Ok(Err(e)) => {
                warn!("Segment transcription failed: {}", e);
                failures += 1;
            }
            Err(e) => {
                warn!("Segment transcription task failed: {}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(PipelineError::Transcription(format!(
            "Chunk transcription failed for {failures} part(s)."
        )));
    }

    let chunks: Vec<&str> = results
        .iter()
        .flatten()
        .map(|text| text.trim())
        .filter(|text| !text.is_empty())
        .collect();
    Ok(chunks.join("\n\n"))
}

// =============================================================================
// ffmpeg / ffprobe
// =============================================================================

/// Duration in seconds, or `None` when ffprobe is missing or fails
async fn probe_duration(audio: &Path) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(audio)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}

/// Splits `audio` into `part_NNN.mp3` files, re-encoding if stream copy fails
async fn split_into_segments(
    audio: &Path,
    out_dir: &Path,
    segment_seconds: u64,
) -> Result<Vec<PathBuf>, PipelineError> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|e| PipelineError::Transcription(format!("Failed to create segment directory: {e}")))?;

    let template = out_dir.join("part_%03d.mp3");
    let copy_codec: &[&str] = &["-c", "copy"];
    let reencode: &[&str] = &["-c:a", "libmp3lame", "-q:a", "4"];

    for codec in [copy_codec, reencode] {
        remove_parts(out_dir);

        let status = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(audio)
            .args(["-f", "segment", "-segment_time"])
            .arg(segment_seconds.to_string())
            .args(["-reset_timestamps", "1"])
            .args(codec)
            .arg(&template)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        match status {
            Ok(output) if output.status.success() => {
                let parts = list_parts(out_dir);
                if !parts.is_empty() {
                    return Ok(parts);
                }
            }
            Ok(output) => debug!(
                "ffmpeg segmenting failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::Transcription(
                    "ffmpeg not found (required for long-audio chunking).".to_string(),
                ));
            }
            Err(e) => debug!("Failed to run ffmpeg: {}", e),
        }
    }

    Err(PipelineError::Transcription(
        "Failed to split audio into chunks with ffmpeg.".to_string(),
    ))
}

fn is_part(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("part_") && n.ends_with(".mp3"))
}

fn list_parts(dir: &Path) -> Vec<PathBuf> {
    let mut parts: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| is_part(p))
                .collect()
        })
        .unwrap_or_default();
    parts.sort();
    parts
}

fn remove_parts(dir: &Path) {
    for part in list_parts(dir) {
        let _ = std::fs::remove_file(part);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns the file stem as text, "" for stems containing "empty"
    /// and an error for stems containing "bad"
    #[derive(Default)]
    struct EchoTranscriber {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SegmentTranscriber for EchoTranscriber {
        async fn transcribe_segment(&self, audio: &Path) -> Result<String, String> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let stem = audio.file_stem().unwrap().to_string_lossy().into_owned();
            // Later parts finish first
            let delay = 40u64.saturating_sub(stem.len() as u64 * 2);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if stem.contains("bad") {
                Err(format!("cannot transcribe {stem}"))
            } else if stem.contains("empty") {
                Ok("   ".to_string())
            } else {
                Ok(format!(" {stem} "))
            }
        }
    }

    fn parts(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(format!("/tmp/{n}.mp3"))).collect()
    }

    #[tokio::test]
    async fn test_segments_join_in_order() {
        let transcriber = Arc::new(EchoTranscriber::default());
        let text = transcribe_segments(transcriber, parts(&["a", "bb", "ccc", "dddd"]), 4)
            .await
            .unwrap();
        assert_eq!(text, "a\n\nbb\n\nccc\n\ndddd");
    }

    #[tokio::test]
    async fn test_empty_segments_skipped() {
        let transcriber = Arc::new(EchoTranscriber::default());
        let text = transcribe_segments(transcriber, parts(&["one", "empty", "three"]), 2)
            .await
            .unwrap();
        assert_eq!(text, "one\n\nthree");
    }

    #[tokio::test]
    async fn test_failures_fail_whole_call() {
        let transcriber = Arc::new(EchoTranscriber::default());
        let err = transcribe_segments(transcriber, parts(&["ok", "bad1", "bad2"]), 3)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Chunk transcription failed for 2 part(s).");
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let transcriber = Arc::new(EchoTranscriber::default());
        transcribe_segments(transcriber.clone(), parts(&["a", "b", "c", "d", "e", "f"]), 2)
            .await
            .unwrap();
        assert!(transcriber.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_expected_parts() {
        assert_eq!(expected_parts(1800.0, 900), 2);
        assert_eq!(expected_parts(1801.0, 900), 3);
        assert_eq!(expected_parts(0.0, 900), 1);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("12.5\n"), Some(12.5));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_chunk_seconds_minimum() {
        let transcriber = ChunkedTranscriber::new(Arc::new(EchoTranscriber::default()), 10, 0);
        assert_eq!(transcriber.chunk_seconds(), MIN_CHUNK_SECONDS);
    }

    #[test]
    fn test_list_parts_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["part_002.mp3", "part_000.mp3", "audio.mp3", "part_001.mp3"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let names: Vec<String> = list_parts(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["part_000.mp3", "part_001.mp3", "part_002.mp3"]);
    }
}
