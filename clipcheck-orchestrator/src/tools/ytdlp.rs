//! yt-dlp Adapter
//!
//! Runs `yt-dlp` (and probes `ffmpeg`) as child processes for audio,
//! captions, metadata and thumbnails. Children are killed when their future
//! is dropped, so an aborted pipeline reaps most of them.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CaptionFetch, MediaTools, VideoMetadata};
use crate::repository::job::{clear_thumbnails, find_thumbnail};
use crate::service::PipelineError;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(15);
const SUBTITLE_EXTENSIONS: &[&str] = &["vtt", "srt", "ttml", "srv3", "srv2", "srv1", "json3", "ass"];

/// `yt-dlp` backed media tooling
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
    ffmpeg: String,
    cookies_file: Option<PathBuf>,
    http: reqwest::Client,
}

impl YtDlp {
    pub fn new(cookies_file: Option<PathBuf>) -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            cookies_file,
            http: reqwest::Client::new(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--no-playlist");
        if let Some(cookies) = &self.cookies_file {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Runs a prepared command, returning stderr/stdout text on failure
    async fn run(&self, mut cmd: Command) -> Result<Output, String> {
        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                format!("{} not found. Install yt-dlp to enable downloads.", self.binary)
            } else {
                format!("Failed to run {}: {}", self.binary, e)
            }
        })?;

        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Err(if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            format!("{} exited with {}", self.binary, output.status)
        })
    }

    async fn dump_json(&self, url: &str) -> Result<Value, String> {
        let mut cmd = self.command();
        cmd.arg("--dump-single-json").arg(url);
        let output = self.run(cmd).await?;

        let info: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| format!("Failed to parse yt-dlp JSON: {}", e))?;
        if !info.is_object() {
            return Err("yt-dlp JSON did not return an object".to_string());
        }
        Ok(info)
    }

    async fn ffmpeg_available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .is_ok()
    }

    /// Downloads one subtitle track and returns its cleaned text
    async fn download_subtitles(
        &self,
        url: &str,
        out_dir: &Path,
        language: &str,
        automatic: bool,
    ) -> Result<String, String> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| format!("Failed to create {}: {}", out_dir.display(), e))?;
        remove_subtitle_files(out_dir);

        let mut cmd = self.command();
        cmd.arg("--skip-download")
            .arg(if automatic { "--write-auto-subs" } else { "--write-subs" })
            .args(["--sub-langs", language, "--sub-format", "vtt/best"])
            .arg("-o")
            .arg(out_dir.join("transcript.%(ext)s"))
            .arg(url);
        self.run(cmd).await?;

        let path = find_subtitle_file(out_dir, language)
            .ok_or_else(|| "No subtitle file found after yt-dlp download".to_string())?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Ok(clean_subtitle_text(&String::from_utf8_lossy(&bytes)))
    }
}

#[async_trait]
impl MediaTools for YtDlp {
    async fn download_audio(&self, url: &str, out_dir: &Path) -> Result<PathBuf, PipelineError> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| PipelineError::Download(format!("Failed to create media directory: {e}")))?;

        if !self.ffmpeg_available().await {
            return Err(PipelineError::Download(
                "ffmpeg not found. Install ffmpeg to enable MP3 extraction.".to_string(),
            ));
        }

        let mut cmd = self.command();
        cmd.args(["-x", "--audio-format", "mp3", "--audio-quality", "0"])
            .arg("-o")
            .arg(out_dir.join("audio.%(ext)s"))
            .arg(url);
        self.run(cmd).await.map_err(PipelineError::Download)?;

        let audio = out_dir.join("audio.mp3");
        if !audio.exists() {
            let found: Vec<String> = std::fs::read_dir(out_dir)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .filter(|name| name.starts_with("audio."))
                        .collect()
                })
                .unwrap_or_default();
            return Err(PipelineError::Download(format!(
                "Expected audio.mp3 not found. Got: {:?}",
                found
            )));
        }
        Ok(audio)
    }

    async fn fetch_captions_and_metadata(&self, url: &str, out_dir: &Path) -> CaptionFetch {
        let url = url.trim();
        if url.is_empty() || !self.is_caption_platform(url) {
            return CaptionFetch::default();
        }

        let info = match self.dump_json(url).await {
            Ok(info) => info,
            Err(e) => {
                debug!("Caption lookup failed for {}: {}", url, e);
                return CaptionFetch::default();
            }
        };
        let metadata = metadata_from_info(&info);

        let Some(language) = info
            .get("language")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|l| !l.is_empty())
        else {
            return CaptionFetch {
                transcript: None,
                metadata,
            };
        };

        let manual = info.get("subtitles").and_then(Value::as_object);
        let automatic = info.get("automatic_captions").and_then(Value::as_object);

        let choice = manual
            .and_then(|subs| pick_sub_lang(subs, &[language.to_string()]))
            .map(|lang| (lang, false))
            .or_else(|| {
                let prefs = [format!("{language}-orig"), language.to_string()];
                automatic
                    .and_then(|caps| pick_sub_lang(caps, &prefs))
                    .map(|lang| (lang, true))
            });

        let transcript = match choice {
            Some((lang, automatic)) => {
                match self.download_subtitles(url, out_dir, &lang, automatic).await {
                    Ok(text) if !text.trim().is_empty() => Some(text),
                    Ok(_) => None,
                    Err(e) => {
                        debug!("Subtitle download failed for {}: {}", url, e);
                        None
                    }
                }
            }
            None => None,
        };

        CaptionFetch {
            transcript,
            metadata,
        }
    }

    async fn fetch_metadata(&self, url: &str) -> VideoMetadata {
        let url = url.trim();
        if url.is_empty() {
            return VideoMetadata::default();
        }
        match self.dump_json(url).await {
            Ok(info) => metadata_from_info(&info),
            Err(e) => {
                debug!("Metadata lookup failed for {}: {}", url, e);
                VideoMetadata::default()
            }
        }
    }

    async fn fetch_thumbnail_bytes(&self, direct_url: &str, out_dir: &Path) -> Option<PathBuf> {
        let direct_url = direct_url.trim();
        if direct_url.is_empty() {
            return None;
        }

        let response = self
            .http
            .get(direct_url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .timeout(THUMBNAIL_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                debug!("Thumbnail download failed for {}: {}", direct_url, e);
                return None;
            }
        };

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.ok()?;
        if bytes.is_empty() {
            return None;
        }

        let ext = thumbnail_extension(direct_url, content_type.as_deref());
        tokio::fs::create_dir_all(out_dir).await.ok()?;
        clear_thumbnails(out_dir);
        let path = out_dir.join(format!("thumbnail.{ext}"));
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("Failed to write thumbnail {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn fetch_thumbnail_via_tool(&self, url: &str, out_dir: &Path) -> Option<PathBuf> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        tokio::fs::create_dir_all(out_dir).await.ok()?;
        clear_thumbnails(out_dir);

        let mut cmd = self.command();
        cmd.args(["--skip-download", "--write-thumbnail", "--convert-thumbnails", "jpg"])
            .arg("-o")
            .arg(out_dir.join("thumbnail.%(ext)s"))
            .arg(url);
        if let Err(e) = self.run(cmd).await {
            debug!("yt-dlp thumbnail fetch failed for {}: {}", url, e);
            return None;
        }
        find_thumbnail(out_dir)
    }
}

// =============================================================================
// Parsing helpers
// =============================================================================

/// Title and best thumbnail from a `--dump-single-json` document
pub(crate) fn metadata_from_info(info: &Value) -> VideoMetadata {
    let text = |key: &str| {
        info.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let title = text("title").or_else(|| text("fulltitle"));
    let thumbnail_url = text("thumbnail").or_else(|| {
        info.get("thumbnails")
            .and_then(Value::as_array)?
            .iter()
            .filter_map(|t| {
                let url = t.get("url").and_then(Value::as_str)?.trim();
                if url.is_empty() {
                    return None;
                }
                let width = t.get("width").and_then(Value::as_u64).unwrap_or(0);
                let height = t.get("height").and_then(Value::as_u64).unwrap_or(0);
                Some((width * height, url.to_string()))
            })
            .fold(None, |best: Option<(u64, String)>, candidate| match best {
                Some(b) if b.0 >= candidate.0 => Some(b),
                _ => Some(candidate),
            })
            .map(|(_, url)| url)
    });

    VideoMetadata {
        title,
        thumbnail_url,
    }
}

/// Picks the first available track matching a preference
///
/// Each preference matches exactly, then by base language, then any regional
/// variant of the base language.
pub(crate) fn pick_sub_lang(available: &Map<String, Value>, preferred: &[String]) -> Option<String> {
    for pref in preferred {
        let pref = pref.trim().to_lowercase();
        if pref.is_empty() {
            continue;
        }
        let base = pref.split('-').next().unwrap_or(pref.as_str()).to_string();

        let exact = available.keys().find(|k| k.to_lowercase() == pref);
        let by_base = || available.keys().find(|k| k.to_lowercase() == base);
        let regional = || {
            available
                .keys()
                .find(|k| k.to_lowercase().starts_with(&format!("{base}-")))
        };
        if let Some(found) = exact.or_else(by_base).or_else(regional) {
            return Some(found.clone());
        }
    }
    None
}

/// Reduces a subtitle file to plain caption text
///
/// Drops headers, cue numbers, timestamps, styling blocks and markup, and
/// removes consecutive duplicate lines left by rolling captions.
pub(crate) fn clean_subtitle_text(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut skip_block = false;

    for line in text.replace("\r\n", "\n").split('\n').map(str::trim) {
        if line.is_empty() {
            skip_block = false;
            if lines.last().is_some_and(|l| !l.is_empty()) {
                lines.push(String::new());
            }
            continue;
        }
        if skip_block {
            continue;
        }

        if line.starts_with("WEBVTT") {
            continue;
        }
        let lower = line.to_lowercase();
        if lower.starts_with("kind:") || lower.starts_with("language:") {
            continue;
        }
        if line == "NOTE" || line.starts_with("NOTE ") || line == "STYLE" || line == "REGION" {
            skip_block = true;
            continue;
        }
        if line.chars().all(|c| c.is_ascii_digit()) || line.contains("-->") {
            continue;
        }

        let cleaned = unescape_entities(&strip_tags(line));
        let cleaned = cleaned.trim();
        if !cleaned.is_empty() {
            lines.push(cleaned.to_string());
        }
    }

    let mut out: Vec<&str> = Vec::new();
    let mut last: Option<String> = None;
    let mut pending_blank = false;
    for line in &lines {
        if line.is_empty() {
            pending_blank = true;
            continue;
        }
        let norm = line.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        if last.as_deref() == Some(norm.as_str()) {
            continue;
        }
        if pending_blank && !out.is_empty() {
            out.push("");
        }
        out.push(line);
        pending_blank = false;
        last = Some(norm);
    }
    out.join("\n").trim().to_string()
}

fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn unescape_entities(line: &str) -> String {
    line.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// File extension for a downloaded thumbnail
///
/// Prefers the response content type, then an image extension in the url
/// path, then `jpg`.
fn thumbnail_extension(url: &str, content_type: Option<&str>) -> String {
    let is_image = |mime: &mime_guess::Mime| mime.type_() == mime_guess::mime::IMAGE;

    let from_type = content_type
        .and_then(|ct| ct.parse::<mime_guess::Mime>().ok())
        .filter(|mime| is_image(mime))
        .and_then(|mime| mime_guess::get_mime_extensions_str(mime.essence_str()))
        .and_then(|exts| exts.iter().find(|e| **e == "jpg").or_else(|| exts.first()));
    if let Some(ext) = from_type {
        return ext.to_string();
    }

    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase)
        })
        .filter(|ext| {
            mime_guess::from_ext(ext)
                .first()
                .is_some_and(|mime| is_image(&mime))
        })
        .unwrap_or_else(|| "jpg".to_string())
}

fn remove_subtitle_files(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
        let is_transcript = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("transcript."));
        if is_transcript {
            let _ = std::fs::remove_file(&path);
        }
    }
}

/// Best subtitle file yt-dlp wrote, preferring the requested language and VTT
fn find_subtitle_file(dir: &Path, language: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or_default();
            name.starts_with("transcript.") && SUBTITLE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
        })
        .collect();
    candidates.sort();

    let marker = format!(".{}.", language.to_lowercase());
    let matching: Vec<PathBuf> = candidates
        .iter()
        .filter(|p| p.to_string_lossy().to_lowercase().contains(&marker))
        .cloned()
        .collect();
    if !matching.is_empty() {
        candidates = matching;
    }

    SUBTITLE_EXTENSIONS
        .iter()
        .find_map(|ext| {
            candidates
                .iter()
                .find(|p| p.extension().and_then(|e| e.to_str()) == Some(*ext))
        })
        .cloned()
        .or_else(|| candidates.into_iter().next())
}
