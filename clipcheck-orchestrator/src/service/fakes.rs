//! In-memory stand-ins for the media and analysis tools

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use clipcheck_core::domain::report::{Claim, ClaimVerdict, FactCheckReport, OverallVerdict};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::{Notify, mpsc};

use super::{JobStore, PipelineError, StoreSettings};
use crate::tools::{AnalysisTools, CaptionFetch, MediaTools, VideoMetadata};

pub(crate) fn open_store(
    translation_enabled: bool,
) -> (TempDir, Arc<JobStore>, Arc<FakeMedia>, Arc<FakeAnalysis>) {
    let dir = tempfile::tempdir().unwrap();
    let media = Arc::new(FakeMedia::default());
    let analysis = Arc::new(FakeAnalysis::default());
    let settings = StoreSettings {
        translation_enabled,
        ..StoreSettings::default()
    };
    let store = JobStore::open(dir.path(), media.clone(), analysis.clone(), settings).unwrap();
    (dir, store, media, analysis)
}

pub(crate) fn completed_report() -> FactCheckReport {
    let mut report = FactCheckReport {
        summary: "A short summary.".to_string(),
        overall_score: 0,
        overall_verdict: OverallVerdict::Unverifiable,
        claims: vec![
            Claim {
                claim: "The sky is blue".to_string(),
                verdict: ClaimVerdict::Supported,
                confidence: 100,
                weight: 70,
                explanation: "Rayleigh scattering.".to_string(),
                correction: None,
                sources: vec![],
            },
            Claim {
                claim: "The moon is cheese".to_string(),
                verdict: ClaimVerdict::Contradicted,
                confidence: 100,
                weight: 30,
                explanation: "It is rock.".to_string(),
                correction: Some("The moon is rock.".to_string()),
                sources: vec![],
            },
        ],
        danger: vec![],
        whats_right: vec!["Sky colour".to_string()],
        whats_wrong: vec!["Moon composition".to_string()],
        missing_context: vec![],
        sources_used: vec![],
        limitations: None,
        generated_at: Utc::now(),
    };
    report.apply_weighted_score();
    report
}

/// Polls until the job reaches a terminal status
pub(crate) async fn wait_terminal(store: &JobStore, job_id: &str) -> clipcheck_core::domain::job::Job {
    for _ in 0..500 {
        if let Some(job) = store.get(job_id).await {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never finished");
}

#[derive(Default)]
pub(crate) struct FakeMedia {
    pub captions: Mutex<Option<String>>,
    pub caption_metadata: Mutex<VideoMetadata>,
    pub metadata: Mutex<VideoMetadata>,
    pub download_error: Mutex<Option<String>>,
    pub thumbnail_bytes_fail: AtomicBool,
    pub hold_tool_thumbnail: AtomicBool,
    pub tool_thumbnail_started: Notify,
    pub tool_thumbnail_release: Notify,
    pub downloads: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    pub thumbnail_fetches: AtomicUsize,
    pub tool_thumbnail_fetches: AtomicUsize,
}

#[async_trait]
impl MediaTools for FakeMedia {
    async fn download_audio(&self, _url: &str, out_dir: &Path) -> Result<PathBuf, PipelineError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.download_error.lock().unwrap().clone() {
            return Err(PipelineError::Download(message));
        }
        std::fs::create_dir_all(out_dir).unwrap();
        let path = out_dir.join("audio.mp3");
        std::fs::write(&path, b"audio").unwrap();
        Ok(path)
    }

    async fn fetch_captions_and_metadata(&self, _url: &str, _out_dir: &Path) -> CaptionFetch {
        CaptionFetch {
            transcript: self.captions.lock().unwrap().clone(),
            metadata: self.caption_metadata.lock().unwrap().clone(),
        }
    }

    async fn fetch_metadata(&self, _url: &str) -> VideoMetadata {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.metadata.lock().unwrap().clone()
    }

    async fn fetch_thumbnail_bytes(&self, _direct_url: &str, out_dir: &Path) -> Option<PathBuf> {
        self.thumbnail_fetches.fetch_add(1, Ordering::SeqCst);
        if self.thumbnail_bytes_fail.load(Ordering::SeqCst) {
            return None;
        }
        std::fs::create_dir_all(out_dir).ok()?;
        let path = out_dir.join("thumbnail.jpg");
        std::fs::write(&path, b"jpeg").ok()?;
        Some(path)
    }

    async fn fetch_thumbnail_via_tool(&self, _url: &str, out_dir: &Path) -> Option<PathBuf> {
        self.tool_thumbnail_fetches.fetch_add(1, Ordering::SeqCst);
        if self.hold_tool_thumbnail.load(Ordering::SeqCst) {
            self.tool_thumbnail_started.notify_one();
            self.tool_thumbnail_release.notified().await;
        }
        std::fs::create_dir_all(out_dir).ok()?;
        let path = out_dir.join("thumbnail.png");
        std::fs::write(&path, b"png").ok()?;
        Some(path)
    }
}

#[derive(Default)]
pub(crate) struct FakeAnalysis {
    pub thoughts: Mutex<Vec<String>>,
    pub fact_check_error: Mutex<Option<String>>,
    pub hold: AtomicBool,
    pub started: Notify,
    pub release: Notify,
    pub transcriptions: AtomicUsize,
    pub fact_checks: AtomicUsize,
    pub translations: AtomicUsize,
}

#[async_trait]
impl AnalysisTools for FakeAnalysis {
    async fn transcribe(&self, _audio: &Path) -> Result<String, PipelineError> {
        self.transcriptions.fetch_add(1, Ordering::SeqCst);
        Ok("transcribed audio".to_string())
    }

    async fn fact_check_stream(
        &self,
        _transcript: &str,
        _url: &str,
        _output_language: &str,
        thoughts: mpsc::Sender<String>,
    ) -> Result<(FactCheckReport, Value), PipelineError> {
        self.fact_checks.fetch_add(1, Ordering::SeqCst);
        let pending = self.thoughts.lock().unwrap().clone();
        for thought in pending {
            let _ = thoughts.send(thought).await;
        }
        if self.hold.load(Ordering::SeqCst) {
            self.started.notify_one();
            self.release.notified().await;
        }
        if let Some(message) = self.fact_check_error.lock().unwrap().clone() {
            return Err(PipelineError::FactCheck(message));
        }
        Ok((completed_report(), json!({ "id": "resp_fake" })))
    }

    async fn translate_report(
        &self,
        report: &FactCheckReport,
        target_language: &str,
    ) -> Result<(FactCheckReport, Value), PipelineError> {
        self.translations.fetch_add(1, Ordering::SeqCst);
        let mut translated = report.clone();
        translated.summary = format!("[{target_language}] {}", report.summary);
        Ok((translated, json!({ "id": "resp_translation" })))
    }

    async fn translate_thought(&self, text: &str, target_language: &str) -> String {
        format!("[{target_language}] {text}")
    }
}
