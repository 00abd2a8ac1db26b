//! Pipeline Execution
//!
//! One tokio task per job. The task registry guarantees at most one running
//! pipeline per job id; deleting a job aborts its task, so nothing runs (and
//! nothing is written) after cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};

use clipcheck_core::domain::job::{Job, JobStatus};
use clipcheck_core::domain::report::FactCheckReport;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::progress::{ProgressSchedule, ProgressTask};
use super::{JobStore, PipelineError, StoreError};
use crate::tools::VideoMetadata;

/// Buffered reasoning summaries between the model stream and the job writer
const THOUGHT_CHANNEL_CAPACITY: usize = 32;

static NEXT_TASK_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Registry entry of a running pipeline
pub(crate) struct RunningTask {
    token: u64,
    handle: JoinHandle<()>,
}

/// Removes the registry entry when the pipeline future ends or is dropped
struct RunningGuard {
    store: Arc<JobStore>,
    job_id: String,
    token: u64,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut running = self.store.running_tasks();
        if running
            .get(&self.job_id)
            .is_some_and(|task| task.token == self.token)
        {
            running.remove(&self.job_id);
        }
    }
}

impl JobStore {
    fn running_tasks(&self) -> MutexGuard<'_, HashMap<String, RunningTask>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the pipeline of a job in the background
    ///
    /// Returns false without doing anything when a pipeline for this job id
    /// is already running.
    pub fn run_pipeline(self: &Arc<Self>, job_id: &str) -> bool {
        let mut running = self.running_tasks();
        if running.contains_key(job_id) {
            debug!("Pipeline for job {} is already running", job_id);
            return false;
        }

        let token = NEXT_TASK_TOKEN.fetch_add(1, Ordering::Relaxed);
        let store = Arc::clone(self);
        let id = job_id.to_string();
        let handle = tokio::spawn(async move {
            let _guard = RunningGuard {
                store: Arc::clone(&store),
                job_id: id.clone(),
                token,
            };
            store.execute(&id).await;
        });

        running.insert(job_id.to_string(), RunningTask { token, handle });
        true
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.running_tasks().contains_key(job_id)
    }

    /// Aborts a job's pipeline and waits until the task is gone
    pub(crate) async fn cancel_pipeline(&self, job_id: &str) {
        let task = self.running_tasks().remove(job_id);
        if let Some(task) = task {
            task.handle.abort();
            let _ = task.handle.await;
            info!("Cancelled pipeline for job {}", job_id);
        }
    }

    pub(crate) async fn cancel_all_pipelines(&self) {
        let tasks: Vec<RunningTask> = self.running_tasks().drain().map(|(_, task)| task).collect();
        for task in &tasks {
            task.handle.abort();
        }
        for task in tasks {
            let _ = task.handle.await;
        }
    }

    async fn execute(self: &Arc<Self>, job_id: &str) {
        let Some(job) = self.get(job_id).await else {
            debug!("Job {} vanished before its pipeline started", job_id);
            return;
        };
        if job.status.is_terminal() {
            debug!("Job {} is already {}, not running", job_id, job.status);
            return;
        }

        info!("Starting pipeline for job {}", job_id);
        let result = match job.translate_from_job_id.as_deref() {
            Some(source_id) => self.run_translation_pipeline(&job, source_id).await,
            None => self.run_full_pipeline(&job).await,
        };

        match result {
            Ok(()) => info!("Job {} completed", job_id),
            Err(PipelineError::Store(StoreError::NotFound(_))) => {
                debug!("Job {} was removed while its pipeline ran", job_id);
            }
            Err(e) => {
                let message = failure_message(&e);
                warn!("Job {} failed: {}", job_id, message);
                let marked = self
                    .update(job_id, true, |job| {
                        job.status = JobStatus::Failed;
                        job.progress = 100;
                        job.error = Some(message);
                    })
                    .await;
                if let Err(e) = marked {
                    debug!("Could not mark job {} as failed: {}", job_id, e);
                }
            }
        }
    }

    // =============================================================================
    // Full analysis
    // =============================================================================

    async fn run_full_pipeline(self: &Arc<Self>, job: &Job) -> Result<(), PipelineError> {
        let job_id = job.id.as_str();
        let media_dir = self.repo.media_dir(job_id);
        let mut transcript = None;
        let mut thumbnail_url = None;

        if self.media.is_caption_platform(&job.url) {
            self.update(job_id, true, |j| {
                j.status = JobStatus::FetchingTranscript;
                j.progress = 5;
                j.error = None;
            })
            .await?;

            let fetched = self
                .media
                .fetch_captions_and_metadata(&job.url, &media_dir)
                .await;
            self.apply_metadata(job_id, &fetched.metadata).await?;
            if let Some(direct) = fetched.metadata.thumbnail_url.as_deref() {
                self.cache_thumbnail(job_id, &job.url, Some(direct)).await;
            }
            thumbnail_url = fetched.metadata.thumbnail_url;
            transcript = fetched.transcript.filter(|t| !t.trim().is_empty());
        }

        let transcript = match transcript {
            Some(text) => text,
            None => {
                let current = self
                    .update(job_id, true, |j| {
                        j.status = JobStatus::Downloading;
                        j.progress = 10;
                        j.error = None;
                    })
                    .await?;

                let audio = self.media.download_audio(&job.url, &media_dir).await?;

                if current.video_title.is_none() || current.video_thumbnail.is_none() {
                    let fetched = self.media.fetch_metadata(&job.url).await;
                    self.apply_metadata(job_id, &fetched).await?;
                    thumbnail_url = fetched.thumbnail_url.or(thumbnail_url);
                }
                self.cache_thumbnail(job_id, &job.url, thumbnail_url.as_deref())
                    .await;

                self.update(job_id, true, |j| {
                    j.status = JobStatus::Transcribing;
                    j.progress = 20;
                })
                .await?;
                self.analysis.transcribe(&audio).await?
            }
        };

        self.repo.write_transcript(job_id, &transcript)?;
        let current = self
            .update(job_id, true, |j| {
                j.status = JobStatus::FactChecking;
                j.progress = 30;
                j.transcript = Some(transcript.clone());
                j.thought_summaries.clear();
            })
            .await?;

        let progress = ProgressTask::spawn(
            Arc::clone(self),
            job_id.to_string(),
            ProgressSchedule::FactCheck,
        );
        let result = self.fact_check_with_thoughts(&current, &transcript).await;
        progress.stop().await;
        let (report, raw) = result?;

        self.repo.write_report(job_id, &report)?;
        self.repo.write_raw_response(job_id, &raw)?;
        self.record_url(&current).await?;
        if let Err(e) = self.repo.prune_media(job_id) {
            debug!("Failed to prune media of job {}: {}", job_id, e);
        }

        self.update(job_id, true, |j| {
            j.status = JobStatus::Completed;
            j.progress = 100;
            j.report = Some(report);
            j.error = None;
        })
        .await?;
        Ok(())
    }

    /// Runs the streaming fact-check while recording its thoughts
    ///
    /// The consumer runs in this same task, so aborting the pipeline stops
    /// both sides.
    async fn fact_check_with_thoughts(
        &self,
        job: &Job,
        transcript: &str,
    ) -> Result<(FactCheckReport, Value), PipelineError> {
        let (tx, mut rx) = mpsc::channel::<String>(THOUGHT_CHANNEL_CAPACITY);

        let check = self
            .analysis
            .fact_check_stream(transcript, &job.url, &job.output_language, tx);
        let consume = async {
            while let Some(thought) = rx.recv().await {
                self.record_thought(&job.id, &job.output_language, &thought)
                    .await;
            }
        };

        let (result, ()) = tokio::join!(check, consume);
        result
    }

    async fn record_thought(&self, job_id: &str, output_language: &str, thought: &str) {
        let thought = thought.trim();
        if thought.is_empty() {
            return;
        }

        let text = if output_language.eq_ignore_ascii_case("en") {
            thought.to_string()
        } else {
            self.analysis
                .translate_thought(thought, output_language)
                .await
                .trim()
                .to_string()
        };
        if text.is_empty() {
            return;
        }

        let result = self
            .update(job_id, true, |job| {
                job.push_thought(text);
            })
            .await;
        if let Err(e) = result {
            debug!("Dropped thought for job {}: {}", job_id, e);
        }
    }

    // =============================================================================
    // Translation
    // =============================================================================

    async fn run_translation_pipeline(
        self: &Arc<Self>,
        job: &Job,
        source_id: &str,
    ) -> Result<(), PipelineError> {
        let job_id = job.id.as_str();
        let source = self.get(source_id).await.ok_or_else(|| {
            PipelineError::InvalidInput(format!("Source job {source_id} no longer exists."))
        })?;
        let report = source.report.clone().ok_or_else(|| {
            PipelineError::InvalidInput(format!("Source job {source_id} has no report to translate."))
        })?;

        let current = self
            .update(job_id, true, |j| {
                j.status = JobStatus::Translating;
                j.progress = 0;
                j.error = None;
                j.transcript = source.transcript.clone();
                if j.video_title.is_none() {
                    j.video_title = source.video_title.clone();
                }
            })
            .await?;
        self.inherit_thumbnail(job_id, &source).await;
        if let Some(transcript) = &source.transcript {
            self.repo.write_transcript(job_id, transcript)?;
        }

        let progress = ProgressTask::spawn(
            Arc::clone(self),
            job_id.to_string(),
            ProgressSchedule::Translation,
        );
        let result = self
            .analysis
            .translate_report(&report, &current.output_language)
            .await;
        progress.stop().await;
        let (translated, raw) = result?;

        self.repo.write_report(job_id, &translated)?;
        self.repo.write_raw_response(job_id, &raw)?;
        self.record_url(&current).await?;

        self.update(job_id, true, |j| {
            j.status = JobStatus::Completed;
            j.progress = 100;
            j.report = Some(translated);
        })
        .await?;
        Ok(())
    }

    /// Stores a title and a remote thumbnail url when the job lacks them
    async fn apply_metadata(&self, job_id: &str, metadata: &VideoMetadata) -> Result<(), StoreError> {
        if metadata.is_empty() {
            return Ok(());
        }
        self.update(job_id, true, |job| {
            if let Some(title) = &metadata.title {
                job.video_title = Some(title.clone());
            }
            if job.video_thumbnail.is_none() {
                job.video_thumbnail = metadata.thumbnail_url.clone();
            }
        })
        .await?;
        Ok(())
    }
}

/// Turns a pipeline error into the text stored on the failed job
fn failure_message(err: &PipelineError) -> String {
    match err {
        PipelineError::Download(message) if looks_like_bot_check(message) => format!(
            "Download failed: the platform asked for a sign-in or bot check. \
             Set YTDLP_COOKIES_FILE to a cookies.txt exported from a logged-in browser and retry. ({})",
            message.lines().next().unwrap_or_default().trim()
        ),
        PipelineError::Download(message) => format!("Download failed: {message}"),
        other => other.to_string(),
    }
}

fn looks_like_bot_check(message: &str) -> bool {
    const MARKERS: &[&str] = &[
        "sign in to confirm",
        "not a bot",
        "--cookies",
        "cookies-from-browser",
        "login required",
        "log in",
        "http error 429",
        "too many requests",
    ];
    let message = message.to_lowercase();
    MARKERS.iter().any(|marker| message.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fakes::{open_store, wait_terminal};
    use clipcheck_core::domain::report::OverallVerdict;

    #[tokio::test]
    async fn test_full_pipeline_via_download() {
        let (_dir, store, media, analysis) = open_store(false);
        *media.metadata.lock().unwrap() = VideoMetadata {
            title: Some("A video".to_string()),
            thumbnail_url: Some("https://img.example/t.jpg".to_string()),
        };

        let (job, cached) = store
            .find_or_create("https://youtu.be/abc123", Some("fr"), false)
            .await
            .unwrap();
        assert!(!cached);
        assert_eq!(job.status, JobStatus::Queued);

        assert!(store.run_pipeline(&job.id));
        let done = wait_terminal(&store, &job.id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.error, None);
        let report = done.report.unwrap();
        assert!(report.overall_score <= 100);
        assert_eq!(report.overall_score, 70);
        assert_eq!(report.overall_verdict, OverallVerdict::MostlyAccurate);
        assert_eq!(done.transcript.as_deref(), Some("transcribed audio"));
        assert_eq!(done.video_title.as_deref(), Some("A video"));
        assert_eq!(
            done.video_thumbnail,
            Some(format!("/api/jobs/{}/thumbnail", job.id))
        );

        assert_eq!(media.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(analysis.transcriptions.load(Ordering::SeqCst), 1);
        assert!(store.repo.report_path(&job.id).exists());
        assert!(store.repo.raw_response_path(&job.id).exists());
        assert!(store.repo.transcript_path(&job.id).exists());
        assert!(!store.repo.media_dir(&job.id).join("audio.mp3").exists());
        assert!(store.thumbnail_path(&job.id).is_some());
        assert!(!store.is_running(&job.id));
    }

    #[tokio::test]
    async fn test_captions_skip_download() {
        let (_dir, store, media, analysis) = open_store(false);
        *media.captions.lock().unwrap() = Some("caption text".to_string());

        let (job, _) = store
            .find_or_create("https://www.youtube.com/watch?v=abc123", Some("en"), false)
            .await
            .unwrap();
        store.run_pipeline(&job.id);
        let done = wait_terminal(&store, &job.id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.transcript.as_deref(), Some("caption text"));
        assert_eq!(media.downloads.load(Ordering::SeqCst), 0);
        assert_eq!(analysis.transcriptions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_captions_fall_back_to_download() {
        let (_dir, store, media, analysis) = open_store(false);
        *media.captions.lock().unwrap() = Some(" \n\t ".to_string());

        let (job, _) = store
            .find_or_create("https://youtu.be/abc123", Some("en"), false)
            .await
            .unwrap();
        store.run_pipeline(&job.id);
        let done = wait_terminal(&store, &job.id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.transcript.as_deref(), Some("transcribed audio"));
        assert_eq!(media.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(analysis.transcriptions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_pipeline_at_most_once() {
        let (_dir, store, _media, analysis) = open_store(false);
        analysis.hold.store(true, Ordering::SeqCst);

        let (job, _) = store
            .find_or_create("https://example.com/v/1", Some("en"), false)
            .await
            .unwrap();
        assert!(store.run_pipeline(&job.id));
        assert!(!store.run_pipeline(&job.id));

        analysis.started.notified().await;
        assert!(!store.run_pipeline(&job.id));
        analysis.release.notify_one();

        let done = wait_terminal(&store, &job.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(analysis.fact_checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminal_job_does_not_run() {
        let (_dir, store, media, _analysis) = open_store(false);
        let (job, _) = store
            .find_or_create("https://example.com/v/1", Some("en"), false)
            .await
            .unwrap();
        store
            .update(&job.id, true, |j| j.status = JobStatus::Failed)
            .await
            .unwrap();

        store.run_pipeline(&job.id);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(media.downloads.load(Ordering::SeqCst), 0);
        assert!(!store.is_running(&job.id));
    }

    #[tokio::test]
    async fn test_delete_cancels_in_flight_pipeline() {
        let (_dir, store, _media, analysis) = open_store(false);
        analysis.hold.store(true, Ordering::SeqCst);

        let (job, _) = store
            .find_or_create("https://example.com/v/1", Some("en"), false)
            .await
            .unwrap();
        store.run_pipeline(&job.id);
        analysis.started.notified().await;

        assert!(store.delete_job(&job.id).await);
        assert!(!store.is_running(&job.id));
        analysis.release.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(store.get(&job.id).await.is_none());
        assert!(!store.repo.job_dir(&job.id).exists());
    }

    #[tokio::test]
    async fn test_thoughts_translated_and_deduplicated() {
        let (_dir, store, _media, analysis) = open_store(false);
        *analysis.thoughts.lock().unwrap() =
            vec!["Checking".into(), "Checking".into(), "  ".into(), "Sources".into()];

        let (job, _) = store
            .find_or_create("https://example.com/v/1", Some("fr"), false)
            .await
            .unwrap();
        store.run_pipeline(&job.id);
        let done = wait_terminal(&store, &job.id).await;

        assert_eq!(
            done.thought_summaries,
            vec!["[fr] Checking".to_string(), "[fr] Sources".to_string()]
        );
    }

    #[tokio::test]
    async fn test_english_thoughts_not_translated() {
        let (_dir, store, _media, analysis) = open_store(false);
        *analysis.thoughts.lock().unwrap() = vec!["Checking".into()];

        let (job, _) = store
            .find_or_create("https://example.com/v/1", Some("en"), false)
            .await
            .unwrap();
        store.run_pipeline(&job.id);
        let done = wait_terminal(&store, &job.id).await;
        assert_eq!(done.thought_summaries, vec!["Checking".to_string()]);
    }

    #[tokio::test]
    async fn test_bot_check_download_failure_has_guidance() {
        let (_dir, store, media, _analysis) = open_store(false);
        *media.download_error.lock().unwrap() =
            Some("ERROR: Sign in to confirm you're not a bot".to_string());

        let (job, _) = store
            .find_or_create("https://example.com/v/1", Some("en"), false)
            .await
            .unwrap();
        store.run_pipeline(&job.id);
        let done = wait_terminal(&store, &job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.progress, 100);
        let error = done.error.unwrap();
        assert!(error.starts_with("Download failed:"));
        assert!(error.contains("YTDLP_COOKIES_FILE"));
    }

    #[tokio::test]
    async fn test_fact_check_failure_marks_job_failed() {
        let (_dir, store, _media, analysis) = open_store(false);
        *analysis.fact_check_error.lock().unwrap() = Some("Model returned empty output".into());

        let (job, _) = store
            .find_or_create("https://example.com/v/1", Some("en"), false)
            .await
            .unwrap();
        store.run_pipeline(&job.id);
        let done = wait_terminal(&store, &job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("Model returned empty output"));
        assert!(done.report.is_none());
    }

    #[tokio::test]
    async fn test_translation_pipeline_reuses_source() {
        let (_dir, store, media, analysis) = open_store(true);
        *media.metadata.lock().unwrap() = VideoMetadata {
            title: Some("A video".to_string()),
            thumbnail_url: Some("https://img.example/t.jpg".to_string()),
        };
        let url = "https://example.com/v/1";

        let (source, _) = store.find_or_create(url, Some("en"), false).await.unwrap();
        store.run_pipeline(&source.id);
        let source = wait_terminal(&store, &source.id).await;
        assert_eq!(source.status, JobStatus::Completed);

        let (translation, cached) = store.find_or_create(url, Some("fr"), false).await.unwrap();
        assert!(!cached);
        assert!(translation.is_translation());
        store.run_pipeline(&translation.id);
        let done = wait_terminal(&store, &translation.id).await;

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        let report = done.report.unwrap();
        assert!(report.summary.starts_with("[fr]"));
        assert_eq!(report.overall_score, source.report.unwrap().overall_score);
        assert_eq!(done.transcript, source.transcript);
        assert_eq!(done.video_title.as_deref(), Some("A video"));
        assert!(done.video_thumbnail.is_some());
        assert_eq!(media.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(analysis.fact_checks.load(Ordering::SeqCst), 1);
        assert_eq!(analysis.translations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_translation_without_source_report_fails() {
        let (_dir, store, _media, _analysis) = open_store(true);
        let (source, _) = store
            .find_or_create("https://example.com/v/1", Some("en"), false)
            .await
            .unwrap();
        let (mut job, _) = store
            .find_or_create("https://example.com/v/1", Some("fr"), false)
            .await
            .unwrap();
        job = store
            .update(&job.id, true, |j| j.translate_from_job_id = Some(source.id.clone()))
            .await
            .unwrap();

        store.run_pipeline(&job.id);
        let done = wait_terminal(&store, &job.id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error.unwrap().contains("has no report"));
    }

    #[test]
    fn test_plain_download_failure_message() {
        let err = PipelineError::Download("ffmpeg not found".to_string());
        assert_eq!(failure_message(&err), "Download failed: ffmpeg not found");
        let err = PipelineError::Transcription("Chunk transcription failed for 2 part(s).".into());
        assert_eq!(
            failure_message(&err),
            "Chunk transcription failed for 2 part(s)."
        );
    }
}
