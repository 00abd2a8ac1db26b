//! Job Store
//!
//! Owns the in-memory job cache and both lookup indices behind a single
//! async mutex. Every job mutation goes through [`JobStore::update`], a full
//! read-modify-write of the job document under that lock.
//!
//! Long external calls (download, transcription, model requests) never run
//! while the lock is held.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clipcheck_core::domain::job::{HistoryItem, Job, JobStatus};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::StoreError;
use super::pipeline::RunningTask;
use crate::repository::job::is_valid_job_id;
use crate::repository::{JobIndex, JobRepository, RepositoryError};
use crate::tools::{AnalysisTools, MediaTools};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 500;

const INTERRUPTED_MESSAGE: &str = "Interrupted by a server restart. Submit the URL again with force to retry.";

/// Runtime knobs of the store
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Language used when a request leaves it blank
    pub default_language: String,
    /// Whether completed jobs in another language may be translated
    pub translation_enabled: bool,
    /// Poll interval of the fake-progress estimators
    pub progress_tick: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            default_language: "ar".to_string(),
            translation_enabled: false,
            progress_tick: Duration::from_millis(1500),
        }
    }
}

/// State guarded by the store lock
pub(crate) struct StoreState {
    pub(crate) jobs: HashMap<String, Job>,
    pub(crate) index: JobIndex,
}

/// Durable, deduplicating job store
pub struct JobStore {
    pub(crate) repo: JobRepository,
    state: Mutex<StoreState>,
    pub(crate) running: std::sync::Mutex<HashMap<String, RunningTask>>,
    pub(crate) media: Arc<dyn MediaTools>,
    pub(crate) analysis: Arc<dyn AnalysisTools>,
    pub(crate) settings: StoreSettings,
}

impl JobStore {
    /// Opens the store rooted at `data_dir`
    ///
    /// Loads both indices, repairs the url-only index from the job documents
    /// on disk and fails any job a previous process left mid-pipeline.
    pub fn open(
        data_dir: impl AsRef<Path>,
        media: Arc<dyn MediaTools>,
        analysis: Arc<dyn AnalysisTools>,
        settings: StoreSettings,
    ) -> Result<Arc<Self>, StoreError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir.join("jobs")).map_err(RepositoryError::from)?;

        let repo = JobRepository::new(data_dir);
        repo.discard_staging(None);
        let mut index = JobIndex::load(data_dir);

        let jobs = repo.load_all();
        index.backfill(jobs.iter().map(|job| (job.url.as_str(), job.id.as_str())))?;

        let mut interrupted = 0;
        for mut job in jobs.into_iter().filter(|job| !job.status.is_terminal()) {
            job.status = JobStatus::Failed;
            job.progress = 100;
            job.error = Some(INTERRUPTED_MESSAGE.to_string());
            repo.save(&job)?;
            interrupted += 1;
        }
        if interrupted > 0 {
            warn!("Marked {} interrupted job(s) as failed", interrupted);
        }

        info!("Job store opened at {}", data_dir.display());

        Ok(Arc::new(Self {
            repo,
            state: Mutex::new(StoreState {
                jobs: HashMap::new(),
                index,
            }),
            running: std::sync::Mutex::new(HashMap::new()),
            media,
            analysis,
            settings,
        }))
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    #[cfg(test)]
    pub(crate) async fn lock_state(&self) -> tokio::sync::MutexGuard<'_, StoreState> {
        self.state.lock().await
    }

    /// Trims and lower-cases a requested language, substituting the default
    pub fn resolve_language(&self, output_language: Option<&str>) -> String {
        let language = output_language.unwrap_or_default().trim().to_lowercase();
        if language.is_empty() {
            self.settings.default_language.trim().to_lowercase()
        } else {
            language
        }
    }

    // =============================================================================
    // Lookup & creation
    // =============================================================================

    /// Returns the cached job for `(url, language)` or creates a new one
    ///
    /// # Arguments
    /// * `url` - Video url as submitted
    /// * `output_language` - Report language; blank means the default
    /// * `force` - Skip every cache and create a fresh full analysis
    ///
    /// Returns the job and whether it came from the cache.
    pub async fn find_or_create(
        &self,
        url: &str,
        output_language: Option<&str>,
        force: bool,
    ) -> Result<(Job, bool), StoreError> {
        let url = url.trim();
        let language = self.resolve_language(output_language);
        let mut state = self.state.lock().await;

        let mut translate_from = None;
        if !force {
            let cached_id = state
                .index
                .lookup_by_url_and_lang(url, &language)
                .map(str::to_string);
            if let Some(cached) = cached_id.and_then(|id| self.load_locked(&mut state, &id)) {
                if !self.is_stale_translation(&mut state, &cached) {
                    debug!("Cache hit for {} ({}): {}", url, language, cached.id);
                    return Ok((cached, true));
                }
                info!(
                    "Translation {} is stale, a newer analysis exists for {}",
                    cached.id, url
                );
            }

            if self.settings.translation_enabled {
                translate_from = self
                    .best_completed(&mut state, url, |job| job.output_language != language)
                    .map(|job| job.id);
            }
        }

        let mut job = Job::new(new_job_id(), url.to_string(), language.clone());
        job.translate_from_job_id = translate_from;
        self.repo.save(&job)?;
        state.index.record(url, &language, &job.id)?;
        state.index.record_url(url, &job.id)?;
        state.jobs.insert(job.id.clone(), job.clone());

        match &job.translate_from_job_id {
            Some(source) => info!("Created translation job {} from {}", job.id, source),
            None => info!("Created job {} for {}", job.id, url),
        }
        Ok((job, false))
    }

    /// A cached translation is stale when a different full analysis is now
    /// the most recent completed one for its url
    fn is_stale_translation(&self, state: &mut StoreState, cached: &Job) -> bool {
        if !cached.is_translation() || cached.status == JobStatus::Failed {
            return false;
        }
        self.best_completed(state, &cached.url, |job| !job.is_translation())
            .is_some_and(|latest| cached.translate_from_job_id.as_deref() != Some(latest.id.as_str()))
    }

    /// Preferred completed job with a report for a url
    ///
    /// Full analyses win over translations, then the most recently updated.
    fn best_completed<F>(&self, state: &mut StoreState, url: &str, filter: F) -> Option<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let ids = state.index.lookup_job_ids_for_url(url);
        let mut candidates: Vec<Job> = ids
            .iter()
            .filter_map(|id| self.load_locked(state, id))
            .filter(|job| job.status == JobStatus::Completed && job.report.is_some())
            .filter(|job| filter(job))
            .collect();

        candidates.sort_by(|a, b| {
            a.is_translation()
                .cmp(&b.is_translation())
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        candidates.into_iter().next()
    }

    /// Returns a job from the cache, falling back to its document on disk
    pub async fn get(&self, job_id: &str) -> Option<Job> {
        let mut state = self.state.lock().await;
        self.load_locked(&mut state, job_id)
    }

    pub(crate) fn load_locked(&self, state: &mut StoreState, job_id: &str) -> Option<Job> {
        if let Some(job) = state.jobs.get(job_id) {
            return Some(job.clone());
        }
        let job = self.repo.load(job_id)?;
        state.jobs.insert(job_id.to_string(), job.clone());
        Some(job)
    }

    // =============================================================================
    // Mutation
    // =============================================================================

    /// Atomically applies `apply` to a job and persists the whole document
    ///
    /// # Arguments
    /// * `job_id` - Job to modify
    /// * `touch` - Advance `updated_at`; backfill writes pass `false`
    /// * `apply` - Field changes; the job id cannot be changed
    ///
    /// Nothing is written when the job is gone or the status change would move
    /// it backwards.
    pub async fn update<F>(&self, job_id: &str, touch: bool, apply: F) -> Result<Job, StoreError>
    where
        F: FnOnce(&mut Job),
    {
        let mut state = self.state.lock().await;
        let current = self
            .load_locked(&mut state, job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        let mut next = current.clone();
        apply(&mut next);
        next.id = current.id.clone();
        next.created_at = current.created_at;

        if !current.status.can_transition_to(next.status) {
            return Err(StoreError::InvalidTransition {
                job_id: job_id.to_string(),
                from: current.status,
                to: next.status,
            });
        }

        next.updated_at = if touch { Utc::now() } else { current.updated_at };

        self.repo.save(&next)?;
        state.jobs.insert(job_id.to_string(), next.clone());
        Ok(next)
    }

    /// Runs `f` under the store lock, only while the job still exists
    ///
    /// Files written into a job directory from a background task go through
    /// here so a concurrent [`JobStore::delete_job`] cannot be undone.
    pub(crate) async fn with_live_job<R>(
        &self,
        job_id: &str,
        f: impl FnOnce(&JobRepository) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock().await;
        self.load_locked(&mut state, job_id)?;
        Some(f(&self.repo))
    }

    /// Every job indexed under the same normalized url
    pub(crate) async fn jobs_for_url(&self, url: &str) -> Vec<Job> {
        let mut state = self.state.lock().await;
        let ids = state.index.lookup_job_ids_for_url(url);
        ids.iter()
            .filter_map(|id| self.load_locked(&mut state, id))
            .collect()
    }

    /// Adds a job to the url-only index
    pub(crate) async fn record_url(&self, job: &Job) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.index.record_url(&job.url, &job.id)?;
        Ok(())
    }

    // =============================================================================
    // History
    // =============================================================================

    /// Summaries of every known job, most recently updated first
    pub async fn list_history(&self, limit: usize) -> Vec<HistoryItem> {
        let state = self.state.lock().await;

        let mut jobs: HashMap<String, Job> = self
            .repo
            .load_all()
            .into_iter()
            .map(|job| (job.id.clone(), job))
            .collect();
        for (id, job) in &state.jobs {
            jobs.insert(id.clone(), job.clone());
        }
        drop(state);

        let mut jobs: Vec<Job> = jobs.into_values().collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs.iter()
            .take(limit.min(MAX_HISTORY_LIMIT))
            .map(HistoryItem::from)
            .collect()
    }

    /// Deletes one job, cancelling its pipeline first
    ///
    /// Returns false when the job is unknown.
    pub async fn delete_job(&self, job_id: &str) -> bool {
        if !is_valid_job_id(job_id) {
            return false;
        }
        self.cancel_pipeline(job_id).await;

        let mut state = self.state.lock().await;
        let cached = state.jobs.remove(job_id).is_some();
        if !cached && !self.repo.job_dir(job_id).exists() {
            return false;
        }

        if let Err(e) = state.index.remove(job_id) {
            warn!("Failed to remove job {} from the indices: {}", job_id, e);
        }
        self.repo.remove(job_id);
        info!("Deleted job {}", job_id);
        true
    }

    /// Deletes every job, cancelling all running pipelines first
    ///
    /// Returns the number of deleted jobs.
    pub async fn delete_all_history(&self) -> usize {
        self.cancel_all_pipelines().await;

        let mut state = self.state.lock().await;
        let mut ids: Vec<String> = state.jobs.drain().map(|(id, _)| id).collect();
        for id in self.repo.list_ids() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        if let Err(e) = state.index.clear() {
            warn!("Failed to clear the indices: {}", e);
        }
        for id in &ids {
            self.repo.remove(id);
        }
        info!("Deleted {} job(s) from history", ids.len());
        ids.len()
    }

    /// Local thumbnail image of a job, if one was cached
    pub fn thumbnail_path(&self, job_id: &str) -> Option<PathBuf> {
        self.repo.thumbnail_file(job_id)
    }
}

fn new_job_id() -> String {
    Uuid::new_v4().simple().to_string()
}
