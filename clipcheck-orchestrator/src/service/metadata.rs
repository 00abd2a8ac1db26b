//! Metadata Backfill
//!
//! Best-effort enrichment of finished jobs with a title and a thumbnail.
//! Known values are reused from sibling jobs for the same url before any
//! tool is invoked, and whatever is found is shared back with the siblings.
//! Every write here passes `touch = false` so history order is unaffected.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clipcheck_core::domain::job::Job;
use tracing::debug;

use super::{JobStore, StoreError};

/// Stable per-job url serving the cached thumbnail image
pub fn thumbnail_endpoint(job_id: &str) -> String {
    format!("/api/jobs/{job_id}/thumbnail")
}

fn is_remote(url: &str) -> bool {
    url::Url::parse(url.trim()).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

impl JobStore {
    /// Whether the job's thumbnail can actually be displayed
    fn has_usable_thumbnail(&self, job: &Job) -> bool {
        match job.video_thumbnail.as_deref() {
            Some(url) if is_remote(url) => true,
            Some(_) => self.repo.thumbnail_file(&job.id).is_some(),
            None => false,
        }
    }

    fn needs_metadata(&self, job: &Job) -> bool {
        job.video_title.is_none() || !self.has_usable_thumbnail(job)
    }

    /// Remote thumbnail url of a job, if it points at one
    fn remote_thumbnail(job: &Job) -> Option<String> {
        job.video_thumbnail
            .as_deref()
            .filter(|url| is_remote(url))
            .map(str::to_string)
    }

    /// Stores a cached thumbnail image for a job
    ///
    /// # Arguments
    /// * `job_id` - Job owning the image
    /// * `source_url` - Video url, used for the tool-driven fallback
    /// * `direct_url` - Image url, tried first when present
    ///
    /// Returns true when the job ends up pointing at its local image.
    pub async fn cache_thumbnail(&self, job_id: &str, source_url: &str, direct_url: Option<&str>) -> bool {
        if self.repo.thumbnail_file(job_id).is_none() {
            let staging = self.repo.staging_dir();
            let fetched = self.fetch_thumbnail(source_url, direct_url, &staging).await;
            let Some(staged) = fetched else {
                self.repo.discard_staging(Some(&staging));
                debug!("No thumbnail available for job {}", job_id);
                return false;
            };
            let adopted = self
                .with_live_job(job_id, |repo| repo.adopt_thumbnail(job_id, &staged))
                .await;
            self.repo.discard_staging(Some(&staging));

            match adopted {
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Could not store thumbnail of job {}: {}", job_id, e);
                    return false;
                }
                None => {
                    debug!("Job {} was deleted, dropping its thumbnail", job_id);
                    return false;
                }
            }
        }

        let endpoint = thumbnail_endpoint(job_id);
        match self
            .update(job_id, false, |job| job.video_thumbnail = Some(endpoint))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!("Could not record thumbnail of job {}: {}", job_id, e);
                false
            }
        }
    }

    /// Downloads a thumbnail into `out_dir`, direct url first
    async fn fetch_thumbnail(&self, source_url: &str, direct_url: Option<&str>, out_dir: &Path) -> Option<PathBuf> {
        if let Some(direct) = direct_url.filter(|url| is_remote(url)) {
            if let Some(path) = self.media.fetch_thumbnail_bytes(direct, out_dir).await {
                return Some(path);
            }
        }
        self.media.fetch_thumbnail_via_tool(source_url, out_dir).await
    }

    /// Gives a job the thumbnail of another job
    ///
    /// Copies the cached image when there is one, otherwise reuses the
    /// remote url.
    pub(crate) async fn inherit_thumbnail(&self, job_id: &str, source: &Job) {
        let copied = self
            .with_live_job(job_id, |repo| repo.copy_thumbnail(&source.id, job_id))
            .await;
        let thumbnail = match copied {
            None => return,
            Some(Ok(Some(_))) => Some(thumbnail_endpoint(job_id)),
            Some(Ok(None)) => Self::remote_thumbnail(source),
            Some(Err(e)) => {
                debug!("Failed to copy thumbnail from {} to {}: {}", source.id, job_id, e);
                Self::remote_thumbnail(source)
            }
        };
        let Some(thumbnail) = thumbnail else {
            return;
        };

        let result = self
            .update(job_id, false, |job| job.video_thumbnail = Some(thumbnail))
            .await;
        if let Err(e) = result {
            debug!("Could not record inherited thumbnail of job {}: {}", job_id, e);
        }
    }

    /// Fills in a missing title or thumbnail of a finished job
    ///
    /// Safe to call redundantly. Jobs that are still running are left alone.
    pub async fn ensure_metadata(&self, job_id: &str) -> Result<(), StoreError> {
        let Some(mut job) = self.get(job_id).await else {
            return Ok(());
        };
        if !job.status.is_terminal() {
            return Ok(());
        }

        if self.needs_metadata(&job) {
            if let Some(source_id) = job.translate_from_job_id.clone() {
                if let Some(source) = self.get(&source_id).await {
                    job = self.copy_from(&job, &source).await?;
                }
            }
        }

        if self.needs_metadata(&job) {
            job = self.reuse_sibling_metadata(&job).await?;
        }

        if self.needs_metadata(&job) {
            let fetched = self.media.fetch_metadata(&job.url).await;
            let has_thumbnail = self.has_usable_thumbnail(&job);
            job = self
                .update(job_id, false, |j| {
                    if j.video_title.is_none() {
                        j.video_title = fetched.title.clone();
                    }
                    if !has_thumbnail && fetched.thumbnail_url.is_some() {
                        j.video_thumbnail = fetched.thumbnail_url.clone();
                    }
                })
                .await?;
        }

        if self.repo.thumbnail_file(job_id).is_none() && !self.has_usable_thumbnail(&job) {
            let direct = Self::remote_thumbnail(&job);
            if self.cache_thumbnail(job_id, &job.url, direct.as_deref()).await {
                if let Some(updated) = self.get(job_id).await {
                    job = updated;
                }
            }
        }

        self.propagate_to_siblings(&job).await;
        Ok(())
    }

    /// Runs [`JobStore::ensure_metadata`] in the background
    pub fn spawn_ensure_metadata(self: &Arc<Self>, job_id: &str) {
        let store = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.ensure_metadata(&job_id).await {
                debug!("Metadata backfill for job {} failed: {}", job_id, e);
            }
        });
    }

    /// Copies the title and thumbnail `source` has and `job` lacks
    async fn copy_from(&self, job: &Job, source: &Job) -> Result<Job, StoreError> {
        if job.video_title.is_none() && source.video_title.is_some() {
            let title = source.video_title.clone();
            self.update(&job.id, false, |j| j.video_title = title).await?;
        }
        if !self.has_usable_thumbnail(job) && self.has_usable_thumbnail(source) {
            self.inherit_thumbnail(&job.id, source).await;
        }
        self.get(&job.id)
            .await
            .ok_or_else(|| StoreError::NotFound(job.id.clone()))
    }

    async fn reuse_sibling_metadata(&self, job: &Job) -> Result<Job, StoreError> {
        let siblings = self.sibling_jobs(job).await;

        let title = siblings.iter().find_map(|s| s.video_title.clone());
        let remote = siblings.iter().find_map(Self::remote_thumbnail);
        let has_thumbnail = self.has_usable_thumbnail(job);

        let mut updated = self
            .update(&job.id, false, |j| {
                if j.video_title.is_none() {
                    j.video_title = title;
                }
                if !has_thumbnail && remote.is_some() {
                    j.video_thumbnail = remote;
                }
            })
            .await?;

        if !self.has_usable_thumbnail(&updated) {
            let local = siblings
                .iter()
                .find(|s| self.repo.thumbnail_file(&s.id).is_some());
            if let Some(sibling) = local {
                self.inherit_thumbnail(&job.id, sibling).await;
                if let Some(job) = self.get(&job.id).await {
                    updated = job;
                }
            }
        }
        Ok(updated)
    }

    /// Shares the job's title and thumbnail with finished siblings lacking them
    async fn propagate_to_siblings(&self, job: &Job) {
        if job.video_title.is_none() && !self.has_usable_thumbnail(job) {
            return;
        }

        for sibling in self.sibling_jobs(job).await {
            if !sibling.status.is_terminal() || !self.needs_metadata(&sibling) {
                continue;
            }

            if sibling.video_title.is_none() && job.video_title.is_some() {
                let title = job.video_title.clone();
                if let Err(e) = self
                    .update(&sibling.id, false, |j| j.video_title = title)
                    .await
                {
                    debug!("Could not share title with job {}: {}", sibling.id, e);
                }
            }
            if !self.has_usable_thumbnail(&sibling) && self.has_usable_thumbnail(job) {
                self.inherit_thumbnail(&sibling.id, job).await;
            }
        }
    }

    /// Other jobs created for the same url
    async fn sibling_jobs(&self, job: &Job) -> Vec<Job> {
        self.jobs_for_url(&job.url)
            .await
            .into_iter()
            .filter(|other| other.id != job.id)
            .collect()
    }
}
