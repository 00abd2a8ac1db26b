//! Job Repository
//!
//! Durable per-job storage. Each job owns one directory:
//!
//! ```text
//! <data_dir>/jobs/<id>/
//!     job.json            job document (source of truth on restart)
//!     transcript.txt
//!     report.json
//!     raw_response.json   provider payload
//!     media/              audio, thumbnail.<ext>, segments/
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clipcheck_core::domain::job::Job;
use clipcheck_core::domain::report::FactCheckReport;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{RepositoryError, Result};

const JOB_FILE: &str = "job.json";
const TRANSCRIPT_FILE: &str = "transcript.txt";
const REPORT_FILE: &str = "report.json";
const RAW_RESPONSE_FILE: &str = "raw_response.json";
const MEDIA_DIR: &str = "media";
const THUMBNAIL_STEM: &str = "thumbnail";
const STAGING_DIR: &str = "staging";

/// File-backed store of job documents and their artifacts
#[derive(Debug, Clone)]
pub struct JobRepository {
    data_dir: PathBuf,
    jobs_dir: PathBuf,
}

impl JobRepository {
    /// Creates a repository rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let jobs_dir = data_dir.join("jobs");
        Self { data_dir, jobs_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.jobs_dir.join(job_id)
    }

    pub fn transcript_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(TRANSCRIPT_FILE)
    }

    pub fn report_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(REPORT_FILE)
    }

    pub fn raw_response_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(RAW_RESPONSE_FILE)
    }

    pub fn media_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(MEDIA_DIR)
    }

    fn job_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(JOB_FILE)
    }

    // =============================================================================
    // Job documents
    // =============================================================================

    /// Loads a job document
    ///
    /// Missing, unreadable or invalid documents are all reported as `None`.
    pub fn load(&self, job_id: &str) -> Option<Job> {
        if !is_valid_job_id(job_id) {
            return None;
        }

        let path = self.job_path(job_id);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<Job>(&data) {
            Ok(job) if job.id == job_id => Some(job),
            Ok(job) => {
                warn!("Job document {} carries mismatched id {}", job_id, job.id);
                None
            }
            Err(e) => {
                warn!("Invalid job document {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Persists the full job document
    pub fn save(&self, job: &Job) -> Result<()> {
        if !is_valid_job_id(&job.id) {
            return Err(RepositoryError::InvalidJobId(job.id.clone()));
        }
        write_json_atomic(&self.job_path(&job.id), job)
    }

    /// Ids of every job directory on disk
    pub fn list_ids(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.jobs_dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to list {}: {}", self.jobs_dir.display(), e);
                }
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|id| is_valid_job_id(id))
            .collect()
    }

    /// Every valid job document on disk
    pub fn load_all(&self) -> Vec<Job> {
        self.list_ids()
            .iter()
            .filter_map(|id| self.load(id))
            .collect()
    }

    // =============================================================================
    // Artifacts
    // =============================================================================

    pub fn write_transcript(&self, job_id: &str, transcript: &str) -> Result<()> {
        write_atomic(&self.transcript_path(job_id), transcript.as_bytes())
    }

    pub fn write_report(&self, job_id: &str, report: &FactCheckReport) -> Result<()> {
        write_json_atomic(&self.report_path(job_id), report)
    }

    pub fn write_raw_response(&self, job_id: &str, raw: &serde_json::Value) -> Result<()> {
        write_json_atomic(&self.raw_response_path(job_id), raw)
    }

    /// Cached thumbnail image of a job, if any
    pub fn thumbnail_file(&self, job_id: &str) -> Option<PathBuf> {
        if !is_valid_job_id(job_id) {
            return None;
        }
        find_thumbnail(&self.media_dir(job_id))
    }

    /// Copies one job's cached thumbnail into another job's media directory
    ///
    /// Returns the new path, or `None` when the source has no thumbnail.
    pub fn copy_thumbnail(&self, from_job_id: &str, to_job_id: &str) -> Result<Option<PathBuf>> {
        let Some(source) = self.thumbnail_file(from_job_id) else {
            return Ok(None);
        };
        let target_dir = self.media_dir(to_job_id);
        fs::create_dir_all(&target_dir)?;
        clear_thumbnails(&target_dir);

        let file_name = source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| format!("{THUMBNAIL_STEM}.jpg").into());
        let target = target_dir.join(file_name);
        fs::copy(&source, &target)?;
        Ok(Some(target))
    }

    /// Fresh scratch directory outside every job directory
    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir
            .join(STAGING_DIR)
            .join(Uuid::new_v4().simple().to_string())
    }

    /// Removes one scratch directory, or all of them when `dir` is `None`
    pub fn discard_staging(&self, dir: Option<&Path>) {
        let root = self.data_dir.join(STAGING_DIR);
        let target = dir.filter(|d| d.starts_with(&root)).unwrap_or(&root);
        match fs::remove_dir_all(target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!("Failed to remove {}: {}", target.display(), e),
        }
    }

    /// Moves a staged thumbnail into a job's media directory
    ///
    /// Replaces any thumbnail the job already had.
    pub fn adopt_thumbnail(&self, job_id: &str, staged: &Path) -> Result<PathBuf> {
        if !is_valid_job_id(job_id) {
            return Err(RepositoryError::InvalidJobId(job_id.to_string()));
        }
        let target_dir = self.media_dir(job_id);
        fs::create_dir_all(&target_dir)?;
        clear_thumbnails(&target_dir);

        let file_name = staged
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| format!("{THUMBNAIL_STEM}.jpg").into());
        let target = target_dir.join(file_name);
        if fs::rename(staged, &target).is_err() {
            fs::copy(staged, &target)?;
        }
        Ok(target)
    }

    /// Deletes transient media of a finished job, keeping its thumbnail
    pub fn prune_media(&self, job_id: &str) -> Result<()> {
        let media_dir = self.media_dir(job_id);
        let entries = match fs::read_dir(&media_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if is_thumbnail(&path) {
                continue;
            }
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(e) = removed {
                debug!("Failed to prune {}: {}", path.display(), e);
            }
        }
        Ok(())
    }

    /// Removes a job directory
    ///
    /// Best-effort: returns false when anything could not be removed.
    pub fn remove(&self, job_id: &str) -> bool {
        if !is_valid_job_id(job_id) {
            return false;
        }
        match fs::remove_dir_all(self.job_dir(job_id)) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!("Failed to remove job directory {}: {}", job_id, e);
                false
            }
        }
    }
}

/// Job ids are generated hex strings; anything else never touches the disk
pub fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id.len() <= 64
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub(crate) fn is_thumbnail(path: &Path) -> bool {
    path.is_file()
        && path
            .file_stem()
            .map(|stem| stem == THUMBNAIL_STEM)
            .unwrap_or(false)
}

/// First `thumbnail.*` file in a directory
pub(crate) fn find_thumbnail(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_thumbnail(p))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Removes every `thumbnail.*` file in a directory
pub(crate) fn clear_thumbnails(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
        if is_thumbnail(&path) {
            let _ = fs::remove_file(&path);
        }
    }
}

/// Writes bytes through a sibling temp file and a rename
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> (tempfile::TempDir, JobRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = JobRepository::new(dir.path());
        (dir, repo)
    }

    fn job(id: &str) -> Job {
        Job::new(id.to_string(), "https://youtu.be/abc".to_string(), "en".to_string())
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (_dir, repo) = repo();
        let job = job("abc123");
        repo.save(&job).unwrap();
        assert_eq!(repo.load("abc123"), Some(job));
        assert_eq!(repo.list_ids(), vec!["abc123".to_string()]);
    }

    #[test]
    fn test_invalid_document_is_missing() {
        let (_dir, repo) = repo();
        fs::create_dir_all(repo.job_dir("broken")).unwrap();
        fs::write(repo.job_path("broken"), "{ not json").unwrap();
        assert_eq!(repo.load("broken"), None);
        assert!(repo.load_all().is_empty());
    }

    #[test]
    fn test_path_traversal_ids_rejected() {
        let (_dir, repo) = repo();
        assert_eq!(repo.load("../etc"), None);
        assert!(!repo.remove("../../"));
        assert!(repo.save(&job("a/b")).is_err());
    }

    #[test]
    fn test_prune_media_keeps_thumbnail() {
        let (_dir, repo) = repo();
        let media = repo.media_dir("job1");
        fs::create_dir_all(media.join("segments")).unwrap();
        fs::write(media.join("audio.mp3"), b"a").unwrap();
        fs::write(media.join("segments/part_000.mp3"), b"s").unwrap();
        fs::write(media.join("thumbnail.jpg"), b"t").unwrap();

        repo.prune_media("job1").unwrap();

        assert!(!media.join("audio.mp3").exists());
        assert!(!media.join("segments").exists());
        assert_eq!(repo.thumbnail_file("job1"), Some(media.join("thumbnail.jpg")));
    }

    #[test]
    fn test_copy_thumbnail_between_jobs() {
        let (_dir, repo) = repo();
        assert_eq!(repo.copy_thumbnail("src", "dst").unwrap(), None);

        let media = repo.media_dir("src");
        fs::create_dir_all(&media).unwrap();
        fs::write(media.join("thumbnail.webp"), b"img").unwrap();

        let copied = repo.copy_thumbnail("src", "dst").unwrap().unwrap();
        assert_eq!(copied, repo.media_dir("dst").join("thumbnail.webp"));
        assert_eq!(fs::read(copied).unwrap(), b"img");
    }

    #[test]
    fn test_adopt_staged_thumbnail() {
        let (_dir, repo) = repo();
        repo.save(&job("abc")).unwrap();
        let staging = repo.staging_dir();
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("thumbnail.webp"), b"img").unwrap();

        let adopted = repo.adopt_thumbnail("abc", &staging.join("thumbnail.webp")).unwrap();
        assert_eq!(adopted, repo.media_dir("abc").join("thumbnail.webp"));
        assert_eq!(repo.thumbnail_file("abc"), Some(adopted));

        repo.discard_staging(Some(&staging));
        assert!(!staging.exists());
        assert!(repo.adopt_thumbnail("../x", &staging).is_err());
    }

    #[test]
    fn test_remove_missing_directory_is_ok() {
        let (_dir, repo) = repo();
        repo.save(&job("gone")).unwrap();
        assert!(repo.remove("gone"));
        assert!(!repo.job_dir("gone").exists());
        assert!(repo.remove("gone"));
    }
}
