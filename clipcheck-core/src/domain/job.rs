//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::report::{FactCheckReport, OverallVerdict};

/// Analysis job record
///
/// Persisted by the orchestrator as one document per job and returned as-is
/// to clients polling for progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub output_language: String,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub report: Option<FactCheckReport>,
    #[serde(default)]
    pub video_title: Option<String>,
    /// Remote image URL or the job's own thumbnail endpoint
    #[serde(default)]
    pub video_thumbnail: Option<String>,
    #[serde(default)]
    pub thought_summaries: Vec<String>,
    /// Set when this job translates another job's report
    #[serde(default)]
    pub translate_from_job_id: Option<String>,
}

impl Job {
    /// Creates a queued job
    pub fn new(id: String, url: String, output_language: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            url,
            output_language,
            status: JobStatus::Queued,
            progress: 0,
            created_at: now,
            updated_at: now,
            error: None,
            transcript: None,
            report: None,
            video_title: None,
            video_thumbnail: None,
            thought_summaries: Vec::new(),
            translate_from_job_id: None,
        }
    }

    pub fn is_translation(&self) -> bool {
        self.translate_from_job_id.is_some()
    }

    /// Appends a thought summary unless it repeats the previous one
    ///
    /// Returns true when the list changed.
    pub fn push_thought(&mut self, thought: String) -> bool {
        if self.thought_summaries.last() == Some(&thought) {
            return false;
        }
        self.thought_summaries.push(thought);
        true
    }
}

/// Pipeline status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    FetchingTranscript,
    Downloading,
    Transcribing,
    FactChecking,
    Translating,
    Completed,
    Failed,
}

impl JobStatus {
    /// Returns true for statuses no pipeline may leave
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position in the pipeline stage order
    fn stage_rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::FetchingTranscript => 1,
            JobStatus::Downloading => 2,
            JobStatus::Transcribing => 3,
            JobStatus::FactChecking | JobStatus::Translating => 4,
            JobStatus::Completed => 5,
            JobStatus::Failed => 6,
        }
    }

    /// Checks whether a job may move from `self` to `next`
    ///
    /// Staying in the same status is always allowed. Stages only move forward,
    /// `failed` is reachable from every non-terminal status, and terminal
    /// statuses never change.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == JobStatus::Failed || next.stage_rank() > self.stage_rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::FetchingTranscript => "fetching_transcript",
            JobStatus::Downloading => "downloading",
            JobStatus::Transcribing => "transcribing",
            JobStatus::FactChecking => "fact_checking",
            JobStatus::Translating => "translating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lightweight job summary for history listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    pub url: String,
    pub output_language: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub video_title: Option<String>,
    pub video_thumbnail: Option<String>,
    pub overall_score: Option<u8>,
    pub overall_verdict: Option<OverallVerdict>,
    pub is_translation: bool,
}

impl From<&Job> for HistoryItem {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            url: job.url.clone(),
            output_language: job.output_language.clone(),
            status: job.status,
            progress: job.progress,
            created_at: job.created_at,
            updated_at: job.updated_at,
            video_title: job.video_title.clone(),
            video_thumbnail: job.video_thumbnail.clone(),
            overall_score: job.report.as_ref().map(|r| r.overall_score),
            overall_verdict: job.report.as_ref().map(|r| r.overall_verdict),
            is_translation: job.is_translation(),
        }
    }
}
