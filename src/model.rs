//! Persistent and in-flight data types shared across the orchestration core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Downloading,
    Converting,
    Uploading,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Coarse progress percentage reported on the status endpoint, derived
    /// purely from status, never from progress events (spec'd: progress
    /// events are a side channel and are never persisted).
    pub fn progress_percent(self) -> u8 {
        match self {
            JobStatus::Pending | JobStatus::Failed => 0,
            JobStatus::Downloading => 25,
            JobStatus::Converting => 50,
            JobStatus::Uploading => 75,
            JobStatus::Completed => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Converting => "converting",
            JobStatus::Uploading => "uploading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "downloading" => Some(JobStatus::Downloading),
            "converting" => Some(JobStatus::Converting),
            "uploading" => Some(JobStatus::Uploading),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub batch_id: Option<String>,
    pub video_url: String,
    pub status: JobStatus,
    pub mp3_url: Option<String>,
    pub new_video_url: Option<String>,
    pub error_message: Option<String>,
    pub content_type: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub video_hash: Option<String>,
    pub processing_attempts: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Transient, never persisted: the local path of the downloaded source
    /// video while it is in flight between the Download and Convert stages.
    #[serde(skip)]
    pub temp_video_path: Option<std::path::PathBuf>,
    /// Transient, never persisted: the local path of the converted MP3 while
    /// it is in flight between the Convert and Upload stages.
    #[serde(skip)]
    pub temp_mp3_path: Option<std::path::PathBuf>,
}

impl Job {
    pub fn new(video_url: String, batch_id: Option<String>) -> Job {
        Job {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id,
            video_url,
            status: JobStatus::Pending,
            mp3_url: None,
            new_video_url: None,
            error_message: None,
            content_type: None,
            file_size_bytes: None,
            video_hash: None,
            processing_attempts: 0,
            created_at: Utc::now(),
            completed_at: None,
            last_attempt_at: None,
            temp_video_path: None,
            temp_mp3_path: None,
        }
    }

    pub fn progress_percent(&self) -> u8 {
        self.status.progress_percent()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BatchStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    /// Derives batch status from its members: `Pending` while any member is
    /// non-terminal, else `Failed` if any member failed, else `Completed`.
    pub fn derive_status(members: &[Job]) -> BatchStatus {
        if members.iter().any(|j| !j.status.is_terminal()) {
            BatchStatus::Pending
        } else if members.iter().any(|j| j.status == JobStatus::Failed) {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaArtifact {
    pub video_hash: String,
    pub video_url: String,
    pub audio_url: String,
    pub file_size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LogEventType {
    JobCreated,
    JobQueued,
    StatusChanged,
    DownloadStarted,
    DownloadProgress,
    DownloadCompleted,
    ConversionStarted,
    ConversionProgress,
    ConversionCompleted,
    UploadStarted,
    UploadProgress,
    UploadCompleted,
    JobCompleted,
    Error,
    Warning,
    CacheHit,
    JobRecovered,
    JobCancelled,
    JobDelayed,
    JobRetry,
    SystemInfo,
}

impl LogEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            LogEventType::JobCreated => "job_created",
            LogEventType::JobQueued => "job_queued",
            LogEventType::StatusChanged => "status_changed",
            LogEventType::DownloadStarted => "download_started",
            LogEventType::DownloadProgress => "download_progress",
            LogEventType::DownloadCompleted => "download_completed",
            LogEventType::ConversionStarted => "conversion_started",
            LogEventType::ConversionProgress => "conversion_progress",
            LogEventType::ConversionCompleted => "conversion_completed",
            LogEventType::UploadStarted => "upload_started",
            LogEventType::UploadProgress => "upload_progress",
            LogEventType::UploadCompleted => "upload_completed",
            LogEventType::JobCompleted => "job_completed",
            LogEventType::Error => "error",
            LogEventType::Warning => "warning",
            LogEventType::CacheHit => "cache_hit",
            LogEventType::JobRecovered => "job_recovered",
            LogEventType::JobCancelled => "job_cancelled",
            LogEventType::JobDelayed => "job_delayed",
            LogEventType::JobRetry => "job_retry",
            LogEventType::SystemInfo => "system_info",
        }
    }

    /// Progress events are dropped at the persistence layer (spec'd); only
    /// terminal-per-stage events are durably stored.
    pub fn is_progress(self) -> bool {
        matches!(
            self,
            LogEventType::DownloadProgress
                | LogEventType::ConversionProgress
                | LogEventType::UploadProgress
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEvent {
    pub job_id: String,
    pub batch_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub event_type: LogEventType,
    pub job_status: Option<JobStatus>,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub file_size_bytes: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub queue_time_ms: Option<i64>,
    pub step: Option<String>,
}

impl LogEvent {
    pub const SYSTEM_JOB_ID: &'static str = "SYSTEM";

    pub fn new(job_id: impl Into<String>, event_type: LogEventType, message: impl Into<String>) -> LogEvent {
        LogEvent {
            job_id: job_id.into(),
            batch_id: None,
            timestamp: Utc::now(),
            event_type,
            job_status: None,
            message: message.into(),
            details: None,
            file_size_bytes: None,
            duration_seconds: None,
            queue_time_ms: None,
            step: None,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> LogEvent {
        self.job_status = Some(status);
        self
    }

    pub fn with_queue_time_ms(mut self, ms: i64) -> LogEvent {
        self.queue_time_ms = Some(ms);
        self
    }

    pub fn with_duration_seconds(mut self, secs: f64) -> LogEvent {
        self.duration_seconds = Some(secs);
        self
    }

    pub fn with_file_size_bytes(mut self, bytes: i64) -> LogEvent {
        self.file_size_bytes = Some(bytes);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> LogEvent {
        self.details = Some(details);
        self
    }
}

/// Payload handed from the Dispatcher/Download worker into `DownloadQueue`.
#[derive(Clone, Debug)]
pub struct DownloadPayload {
    pub job_id: String,
    pub video_url: String,
}

/// Payload handed from the Download worker (or Youtube worker, bypassing
/// Convert) into `ConvertQueue`.
#[derive(Clone, Debug)]
pub struct ConvertPayload {
    pub job_id: String,
    pub video_path: std::path::PathBuf,
    pub video_hash: String,
}

/// Payload handed from the Convert worker (or Youtube worker directly) into
/// `UploadQueue`. `video_path` is `None` when there is no source video file
/// to upload alongside the audio (the Youtube direct-to-mp3 path).
#[derive(Clone, Debug)]
pub struct UploadPayload {
    pub job_id: String,
    pub mp3_path: std::path::PathBuf,
    pub video_path: Option<std::path::PathBuf>,
    pub video_hash: String,
}
