//! The persistent job store. Generalizes the upstream `db.rs`'s
//! single-table SQLite pool into four relations: jobs, batches,
//! media_artifacts (unique on video_hash), and log_events (indexed by
//! job_id and timestamp; the latter lives in `logger.rs` since it is
//! written through the batched JobLogger, not directly through this
//! trait).

use crate::error::StoreError;
use crate::model::{Job, JobStatus, MediaArtifact};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Default)]
pub struct StatusUpdate {
    pub mp3_url: Option<String>,
    pub new_video_url: Option<String>,
    pub error: Option<String>,
    pub content_type: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub video_hash: Option<String>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Assigns an id if absent, inserts with `status=Pending`,
    /// `created_at=now`, `processing_attempts=0`. Fails with `AlreadyExists`
    /// on id collision.
    async fn create(&self, job: Job) -> Result<Job, StoreError>;

    async fn get(&self, id: &str) -> Result<Job, StoreError>;

    /// Writes back all mutable fields atomically.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    /// Atomic partial update. Sets `completed_at=now` iff
    /// `new_status ∈ {Completed, Failed}`; always sets `last_attempt_at=now`.
    async fn update_status(
        &self,
        id: &str,
        new_status: JobStatus,
        update: StatusUpdate,
    ) -> Result<(), StoreError>;

    /// Marks a job Pending again and increments `processing_attempts`, used
    /// exclusively by `RecoveryLoop`.
    async fn mark_recovered(&self, id: &str) -> Result<Job, StoreError>;

    /// All jobs with `status ∉ {Completed, Failed}` and
    /// `last_attempt_at < now - older_than` (or `created_at` if never
    /// attempted).
    async fn get_stale(&self, older_than: chrono::Duration) -> Result<Vec<Job>, StoreError>;

    async fn find_artifact_by_hash(&self, hash: &str) -> Result<Option<MediaArtifact>, StoreError>;

    /// Inserts or no-ops on hash collision (first writer wins).
    async fn save_artifact(&self, artifact: MediaArtifact) -> Result<(), StoreError>;

    /// Artifacts whose `created_at` is older than `older_than`, used by
    /// `JanitorLoop` to expire per-job MP3 artifacts past their TTL.
    async fn list_artifacts_older_than(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<MediaArtifact>, StoreError>;

    async fn delete_artifact(&self, hash: &str) -> Result<(), StoreError>;

    /// Deletes completed/failed jobs whose `completed_at < older_than`.
    async fn purge_expired(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn create_batch(&self, batch_id: &str) -> Result<(), StoreError>;

    async fn jobs_in_batch(&self, batch_id: &str) -> Result<Vec<Job>, StoreError>;
}

pub struct SqliteJobStore {
    pool: sqlx::sqlite::SqlitePool,
}

impl SqliteJobStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<SqliteJobStore> {
        let opts = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(database_url.trim_start_matches("file:"))
            .create_if_missing(true);

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await?;

        Self::migrate(&pool).await?;
        Ok(SqliteJobStore { pool })
    }

    async fn migrate(pool: &sqlx::sqlite::SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                batch_id TEXT,
                video_url TEXT NOT NULL,
                status TEXT NOT NULL,
                mp3_url TEXT,
                new_video_url TEXT,
                error_message TEXT,
                content_type TEXT,
                file_size_bytes INTEGER,
                video_hash TEXT,
                processing_attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                last_attempt_at TEXT
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS media_artifacts (
                video_hash TEXT PRIMARY KEY,
                video_url TEXT NOT NULL,
                audio_url TEXT NOT NULL,
                file_size_bytes INTEGER NOT NULL,
                created_at TEXT NOT NULL
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS log_events (
                job_id TEXT NOT NULL,
                batch_id TEXT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                job_status TEXT,
                message TEXT NOT NULL,
                details TEXT,
                file_size_bytes INTEGER,
                duration_seconds REAL,
                queue_time_ms INTEGER,
                step TEXT
            ) STRICT;",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_log_events_job_id ON log_events(job_id);")
            .execute(pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_log_events_timestamp ON log_events(timestamp);",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &sqlx::sqlite::SqlitePool {
        &self.pool
    }

    fn row_to_job(row: JobRow) -> Result<Job, StoreError> {
        Ok(Job {
            id: row.id,
            batch_id: row.batch_id,
            video_url: row.video_url,
            status: JobStatus::parse(&row.status).ok_or(StoreError::NotFound)?,
            mp3_url: row.mp3_url,
            new_video_url: row.new_video_url,
            error_message: row.error_message,
            content_type: row.content_type,
            file_size_bytes: row.file_size_bytes,
            video_hash: row.video_hash,
            processing_attempts: row.processing_attempts,
            created_at: parse_ts(&row.created_at),
            completed_at: row.completed_at.as_deref().map(parse_ts),
            last_attempt_at: row.last_attempt_at.as_deref().map(parse_ts),
            temp_video_path: None,
            temp_mp3_path: None,
        })
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

struct JobRow {
    id: String,
    batch_id: Option<String>,
    video_url: String,
    status: String,
    mp3_url: Option<String>,
    new_video_url: Option<String>,
    error_message: Option<String>,
    content_type: Option<String>,
    file_size_bytes: Option<i64>,
    video_hash: Option<String>,
    processing_attempts: i64,
    created_at: String,
    completed_at: Option<String>,
    last_attempt_at: Option<String>,
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, mut job: Job) -> Result<Job, StoreError> {
        job.status = JobStatus::Pending;
        job.processing_attempts = 0;
        job.created_at = Utc::now();

        let created_at = job.created_at.to_rfc3339();
        let status = job.status.as_str();
        let result = sqlx::query(
            "INSERT INTO jobs (id, batch_id, video_url, status, processing_attempts, created_at)
             VALUES ($1, $2, $3, $4, 0, $5);",
        )
        .bind(&job.id)
        .bind(&job.batch_id)
        .bind(&job.video_url)
        .bind(status)
        .bind(&created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(job),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::AlreadyExists)
            }
            Err(e) => Err(StoreError::Backend(e)),
        }
    }

    async fn get(&self, id: &str) -> Result<Job, StoreError> {
        let row = sqlx::query_as!(
            JobRow,
            "SELECT id, batch_id, video_url, status, mp3_url, new_video_url,
                    error_message, content_type, file_size_bytes, video_hash,
                    processing_attempts, created_at, completed_at, last_attempt_at
             FROM jobs WHERE id = $1;",
            id,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        Self::row_to_job(row)
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let completed_at = job.completed_at.map(|t| t.to_rfc3339());
        let last_attempt_at = job.last_attempt_at.map(|t| t.to_rfc3339());
        let status = job.status.as_str();

        let result = sqlx::query(
            "UPDATE jobs SET batch_id = $1, video_url = $2, status = $3, mp3_url = $4,
                new_video_url = $5, error_message = $6, content_type = $7,
                file_size_bytes = $8, video_hash = $9, processing_attempts = $10,
                completed_at = $11, last_attempt_at = $12
             WHERE id = $13;",
        )
        .bind(&job.batch_id)
        .bind(&job.video_url)
        .bind(status)
        .bind(&job.mp3_url)
        .bind(&job.new_video_url)
        .bind(&job.error_message)
        .bind(&job.content_type)
        .bind(job.file_size_bytes)
        .bind(&job.video_hash)
        .bind(job.processing_attempts)
        .bind(completed_at)
        .bind(last_attempt_at)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        new_status: JobStatus,
        update: StatusUpdate,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let completed_at = new_status.is_terminal().then(|| now.to_rfc3339());
        let last_attempt_at = now.to_rfc3339();
        let status = new_status.as_str();

        let result = sqlx::query(
            "UPDATE jobs SET status = $1,
                mp3_url = COALESCE($2, mp3_url),
                new_video_url = COALESCE($3, new_video_url),
                error_message = COALESCE($4, error_message),
                content_type = COALESCE($5, content_type),
                file_size_bytes = COALESCE($6, file_size_bytes),
                video_hash = COALESCE($7, video_hash),
                completed_at = COALESCE($8, completed_at),
                last_attempt_at = $9
             WHERE id = $10;",
        )
        .bind(status)
        .bind(&update.mp3_url)
        .bind(&update.new_video_url)
        .bind(&update.error)
        .bind(&update.content_type)
        .bind(update.file_size_bytes)
        .bind(&update.video_hash)
        .bind(completed_at)
        .bind(last_attempt_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn mark_recovered(&self, id: &str) -> Result<Job, StoreError> {
        let now = Utc::now().to_rfc3339();
        let status = JobStatus::Pending.as_str();
        let result = sqlx::query(
            "UPDATE jobs SET status = $1, processing_attempts = processing_attempts + 1,
                last_attempt_at = $2
             WHERE id = $3;",
        )
        .bind(status)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.get(id).await
    }

    async fn get_stale(&self, older_than: chrono::Duration) -> Result<Vec<Job>, StoreError> {
        let cutoff = (Utc::now() - older_than).to_rfc3339();
        let rows = sqlx::query_as!(
            JobRow,
            "SELECT id, batch_id, video_url, status, mp3_url, new_video_url,
                    error_message, content_type, file_size_bytes, video_hash,
                    processing_attempts, created_at, completed_at, last_attempt_at
             FROM jobs
             WHERE status NOT IN ('completed', 'failed')
               AND COALESCE(last_attempt_at, created_at) < $1;",
            cutoff,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_job).collect()
    }

    async fn find_artifact_by_hash(&self, hash: &str) -> Result<Option<MediaArtifact>, StoreError> {
        let row = sqlx::query!(
            "SELECT video_hash, video_url, audio_url, file_size_bytes, created_at
             FROM media_artifacts WHERE video_hash = $1;",
            hash,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| MediaArtifact {
            video_hash: r.video_hash,
            video_url: r.video_url,
            audio_url: r.audio_url,
            file_size_bytes: r.file_size_bytes,
            created_at: parse_ts(&r.created_at),
        }))
    }

    async fn save_artifact(&self, artifact: MediaArtifact) -> Result<(), StoreError> {
        let created_at = artifact.created_at.to_rfc3339();
        // Insert-if-absent: first writer wins.
        sqlx::query(
            "INSERT INTO media_artifacts (video_hash, video_url, audio_url, file_size_bytes, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT(video_hash) DO NOTHING;",
        )
        .bind(&artifact.video_hash)
        .bind(&artifact.video_url)
        .bind(&artifact.audio_url)
        .bind(artifact.file_size_bytes)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_expired(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = older_than.to_rfc3339();
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed') AND completed_at < $1;",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_artifacts_older_than(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<MediaArtifact>, StoreError> {
        let cutoff = older_than.to_rfc3339();
        let rows = sqlx::query!(
            "SELECT video_hash, video_url, audio_url, file_size_bytes, created_at
             FROM media_artifacts WHERE created_at < $1;",
            cutoff,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| MediaArtifact {
                video_hash: r.video_hash,
                video_url: r.video_url,
                audio_url: r.audio_url,
                file_size_bytes: r.file_size_bytes,
                created_at: parse_ts(&r.created_at),
            })
            .collect())
    }

    async fn delete_artifact(&self, hash: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM media_artifacts WHERE video_hash = $1;")
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_batch(&self, batch_id: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("INSERT INTO batches (id, created_at) VALUES ($1, $2);")
            .bind(batch_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn jobs_in_batch(&self, batch_id: &str) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as!(
            JobRow,
            "SELECT id, batch_id, video_url, status, mp3_url, new_video_url,
                    error_message, content_type, file_size_bytes, video_hash,
                    processing_attempts, created_at, completed_at, last_attempt_at
             FROM jobs WHERE batch_id = $1;",
            batch_id,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_job).collect()
    }
}
