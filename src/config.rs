//! Typed configuration, loaded from CLI args with env fallback via `clap`,
//! exactly as the upstream CLI already does it. Every field is read once at
//! startup and handed to the component that owns it; no dynamic key lookup
//! happens inside hot paths.

use clap::Parser;

#[derive(Debug, Parser, Clone)]
#[command(about, author, version, next_line_help = true)]
pub struct Args {
    #[arg(long, env, default_value = "127.0.0.1")]
    /// The IP address the HTTP listener will bind to.
    pub listen_ip: String,

    #[arg(long, env, default_value = "22408")]
    /// The port number the HTTP listener will bind to.
    pub listen_port: String,

    #[arg(long, env, default_value = "file:tubeconvert.db")]
    /// `sqlx::sqlite` connection string for the JobStore/log-event tables.
    pub database_url: String,

    #[arg(long, env)]
    /// File system path under which converted MP3/video artifacts are
    /// placed by the local object-store stand-in.
    pub artifact_dir: String,

    #[arg(long, env)]
    /// File system path underneath which the TempArena allocates scratch
    /// files for in-flight jobs.
    pub tmp_dir: String,

    #[arg(long, env, default_value = "ffmpeg")]
    /// Path to the ffmpeg executable used by the Convert worker.
    pub ffmpeg_path: String,

    #[arg(long, env, default_value = "yt-dlp")]
    /// Path to the yt-dlp executable used by the Youtube worker.
    pub ytdlp_path: String,

    #[arg(long, env, default_value = "5")]
    pub max_concurrent_downloads: usize,
    #[arg(long, env, default_value = "3")]
    pub max_concurrent_youtube_downloads: usize,
    #[arg(long, env, default_value = "0")]
    /// 0 means "max(1, available cores - 1)".
    pub max_concurrent_conversions: usize,
    #[arg(long, env, default_value = "5")]
    pub max_concurrent_uploads: usize,

    #[arg(long, env, default_value = "100")]
    pub download_queue_capacity: usize,
    #[arg(long, env, default_value = "100")]
    pub youtube_queue_capacity: usize,
    #[arg(long, env, default_value = "0")]
    /// 0 means "max(1, available cores - 1)".
    pub convert_queue_capacity: usize,
    #[arg(long, env, default_value = "10")]
    pub upload_queue_capacity: usize,

    #[arg(long, env, default_value = "30")]
    pub stale_job_threshold_minutes: i64,
    #[arg(long, env, default_value = "3")]
    pub job_retry_limit: i64,

    #[arg(long, env, default_value = "10737418240")]
    /// Default 10 GiB cap on the TempArena's total footprint.
    pub max_temp_size_bytes: u64,
    #[arg(long, env, default_value = "5368709120")]
    /// Default 5 GiB cap on any single downloaded source file.
    pub max_file_size_bytes: u64,

    #[arg(long, env, value_delimiter = ',', default_value = "video/mp4,video/webm,video/x-matroska,video/quicktime,audio/mpeg,audio/mp4,audio/wav")]
    /// Content-types the Download worker will accept; anything else fails
    /// the job with a validation error instead of being written to disk.
    pub allowed_file_types: Vec<String>,

    #[arg(long, env, default_value = "3")]
    pub youtube_max_retry_attempts: u8,
    #[arg(long, env, default_value = "5")]
    pub youtube_retry_delay_seconds: u64,
    #[arg(long, env, default_value = "120")]
    pub youtube_operation_timeout_seconds: u64,

    #[arg(long, env, default_value = "1")]
    /// How long a media artifact stays eligible for dedup cache hits before
    /// the janitor expires it.
    pub caching_default_expiration_days: i64,
    #[arg(long, env, default_value = "24")]
    /// Extension window added on top of the base expiration before the
    /// janitor considers a cached artifact stale.
    pub caching_sliding_expiration_hours: i64,
}

impl Args {
    pub fn resolved_convert_workers(&self) -> usize {
        if self.max_concurrent_conversions == 0 {
            default_parallelism()
        } else {
            self.max_concurrent_conversions
        }
    }

    pub fn resolved_convert_queue_capacity(&self) -> usize {
        if self.convert_queue_capacity == 0 {
            default_parallelism()
        } else {
            self.convert_queue_capacity
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}
