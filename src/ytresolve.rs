//! YouTube stream resolution itself is delegated to an external binary;
//! the core depends on a narrow `YoutubeResolver` trait plus the URL
//! classification helper the Dispatcher uses to route between
//! `DownloadQueue` and `YoutubeQueue`, in the same host-suffix-matching
//! style `handlers.rs` already uses for its own YouTube URL checks.

use async_trait::async_trait;
use std::path::Path;

const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "youtu.be", "m.youtube.com"];

/// True if `url`'s host matches the known YouTube host set (youtube.com,
/// youtu.be, m.youtube.com, and the /v|embed|shorts path forms, which all
/// live under the youtube.com host).
pub fn is_youtube_url(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.trim_start_matches("www.");
    YOUTUBE_HOSTS.contains(&host)
}

#[async_trait]
pub trait YoutubeResolver: Send + Sync {
    /// Resolves and downloads the best audio-only stream for `url` directly
    /// to `dest` (an `.mp3`-named temp path).
    async fn download_audio_only(&self, url: &str, dest: &Path) -> anyhow::Result<()>;
}

pub struct YtDlpResolver {
    ytdlp_path: String,
}

impl YtDlpResolver {
    pub fn new(ytdlp_path: impl Into<String>) -> YtDlpResolver {
        YtDlpResolver {
            ytdlp_path: ytdlp_path.into(),
        }
    }
}

#[async_trait]
impl YoutubeResolver for YtDlpResolver {
    async fn download_audio_only(&self, url: &str, dest: &Path) -> anyhow::Result<()> {
        let status = tokio::process::Command::new(&self.ytdlp_path)
            .env_clear()
            .arg("--quiet")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("-f")
            .arg("bestaudio")
            .arg("--extract-audio")
            .arg("--audio-format")
            .arg("mp3")
            .arg("--audio-quality")
            .arg("128K")
            .arg("--output")
            .arg(dest)
            .arg(url)
            .status()
            .await?;

        if !status.success() {
            anyhow::bail!("yt-dlp exited with non-zero status: {status}");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_youtube_hosts() {
        for url in [
            "https://www.youtube.com/watch?v=abc123defgh",
            "https://youtu.be/abc123defgh",
            "https://m.youtube.com/watch?v=abc123defgh",
            "https://youtube.com/shorts/abc123defgh",
        ] {
            assert!(is_youtube_url(url), "expected {url} to classify as youtube");
        }
    }

    #[test]
    fn rejects_non_youtube_hosts() {
        for url in [
            "https://example.com/a.mp4",
            "https://vimeo.com/12345",
            "not a url",
        ] {
            assert!(!is_youtube_url(url), "expected {url} to not classify as youtube");
        }
    }
}
