//! The core depends only on the narrow `Transcode` interface, implemented
//! here by shelling out to `ffmpeg`, in the same
//! `tokio::process::Command`-under-a-trait style the pack's transcoding
//! workers use.

use async_trait::async_trait;
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub struct TranscodeOpts {
    pub bitrate_kbps: u32,
}

impl Default for TranscodeOpts {
    fn default() -> Self {
        TranscodeOpts { bitrate_kbps: 128 }
    }
}

#[async_trait]
pub trait Transcode: Send + Sync {
    /// Probes whether `input` has at least one audio stream.
    async fn has_audio_stream(&self, input: &Path) -> anyhow::Result<bool>;

    /// Transcodes `input`'s first audio stream into an MP3 container at
    /// `output`, at the given bitrate. Exit code 0 + non-empty output file
    /// is success.
    async fn transcode(&self, input: &Path, output: &Path, opts: TranscodeOpts) -> anyhow::Result<()>;
}

pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> FfmpegTranscoder {
        let ffmpeg_path = ffmpeg_path.into();
        let ffprobe_path = ffmpeg_path.replacen("ffmpeg", "ffprobe", 1);
        FfmpegTranscoder {
            ffmpeg_path,
            ffprobe_path,
        }
    }
}

#[async_trait]
impl Transcode for FfmpegTranscoder {
    async fn has_audio_stream(&self, input: &Path) -> anyhow::Result<bool> {
        let output = tokio::process::Command::new(&self.ffprobe_path)
            .env_clear()
            .arg("-v")
            .arg("error")
            .arg("-select_streams")
            .arg("a")
            .arg("-show_entries")
            .arg("stream=index")
            .arg("-of")
            .arg("csv=p=0")
            .arg(input)
            .output()
            .await?;

        Ok(output.status.success() && !output.stdout.is_empty())
    }

    async fn transcode(&self, input: &Path, output: &Path, opts: TranscodeOpts) -> anyhow::Result<()> {
        let status = tokio::process::Command::new(&self.ffmpeg_path)
            .env_clear()
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-map")
            .arg("0:a:0")
            .arg("-f")
            .arg("mp3")
            .arg("-b:a")
            .arg(format!("{}k", opts.bitrate_kbps))
            .arg(output)
            .status()
            .await?;

        if !status.success() {
            anyhow::bail!("ffmpeg exited with non-zero status: {status}");
        }

        let metadata = tokio::fs::metadata(output).await?;
        if metadata.len() == 0 {
            anyhow::bail!("ffmpeg produced an empty output file");
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct StubTranscoder {
        has_audio: bool,
        should_fail: bool,
    }

    #[async_trait]
    impl Transcode for StubTranscoder {
        async fn has_audio_stream(&self, _input: &Path) -> anyhow::Result<bool> {
            Ok(self.has_audio)
        }

        async fn transcode(&self, _input: &Path, output: &Path, _opts: TranscodeOpts) -> anyhow::Result<()> {
            if self.should_fail {
                anyhow::bail!("stub transcode failure");
            }
            tokio::fs::write(output, b"fake-mp3-bytes").await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn stub_reports_missing_audio() {
        let t = StubTranscoder {
            has_audio: false,
            should_fail: false,
        };
        assert!(!t.has_audio_stream(Path::new("/dev/null")).await.unwrap());
    }

    #[tokio::test]
    async fn stub_transcode_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp3");
        let t = StubTranscoder {
            has_audio: true,
            should_fail: false,
        };
        t.transcode(Path::new("in.mp4"), &out, TranscodeOpts::default())
            .await
            .unwrap();
        assert!(out.exists());
    }
}
