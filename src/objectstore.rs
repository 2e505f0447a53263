//! The S3-compatible object store is an external collaborator; this crate
//! only needs a narrow trait and a local-filesystem stand-in good enough to
//! exercise the core end-to-end.

use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, url: &str) -> anyhow::Result<bool>;
    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>>;
    async fn upload(&self, path: &Path, content_type: &str) -> anyhow::Result<String>;
    async fn delete(&self, url: &str) -> anyhow::Result<bool>;
}

/// Opaque keys produced by `upload` look like `local://<content_type>/<uuid>.<ext>`
/// so `delete`/`download` can round-trip them without a separate index.
pub struct LocalObjectStore {
    root: std::path::PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> anyhow::Result<LocalObjectStore> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(LocalObjectStore { root })
    }

    fn key_to_path(&self, url: &str) -> Option<std::path::PathBuf> {
        let rest = url.strip_prefix("local://")?;
        Some(self.root.join(rest))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn exists(&self, url: &str) -> anyhow::Result<bool> {
        let Some(path) = self.key_to_path(url) else {
            return Ok(false);
        };
        Ok(tokio::fs::metadata(path).await.is_ok())
    }

    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let path = self
            .key_to_path(url)
            .ok_or_else(|| anyhow::anyhow!("not a local object-store url: {url}"))?;
        Ok(tokio::fs::read(path).await?)
    }

    async fn upload(&self, path: &Path, content_type: &str) -> anyhow::Result<String> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("bin");
        let kind = content_type.replace('/', "_");
        let name = format!("{}.{ext}", uuid::Uuid::new_v4());
        let dest_dir = self.root.join(&kind);
        tokio::fs::create_dir_all(&dest_dir).await?;
        let dest = dest_dir.join(&name);
        tokio::fs::copy(path, &dest).await?;
        Ok(format!("local://{kind}/{name}"))
    }

    async fn delete(&self, url: &str) -> anyhow::Result<bool> {
        let Some(path) = self.key_to_path(url) else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_download_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).unwrap();

        let src = src_dir.path().join("clip.mp3");
        tokio::fs::write(&src, b"audio-bytes").await.unwrap();

        let url = store.upload(&src, "audio/mpeg").await.unwrap();
        assert!(store.exists(&url).await.unwrap());
        assert_eq!(store.download(&url).await.unwrap(), b"audio-bytes");

        assert!(store.delete(&url).await.unwrap());
        assert!(!store.exists(&url).await.unwrap());
    }

    #[tokio::test]
    async fn delete_missing_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).unwrap();
        assert!(!store.delete("local://audio_mpeg/missing.mp3").await.unwrap());
    }
}
