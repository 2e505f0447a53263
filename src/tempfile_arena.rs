//! Scoped temp-file acquisition with guaranteed cleanup and a total-size
//! cap. Generalizes the upstream `worker.rs`'s ad hoc
//! `chrono`-timestamped-directory + `DirBuilder` dance into a reusable API.

use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::{Level, event};

#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("failed to create arena directory: {0}")]
    CreateDir(std::io::Error),
    #[error("path is outside the arena root")]
    OutsideArena,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ArenaStats {
    pub total_files: u64,
    pub total_bytes: u64,
    pub old_file_count: u64,
    pub old_file_bytes: u64,
}

pub struct TempArena {
    root: PathBuf,
    max_total_bytes: u64,
}

impl TempArena {
    pub fn new(root: impl Into<PathBuf>, max_total_bytes: u64) -> Result<TempArena, ArenaError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(ArenaError::CreateDir)?;
        Ok(TempArena {
            root,
            max_total_bytes,
        })
    }

    fn dated_subdir(&self) -> PathBuf {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        self.root.join(today)
    }

    /// Returns a new unique path inside a dated subdirectory under the
    /// arena root. Uniqueness is guaranteed by a random-name generator, so
    /// creation is lock-free under concurrent use.
    pub fn create_temp_file(&self, ext: &str) -> Result<PathBuf, ArenaError> {
        let dir = self.dated_subdir();
        std::fs::create_dir_all(&dir).map_err(ArenaError::CreateDir)?;

        let mut rng = rand::rng();
        let name: String = (0..20)
            .map(|_| {
                const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
                let idx = rng.random_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect();

        let ext = ext.trim_start_matches('.');
        let path = dir.join(if ext.is_empty() {
            name
        } else {
            format!("{name}.{ext}")
        });

        Ok(path)
    }

    /// Safe on missing files; refuses paths outside the arena.
    pub fn delete_temp_file(&self, path: &Path) -> Result<(), ArenaError> {
        let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        let candidate = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());

        if !candidate.starts_with(&root) {
            return Err(ArenaError::OutsideArena);
        }

        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArenaError::Io(e)),
        }
    }

    pub fn stats(&self) -> Result<ArenaStats, ArenaError> {
        let mut stats = ArenaStats {
            total_files: 0,
            total_bytes: 0,
            old_file_count: 0,
            old_file_bytes: 0,
        };
        let cutoff = std::time::SystemTime::now() - std::time::Duration::from_secs(24 * 3600);

        self.walk(|entry, metadata| {
            stats.total_files += 1;
            stats.total_bytes += metadata.len();
            if let Ok(modified) = metadata.modified() {
                if modified < cutoff {
                    stats.old_file_count += 1;
                    stats.old_file_bytes += metadata.len();
                }
            }
            let _ = entry;
        })?;

        Ok(stats)
    }

    /// Removes files by mtime older than `age`. If total size still exceeds
    /// 0.8 * max_total_bytes after a 24h cleanup, the caller (JanitorLoop)
    /// re-runs this at progressively shorter ages (12h, then 6h).
    pub fn cleanup_older_than(&self, age: std::time::Duration) -> Result<u64, ArenaError> {
        let cutoff = std::time::SystemTime::now()
            .checked_sub(age)
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        let mut removed = 0u64;

        let paths_to_remove = std::sync::Mutex::new(Vec::new());
        self.walk(|entry, metadata| {
            if let Ok(modified) = metadata.modified() {
                if modified < cutoff {
                    paths_to_remove.lock().unwrap_or_else(|e| e.into_inner()).push(entry.path());
                }
            }
        })?;

        for path in paths_to_remove.into_inner().unwrap_or_else(|e| e.into_inner()) {
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        event!(Level::DEBUG, "TempArena cleanup removed {removed} files older than {age:?}");
        Ok(removed)
    }

    pub fn total_bytes_over_cap(&self) -> Result<bool, ArenaError> {
        let stats = self.stats()?;
        let threshold = (self.max_total_bytes as f64 * 0.8) as u64;
        Ok(stats.total_bytes > threshold)
    }

    fn walk(
        &self,
        mut visit: impl FnMut(&std::fs::DirEntry, std::fs::Metadata),
    ) -> Result<(), ArenaError> {
        if !self.root.exists() {
            return Ok(());
        }
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let read_dir = match std::fs::read_dir(&dir) {
                Ok(r) => r,
                Err(_) => continue,
            };
            for entry in read_dir.flatten() {
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                if metadata.is_dir() {
                    stack.push(entry.path());
                } else {
                    visit(&entry, metadata);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn create_and_delete_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let arena = TempArena::new(dir.path(), 1024 * 1024).unwrap();

        let path = arena.create_temp_file("mp4").unwrap();
        std::fs::write(&path, b"hello").unwrap();
        assert!(path.exists());

        arena.delete_temp_file(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn delete_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let arena = TempArena::new(dir.path(), 1024).unwrap();
        let path = arena.create_temp_file("mp3").unwrap();
        assert!(arena.delete_temp_file(&path).is_ok());
    }

    #[test]
    fn refuses_paths_outside_arena() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let arena = TempArena::new(dir.path(), 1024).unwrap();

        let rogue = outside.path().join("evil.txt");
        std::fs::write(&rogue, b"x").unwrap();
        assert!(matches!(
            arena.delete_temp_file(&rogue),
            Err(ArenaError::OutsideArena)
        ));
    }

    #[test]
    fn stats_counts_files_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let arena = TempArena::new(dir.path(), 1024 * 1024).unwrap();

        let p1 = arena.create_temp_file("mp4").unwrap();
        std::fs::write(&p1, vec![0u8; 100]).unwrap();
        let p2 = arena.create_temp_file("mp3").unwrap();
        std::fs::write(&p2, vec![0u8; 50]).unwrap();

        let stats = arena.stats().unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_bytes, 150);
    }

    #[test]
    fn unique_names_under_concurrent_creation() {
        let dir = tempfile::tempdir().unwrap();
        let arena = TempArena::new(dir.path(), 1024 * 1024).unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let p = arena.create_temp_file("tmp").unwrap();
            assert!(seen.insert(p));
        }
    }
}
