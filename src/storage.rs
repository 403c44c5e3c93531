use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{info, warn};

use crate::atomic::{AtomicFile, is_temp_name};
use crate::sanitize::{RejectedName, sanitize_filename};

/// Flat on-disk blob directory. Blobs are named by their sanitized filename.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error(transparent)]
    Rejected(#[from] RejectedName),
    #[error("blob not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 校验文件名并得到其在存储根目录下的路径。
    pub fn path_for(&self, filename: &str) -> Result<PathBuf, RejectedName> {
        let safe = sanitize_filename(filename)?;
        Ok(self.root.join(safe))
    }

    /// 确认 blob 存在且为普通文件（不跟随符号链接）。
    pub async fn stat(&self, filename: &str) -> Result<(PathBuf, Metadata), BlobError> {
        let path = self.path_for(filename)?;
        match fs::symlink_metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok((path, metadata)),
            Ok(_) => Err(BlobError::NotFound(path)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(BlobError::NotFound(path)),
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    /// 为写入新 blob 创建临时文件，提交前最终路径不会出现任何内容。
    pub async fn begin_write(&self, filename: &str) -> Result<AtomicFile, BlobError> {
        let path = self.path_for(filename)?;
        Ok(AtomicFile::new(&path).await?)
    }

    /// 删除 blob。文件本就不存在时返回 `Ok(false)`。
    pub async fn remove(&self, filename: &str) -> Result<bool, BlobError> {
        let path = self.path_for(filename)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    /// 清理崩溃后遗留的过期临时文件，返回删除数量。
    pub async fn sweep_stale_temp_files(&self, ttl: Duration) -> io::Result<usize> {
        if ttl.is_zero() {
            return Ok(0);
        }
        let now = SystemTime::now();
        let mut removed = 0;
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            if !is_temp_name(&name.to_string_lossy()) {
                continue;
            }
            let metadata = entry.metadata().await?;
            let Some(age) = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
            else {
                continue;
            };
            if age < ttl {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    info!(path = ?path, "removed stale temp blob");
                }
                Err(err) => warn!(path = ?path, error = %err, "failed to remove stale temp blob"),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store() -> (tempfile::TempDir, BlobStore) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("storage");
        std::fs::create_dir_all(&root).expect("create storage root");
        (temp, BlobStore::new(root))
    }

    #[tokio::test]
    async fn stat_reports_missing_blob() {
        let (_temp, store) = make_store();
        let result = store.stat("missing.txt").await;
        assert!(matches!(result, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn path_for_rejects_traversal() {
        let (_temp, store) = make_store();
        assert!(store.path_for("../secret.txt").is_err());
        assert!(matches!(
            store.stat("../secret.txt").await,
            Err(BlobError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (_temp, store) = make_store();
        std::fs::write(store.root_path().join("a.txt"), b"data").expect("write");
        assert!(store.remove("a.txt").await.expect("remove"));
        assert!(!store.remove("a.txt").await.expect("second remove"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stat_rejects_symlink() {
        use std::os::unix::fs::symlink;

        let (temp, store) = make_store();
        let outside = temp.path().join("outside.txt");
        std::fs::write(&outside, b"secret").expect("write outside file");
        symlink(&outside, store.root_path().join("link")).expect("symlink");

        assert!(matches!(
            store.stat("link").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn sweep_removes_only_temp_files() {
        let (_temp, store) = make_store();
        let pending = store.begin_write("a.txt").await.expect("begin");
        let temp_path = pending.temp_path().to_path_buf();
        drop(pending);
        std::fs::write(store.root_path().join("keep.txt"), b"data").expect("write");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let removed = store
            .sweep_stale_temp_files(Duration::from_nanos(1))
            .await
            .expect("sweep");
        assert_eq!(removed, 1);
        assert!(!temp_path.exists());
        assert!(store.root_path().join("keep.txt").exists());
    }
}
