//! 临时写入与原子替换：blob 只有在完整写入后才会出现在最终路径上。

use axum::body::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use std::io;
use std::pin::pin;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub const TEMP_MARKER: &str = ".tmp.";

/// A temp file next to its target, renamed into place by [`AtomicFile::finalize`].
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
    written: u64,
}

impl AtomicFile {
    /// 在目标路径同目录创建临时文件。
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "blob".into());
        let temp_path = parent.join(temp_name(&base));
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
            written: 0,
        })
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// 将字节流写入临时文件，返回累计写入的字节数。
    pub async fn write_stream<S, E>(&mut self, stream: S) -> io::Result<u64>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let mut stream = pin!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| io::Error::other(err.to_string()))?;
            if chunk.is_empty() {
                continue;
            }
            self.file.write_all(&chunk).await?;
            self.written += chunk.len() as u64;
        }
        Ok(self.written)
    }

    /// 放弃写入并删除临时文件；文件已不存在时视为成功。
    pub async fn discard(self) -> io::Result<()> {
        drop(self.file);
        match fs::remove_file(&self.temp_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// 同步并原子替换目标文件。失败时临时文件会被清理。
    pub async fn finalize(self) -> io::Result<u64> {
        let written = self.written;
        if let Err(err) = self.file.sync_all().await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }

        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }

        Ok(written)
    }
}

fn temp_name(base: &str) -> String {
    format!(".{base}{TEMP_MARKER}{}", Uuid::new_v4())
}

/// 判断文件名是否为本模块生成的临时文件。
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with('.')
        && name
            .rsplit_once(TEMP_MARKER)
            .is_some_and(|(_, id)| Uuid::parse_str(id).is_ok())
}

#[cfg(unix)]
async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}

#[cfg(not(unix))]
async fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tempfile::tempdir;

    #[tokio::test]
    async fn finalize_moves_content_into_place() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("a.txt");
        let mut atomic = AtomicFile::new(&target).await.expect("create");
        let chunks = stream::iter(vec![
            Ok::<_, io::Error>(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);
        assert_eq!(atomic.write_stream(chunks).await.expect("write"), 11);
        let temp_path = atomic.temp_path().to_path_buf();
        atomic.finalize().await.expect("finalize");

        assert_eq!(std::fs::read(&target).expect("read"), b"hello world");
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn failed_stream_leaves_target_untouched_after_discard() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("a.txt");
        let mut atomic = AtomicFile::new(&target).await.expect("create");
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("client went away")),
        ]);
        assert!(atomic.write_stream(chunks).await.is_err());
        let temp_path = atomic.temp_path().to_path_buf();
        atomic.discard().await.expect("discard");

        assert!(!target.exists());
        assert!(!temp_path.exists());
    }

    #[test]
    fn temp_names_are_recognized() {
        assert!(is_temp_name(&temp_name("report.pdf")));
        assert!(!is_temp_name("report.pdf"));
        assert!(!is_temp_name(".notes.tmp.draft"));
    }
}
