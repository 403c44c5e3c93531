//! 测试辅助：临时存储、内存数据库与可控的慢速元数据存储。

use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::Stream;
use futures_util::stream;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::config::StoreConfig;
use crate::records::{FileRecord, MetadataError, MetadataStore};
use crate::service::{FileStore, Services};
use crate::sqlite::SqliteStore;

pub fn make_config() -> (TempDir, StoreConfig) {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("storage");
    std::fs::create_dir_all(&root).expect("create storage root");
    (temp, StoreConfig::new(root))
}

pub fn make_store() -> (TempDir, FileStore) {
    let (temp, config) = make_config();
    let metadata = Arc::new(SqliteStore::open_in_memory().expect("open sqlite"));
    (temp, FileStore::new(config, metadata))
}

pub fn make_services() -> (TempDir, Arc<Services>) {
    let (temp, store) = make_store();
    (temp, Arc::new(Services::new(store)))
}

pub fn body(data: &'static [u8]) -> impl Stream<Item = Result<Bytes, io::Error>> {
    stream::iter(vec![Ok(Bytes::from_static(data))])
}

pub fn blob_path(store: &FileStore, filename: &str) -> PathBuf {
    store.blobs.root_path().join(filename)
}

/// 列出存储根目录下的全部条目名（含临时文件）。
pub fn list_root(store: &FileStore) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(store.blobs.root_path())
        .expect("read storage root")
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .to_string()
        })
        .collect();
    names.sort();
    names
}

/// Delays every `get` so retrieval deadlines can be exercised.
pub struct SlowStore {
    pub inner: SqliteStore,
    pub delay: Duration,
}

#[async_trait]
impl MetadataStore for SlowStore {
    async fn insert(&self, record: &FileRecord) -> Result<(), MetadataError> {
        self.inner.insert(record).await
    }

    async fn get(&self, short_link: &str) -> Result<FileRecord, MetadataError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(short_link).await
    }

    async fn delete(&self, short_link: &str) -> Result<bool, MetadataError> {
        self.inner.delete(short_link).await
    }

    async fn count(&self) -> Result<u64, MetadataError> {
        self.inner.count().await
    }

    async fn list_recent(&self, offset: u64, limit: u32) -> Result<Vec<FileRecord>, MetadataError> {
        self.inner.list_recent(offset, limit).await
    }

    async fn find_by_group(&self, group_name: &str) -> Result<Vec<FileRecord>, MetadataError> {
        self.inner.find_by_group(group_name).await
    }
}

/// Fails every `delete`, leaving records in place.
pub struct StickyStore {
    pub inner: SqliteStore,
}

#[async_trait]
impl MetadataStore for StickyStore {
    async fn insert(&self, record: &FileRecord) -> Result<(), MetadataError> {
        self.inner.insert(record).await
    }

    async fn get(&self, short_link: &str) -> Result<FileRecord, MetadataError> {
        self.inner.get(short_link).await
    }

    async fn delete(&self, _short_link: &str) -> Result<bool, MetadataError> {
        Err(MetadataError::Other("database is locked".into()))
    }

    async fn count(&self) -> Result<u64, MetadataError> {
        self.inner.count().await
    }

    async fn list_recent(&self, offset: u64, limit: u32) -> Result<Vec<FileRecord>, MetadataError> {
        self.inner.list_recent(offset, limit).await
    }

    async fn find_by_group(&self, group_name: &str) -> Result<Vec<FileRecord>, MetadataError> {
        self.inner.find_by_group(group_name).await
    }
}

/// Rejects every `insert` with a non-uniqueness failure.
pub struct FailingInsertStore {
    pub inner: SqliteStore,
}

#[async_trait]
impl MetadataStore for FailingInsertStore {
    async fn insert(&self, _record: &FileRecord) -> Result<(), MetadataError> {
        Err(MetadataError::Other("disk I/O error".into()))
    }

    async fn get(&self, short_link: &str) -> Result<FileRecord, MetadataError> {
        self.inner.get(short_link).await
    }

    async fn delete(&self, short_link: &str) -> Result<bool, MetadataError> {
        self.inner.delete(short_link).await
    }

    async fn count(&self) -> Result<u64, MetadataError> {
        self.inner.count().await
    }

    async fn list_recent(&self, offset: u64, limit: u32) -> Result<Vec<FileRecord>, MetadataError> {
        self.inner.list_recent(offset, limit).await
    }

    async fn find_by_group(&self, group_name: &str) -> Result<Vec<FileRecord>, MetadataError> {
        self.inner.find_by_group(group_name).await
    }
}
