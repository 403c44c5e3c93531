//! 文件记录模型与元数据存储接口。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata for one stored file, keyed by its short link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub short_link: String,
    #[serde(rename = "file_name")]
    pub filename: String,
    pub group_name: String,
    pub time_updated: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(short_link: String, filename: String, group_name: String) -> Self {
        Self {
            short_link,
            filename,
            group_name,
            time_updated: Utc::now(),
        }
    }
}

/// 唯一约束所在的列。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniqueField {
    ShortLink,
    Filename,
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueField::ShortLink => f.write_str("short_link"),
            UniqueField::Filename => f.write_str("filename"),
        }
    }
}

/// Storage engine failures, already classified at the adapter boundary.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("unique constraint violated on {field}")]
    UniqueViolation { field: UniqueField },
    #[error("record not found")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

/// 元数据存储：记录的持久化只经过这里。
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Inserts a new record. Fails with `UniqueViolation` on a taken short link or filename.
    async fn insert(&self, record: &FileRecord) -> Result<(), MetadataError>;

    /// Fetches a record by primary key.
    async fn get(&self, short_link: &str) -> Result<FileRecord, MetadataError>;

    /// Removes a record. Returns `false` when nothing matched.
    async fn delete(&self, short_link: &str) -> Result<bool, MetadataError>;

    async fn count(&self) -> Result<u64, MetadataError>;

    /// Most recently updated first.
    async fn list_recent(&self, offset: u64, limit: u32) -> Result<Vec<FileRecord>, MetadataError>;

    /// All records of a group in insertion order.
    async fn find_by_group(&self, group_name: &str) -> Result<Vec<FileRecord>, MetadataError>;
}
