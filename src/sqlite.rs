//! 基于 SQLite 的元数据存储实现。

use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, Row, ffi, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::{debug, info};

use crate::records::{FileRecord, MetadataError, MetadataStore, UniqueField};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    short_link   TEXT PRIMARY KEY NOT NULL,
    filename     TEXT NOT NULL UNIQUE,
    group_name   TEXT NOT NULL DEFAULT 'ungrouped',
    time_updated INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_group_name ON files (group_name);
CREATE INDEX IF NOT EXISTS idx_files_time_updated ON files (time_updated);
"#;

const RECORD_COLUMNS: &str = "short_link, filename, group_name, time_updated";

/// SQLite-backed record store. Statements run on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// 打开（必要时创建）数据库文件并初始化表结构。
    pub fn open(path: &Path) -> Result<Self, MetadataError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| MetadataError::Other(err.to_string()))?;
        }
        info!(path = ?path, "opening sqlite database");
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_schema(conn)
    }

    pub fn open_in_memory() -> Result<Self, MetadataError> {
        debug!("opening in-memory sqlite database");
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> Result<Self, MetadataError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<F, T>(&self, op: F) -> Result<T, MetadataError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| MetadataError::Other("sqlite connection lock poisoned".into()))?;
            op(&conn).map_err(MetadataError::from)
        })
        .await
        .map_err(|err| MetadataError::Other(err.to_string()))?
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let micros: i64 = row.get(3)?;
    let time_updated = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Integer,
            format!("time_updated out of range: {micros}").into(),
        )
    })?;
    Ok(FileRecord {
        short_link: row.get(0)?,
        filename: row.get(1)?,
        group_name: row.get(2)?,
        time_updated,
    })
}

impl From<rusqlite::Error> for MetadataError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => MetadataError::NotFound,
            rusqlite::Error::SqliteFailure(code, _) if code.code == ErrorCode::ConstraintViolation => {
                match code.extended_code {
                    ffi::SQLITE_CONSTRAINT_PRIMARYKEY => MetadataError::UniqueViolation {
                        field: UniqueField::ShortLink,
                    },
                    ffi::SQLITE_CONSTRAINT_UNIQUE => MetadataError::UniqueViolation {
                        field: UniqueField::Filename,
                    },
                    _ => MetadataError::Other(err.to_string()),
                }
            }
            _ => MetadataError::Other(err.to_string()),
        }
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn insert(&self, record: &FileRecord) -> Result<(), MetadataError> {
        let record = record.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO files (short_link, filename, group_name, time_updated) VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.short_link,
                    record.filename,
                    record.group_name,
                    record.time_updated.timestamp_micros()
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn get(&self, short_link: &str) -> Result<FileRecord, MetadataError> {
        let short_link = short_link.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM files WHERE short_link = ?1"),
                params![short_link],
                record_from_row,
            )
        })
        .await
    }

    async fn delete(&self, short_link: &str) -> Result<bool, MetadataError> {
        let short_link = short_link.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM files WHERE short_link = ?1", params![short_link])
                .map(|changed| changed > 0)
        })
        .await
    }

    async fn count(&self) -> Result<u64, MetadataError> {
        self.run(|conn| {
            conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get::<_, i64>(0))
                .map(|total| total.max(0) as u64)
        })
        .await
    }

    async fn list_recent(&self, offset: u64, limit: u32) -> Result<Vec<FileRecord>, MetadataError> {
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM files ORDER BY time_updated DESC, rowid DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![i64::from(limit), offset], record_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn find_by_group(&self, group_name: &str) -> Result<Vec<FileRecord>, MetadataError> {
        let group_name = group_name.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM files WHERE group_name = ?1 ORDER BY rowid"
            ))?;
            let rows = stmt.query_map(params![group_name], record_from_row)?;
            rows.collect()
        })
        .await
    }
}

#[cfg(test)]
impl SqliteStore {
    /// 按文件名查找记录。
    pub async fn find_by_filename(&self, filename: &str) -> Result<Option<FileRecord>, MetadataError> {
        use rusqlite::OptionalExtension;

        let filename = filename.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM files WHERE filename = ?1"),
                params![filename],
                record_from_row,
            )
            .optional()
        })
        .await
    }
}
