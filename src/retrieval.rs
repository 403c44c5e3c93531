//! 短链接解析：在同一个截止时间内完成元数据查询与 blob 存在性检查。

use axum::Json;
use axum::body::Body as AxumBody;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use httpdate::fmt_http_date;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::Metadata;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::sync::oneshot;
use tokio::time;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_PAGE_SIZE, JoinStrategy, MAX_PAGE_SIZE};
use crate::error::{ApiError, FileError};
use crate::http::attachment_disposition;
use crate::records::{FileRecord, MetadataError};
use crate::service::{FileStore, Services};
use crate::storage::{BlobError, BlobStore};

/// A record whose blob was confirmed present.
#[derive(Debug)]
pub struct Resolved {
    pub record: FileRecord,
    pub path: PathBuf,
    pub metadata: Metadata,
}

#[derive(Debug, Serialize)]
pub struct PageMeta {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Serialize)]
pub struct FilePage {
    pub files: Vec<FileRecord>,
    pub meta: PageMeta,
}

pub struct RetrievalCoordinator {
    store: FileStore,
}

impl RetrievalCoordinator {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    /// 解析短链接；超过配置的截止时间返回 `Timeout`，不返回任何部分结果。
    pub async fn resolve(&self, short_link: &str) -> Result<Resolved, FileError> {
        let deadline = self.store.config.download_timeout;
        let joined = match self.store.config.join_strategy {
            JoinStrategy::Sequential => time::timeout(deadline, self.resolve_sequential(short_link)).await,
            JoinStrategy::Pipelined => time::timeout(deadline, self.resolve_pipelined(short_link)).await,
        };
        match joined {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    short_link,
                    deadline_ms = deadline.as_millis() as u64,
                    "short link resolution timed out"
                );
                Err(FileError::Timeout)
            }
        }
    }

    async fn resolve_sequential(&self, short_link: &str) -> Result<Resolved, FileError> {
        let record = classify_lookup(short_link, self.store.metadata.get(short_link).await)?;
        let probe = self.store.blobs.stat(&record.filename).await;
        classify_probe(record, probe)
    }

    /// 查询与探测各自作为任务运行；探测任务阻塞等待查询得到的文件名。
    async fn resolve_pipelined(&self, short_link: &str) -> Result<Resolved, FileError> {
        let (filename_tx, filename_rx) = oneshot::channel::<String>();

        let metadata = self.store.metadata.clone();
        let link = short_link.to_string();
        let lookup = tokio::spawn(async move {
            let result = metadata.get(&link).await;
            if let Ok(record) = &result {
                let _ = filename_tx.send(record.filename.clone());
            }
            result
        });

        let blobs: BlobStore = self.store.blobs.clone();
        let probe = tokio::spawn(async move {
            // Sender dropped without a value means the lookup failed.
            let filename = filename_rx.await.ok()?;
            Some(blobs.stat(&filename).await)
        });

        let (lookup, probe) = tokio::join!(lookup, probe);
        let lookup = lookup.map_err(|err| FileError::MetadataFailure(err.to_string()))?;
        let record = classify_lookup(short_link, lookup)?;
        match probe {
            Ok(Some(probe)) => classify_probe(record, probe),
            Ok(None) => Err(FileError::BlobNotFound(record.filename)),
            Err(err) => {
                warn!(short_link, error = %err, "blob probe task failed");
                Err(FileError::BlobNotFound(record.filename))
            }
        }
    }

    /// 按更新时间倒序分页列出记录。
    pub async fn list(&self, page: u32, page_size: u32) -> Result<FilePage, FileError> {
        if page == 0 {
            return Err(FileError::InvalidRequest("page must be at least 1".into()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(FileError::InvalidRequest(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        let offset = u64::from(page - 1) * u64::from(page_size);
        let (total, files) = tokio::try_join!(
            self.store.metadata.count(),
            self.store.metadata.list_recent(offset, page_size),
        )
        .map_err(|err| FileError::MetadataFailure(err.to_string()))?;

        debug!(page, page_size, total, returned = files.len(), "list files");
        Ok(FilePage {
            files,
            meta: PageMeta {
                total,
                page,
                page_size,
            },
        })
    }
}

fn classify_lookup(
    short_link: &str,
    lookup: Result<FileRecord, MetadataError>,
) -> Result<FileRecord, FileError> {
    match lookup {
        Ok(record) => Ok(record),
        Err(MetadataError::NotFound) => Err(FileError::RecordNotFound(short_link.to_string())),
        Err(err) => Err(FileError::MetadataFailure(err.to_string())),
    }
}

fn classify_probe(
    record: FileRecord,
    probe: Result<(PathBuf, Metadata), BlobError>,
) -> Result<Resolved, FileError> {
    match probe {
        Ok((path, metadata)) => Ok(Resolved {
            record,
            path,
            metadata,
        }),
        Err(err) => {
            debug!(short_link = record.short_link.as_str(), error = %err, "blob probe failed");
            Err(FileError::BlobNotFound(record.filename))
        }
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

/// `GET /files/`：分页列表。
pub async fn list_files(
    query: Result<Query<ListQuery>, QueryRejection>,
    Extension(services): Extension<Arc<Services>>,
) -> Result<Json<FilePage>, ApiError> {
    let Query(query) = query?;
    let page = services
        .retrieval
        .list(
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(Json(page))
}

/// `GET /files/item/{short_link}`：返回记录，blob 必须存在。
pub async fn get_item(
    short_link: Result<Path<String>, PathRejection>,
    Extension(services): Extension<Arc<Services>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Path(short_link) = short_link?;
    let resolved = services.retrieval.resolve(&short_link).await?;
    Ok(Json(json!({ "file": resolved.record })))
}

/// `GET /files/download/item/{short_link}`：以附件形式返回文件内容。
pub async fn download_item(
    short_link: Result<Path<String>, PathRejection>,
    Extension(services): Extension<Arc<Services>>,
) -> Result<Response, ApiError> {
    let Path(short_link) = short_link?;
    let resolved = services.retrieval.resolve(&short_link).await?;
    let file = File::open(&resolved.path).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ApiError::from(FileError::BlobNotFound(resolved.record.filename.clone()))
        } else {
            ApiError::Internal(err.to_string())
        }
    })?;

    let filename = &resolved.record.filename;
    let mime = mime_guess::from_path(filename).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    headers.insert(header::CONTENT_DISPOSITION, attachment_disposition(filename));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(resolved.metadata.len()));
    if let Ok(modified) = resolved.metadata.modified()
        && let Ok(value) = HeaderValue::from_str(&fmt_http_date(modified))
    {
        headers.insert(header::LAST_MODIFIED, value);
    }

    info!(
        short_link = short_link.as_str(),
        filename = filename.as_str(),
        size = resolved.metadata.len(),
        "download file"
    );
    Ok((
        StatusCode::OK,
        headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    use crate::config::DEFAULT_GROUP_NAME;
    use crate::sqlite::SqliteStore;
    use crate::testing::{SlowStore, blob_path, body, make_config, make_store};
    use crate::upload::UploadCoordinator;

    async fn uploaded(store: &FileStore, name: &str) -> String {
        UploadCoordinator::new(store.clone())
            .upload(name, DEFAULT_GROUP_NAME, body(b"content"))
            .await
            .expect("upload")
            .short_link
    }

    fn with_strategy(store: &FileStore, strategy: JoinStrategy) -> FileStore {
        let mut config = (*store.config).clone();
        config.join_strategy = strategy;
        FileStore {
            config: Arc::new(config),
            ..store.clone()
        }
    }

    #[tokio::test]
    async fn resolves_uploaded_file_with_both_strategies() {
        let (_temp, store) = make_store();
        let link = uploaded(&store, "a.txt").await;

        for strategy in [JoinStrategy::Sequential, JoinStrategy::Pipelined] {
            let retrieval = RetrievalCoordinator::new(with_strategy(&store, strategy));
            let resolved = retrieval.resolve(&link).await.expect("resolve");
            assert_eq!(resolved.record.filename, "a.txt");
            assert_eq!(resolved.path, blob_path(&store, "a.txt"));
        }
    }

    #[tokio::test]
    async fn unknown_short_link_is_record_not_found() {
        let (_temp, store) = make_store();
        for strategy in [JoinStrategy::Sequential, JoinStrategy::Pipelined] {
            let retrieval = RetrievalCoordinator::new(with_strategy(&store, strategy));
            let result = retrieval.resolve("zzzzzz").await;
            assert!(matches!(result, Err(FileError::RecordNotFound(_))));
        }
    }

    #[tokio::test]
    async fn blob_removed_out_of_band_is_blob_not_found() {
        let (_temp, store) = make_store();
        let link = uploaded(&store, "gone.txt").await;
        std::fs::remove_file(blob_path(&store, "gone.txt")).expect("remove blob");

        for strategy in [JoinStrategy::Sequential, JoinStrategy::Pipelined] {
            let retrieval = RetrievalCoordinator::new(with_strategy(&store, strategy));
            let result = retrieval.resolve(&link).await;
            assert!(matches!(result, Err(FileError::BlobNotFound(_))));
        }
    }

    #[tokio::test]
    async fn unsafe_stored_name_is_blob_not_found() {
        let (_temp, store) = make_store();
        store
            .metadata
            .insert(&FileRecord::new(
                "bad001".into(),
                "../outside.txt".into(),
                DEFAULT_GROUP_NAME.into(),
            ))
            .await
            .expect("insert");

        let result = RetrievalCoordinator::new(store).resolve("bad001").await;
        assert!(matches!(result, Err(FileError::BlobNotFound(_))));
    }

    #[tokio::test]
    async fn slow_lookup_times_out() {
        let (_temp, mut config) = make_config();
        config.download_timeout = Duration::from_millis(50);
        let inner = SqliteStore::open_in_memory().expect("open");
        let slow = SlowStore {
            inner,
            delay: Duration::from_millis(500),
        };
        let base = FileStore::new(config, Arc::new(slow));
        let link = uploaded(&base, "slow.txt").await;

        for strategy in [JoinStrategy::Sequential, JoinStrategy::Pipelined] {
            let retrieval = RetrievalCoordinator::new(with_strategy(&base, strategy));
            let result = retrieval.resolve(&link).await;
            assert!(matches!(result, Err(FileError::Timeout)));
        }
    }

    #[tokio::test]
    async fn second_page_returns_records_eleven_to_twenty() {
        let (_temp, store) = make_store();
        let base = Utc::now();
        for i in 1..=25 {
            let mut record = FileRecord::new(
                format!("link{i:02}"),
                format!("file{i:02}.txt"),
                DEFAULT_GROUP_NAME.into(),
            );
            // file25 is the most recent.
            record.time_updated = base + ChronoDuration::seconds(i);
            store.metadata.insert(&record).await.expect("insert");
        }

        let page = RetrievalCoordinator::new(store)
            .list(2, 10)
            .await
            .expect("list");

        assert_eq!(page.meta.total, 25);
        assert_eq!(page.meta.page, 2);
        let names: Vec<_> = page.files.iter().map(|r| r.filename.clone()).collect();
        let expected: Vec<_> = (6..=15).rev().map(|i| format!("file{i:02}.txt")).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn invalid_pagination_is_rejected() {
        let (_temp, store) = make_store();
        let retrieval = RetrievalCoordinator::new(store);
        assert!(matches!(
            retrieval.list(0, 10).await,
            Err(FileError::InvalidRequest(_))
        ));
        assert!(matches!(
            retrieval.list(1, MAX_PAGE_SIZE + 1).await,
            Err(FileError::InvalidRequest(_))
        ));
    }
}
