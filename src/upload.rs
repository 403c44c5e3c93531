//! 上传协调：先写元数据再写 blob，失败时补偿清理。

use axum::Json;
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::PathRejection;
use axum::extract::{Extension, Multipart, Path};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::Stream;
use serde::Serialize;
use serde_json::json;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::atomic::AtomicFile;
use crate::config::DEFAULT_GROUP_NAME;
use crate::error::{ApiError, FileError};
use crate::http::group_label;
use crate::records::{FileRecord, MetadataError, UniqueField};
use crate::sanitize::sanitize_filename;
use crate::service::{FileStore, Services};
use crate::shortlink::generate_short_link;

#[derive(Debug, Clone, Serialize)]
pub struct UploadedFile {
    pub short_link: String,
    #[serde(rename = "file_name")]
    pub filename: String,
}

/// One failed file of a grouped upload.
#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    #[serde(rename = "file_name")]
    pub filename: String,
    pub error: String,
}

/// 分组上传的累计结果：成功的文件与逐个文件的错误，互不回滚。
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub uploaded: Vec<UploadedFile>,
    pub errors: Vec<BatchError>,
}

impl BatchOutcome {
    pub fn record(&mut self, filename: String, result: Result<UploadedFile, FileError>) {
        match result {
            Ok(uploaded) => self.uploaded.push(uploaded),
            Err(err) => self.errors.push(BatchError {
                filename,
                error: err.to_string(),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty() && self.errors.is_empty()
    }
}

/// What a failed upload had already written and must undo.
struct Compensation {
    short_link: String,
    record_written: bool,
    partial_blob: Option<AtomicFile>,
}

pub struct UploadCoordinator {
    store: FileStore,
}

impl UploadCoordinator {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    /// 上传单个文件并返回其短链接。
    pub async fn upload<S, E>(
        &self,
        filename: &str,
        group_name: &str,
        body: S,
    ) -> Result<UploadedFile, FileError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let safe_name = sanitize_filename(filename)?;
        let short_link = generate_short_link(self.store.config.short_link_len);
        let record = FileRecord::new(
            short_link.clone(),
            safe_name.to_string(),
            group_name.to_string(),
        );

        // The UNIQUE index on filename rejects collisions before any disk I/O.
        if let Err(err) = self.store.metadata.insert(&record).await {
            self.compensate(Compensation {
                short_link: short_link.clone(),
                record_written: false,
                partial_blob: None,
            })
            .await;
            return Err(match err {
                MetadataError::UniqueViolation {
                    field: UniqueField::Filename,
                } => FileError::DuplicateName(filename.to_string()),
                other => FileError::MetadataFailure(other.to_string()),
            });
        }
        debug!(short_link = short_link.as_str(), filename, "file record inserted");

        let mut pending = match self.store.blobs.begin_write(safe_name).await {
            Ok(pending) => pending,
            Err(err) => {
                self.compensate(Compensation {
                    short_link: short_link.clone(),
                    record_written: true,
                    partial_blob: None,
                })
                .await;
                return Err(FileError::BlobWriteFailure(err.to_string()));
            }
        };

        if let Err(err) = pending.write_stream(body).await {
            self.compensate(Compensation {
                short_link: short_link.clone(),
                record_written: true,
                partial_blob: Some(pending),
            })
            .await;
            return Err(FileError::BlobWriteFailure(err.to_string()));
        }

        match pending.finalize().await {
            Ok(bytes) => {
                info!(
                    short_link = short_link.as_str(),
                    filename,
                    group = group_name,
                    bytes,
                    "file uploaded"
                );
                Ok(UploadedFile {
                    short_link,
                    filename: filename.to_string(),
                })
            }
            Err(err) => {
                self.compensate(Compensation {
                    short_link: short_link.clone(),
                    record_written: true,
                    partial_blob: None,
                })
                .await;
                Err(FileError::BlobWriteFailure(err.to_string()))
            }
        }
    }

    /// 并发撤销本次上传写入的内容，两侧都结束后才返回。
    async fn compensate(&self, compensation: Compensation) {
        let Compensation {
            short_link,
            record_written,
            partial_blob,
        } = compensation;

        let blob_cleanup = async {
            let Some(pending) = partial_blob else {
                return;
            };
            let path = pending.temp_path().to_path_buf();
            if let Err(err) = pending.discard().await {
                warn!(short_link = short_link.as_str(), path = ?path, error = %err, "failed to remove partial blob");
            }
        };
        let record_cleanup = async {
            if !record_written {
                return;
            }
            if let Err(err) = self.store.metadata.delete(&short_link).await {
                warn!(short_link = short_link.as_str(), error = %err, "failed to remove orphaned file record");
            }
        };
        tokio::join!(blob_cleanup, record_cleanup);
        info!(short_link = short_link.as_str(), "upload cleanup completed");
    }
}

/// `POST /files/upload`：读取 multipart 字段 `file`。
pub async fn upload_file(
    Extension(services): Extension<Arc<Services>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = multipart?;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("file field has no filename".into()))?;
        let uploaded = services
            .uploads
            .upload(&filename, DEFAULT_GROUP_NAME, field)
            .await?;
        return Ok((
            StatusCode::CREATED,
            Json(json!({
                "message": "File uploaded successfully",
                "url": uploaded.short_link,
            })),
        )
            .into_response());
    }
    Err(ApiError::BadRequest("multipart field `file` is required".into()))
}

/// `POST /files/upload/{group_name}`：逐个处理 `files` 字段，单个失败不影响其余文件。
pub async fn upload_group(
    group_name: Result<Path<String>, PathRejection>,
    Extension(services): Extension<Arc<Services>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let Path(group_name) = group_name?;
    let group_name = group_label(&group_name)?;
    let mut multipart = multipart?;

    let mut outcome = BatchOutcome::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.to_string()))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            outcome.errors.push(BatchError {
                filename: String::new(),
                error: "file field has no filename".into(),
            });
            continue;
        };
        let result = services.uploads.upload(&filename, &group_name, field).await;
        outcome.record(filename, result);
    }

    if outcome.is_empty() {
        return Err(ApiError::BadRequest(
            "multipart field `files` is required".into(),
        ));
    }
    Ok(batch_response(&group_name, outcome))
}

fn batch_response(group_name: &str, outcome: BatchOutcome) -> Response {
    let uploaded_count = outcome.uploaded.len();
    if outcome.errors.is_empty() {
        info!(group = group_name, count = uploaded_count, "group uploaded");
        return (
            StatusCode::CREATED,
            Json(json!({
                "message": "Files uploaded successfully",
                "files_uploaded_count": uploaded_count,
                "group_name": group_name,
                "files": outcome.uploaded,
            })),
        )
            .into_response();
    }

    warn!(
        group = group_name,
        uploaded = uploaded_count,
        failed = outcome.errors.len(),
        errors = ?outcome.errors,
        "group upload finished with errors"
    );
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "message": "Failed to upload Files. These were the errors present.",
            "errors": outcome.errors,
            "files_uploaded_count": uploaded_count,
            "group_name": group_name,
            "files": outcome.uploaded,
        })),
    )
        .into_response()
}
