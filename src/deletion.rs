//! 删除协调：blob 与记录分别删除，任一侧失败都作为部分删除上报。

use axum::Json;
use axum::extract::rejection::PathRejection;
use axum::extract::{Extension, Path};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ApiError, FileError};
use crate::records::MetadataError;
use crate::sanitize::sanitize_filename;
use crate::service::{FileStore, Services};

#[derive(Debug, Clone, Serialize)]
pub struct Deleted {
    pub short_link: String,
    pub filename: String,
}

pub struct DeletionCoordinator {
    store: FileStore,
}

impl DeletionCoordinator {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    /// 删除短链接对应的 blob 与记录。blob 已不存在不算错误。
    pub async fn delete(&self, short_link: &str) -> Result<Deleted, FileError> {
        let record = match self.store.metadata.get(short_link).await {
            Ok(record) => record,
            Err(MetadataError::NotFound) => {
                return Err(FileError::RecordNotFound(short_link.to_string()));
            }
            Err(err) => return Err(FileError::MetadataFailure(err.to_string())),
        };
        // A stored name that never validated is left for an operator to inspect.
        sanitize_filename(&record.filename)?;

        let (blob, row) = tokio::join!(
            self.store.blobs.remove(&record.filename),
            self.store.metadata.delete(short_link),
        );

        let mut details = Vec::new();
        match blob {
            Ok(true) => {}
            Ok(false) => info!(short_link, "blob already absent"),
            Err(err) => details.push(format!("File deletion error: {err}")),
        }
        if let Err(err) = row {
            details.push(format!("Database deletion error: {err}"));
        }

        if !details.is_empty() {
            warn!(short_link, details = ?details, "partial deletion");
            return Err(FileError::PartialDeletion { details });
        }

        info!(short_link, filename = record.filename.as_str(), "file deleted");
        Ok(Deleted {
            short_link: record.short_link,
            filename: record.filename,
        })
    }
}

/// `DELETE /files/item/{short_link}`
pub async fn delete_item(
    short_link: Result<Path<String>, PathRejection>,
    Extension(services): Extension<Arc<Services>>,
) -> Result<Json<Value>, ApiError> {
    let Path(short_link) = short_link?;
    let deleted = services.deletions.delete(&short_link).await?;
    Ok(Json(json!({
        "message": "File and record deleted successfully",
        "deleted": deleted,
    })))
}
