//! 分组打包下载：逐个成员写入 zip，单个成员失败只记录错误。

use axum::body::Body as AxumBody;
use axum::extract::rejection::PathRejection;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{Datelike, Timelike, Utc};
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::config::ERRORS_HEADER;
use crate::error::{ApiError, FileError};
use crate::http::{attachment_disposition, errors_header, group_label};
use crate::service::{FileStore, Services};
use crate::storage::BlobError;

/// A finished archive spooled to an anonymous temp file, rewound for reading.
pub struct Archive {
    pub file: tokio::fs::File,
    pub len: u64,
    pub entries: usize,
    pub errors: Vec<String>,
}

/// A member whose blob was confirmed present; opened only while its entry is written.
struct Member {
    name: String,
    path: PathBuf,
    size: u64,
}

pub struct ArchiveStreamer {
    store: FileStore,
}

impl ArchiveStreamer {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    /// 打包分组内的全部成员。分组为空时在创建归档之前返回 `GroupNotFound`。
    pub async fn build(&self, group_name: &str) -> Result<Archive, FileError> {
        let records = self
            .store
            .metadata
            .find_by_group(group_name)
            .await
            .map_err(|err| FileError::MetadataFailure(err.to_string()))?;
        if records.is_empty() {
            return Err(FileError::GroupNotFound(group_name.to_string()));
        }

        let mut errors = Vec::new();
        let mut members = Vec::with_capacity(records.len());
        for record in records {
            let name = record.filename;
            match self.store.blobs.stat(&name).await {
                Ok((path, metadata)) => members.push(Member {
                    size: metadata.len(),
                    path,
                    name,
                }),
                Err(BlobError::Rejected(_)) => errors.push(format!("{name}: invalid filename")),
                Err(BlobError::NotFound(_)) => errors.push(format!("{name}: file not found")),
                Err(BlobError::Io(err)) => {
                    debug!(filename = name.as_str(), error = %err, "archive member stat failed");
                    errors.push(format!("{name}: read error"));
                }
            }
        }

        let (file, len, entries, errors) = tokio::task::spawn_blocking(move || {
            let mut spool = tempfile::tempfile()?;
            let entries = write_entries(&mut spool, members, &mut errors)?;
            let len = spool.seek(SeekFrom::End(0))?;
            spool.seek(SeekFrom::Start(0))?;
            Ok::<_, io::Error>((spool, len, entries, errors))
        })
        .await
        .map_err(|err| FileError::ArchiveFailure(err.to_string()))?
        .map_err(|err| FileError::ArchiveFailure(err.to_string()))?;

        Ok(Archive {
            file: tokio::fs::File::from_std(file),
            len,
            entries,
            errors,
        })
    }
}

/// 将成员依次写入 zip，返回成功写入的条目数。
fn write_entries<W: Write + Seek>(
    writer: W,
    members: Vec<Member>,
    errors: &mut Vec<String>,
) -> io::Result<usize> {
    let mut zip = ZipWriter::new(writer);
    let base = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip_timestamp());

    let mut entries = 0;
    for member in members {
        // One member file open at a time, closed before the next entry starts.
        let mut file = match File::open(&member.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                errors.push(format!("{}: file not found", member.name));
                continue;
            }
            Err(err) => {
                debug!(filename = member.name.as_str(), error = %err, "archive member open failed");
                errors.push(format!("{}: read error", member.name));
                continue;
            }
        };
        let options = base.large_file(member.size >= u64::from(u32::MAX));
        if let Err(err) = zip.start_file(member.name.as_str(), options) {
            debug!(filename = member.name.as_str(), error = %err, "zip entry creation failed");
            errors.push(format!("{}: zip creation failed", member.name));
            continue;
        }
        match io::copy(&mut file, &mut zip) {
            Ok(_) => entries += 1,
            Err(err) => {
                debug!(filename = member.name.as_str(), error = %err, "zip entry copy failed");
                errors.push(format!("{}: copy failed", member.name));
                zip.abort_file().map_err(io::Error::other)?;
            }
        }
    }
    zip.finish().map_err(io::Error::other)?;
    Ok(entries)
}

fn zip_timestamp() -> zip::DateTime {
    let now = Utc::now();
    zip::DateTime::from_date_and_time(
        u16::try_from(now.year()).unwrap_or(1980),
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    )
    .unwrap_or_default()
}

/// `GET /files/download/group/{group_name}`：返回 `<group>.zip`，成员错误放在 `X-Errors` 头中。
pub async fn download_group(
    group_name: Result<Path<String>, PathRejection>,
    Extension(services): Extension<Arc<Services>>,
) -> Result<Response, ApiError> {
    let Path(group_name) = group_name?;
    let group_name = group_label(&group_name)?;
    let archive = services.archives.build(&group_name).await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        attachment_disposition(&format!("{group_name}.zip")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(archive.len));
    if let Some(value) = errors_header(&archive.errors) {
        headers.insert(HeaderName::from_static(ERRORS_HEADER), value);
    }

    if archive.errors.is_empty() {
        info!(group = group_name.as_str(), entries = archive.entries, "group archive ready");
    } else {
        warn!(
            group = group_name.as_str(),
            entries = archive.entries,
            errors = ?archive.errors,
            "group archive built with missing members"
        );
    }

    Ok((
        StatusCode::OK,
        headers,
        AxumBody::from_stream(ReaderStream::new(archive.file)),
    )
        .into_response())
}
