//! HTTP 辅助工具：路由、CORS、安全头与附件文件名。

use axum::body::Body as AxumBody;
use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router, middleware, response::Response};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span, warn};

use crate::error::ApiError;
use crate::service::Services;
use crate::{archive, deletion, retrieval, upload};

/// 构建全部 `/files` 路由。
pub fn build_router(services: Arc<Services>, upload_max_size: u64) -> Router {
    let body_limit = if upload_max_size == 0 {
        DefaultBodyLimit::disable()
    } else {
        DefaultBodyLimit::max(usize::try_from(upload_max_size).unwrap_or(usize::MAX))
    };

    Router::new()
        .route(
            "/files/upload",
            post(upload::upload_file).layer(body_limit),
        )
        .route(
            "/files/upload/{group_name}",
            post(upload::upload_group).layer(body_limit),
        )
        .route(
            "/files/download/item/{short_link}",
            get(retrieval::download_item),
        )
        .route(
            "/files/download/group/{group_name}",
            get(archive::download_group),
        )
        .route("/files", get(retrieval::list_files))
        .route("/files/", get(retrieval::list_files))
        .route(
            "/files/item/{short_link}",
            get(retrieval::get_item).delete(deletion::delete_item),
        )
        .route("/health", get(health))
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let client_ip = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.split(',').next().unwrap_or("").trim().to_string())
                        .or_else(|| {
                            request
                                .extensions()
                                .get::<ConnectInfo<SocketAddr>>()
                                .map(|ConnectInfo(addr)| addr.to_string())
                        })
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(services))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// 构建 CORS Layer（支持逗号分隔的来源列表）。
pub fn build_cors_layer(cors_origins: Option<&str>) -> Option<CorsLayer> {
    let origins = cors_origins?
        .split(',')
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers([
                axum::http::header::CONTENT_DISPOSITION,
                axum::http::HeaderName::from_static(crate::config::ERRORS_HEADER),
            ]),
    )
}

/// 添加基础安全响应头。
pub async fn add_security_headers(
    request: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, StatusCode> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        axum::http::header::X_FRAME_OPTIONS,
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        axum::http::header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    Ok(response)
}

/// `Content-Disposition: attachment`，非 ASCII 文件名附带 RFC 5987 `filename*`。
pub fn attachment_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    let value = if fallback == filename {
        format!("attachment; filename=\"{fallback}\"")
    } else {
        format!(
            "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
            percent_encode(filename)
        )
    };
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn percent_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-' | b'_' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

/// 分组名去掉首尾空白后使用，上传与下载保持一致。
pub fn group_label(raw: &str) -> Result<String, ApiError> {
    let label = raw.trim();
    if label.is_empty() {
        return Err(ApiError::BadRequest("group name is required".into()));
    }
    Ok(label.to_string())
}

/// 将多条错误压成单个头部值；不可见字符替换为 `?`。
pub fn errors_header(errors: &[String]) -> Option<HeaderValue> {
    if errors.is_empty() {
        return None;
    }
    let joined: String = errors
        .join("|")
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '?' })
        .collect();
    HeaderValue::from_str(&joined).ok()
}
