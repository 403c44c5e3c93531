//! 文件名校验：拼接到存储根目录之前必须经过这里。

/// A stored filename was not safe to join onto the storage root.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid filename: {0:?}")]
pub struct RejectedName(pub String);

/// 拒绝包含 `..` 或以根路径开头的文件名，其余原样放行。
pub fn sanitize_filename(name: &str) -> Result<&str, RejectedName> {
    if name.is_empty() || name.contains("..") || name.starts_with(['/', '\\']) {
        return Err(RejectedName(name.to_string()));
    }
    Ok(name)
}
