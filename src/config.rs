//! CLI 参数、环境变量与运行时配置。

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SHORT_LINK_LEN: usize = 6;
pub const MAX_SHORT_LINK_LEN: usize = 64;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 2;
pub const DEFAULT_GROUP_NAME: &str = "ungrouped";
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_TEMP_TTL_SECS: u64 = 24 * 60 * 60;
pub const TEMP_SWEEP_INTERVAL_SECS: u64 = 900;
pub const ERRORS_HEADER: &str = "x-errors";

/// 元数据查询与 blob 探测的组合方式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum JoinStrategy {
    /// Lookup first, then probe the blob.
    #[default]
    Sequential,
    /// Lookup and probe run as separate tasks; the probe waits for the filename.
    Pipelined,
}

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "shortdrop", version, about = "Short-link file store")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "SHORTDROP_STORAGE_PATH",
        default_value = "./uploads",
        help = "Storage directory for uploaded blobs"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'd',
        long,
        env = "SHORTDROP_DATABASE",
        default_value = "./db/shortdrop.db",
        help = "SQLite database file for file records"
    )]
    pub database: String,
    #[arg(
        long,
        env = "SHORTDROP_SHORT_LEN",
        default_value_t = DEFAULT_SHORT_LINK_LEN,
        help = "Length of generated short links"
    )]
    pub short_len: usize,
    #[arg(
        long,
        env = "SHORTDROP_DOWNLOAD_TIMEOUT",
        default_value_t = DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        help = "Deadline in seconds for resolving a short link"
    )]
    pub download_timeout_secs: u64,
    #[arg(
        long,
        env = "SHORTDROP_JOIN_STRATEGY",
        value_enum,
        default_value_t = JoinStrategy::Sequential,
        help = "How record lookup and blob probe are joined"
    )]
    pub join_strategy: JoinStrategy,
    #[arg(
        short = 'b',
        long,
        env = "SHORTDROP_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "SHORTDROP_PORT",
        default_value_t = 5678,
        help = "Listen port"
    )]
    pub port: u16,
    #[arg(short = 'c', long, env = "SHORTDROP_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "SHORTDROP_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(long, env = "SHORTDROP_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "SHORTDROP_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload request body size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "SHORTDROP_TEMP_TTL_SECS",
        default_value_t = DEFAULT_TEMP_TTL_SECS,
        help = "Age after which abandoned temp blobs are removed (0 to disable)"
    )]
    pub temp_ttl_secs: u64,
}

impl Args {
    /// 校验参数并构建存储配置。
    pub fn store_config(&self) -> Result<StoreConfig, String> {
        if self.short_len == 0 || self.short_len > MAX_SHORT_LINK_LEN {
            return Err(format!(
                "short link length must be between 1 and {MAX_SHORT_LINK_LEN}"
            ));
        }
        if self.download_timeout_secs == 0 {
            return Err("download timeout must be at least one second".into());
        }
        Ok(StoreConfig {
            short_link_len: self.short_len,
            download_timeout: Duration::from_secs(self.download_timeout_secs),
            join_strategy: self.join_strategy,
            temp_ttl: Duration::from_secs(self.temp_ttl_secs),
            ..StoreConfig::new(PathBuf::from(&self.storage_dir))
        })
    }
}

/// Settings shared by every coordinator, built once at startup.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub storage_root: PathBuf,
    pub short_link_len: usize,
    pub download_timeout: Duration,
    pub join_strategy: JoinStrategy,
    pub temp_ttl: Duration,
}

impl StoreConfig {
    pub fn new(storage_root: PathBuf) -> Self {
        Self {
            storage_root,
            short_link_len: DEFAULT_SHORT_LINK_LEN,
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            join_strategy: JoinStrategy::Sequential,
            temp_ttl: Duration::from_secs(DEFAULT_TEMP_TTL_SECS),
        }
    }
}
