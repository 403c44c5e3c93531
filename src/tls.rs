//! TLS 证书加载。

use axum_server::tls_rustls::RustlsConfig;
use std::io;
use tracing::info;

use crate::config::Args;

/// 证书与私钥都提供时构建 Rustls 配置；都未提供时返回 `None`，以纯 HTTP 启动。
pub async fn load_rustls_config(args: &Args) -> io::Result<Option<RustlsConfig>> {
    match (&args.tls_cert, &args.tls_key) {
        (Some(cert), Some(key)) => {
            let config = RustlsConfig::from_pem_file(cert, key).await?;
            info!(cert = cert.as_str(), "loaded TLS certificate");
            Ok(Some(config))
        }
        (None, None) => Ok(None),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "both --tls-cert and --tls-key are required to enable TLS",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[tokio::test]
    async fn plain_http_without_certificates() {
        let args = Args::parse_from(["shortdrop"]);
        assert!(load_rustls_config(&args).await.expect("config").is_none());
    }

    #[tokio::test]
    async fn half_configured_tls_is_rejected() {
        let args = Args::parse_from(["shortdrop", "--tls-cert", "cert.pem"]);
        let err = load_rustls_config(&args).await.err().expect("error");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
