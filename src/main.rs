//! shortdrop server binary.
//!
//! Short-link addressed file store: uploads get an opaque short link that is
//! later used to fetch, inspect or delete the file, alone or as part of a
//! group downloaded as a zip archive. File records live in SQLite and blobs
//! live flat under a single storage directory.

mod archive;
mod atomic;
mod background;
mod config;
mod deletion;
mod error;
mod http;
mod logging;
mod records;
mod retrieval;
mod sanitize;
mod service;
mod shortlink;
mod sqlite;
mod storage;
#[cfg(test)]
mod testing;
mod tls;
mod upload;

use axum_server::Handle;
use clap::Parser;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use crate::background::spawn_background_tasks;
use crate::config::Args;
use crate::http::{build_cors_layer, build_router};
use crate::service::{FileStore, Services};
use crate::sqlite::SqliteStore;

/// Starts the shortdrop server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), io::Error> {
    dotenvy::dotenv().ok();
    logging::init_logging();

    let args = Args::parse();
    let config = args
        .store_config()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let metadata = SqliteStore::open(&PathBuf::from(&args.database))
        .map_err(|err| io::Error::other(err.to_string()))?;
    let store = FileStore::new(config, Arc::new(metadata));
    store.blobs.ensure_root().await?;
    info!(
        storage = ?store.blobs.root_path(),
        database = args.database.as_str(),
        short_len = store.config.short_link_len,
        join_strategy = ?store.config.join_strategy,
        "storage ready"
    );

    let services = Arc::new(Services::new(store.clone()));
    let mut app = build_router(services, args.upload_max_size);
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let tls_config = tls::load_rustls_config(&args).await?;
    let handle = Handle::new();

    spawn_background_tasks(store);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let server = async {
        match tls_config {
            Some(tls_config) => {
                info!("🔒 Starting HTTPS server at {}", addr);
                axum_server::bind_rustls(addr, tls_config)
                    .handle(handle.clone())
                    .serve(make_service)
                    .await
            }
            None => {
                info!("🚀 Starting HTTP server at {}", addr);
                axum_server::bind(addr)
                    .handle(handle.clone())
                    .serve(make_service)
                    .await
            }
        }
    };

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle.clone()) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
