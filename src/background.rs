//! 过期临时 blob 的后台清理任务。

use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TEMP_SWEEP_INTERVAL_SECS;
use crate::service::FileStore;

/// 启动后台任务（清理崩溃后遗留的上传临时文件）。
pub fn spawn_background_tasks(store: FileStore) {
    let ttl = store.config.temp_ttl;
    if ttl.is_zero() {
        debug!("temp blob sweep disabled");
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TEMP_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match store.blobs.sweep_stale_temp_files(ttl).await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "temp blob sweep finished"),
                Err(err) => warn!(error = %err, "temp blob sweep failed"),
            }
        }
    });
}
