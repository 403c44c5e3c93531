//! 共享存储句柄与各协调器的组装。

use std::sync::Arc;

use crate::archive::ArchiveStreamer;
use crate::config::StoreConfig;
use crate::deletion::DeletionCoordinator;
use crate::records::MetadataStore;
use crate::retrieval::RetrievalCoordinator;
use crate::storage::BlobStore;
use crate::upload::UploadCoordinator;

/// Handles to both stores plus the settings every coordinator reads.
#[derive(Clone)]
pub struct FileStore {
    pub config: Arc<StoreConfig>,
    pub metadata: Arc<dyn MetadataStore>,
    pub blobs: BlobStore,
}

impl FileStore {
    pub fn new(config: StoreConfig, metadata: Arc<dyn MetadataStore>) -> Self {
        let blobs = BlobStore::new(config.storage_root.clone());
        Self {
            config: Arc::new(config),
            metadata,
            blobs,
        }
    }
}

/// 请求处理器通过 `Extension<Arc<Services>>` 获取的协调器集合。
pub struct Services {
    pub uploads: UploadCoordinator,
    pub retrieval: RetrievalCoordinator,
    pub archives: ArchiveStreamer,
    pub deletions: DeletionCoordinator,
}

impl Services {
    pub fn new(store: FileStore) -> Self {
        Self {
            uploads: UploadCoordinator::new(store.clone()),
            retrieval: RetrievalCoordinator::new(store.clone()),
            archives: ArchiveStreamer::new(store.clone()),
            deletions: DeletionCoordinator::new(store),
        }
    }
}
