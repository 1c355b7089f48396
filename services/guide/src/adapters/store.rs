//! services/guide/src/adapters/store.rs
//!
//! Filesystem implementation of the `SegmentStore` port. Segments are
//! written as uniquely-named files under a configured directory so that
//! concurrent sessions and restarts can never collide.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tour_guide_core::ports::{PortError, PortResult, SegmentHandle, SegmentStore};
use uuid::Uuid;

/// An adapter that persists audio segments as files in a local directory.
pub struct FsSegmentStore {
    dir: PathBuf,
}

impl FsSegmentStore {
    /// Creates the store, ensuring the directory exists.
    pub fn new(dir: PathBuf) -> PortResult<Self> {
        std::fs::create_dir_all(&dir)
            .map_err(|e| PortError::Unexpected(format!("create {}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl SegmentStore for FsSegmentStore {
    async fn write(&self, bytes: &[u8]) -> PortResult<SegmentHandle> {
        let path = self.dir.join(format!("seg_{}.mp3", Uuid::new_v4().simple()));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PortError::Unexpected(format!("write {}: {}", path.display(), e)))?;
        Ok(SegmentHandle::new(path))
    }

    async fn delete(&self, handle: &SegmentHandle) -> PortResult<()> {
        tokio::fs::remove_file(handle.path()).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                PortError::NotFound(handle.path().display().to_string())
            } else {
                PortError::Unexpected(format!("delete {}: {}", handle.path().display(), e))
            }
        })
    }
}
