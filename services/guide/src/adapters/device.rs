//! services/guide/src/adapters/device.rs
//!
//! Filesystem implementation of the `DeviceIdentity` port: generates a
//! device id on first use, persists it, and returns the stored one on every
//! later call. A storage failure still yields a usable (ephemeral) id.

use async_trait::async_trait;
use std::path::PathBuf;
use tour_guide_core::ports::{DeviceIdentity, PortResult};
use tracing::warn;
use uuid::Uuid;

/// An adapter that keeps the device id in a single local file.
pub struct FsDeviceIdentity {
    path: PathBuf,
}

impl FsDeviceIdentity {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

fn generate_device_id() -> String {
    format!("device_{}", Uuid::new_v4().simple())
}

#[async_trait]
impl DeviceIdentity for FsDeviceIdentity {
    async fn device_id(&self) -> PortResult<String> {
        if let Ok(stored) = tokio::fs::read_to_string(&self.path).await {
            let stored = stored.trim();
            if !stored.is_empty() {
                return Ok(stored.to_string());
            }
        }

        let device_id = generate_device_id();
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Err(e) = tokio::fs::write(&self.path, &device_id).await {
            // The id still works for this session; it just will not survive
            // a restart.
            warn!("failed to persist device id: {}", e);
        }
        Ok(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn device_id_is_stable_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let identity = FsDeviceIdentity::new(dir.path().join("device_id"));

        let first = identity.device_id().await.unwrap();
        let second = identity.device_id().await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("device_"));

        // A fresh adapter over the same file sees the same id.
        let again = FsDeviceIdentity::new(dir.path().join("device_id"));
        assert_eq!(again.device_id().await.unwrap(), first);
    }

    #[tokio::test]
    async fn unwritable_path_still_yields_an_id() {
        let identity = FsDeviceIdentity::new(PathBuf::from("/proc/definitely/not/writable/id"));
        let id = identity.device_id().await.unwrap();
        assert!(id.starts_with("device_"));
    }
}
