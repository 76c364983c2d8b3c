//! Artifact shipping
//!
//! Moves one finished file to one delivery target. The filesystem shipper
//! covers mounted targets (NFS/SMB mounts, local libraries); the layout
//! within a target follows its profile.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reel_core::domain::delivery::DeliveryTarget;
use tracing::debug;

#[async_trait]
pub trait ArtifactShipper: Send + Sync {
    async fn ship(&self, source_path: &str, target: &DeliveryTarget) -> anyhow::Result<()>;
}

/// Copies artifacts into mounted target roots
pub struct FsArtifactShipper;

impl FsArtifactShipper {
    pub fn new() -> Self {
        Self
    }

    /// Destination path for a source file under a target.
    ///
    /// The "flat" profile drops the file straight into the root; anything
    /// else gets a directory per profile label.
    fn destination(&self, source_path: &str, target: &DeliveryTarget) -> anyhow::Result<PathBuf> {
        let file_name = Path::new(source_path)
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("source path {} has no file name", source_path))?;
        let mut dest = PathBuf::from(&target.root);
        if target.profile != "flat" {
            dest.push(&target.profile);
        }
        dest.push(file_name);
        Ok(dest)
    }
}

impl Default for FsArtifactShipper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactShipper for FsArtifactShipper {
    async fn ship(&self, source_path: &str, target: &DeliveryTarget) -> anyhow::Result<()> {
        let dest = self.destination(source_path, target)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::copy(source_path, &dest).await?;
        debug!(
            "shipped {} -> {} ({} bytes)",
            source_path,
            dest.display(),
            bytes
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(root: &str, profile: &str) -> DeliveryTarget {
        DeliveryTarget {
            name: "nas".to_string(),
            root: root.to_string(),
            profile: profile.to_string(),
        }
    }

    #[test]
    fn test_flat_profile_goes_to_root() {
        let shipper = FsArtifactShipper::new();
        let dest = shipper
            .destination("/work/out/episode.mkv", &target("/mnt/nas", "flat"))
            .unwrap();
        assert_eq!(dest, PathBuf::from("/mnt/nas/episode.mkv"));
    }

    #[test]
    fn test_profile_subdirectory() {
        let shipper = FsArtifactShipper::new();
        let dest = shipper
            .destination("/work/out/episode.mkv", &target("/mnt/nas", "plex"))
            .unwrap();
        assert_eq!(dest, PathBuf::from("/mnt/nas/plex/episode.mkv"));
    }

    #[test]
    fn test_source_without_file_name_rejected() {
        let shipper = FsArtifactShipper::new();
        assert!(shipper.destination("/", &target("/mnt/nas", "flat")).is_err());
    }
}
