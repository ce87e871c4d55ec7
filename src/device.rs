//! Attached e-reader discovery.
//!
//! Volumes come from a [`VolumeSource`]; the locator keeps the removable ones
//! and picks the first that carries the device family's account marker.

use crate::config::DeviceConfig;
use crate::error::DeviceError;
use std::path::{Path, PathBuf};

/// Kind of a storage volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    Removable,
    Fixed,
    Network,
    Other,
}

/// A mounted storage volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub root: PathBuf,
    pub kind: VolumeKind,
}

impl Volume {
    pub fn new(root: impl Into<PathBuf>, kind: VolumeKind) -> Self {
        Self {
            root: root.into(),
            kind,
        }
    }
}

/// Enumerates the volumes known to the OS.
pub trait VolumeSource: Send + Sync {
    fn volumes(&self) -> Result<Vec<Volume>, DeviceError>;
}

/// Treats every directory under a set of mount roots as a removable volume.
///
/// On Windows the drive letters are enumerated instead.
#[derive(Debug, Clone)]
pub struct MountRootVolumes {
    roots: Vec<PathBuf>,
}

impl MountRootVolumes {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

impl VolumeSource for MountRootVolumes {
    fn volumes(&self) -> Result<Vec<Volume>, DeviceError> {
        let mut volumes = Vec::new();

        for root in &self.roots {
            let entries = match std::fs::read_dir(root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            let mut children: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect();
            children.sort();
            volumes.extend(
                children
                    .into_iter()
                    .map(|path| Volume::new(path, VolumeKind::Removable)),
            );
        }

        #[cfg(windows)]
        volumes.extend(
            (b'D'..=b'Z')
                .map(|letter| PathBuf::from(format!("{}:\\", letter as char)))
                .filter(|root| root.exists())
                .map(|root| Volume::new(root, VolumeKind::Removable)),
        );

        Ok(volumes)
    }
}

/// Finds the volume that belongs to an attached e-reader.
pub struct DeviceLocator {
    source: Box<dyn VolumeSource>,
    marker_dir: PathBuf,
    marker_token: String,
}

impl DeviceLocator {
    pub fn new(
        source: Box<dyn VolumeSource>,
        marker_dir: impl Into<PathBuf>,
        marker_token: impl Into<String>,
    ) -> Self {
        Self {
            source,
            marker_dir: marker_dir.into(),
            marker_token: marker_token.into(),
        }
    }

    /// Builds a locator over the configured mount roots.
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(
            Box::new(MountRootVolumes::new(config.mount_roots.clone())),
            config.marker_dir.clone(),
            config.marker_token.clone(),
        )
    }

    /// Returns the root of the first removable volume carrying the marker.
    pub fn find(&self) -> Result<Option<PathBuf>, DeviceError> {
        for volume in self.source.volumes()? {
            if volume.kind != VolumeKind::Removable {
                continue;
            }
            if self.has_marker(&volume.root) {
                tracing::debug!(root = %volume.root.display(), "Found attached device");
                return Ok(Some(volume.root));
            }
        }
        Ok(None)
    }

    /// Like [`find`](Self::find), but a missing device is an error.
    pub fn require(&self) -> Result<PathBuf, DeviceError> {
        self.find()?.ok_or(DeviceError::NotFound)
    }

    fn has_marker(&self, root: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(root.join(&self.marker_dir)) else {
            return false;
        };
        entries.filter_map(|entry| entry.ok()).any(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .contains(self.marker_token.as_str())
        })
    }
}
