//! Block device and mount abstraction.
//!
//! Defines the `BlockDeviceCatalog` and `MountManager` traits,
//! allowing different implementations (lsblk/mount, mock, etc.).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Device query `{command}` failed: {message}")]
    DeviceQuery { command: String, message: String },

    #[error("Failed to mount {device} at {}: {message}", .path.display())]
    Mount {
        device: String,
        path: PathBuf,
        message: String,
    },

    #[error("Failed to unmount {}: {message}", .path.display())]
    Unmount { path: PathBuf, message: String },

    #[error("More than one top-level device found for {device}: {parents:?}")]
    AmbiguousParent { device: String, parents: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A block device as reported by the OS at query time.
///
/// Snapshots are never updated in place; query the catalog again after a
/// mount to see the new mountpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlockDevice {
    /// Device path, e.g. `/dev/sdc1`.
    pub name: String,
    #[serde(rename = "rm", deserialize_with = "deserialize_flag")]
    pub removable: bool,
    pub mountpoint: Option<PathBuf>,
}

impl BlockDevice {
    pub fn new(name: impl Into<String>, removable: bool, mountpoint: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            removable,
            mountpoint,
        }
    }

    /// Kernel name without the `/dev/` prefix (`sdc1`).
    pub fn kernel_name(&self) -> &str {
        kernel_name(&self.name)
    }
}

pub(crate) fn kernel_name(device: &str) -> &str {
    device.rsplit('/').next().unwrap_or(device)
}

/// lsblk prints `rm` as a bool on current util-linux and as "0"/"1" on older releases.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
        Number(u8),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.trim() == "1",
        Flag::Number(n) => n == 1,
    })
}

/// A directory a device has been mounted on by a [`MountManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Device that was mounted.
    pub device: String,
    pub path: PathBuf,
    /// Random token embedded in the directory name.
    pub token: Uuid,
}

impl MountPoint {
    /// Allocate a fresh, collision-free mount directory under `root`.
    ///
    /// The directory is not created here.
    pub fn allocate(root: &Path, device: &str) -> Self {
        let token = Uuid::new_v4();
        let path = root.join(format!("mount_{}_{}", kernel_name(device), token));
        Self {
            device: device.to_string(),
            path,
            token,
        }
    }
}

/// Enumerates block devices and their relationships.
pub trait BlockDeviceCatalog: Send + Sync {
    /// All block devices with their current mount state, in OS order.
    fn list_devices(&self) -> Result<Vec<BlockDevice>, PlatformError>;

    /// Distinct kernel names of the parent device(s) of `device`.
    ///
    /// Empty for whole-disk devices.
    fn parent_devices(&self, device: &str) -> Result<Vec<String>, PlatformError>;
}

/// Mounts and unmounts devices on freshly allocated directories.
pub trait MountManager: Send + Sync {
    /// Create a unique directory under `root` (including missing parents) and mount `device` on it.
    fn mount(&self, root: &Path, device: &BlockDevice) -> Result<MountPoint, PlatformError>;

    fn unmount(&self, mount: &MountPoint) -> Result<(), PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_name() {
        let device = BlockDevice::new("/dev/sdc1", true, None);
        assert_eq!(device.kernel_name(), "sdc1");
        assert_eq!(kernel_name("mmcblk0p1"), "mmcblk0p1");
    }

    #[test]
    fn test_allocated_mount_dirs_are_unique() {
        let root = Path::new("/tmp/mnt");
        let a = MountPoint::allocate(root, "/dev/sdb1");
        let b = MountPoint::allocate(root, "/dev/sdb1");

        assert_ne!(a.path, b.path);
        assert_ne!(a.token, b.token);
        assert_eq!(a.path.parent(), Some(root));
        let dir_name = a.path.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(dir_name, format!("mount_sdb1_{}", a.token));
    }

    #[test]
    fn test_flag_accepts_bool_and_legacy_string() {
        let current: BlockDevice =
            serde_json::from_str(r#"{"name": "/dev/sdc", "rm": true, "mountpoint": null}"#)
                .unwrap();
        let legacy: BlockDevice =
            serde_json::from_str(r#"{"name": "/dev/sdc", "rm": "1", "mountpoint": null}"#)
                .unwrap();
        let fixed: BlockDevice =
            serde_json::from_str(r#"{"name": "/dev/sda", "rm": "0", "mountpoint": "/"}"#)
                .unwrap();

        assert!(current.removable);
        assert!(legacy.removable);
        assert!(!fixed.removable);
        assert_eq!(fixed.mountpoint, Some(PathBuf::from("/")));
    }
}
