//! Discovery of the CMOS source device.
//!
//! Every block device is mounted on a fresh directory and its root listing is
//! compared against the known signatures. The scan stops at the first match;
//! that device stays mounted for the reassembly phase.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::fingerprint::{ContentSignature, matching_signature};
use crate::platform::{
    BlockDevice, BlockDeviceCatalog, MountManager, MountPoint, PlatformError, absolute_root,
};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error(transparent)]
    Catalog(#[from] PlatformError),

    #[error("No block device matched the given file lists ({probed} devices probed)")]
    NoMatchingDevice { probed: usize },

    #[error("{device} matched but is not reported as mounted at {}", .path.display())]
    MountNotReported { device: String, path: PathBuf },
}

/// The matched device together with the mount that exposes its files.
#[derive(Debug, Clone)]
pub struct SourceDevice {
    /// Catalog record re-queried after mounting.
    pub device: BlockDevice,
    pub mount: MountPoint,
}

impl SourceDevice {
    pub fn mount_path(&self) -> &Path {
        &self.mount.path
    }
}

/// Finds the CMOS stick among the attached block devices.
pub struct DiscoveryEngine<'a, C: BlockDeviceCatalog, M: MountManager> {
    catalog: &'a C,
    mounter: &'a M,
    signatures: &'a [ContentSignature],
}

impl<'a, C: BlockDeviceCatalog, M: MountManager> DiscoveryEngine<'a, C, M> {
    pub fn new(catalog: &'a C, mounter: &'a M, signatures: &'a [ContentSignature]) -> Self {
        Self {
            catalog,
            mounter,
            signatures,
        }
    }

    /// Probe devices in catalog order until one matches a signature.
    #[instrument(skip(self), fields(mount_root = %mount_root.display()))]
    pub fn discover_source_device(&self, mount_root: &Path) -> Result<SourceDevice, DiscoveryError> {
        // lsblk reports canonical absolute mountpoints, so probe under one.
        let mount_root = absolute_root(mount_root)?;
        let mount_root = mount_root.as_path();
        let devices = self.catalog.list_devices()?;
        info!(count = devices.len(), "Probing block devices");

        for device in &devices {
            let mount = match self.mounter.mount(mount_root, device) {
                Ok(m) => m,
                Err(e) => {
                    warn!(device = %device.name, error = %e, "Skipping device that failed to mount");
                    continue;
                }
            };

            let contents = match list_root(&mount.path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(device = %device.name, error = %e, "Could not list mounted device");
                    Vec::new()
                }
            };
            info!(
                device = %device.name,
                path = %mount.path.display(),
                "Mounted with the following contents: {}",
                contents.join(", ")
            );

            if let Some(sig) = matching_signature(&contents, self.signatures) {
                info!(
                    device = %device.name,
                    signature = sig.name,
                    "Root directory matches a CMOS file list"
                );
                return match self.authoritative_record(&mount) {
                    Ok(device) => Ok(SourceDevice { device, mount }),
                    Err(e) => {
                        self.release(&mount);
                        Err(e)
                    }
                };
            }

            debug!(device = %device.name, "No signature matched");
            self.release(&mount);
        }

        Err(DiscoveryError::NoMatchingDevice {
            probed: devices.len(),
        })
    }

    /// Re-query the catalog for the device now mounted at `mount.path`.
    fn authoritative_record(&self, mount: &MountPoint) -> Result<BlockDevice, DiscoveryError> {
        self.catalog
            .list_devices()?
            .into_iter()
            .find(|d| d.mountpoint.as_deref() == Some(mount.path.as_path()))
            .ok_or_else(|| DiscoveryError::MountNotReported {
                device: mount.device.clone(),
                path: mount.path.clone(),
            })
    }

    fn release(&self, mount: &MountPoint) {
        if let Err(e) = self.mounter.unmount(mount) {
            warn!(device = %mount.device, error = %e, "Unmount failed, continuing");
        }
    }
}

fn list_root(path: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(path)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::default_signatures;
    use crate::platform::MockPlatform;

    const CMOS: &[&str] = &["boot", "EFI", "live", "syslinux", "CMOS"];

    fn three_devices() -> MockPlatform {
        let mock = MockPlatform::new();
        mock.add_device("/dev/sda1", false, &["bin", "etc", "home"])
            .add_device("/dev/sdb1", true, CMOS)
            .add_device("/dev/sdc1", true, &["boot", "EFI", "live", "syslinux"]);
        mock
    }

    #[test]
    fn test_second_device_is_found() {
        let root = tempfile::tempdir().unwrap();
        let mock = three_devices();
        let sigs = default_signatures();

        let source = DiscoveryEngine::new(&mock, &mock, &sigs)
            .discover_source_device(root.path())
            .unwrap();

        assert_eq!(source.device.name, "/dev/sdb1");
        assert_eq!(source.device.mountpoint.as_deref(), Some(source.mount_path()));
        // First device unmounted, third never probed, match left mounted.
        assert_eq!(mock.mounts().len(), 2);
        assert_eq!(mock.unmounts().len(), 1);
        assert_eq!(mock.unmounts()[0].device, "/dev/sda1");
        assert_eq!(mock.active_mounts(), vec![source.mount.path.clone()]);
    }

    #[test]
    fn test_incidental_files_do_not_block_match() {
        let root = tempfile::tempdir().unwrap();
        let mock = MockPlatform::new();
        mock.add_device(
            "/dev/sdd1",
            true,
            &[
                "boot",
                "EFI",
                "live",
                "syslinux",
                "CMOS",
                "win.iso.part1",
                "win.iso.part2",
                "$RECYCLE.BIN",
            ],
        );
        let sigs = default_signatures();

        let source = DiscoveryEngine::new(&mock, &mock, &sigs)
            .discover_source_device(root.path())
            .unwrap();
        assert_eq!(source.device.name, "/dev/sdd1");
    }

    #[test]
    fn test_mount_failure_skips_device() {
        let root = tempfile::tempdir().unwrap();
        let mock = MockPlatform::new();
        mock.add_device("/dev/sda", false, CMOS)
            .fail_mount("/dev/sda")
            .add_device("/dev/sdb1", true, CMOS);
        let sigs = default_signatures();

        let source = DiscoveryEngine::new(&mock, &mock, &sigs)
            .discover_source_device(root.path())
            .unwrap();
        assert_eq!(source.device.name, "/dev/sdb1");
    }

    #[test]
    fn test_no_match_after_all_devices() {
        let root = tempfile::tempdir().unwrap();
        let mock = MockPlatform::new();
        mock.add_device("/dev/sda1", false, &["bin"])
            .add_device("/dev/sdb1", true, &["boot", "EFI", "live", "syslinux", "CMOS", "x"])
            .fail_unmounts();
        let sigs = default_signatures();

        let err = DiscoveryEngine::new(&mock, &mock, &sigs)
            .discover_source_device(root.path())
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NoMatchingDevice { probed: 2 }));
        assert_eq!(mock.unmounts().len(), 2);
    }

    #[test]
    fn test_catalog_failure_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let mock = MockPlatform::new();
        mock.fail_queries();
        let sigs = default_signatures();

        let err = DiscoveryEngine::new(&mock, &mock, &sigs)
            .discover_source_device(root.path())
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Catalog(PlatformError::DeviceQuery { .. })));
    }

    #[test]
    fn test_stale_catalog_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let mock = MockPlatform::new();
        mock.add_device("/dev/sdb1", true, CMOS).hide_mountpoints();
        let sigs = default_signatures();

        let err = DiscoveryEngine::new(&mock, &mock, &sigs)
            .discover_source_device(root.path())
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::MountNotReported { .. }));
        assert_eq!(mock.unmounts().len(), 1);
        assert!(mock.active_mounts().is_empty());
    }

    #[test]
    fn test_matched_mount_is_released_when_requery_fails() {
        let root = tempfile::tempdir().unwrap();
        let mock = MockPlatform::new();
        mock.add_device("/dev/sdb1", true, CMOS);
        let sigs = default_signatures();

        // Fail every catalog query after the first listing.
        struct FlakyCatalog<'a> {
            inner: &'a MockPlatform,
            calls: std::sync::Mutex<u32>,
        }
        impl BlockDeviceCatalog for FlakyCatalog<'_> {
            fn list_devices(&self) -> Result<Vec<BlockDevice>, PlatformError> {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                if *calls > 1 {
                    self.inner.fail_queries();
                }
                self.inner.list_devices()
            }

            fn parent_devices(&self, device: &str) -> Result<Vec<String>, PlatformError> {
                self.inner.parent_devices(device)
            }
        }
        let catalog = FlakyCatalog {
            inner: &mock,
            calls: std::sync::Mutex::new(0),
        };

        let err = DiscoveryEngine::new(&catalog, &mock, &sigs)
            .discover_source_device(root.path())
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Catalog(_)));
        assert_eq!(mock.unmounts().len(), 1);
    }

    #[test]
    fn test_non_canonical_root_yields_canonical_mount_path() {
        let root = tempfile::tempdir().unwrap();
        let messy = root.path().join("a").join("..").join("mnt");
        let mock = MockPlatform::new();
        mock.add_device("/dev/sdb1", true, CMOS);
        let sigs = default_signatures();

        let source = DiscoveryEngine::new(&mock, &mock, &sigs)
            .discover_source_device(&messy)
            .unwrap();
        let expected_parent = root.path().canonicalize().unwrap().join("mnt");
        assert_eq!(source.mount_path().parent(), Some(expected_parent.as_path()));
        assert!(source.mount_path().is_absolute());
    }
}
