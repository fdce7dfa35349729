//! In-memory platform for testing discovery and reassembly.
//!
//! Devices are described by their root directory contents. Mounting a device
//! writes those files into the real mount directory so the code under test
//! can list and read them like a mounted filesystem; unmounting empties the
//! directory again.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::traits::{BlockDevice, BlockDeviceCatalog, MountManager, MountPoint, PlatformError};

#[derive(Default)]
struct MockState {
    devices: Vec<BlockDevice>,
    contents: HashMap<String, Vec<(String, Vec<u8>)>>,
    parents: HashMap<String, Vec<String>>,
    failing_mounts: HashSet<String>,
    fail_unmounts: bool,
    fail_queries: bool,
    hide_mountpoints: bool,
    mounts: Vec<MountPoint>,
    unmounts: Vec<MountPoint>,
}

/// Mock catalog and mount manager.
#[derive(Clone, Default)]
pub struct MockPlatform {
    state: Arc<Mutex<MockState>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device whose root directory holds empty entries with these names.
    pub fn add_device(&self, name: &str, removable: bool, entries: &[&str]) -> &Self {
        let files: Vec<(&str, &[u8])> = entries.iter().map(|e| (*e, &[] as &[u8])).collect();
        self.add_device_with_files(name, removable, &files)
    }

    /// Add a device whose root directory holds files with the given contents.
    pub fn add_device_with_files(
        &self,
        name: &str,
        removable: bool,
        files: &[(&str, &[u8])],
    ) -> &Self {
        let mut state = self.state.lock().unwrap();
        state.devices.push(BlockDevice::new(name, removable, None));
        state.contents.insert(
            name.to_string(),
            files
                .iter()
                .map(|(n, data)| (n.to_string(), data.to_vec()))
                .collect(),
        );
        self
    }

    /// Make mounting `name` fail.
    pub fn fail_mount(&self, name: &str) -> &Self {
        self.state
            .lock()
            .unwrap()
            .failing_mounts
            .insert(name.to_string());
        self
    }

    /// Make every unmount fail.
    pub fn fail_unmounts(&self) -> &Self {
        self.state.lock().unwrap().fail_unmounts = true;
        self
    }

    /// Make every catalog query fail.
    pub fn fail_queries(&self) -> &Self {
        self.state.lock().unwrap().fail_queries = true;
        self
    }

    /// Report every device as unmounted, simulating a stale catalog.
    pub fn hide_mountpoints(&self) -> &Self {
        self.state.lock().unwrap().hide_mountpoints = true;
        self
    }

    /// Set the kernel names `lsblk -no pkname` would print for `name`.
    pub fn set_parents(&self, name: &str, parents: &[&str]) -> &Self {
        self.state.lock().unwrap().parents.insert(
            name.to_string(),
            parents.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    /// All mount attempts, including failed ones.
    pub fn mounts(&self) -> Vec<MountPoint> {
        self.state.lock().unwrap().mounts.clone()
    }

    pub fn unmounts(&self) -> Vec<MountPoint> {
        self.state.lock().unwrap().unmounts.clone()
    }

    /// Mount points that were created and not yet released.
    pub fn active_mounts(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .unwrap()
            .devices
            .iter()
            .filter_map(|d| d.mountpoint.clone())
            .collect()
    }

    fn query_error() -> PlatformError {
        PlatformError::DeviceQuery {
            command: "mock".into(),
            message: "query failed".into(),
        }
    }
}

impl BlockDeviceCatalog for MockPlatform {
    fn list_devices(&self) -> Result<Vec<BlockDevice>, PlatformError> {
        let state = self.state.lock().unwrap();
        if state.fail_queries {
            return Err(Self::query_error());
        }
        let mut devices = state.devices.clone();
        if state.hide_mountpoints {
            for device in &mut devices {
                device.mountpoint = None;
            }
        }
        Ok(devices)
    }

    fn parent_devices(&self, device: &str) -> Result<Vec<String>, PlatformError> {
        let state = self.state.lock().unwrap();
        if state.fail_queries {
            return Err(Self::query_error());
        }
        Ok(state.parents.get(device).cloned().unwrap_or_default())
    }
}

impl MountManager for MockPlatform {
    fn mount(&self, root: &Path, device: &BlockDevice) -> Result<MountPoint, PlatformError> {
        let mount = MountPoint::allocate(root, &device.name);
        fs::create_dir_all(&mount.path)?;

        let mut state = self.state.lock().unwrap();
        state.mounts.push(mount.clone());
        if state.failing_mounts.contains(&device.name) {
            return Err(PlatformError::Mount {
                device: device.name.clone(),
                path: mount.path.clone(),
                message: "wrong fs type, bad option, bad superblock".into(),
            });
        }

        for (name, data) in state.contents.get(&device.name).into_iter().flatten() {
            fs::write(mount.path.join(name), data)?;
        }
        if let Some(entry) = state.devices.iter_mut().find(|d| d.name == device.name) {
            entry.mountpoint = Some(mount.path.clone());
        }
        Ok(mount)
    }

    fn unmount(&self, mount: &MountPoint) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        state.unmounts.push(mount.clone());
        if state.fail_unmounts {
            return Err(PlatformError::Unmount {
                path: mount.path.clone(),
                message: "target is busy".into(),
            });
        }

        if let Some(entry) = state
            .devices
            .iter_mut()
            .find(|d| d.mountpoint.as_deref() == Some(mount.path.as_path()))
        {
            entry.mountpoint = None;
        }
        fs::remove_dir_all(&mount.path)?;
        fs::create_dir(&mount.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_mount_materializes_contents() {
        let root = tempfile::tempdir().unwrap();
        let mock = MockPlatform::new();
        mock.add_device_with_files("/dev/sdb1", true, &[("a.txt", b"hello")]);

        let device = mock.list_devices().unwrap().remove(0);
        let mount = mock.mount(root.path(), &device).unwrap();

        assert_eq!(fs::read(mount.path.join("a.txt")).unwrap(), b"hello");
        let requeried = mock.list_devices().unwrap().remove(0);
        assert_eq!(requeried.mountpoint.as_deref(), Some(mount.path.as_path()));

        mock.unmount(&mount).unwrap();
        assert!(mount.path.exists());
        assert_eq!(fs::read_dir(&mount.path).unwrap().count(), 0);
        assert!(mock.active_mounts().is_empty());
    }

    #[test]
    fn test_mock_failed_mount_leaves_empty_dir() {
        let root = tempfile::tempdir().unwrap();
        let mock = MockPlatform::new();
        mock.add_device("/dev/sda", false, &["x"]).fail_mount("/dev/sda");

        let device = mock.list_devices().unwrap().remove(0);
        assert!(mock.mount(root.path(), &device).is_err());
        assert_eq!(mock.mounts().len(), 1);
        assert!(mock.mounts()[0].path.is_dir());
        assert!(mock.active_mounts().is_empty());
    }

    #[test]
    fn test_mock_parents_default_to_empty() {
        let mock = MockPlatform::new();
        mock.set_parents("/dev/sdc1", &["sdc"]);
        assert_eq!(mock.parent_devices("/dev/sdc1").unwrap(), vec!["sdc"]);
        assert!(mock.parent_devices("/dev/sdc").unwrap().is_empty());
    }
}
