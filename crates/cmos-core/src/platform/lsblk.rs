//! System backends built on util-linux (`lsblk`, `mount`, `umount`).

use std::fs;
use std::path::Path;
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, error, info, instrument};

use super::traits::{BlockDevice, BlockDeviceCatalog, MountManager, MountPoint, PlatformError};

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<BlockDevice>,
}

/// Parse the output of `lsblk -lpJ -o NAME,RM,MOUNTPOINT`.
pub fn parse_lsblk_json(json: &str) -> Result<Vec<BlockDevice>, PlatformError> {
    let parsed: LsblkOutput =
        serde_json::from_str(json).map_err(|e| PlatformError::DeviceQuery {
            command: "lsblk".into(),
            message: format!("unexpected output: {e}"),
        })?;
    Ok(parsed.blockdevices)
}

/// Parse the output of `lsblk -no pkname <device>` into distinct parent names.
pub fn parse_parent_names(output: &str) -> Vec<String> {
    let mut parents: Vec<String> = Vec::new();
    for name in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !parents.iter().any(|p| p == name) {
            parents.push(name.to_string());
        }
    }
    parents
}

fn run(program: &str, args: &[&str]) -> Result<String, (String, String)> {
    let command = format!("{} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| (command.clone(), e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        };
        return Err((command, message));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Block device catalog backed by `lsblk`.
#[derive(Debug, Default, Clone)]
pub struct LsblkCatalog;

impl LsblkCatalog {
    pub fn new() -> Self {
        Self
    }
}

impl BlockDeviceCatalog for LsblkCatalog {
    #[instrument(level = "debug", skip(self))]
    fn list_devices(&self) -> Result<Vec<BlockDevice>, PlatformError> {
        let stdout = run("lsblk", &["-lpJ", "-o", "NAME,RM,MOUNTPOINT"])
            .map_err(|(command, message)| PlatformError::DeviceQuery { command, message })?;
        let devices = parse_lsblk_json(&stdout)?;
        debug!(count = devices.len(), "Block devices listed");
        Ok(devices)
    }

    #[instrument(level = "debug", skip(self))]
    fn parent_devices(&self, device: &str) -> Result<Vec<String>, PlatformError> {
        let stdout = run("lsblk", &["-no", "pkname", device])
            .map_err(|(command, message)| PlatformError::DeviceQuery { command, message })?;
        Ok(parse_parent_names(&stdout))
    }
}

/// Mount manager backed by `mount(8)` and `umount(8)`.
#[derive(Debug, Default, Clone)]
pub struct SystemMounter;

impl SystemMounter {
    pub fn new() -> Self {
        Self
    }
}

impl MountManager for SystemMounter {
    #[instrument(level = "info", skip(self, device), fields(device = %device.name))]
    fn mount(&self, root: &Path, device: &BlockDevice) -> Result<MountPoint, PlatformError> {
        let mount = MountPoint::allocate(root, &device.name);
        info!(path = %mount.path.display(), "Creating mount directory");
        fs::create_dir_all(&mount.path)?;

        let path = mount.path.to_string_lossy();
        run("mount", &[device.name.as_str(), path.as_ref()]).map_err(|(_, message)| {
            error!(message = %message, "Error during the mount command");
            PlatformError::Mount {
                device: device.name.clone(),
                path: mount.path.clone(),
                message,
            }
        })?;

        Ok(mount)
    }

    #[instrument(level = "info", skip(self), fields(path = %mount.path.display()))]
    fn unmount(&self, mount: &MountPoint) -> Result<(), PlatformError> {
        let path = mount.path.to_string_lossy();
        run("umount", &[path.as_ref()]).map_err(|(_, message)| PlatformError::Unmount {
            path: mount.path.clone(),
            message,
        })?;
        info!("Successfully unmounted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const LSBLK_OUTPUT: &str = r#"
    {
        "blockdevices": [
            {"name": "/dev/sda", "rm": false, "mountpoint": null},
            {"name": "/dev/sda1", "rm": false, "mountpoint": "/boot/efi"},
            {"name": "/dev/sda2", "rm": false, "mountpoint": "/"},
            {"name": "/dev/sda3", "rm": false, "mountpoint": "[SWAP]"},
            {"name": "/dev/sdb", "rm": false, "mountpoint": null},
            {"name": "/dev/sdc", "rm": true, "mountpoint": null},
            {"name": "/dev/sdc1", "rm": true, "mountpoint": "/media/warfront1/D-LIVE 12_7"},
            {"name": "/dev/sr0", "rm": true, "mountpoint": null},
            {"name": "/dev/mmcblk0", "rm": false, "mountpoint": null},
            {"name": "/dev/mmcblk0boot0", "rm": false, "mountpoint": null},
            {"name": "/dev/mmcblk0boot1", "rm": false, "mountpoint": null}
        ]
    }
    "#;

    #[test]
    fn test_parse_lsblk_json() {
        let devices = parse_lsblk_json(LSBLK_OUTPUT).unwrap();
        assert_eq!(devices.len(), 11);
        assert_eq!(devices[0], BlockDevice::new("/dev/sda", false, None));
        assert_eq!(
            devices[1],
            BlockDevice::new("/dev/sda1", false, Some(PathBuf::from("/boot/efi")))
        );
        assert_eq!(
            devices[6],
            BlockDevice::new(
                "/dev/sdc1",
                true,
                Some(PathBuf::from("/media/warfront1/D-LIVE 12_7"))
            )
        );
        assert_eq!(devices[10].name, "/dev/mmcblk0boot1");
    }

    #[test]
    fn test_parse_lsblk_rejects_garbage() {
        let err = parse_lsblk_json("NAME RM MOUNTPOINT\nsda 0").unwrap_err();
        assert!(matches!(err, PlatformError::DeviceQuery { .. }));

        let err = parse_lsblk_json(r#"{"devices": []}"#).unwrap_err();
        assert!(matches!(err, PlatformError::DeviceQuery { .. }));
    }

    #[test]
    fn test_parse_parent_names() {
        assert!(parse_parent_names("").is_empty());
        assert!(parse_parent_names("\n").is_empty());
        assert_eq!(parse_parent_names("sda\n"), vec!["sda"]);
        // A whole disk prints an empty line for itself and one per partition.
        assert_eq!(parse_parent_names("\nsda\nsda\n"), vec!["sda"]);
        assert_eq!(parse_parent_names("md0\nmd1\n"), vec!["md0", "md1"]);
    }
}
