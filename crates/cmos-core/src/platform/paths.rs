//! Path helpers for configured directories.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::traits::PlatformError;

const FALLBACK_HOME: &str = "/root";

/// The user's home directory from `HOME`, or `/root` when it is unset.
pub fn home_dir() -> PathBuf {
    home_from(std::env::var_os("HOME"))
}

fn home_from(home: Option<OsString>) -> PathBuf {
    match home.filter(|h| !h.is_empty()) {
        Some(h) => PathBuf::from(h),
        None => {
            warn!("HOME is not set, using {FALLBACK_HOME}");
            PathBuf::from(FALLBACK_HOME)
        }
    }
}

/// Replace a leading `~` with the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    expand_with(path, home_dir)
}

fn expand_with(path: &Path, home: impl FnOnce() -> PathBuf) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Create `root` if needed and return its canonical absolute form.
///
/// A leading `~` is expanded first.
pub fn absolute_root(root: &Path) -> Result<PathBuf, PlatformError> {
    let root = expand_home(root);
    fs::create_dir_all(&root)?;
    Ok(fs::canonicalize(&root)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MountPoint;

    #[test]
    fn test_tilde_is_expanded() {
        let home = || PathBuf::from("/home/cmos");
        assert_eq!(expand_with(Path::new("~/mnt"), home), PathBuf::from("/home/cmos/mnt"));
        assert_eq!(expand_with(Path::new("~"), home), PathBuf::from("/home/cmos"));
        assert_eq!(expand_with(Path::new("/srv/~x"), home), PathBuf::from("/srv/~x"));
        assert_eq!(expand_with(Path::new("~other/mnt"), home), PathBuf::from("~other/mnt"));
    }

    #[test]
    fn test_missing_home_falls_back() {
        assert_eq!(home_from(None), PathBuf::from("/root"));
        assert_eq!(home_from(Some(OsString::new())), PathBuf::from("/root"));
        assert_eq!(home_from(Some("/home/u".into())), PathBuf::from("/home/u"));
    }

    #[test]
    fn test_relative_root_allocates_absolute_mount_dirs() {
        let root = absolute_root(Path::new(".")).unwrap();
        assert!(root.is_absolute());

        let mount = MountPoint::allocate(&root, "/dev/sdb1");
        assert!(mount.path.is_absolute());
        assert_eq!(mount.path.parent(), Some(root.as_path()));
    }

    #[test]
    fn test_root_is_created_and_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let root = absolute_root(&dir.path().join("x").join("..").join("mnt")).unwrap();
        assert_eq!(root, dir.path().canonicalize().unwrap().join("mnt"));
        assert!(root.is_dir());
    }
}
