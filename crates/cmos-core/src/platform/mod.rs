//! Platform layer module.

pub mod lsblk;
pub mod mock;
pub mod paths;
pub mod traits;

pub use lsblk::{LsblkCatalog, SystemMounter};
pub use mock::MockPlatform;
pub use paths::{absolute_root, expand_home, home_dir};
pub use traits::{BlockDevice, BlockDeviceCatalog, MountManager, MountPoint, PlatformError};
