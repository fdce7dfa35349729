//! Resolution of the whole-disk device the writer tool targets.

use tracing::{info, instrument};

use crate::platform::{BlockDeviceCatalog, PlatformError};

/// Find the top-level (whole-disk) device for `device`.
///
/// A device without a parent is its own top-level device.
#[instrument(skip(catalog))]
pub fn resolve_top_level_device<C: BlockDeviceCatalog + ?Sized>(
    catalog: &C,
    device: &str,
) -> Result<String, PlatformError> {
    let mut parents = catalog.parent_devices(device)?;
    let top = match parents.len() {
        0 => device.to_string(),
        1 => format!("/dev/{}", parents.remove(0)),
        _ => {
            return Err(PlatformError::AmbiguousParent {
                device: device.to_string(),
                parents,
            });
        }
    };
    info!(top_level = %top, "The top-level device for {} is {}", device, top);
    Ok(top)
}
