//! Gathering images from the source device and concatenating fragments.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use super::ImageError;
use super::fragment::{Fragment, collect_fragments, is_image_file, total_size};
use super::progress::ProgressAggregator;
use crate::events::ObserverSet;
use crate::platform::{MountManager, MountPoint};

/// Name of the image built from fragments.
pub const DEFAULT_IMAGE_NAME: &str = "concatenated_iso.iso";

/// Bytes read and written per step (20 000 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 20_000 * 1024;

/// What a reassembly run produced.
#[derive(Debug, Clone, Default)]
pub struct ReassemblyReport {
    /// Whole images copied verbatim into the output directory.
    pub copied_images: Vec<PathBuf>,
    /// Fragments in the order they were concatenated.
    pub fragments: Vec<Fragment>,
    /// Image built from the fragments, if there were any.
    pub concatenated: Option<PathBuf>,
    pub total_fragment_bytes: u64,
}

/// Copies images off the source mount and joins `.partN` fragments.
pub struct ReassemblyPipeline<'a, M: MountManager> {
    mounter: &'a M,
    observers: &'a ObserverSet,
    image_name: String,
    chunk_size: usize,
}

impl<'a, M: MountManager> ReassemblyPipeline<'a, M> {
    pub fn new(mounter: &'a M, observers: &'a ObserverSet) -> Self {
        Self {
            mounter,
            observers,
            image_name: DEFAULT_IMAGE_NAME.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_image_name(mut self, name: impl Into<String>) -> Self {
        self.image_name = name.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Gather everything from `source` into `output_dir`, then release `source`.
    ///
    /// The source is unmounted whether or not gathering succeeded. Partial
    /// output is left in place on error.
    #[instrument(skip(self, source), fields(source = %source.path.display(), output = %output_dir.display()))]
    pub fn reassemble(
        &self,
        source: &MountPoint,
        output_dir: &Path,
    ) -> Result<ReassemblyReport, ImageError> {
        let result = self.gather(&source.path, output_dir);
        if let Err(e) = self.mounter.unmount(source) {
            warn!(error = %e, "Could not unmount source device");
        }
        result
    }

    fn gather(&self, source_dir: &Path, output_dir: &Path) -> Result<ReassemblyReport, ImageError> {
        info!("Using the following output directory: {}", output_dir.display());
        fs::create_dir_all(output_dir).map_err(|e| ImageError::reassembly(output_dir, e))?;

        let copied_images = copy_images(source_dir, output_dir)?;
        let fragments =
            collect_fragments(source_dir).map_err(|e| ImageError::reassembly(source_dir, e))?;

        if fragments.is_empty() {
            info!("No part files found.");
            return Ok(ReassemblyReport {
                copied_images,
                ..Default::default()
            });
        }

        let total = total_size(&fragments);
        info!(
            parts = fragments.len(),
            "Attempting to combine {} part files that total {:.1} MB",
            fragments.len(),
            total as f64 / 1_048_576.0
        );

        let output_path = output_dir.join(&self.image_name);
        let mut output =
            File::create(&output_path).map_err(|e| ImageError::reassembly(&output_path, e))?;
        let mut aggregator = ProgressAggregator::new(total, self.observers);
        let mut buffer = vec![0u8; self.chunk_size];

        for fragment in &fragments {
            info!("Adding the following file to the image: {}", fragment.path.display());
            append_fragment(&mut output, &output_path, fragment, &mut buffer, &mut aggregator)?;
        }
        output
            .sync_all()
            .map_err(|e| ImageError::reassembly(&output_path, e))?;

        aggregator.notify_completion();
        info!("Finished concatenation.");

        Ok(ReassemblyReport {
            copied_images,
            fragments,
            concatenated: Some(output_path),
            total_fragment_bytes: total,
        })
    }
}

/// Copy every whole image in `source_dir` into `output_dir`.
fn copy_images(source_dir: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, ImageError> {
    let entries = fs::read_dir(source_dir).map_err(|e| ImageError::reassembly(source_dir, e))?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ImageError::reassembly(source_dir, e))?;
        let name = entry.file_name();
        if !name.to_str().is_some_and(is_image_file) || !entry.path().is_file() {
            continue;
        }
        let dest = output_dir.join(&name);
        info!(from = %entry.path().display(), to = %dest.display(), "Copying image");
        fs::copy(entry.path(), &dest).map_err(|e| ImageError::reassembly(&entry.path(), e))?;
        copied.push(dest);
    }
    copied.sort();
    Ok(copied)
}

/// Stream one fragment onto the end of `output`, one chunk at a time.
fn append_fragment(
    output: &mut File,
    output_path: &Path,
    fragment: &Fragment,
    buffer: &mut [u8],
    aggregator: &mut ProgressAggregator<'_>,
) -> Result<u64, ImageError> {
    let mut source =
        File::open(&fragment.path).map_err(|e| ImageError::reassembly(&fragment.path, e))?;

    let mut copied: u64 = 0;
    loop {
        let n = source
            .read(buffer)
            .map_err(|e| ImageError::reassembly(&fragment.path, e))?;
        if n == 0 {
            break;
        }
        output
            .write_all(&buffer[..n])
            .map_err(|e| ImageError::reassembly(output_path, e))?;
        copied += n as u64;
        aggregator.report_progress(&fragment.path, copied);
    }

    if copied == 0 {
        aggregator.report_progress(&fragment.path, 0);
    }
    Ok(copied)
}
