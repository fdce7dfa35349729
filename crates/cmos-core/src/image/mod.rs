//! Image handling module.
//!
//! Gathers whole images and split fragments from the source device into one
//! local directory and checks that exactly one image comes out of it.

pub mod fragment;
pub mod progress;
pub mod reassembly;
pub mod verify;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use fragment::{Fragment, IMAGE_EXTENSION, collect_fragments, is_image_file, part_number};
pub use progress::ProgressAggregator;
pub use reassembly::{ReassemblyPipeline, ReassemblyReport};
pub use verify::verify_single_image;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error(
        "We expected at least one ISO file in {}. Make sure to copy an ISO file onto your USB.",
        .dir.display()
    )]
    Missing { dir: PathBuf },

    #[error("Too many ISO files given. Files in {} directory:\n{}", .dir.display(), list_files(.files))]
    Ambiguous { dir: PathBuf, files: Vec<PathBuf> },

    #[error("Reassembly failed at {}: {source}", .path.display())]
    Reassembly {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not list {}: {source}", .dir.display())]
    Io {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ImageError {
    pub(crate) fn reassembly(path: &Path, source: io::Error) -> Self {
        ImageError::Reassembly {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn list_files(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
