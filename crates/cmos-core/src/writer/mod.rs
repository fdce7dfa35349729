//! Writer tool abstraction.
//!
//! The final step hands the verified image to an external tool that
//! partitions, formats and fills the target disk. [`WriterTool`] hides which
//! tool that is; [`WoeUsb`] is the production backend.

pub mod mock;
pub mod woeusb;

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::ObserverSet;

pub use mock::MockWriter;
pub use woeusb::WoeUsb;

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("Failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Writer exited with {}", describe_code(.code))]
    ExitStatus { code: Option<i32> },

    #[error("Failed to read writer output: {0}")]
    Output(#[from] io::Error),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Filesystem the writer creates on the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetFilesystem {
    #[default]
    Ntfs,
    Fat,
}

impl fmt::Display for TargetFilesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetFilesystem::Ntfs => write!(f, "NTFS"),
            TargetFilesystem::Fat => write!(f, "FAT"),
        }
    }
}

/// Everything the writer needs to produce a bootable disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterRequest {
    pub image: PathBuf,
    /// Whole-disk device, e.g. `/dev/sdc`.
    pub target_device: String,
    pub filesystem: TargetFilesystem,
    pub label: String,
    /// Wipe and repartition the whole device rather than one partition.
    pub device_mode: bool,
    pub no_color: bool,
    pub skip_grub_workaround: bool,
}

impl WriterRequest {
    pub const DEFAULT_LABEL: &'static str = "Windows USB";

    pub fn new(image: impl Into<PathBuf>, target_device: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            target_device: target_device.into(),
            filesystem: TargetFilesystem::default(),
            label: Self::DEFAULT_LABEL.to_string(),
            device_mode: true,
            no_color: true,
            skip_grub_workaround: true,
        }
    }
}

/// Coarse phase of a write, inferred from tool output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WriterPhase {
    #[default]
    Idle,
    Starting,
    Preparing,
    Partitioning,
    CopyingFiles,
    InstallingBootloader,
    Finishing,
    Done,
    Failed,
}

impl fmt::Display for WriterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriterPhase::Idle => "idle",
            WriterPhase::Starting => "starting",
            WriterPhase::Preparing => "preparing",
            WriterPhase::Partitioning => "partitioning",
            WriterPhase::CopyingFiles => "copying files",
            WriterPhase::InstallingBootloader => "installing bootloader",
            WriterPhase::Finishing => "finishing",
            WriterPhase::Done => "done",
            WriterPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// File copy progress reported by the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyProgress {
    /// File currently being copied, when the tool names it.
    pub file: Option<String>,
    pub percent: f32,
}

/// Snapshot of the writer's state, as returned by [`WriterTool::status`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriterStatus {
    pub phase: WriterPhase,
    pub copy: Option<CopyProgress>,
}

impl WriterStatus {
    pub fn with_phase(phase: WriterPhase) -> Self {
        Self { phase, copy: None }
    }

    /// Fold one line of tool output into the status. Returns true if anything changed.
    pub fn apply_line(&mut self, line: &str) -> bool {
        let before = self.clone();

        if let Some(phase) = infer_phase(line) {
            self.phase = phase;
            if phase != WriterPhase::CopyingFiles {
                self.copy = None;
            }
        }
        if let Some(file) = copied_file(line) {
            let percent = self.copy.as_ref().map_or(0.0, |c| c.percent);
            self.copy = Some(CopyProgress {
                file: Some(file),
                percent,
            });
        }
        if let Some(percent) = parse_percent(line) {
            let file = self.copy.take().and_then(|c| c.file);
            self.copy = Some(CopyProgress { file, percent });
        }

        *self != before
    }
}

/// Runs the external tool that writes the image to the target disk.
///
/// `status` must be callable from another thread while `write` is running.
pub trait WriterTool: Send + Sync {
    /// Write the image and block until the tool exits.
    ///
    /// Every output line is forwarded to the writer observers in `observers`.
    fn write(&self, request: &WriterRequest, observers: &ObserverSet) -> Result<(), WriterError>;

    fn status(&self) -> WriterStatus;
}

/// Map a line of WoeUSB output to the phase it announces.
pub fn infer_phase(line: &str) -> Option<WriterPhase> {
    let lower = line.to_ascii_lowercase();
    let phase = if lower.starts_with("done") || lower.contains("installation finished") {
        WriterPhase::Done
    } else if lower.contains("unmounting") || lower.contains("cleaning up") {
        WriterPhase::Finishing
    } else if lower.contains("grub") || lower.contains("bootloader") || lower.contains("uefi:ntfs")
    {
        WriterPhase::InstallingBootloader
    } else if lower.contains("copying") {
        WriterPhase::CopyingFiles
    } else if lower.contains("wiping") || lower.contains("partition") || lower.contains("formatting")
    {
        WriterPhase::Partitioning
    } else if lower.contains("mounting") || lower.contains("checking") {
        WriterPhase::Preparing
    } else {
        return None;
    };
    Some(phase)
}

/// First `NN%` or `NN.N%` token in `line`.
pub fn parse_percent(line: &str) -> Option<f32> {
    line.split(|c: char| c.is_whitespace() || c == '(' || c == ')' || c == ',')
        .filter_map(|token| token.strip_suffix('%'))
        .find_map(|number| number.parse::<f32>().ok())
        .filter(|p| (0.0..=100.0).contains(p))
}

/// File name from a per-file copy line such as `Copying sources/install.wim...`.
fn copied_file(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix("Copying ")?;
    let name = rest
        .split_whitespace()
        .next()?
        .trim_end_matches("...")
        .trim_end_matches(':');
    if name.is_empty() || name == "files" {
        return None;
    }
    Some(name.to_string())
}
