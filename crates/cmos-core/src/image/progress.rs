//! Aggregate progress across all fragments of a reassembly job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::events::{ObserverSet, ProgressEvent};

/// Combines per-file byte counts into one percentage stream.
///
/// Observers are only notified when the rounded percentage changes, so a job
/// with thousands of chunks produces at most 101 progress events.
pub struct ProgressAggregator<'a> {
    total_bytes: u64,
    per_file: HashMap<PathBuf, u64>,
    copied: u64,
    last_percent: Option<u8>,
    observers: &'a ObserverSet,
}

impl<'a> ProgressAggregator<'a> {
    pub fn new(total_bytes: u64, observers: &'a ObserverSet) -> Self {
        Self {
            total_bytes,
            per_file: HashMap::new(),
            copied: 0,
            last_percent: None,
            observers,
        }
    }

    /// Bytes copied so far across all files.
    pub fn copied_bytes(&self) -> u64 {
        self.copied
    }

    pub fn last_percent(&self) -> Option<u8> {
        self.last_percent
    }

    fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let total = self.total_bytes as u128;
        let rounded = (self.copied as u128 * 100 + total / 2) / total;
        rounded.min(100) as u8
    }

    /// Record that `file` has `cumulative_bytes` copied in total.
    ///
    /// Returns the percentage if it was broadcast.
    pub fn report_progress(&mut self, file: &Path, cumulative_bytes: u64) -> Option<u8> {
        let previous = self
            .per_file
            .insert(file.to_path_buf(), cumulative_bytes)
            .unwrap_or(0);
        self.copied = self.copied - previous + cumulative_bytes;

        let percent = self.percent();
        if self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);
        self.observers.notify_progress(&ProgressEvent {
            file: file.to_path_buf(),
            copied_bytes: self.copied,
            total_bytes: self.total_bytes,
            percent,
        });
        Some(percent)
    }

    /// Signal that the whole job, not just one file, is done.
    pub fn notify_completion(&self) {
        self.observers.notify_complete();
    }
}
