//! Event system for UI decoupling.
//!
//! The core never renders anything. Front-ends attach observers to an
//! [`ObserverSet`] and receive status changes, reassembly progress and writer
//! tool output. Notifications arrive on the pipeline thread (or on one of the
//! writer's output reader threads), so observers must be `Send + Sync` and do
//! their own marshaling onto a render thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Sender;

use crate::state::RunState;
use crate::writer::WriterStatus;

/// Log level for writer tool output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

/// Current pipeline phase for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub state: RunState,
    pub status: String,
    pub description: String,
}

impl StatusMessage {
    pub fn new(state: RunState, status: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            state,
            status: status.into(),
            description: description.into(),
        }
    }

    /// The stock message for entering `state`.
    pub fn for_state(state: RunState) -> Self {
        let (status, description) = state.label();
        Self::new(state, status, description)
    }
}

/// Aggregate progress of the fragment concatenation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Fragment that was being copied when the percentage changed.
    pub file: PathBuf,
    /// Bytes copied so far across all fragments.
    pub copied_bytes: u64,
    pub total_bytes: u64,
    pub percent: u8,
}

/// Receives a [`StatusMessage`] on every phase transition.
pub trait StatusObserver: Send + Sync {
    fn on_status(&self, message: &StatusMessage);
}

/// Receives reassembly progress and the end-of-job signal.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);

    /// Called once when every fragment has been concatenated.
    fn on_complete(&self);
}

/// Receives output and polled state of the external writer tool.
///
/// `on_tool_output` may be called from two threads at once.
pub trait WriterObserver: Send + Sync {
    fn on_tool_output(&self, _level: LogLevel, _line: &str) {}

    fn on_tool_status(&self, _status: &WriterStatus) {}
}

/// Fan-out registry for all observer kinds. Empty sets are fine.
#[derive(Clone, Default)]
pub struct ObserverSet {
    status: Vec<Arc<dyn StatusObserver>>,
    progress: Vec<Arc<dyn ProgressObserver>>,
    writer: Vec<Arc<dyn WriterObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// An observer set with a single observer attached to every kind.
    pub fn with_all<O>(observer: Arc<O>) -> Self
    where
        O: StatusObserver + ProgressObserver + WriterObserver + 'static,
    {
        let mut set = Self::new();
        set.attach_all(observer);
        set
    }

    pub fn attach_status(&mut self, observer: Arc<dyn StatusObserver>) {
        self.status.push(observer);
    }

    pub fn attach_progress(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.progress.push(observer);
    }

    pub fn attach_writer(&mut self, observer: Arc<dyn WriterObserver>) {
        self.writer.push(observer);
    }

    pub fn attach_all<O>(&mut self, observer: Arc<O>)
    where
        O: StatusObserver + ProgressObserver + WriterObserver + 'static,
    {
        self.status.push(observer.clone());
        self.progress.push(observer.clone());
        self.writer.push(observer);
    }

    pub fn notify_status(&self, message: &StatusMessage) {
        for observer in &self.status {
            observer.on_status(message);
        }
    }

    pub fn notify_progress(&self, event: &ProgressEvent) {
        for observer in &self.progress {
            observer.on_progress(event);
        }
    }

    pub fn notify_complete(&self) {
        for observer in &self.progress {
            observer.on_complete();
        }
    }

    pub fn notify_tool_output(&self, level: LogLevel, line: &str) {
        for observer in &self.writer {
            observer.on_tool_output(level, line);
        }
    }

    pub fn notify_tool_status(&self, status: &WriterStatus) {
        for observer in &self.writer {
            observer.on_tool_status(status);
        }
    }
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl StatusObserver for NullObserver {
    fn on_status(&self, _message: &StatusMessage) {}
}

impl ProgressObserver for NullObserver {
    fn on_progress(&self, _event: &ProgressEvent) {}

    fn on_complete(&self) {}
}

impl WriterObserver for NullObserver {}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl StatusObserver for TracingObserver {
    fn on_status(&self, message: &StatusMessage) {
        tracing::info!(
            state = %message.state,
            description = %message.description,
            "Status: {}",
            message.status
        );
    }
}

impl ProgressObserver for TracingObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        tracing::debug!(
            file = %event.file.display(),
            copied = event.copied_bytes,
            total = event.total_bytes,
            "Total copy progress: {}%",
            event.percent
        );
    }

    fn on_complete(&self) {
        tracing::info!("Fragment concatenation complete");
    }
}

impl WriterObserver for TracingObserver {
    fn on_tool_output(&self, level: LogLevel, line: &str) {
        match level {
            LogLevel::Info => tracing::info!(target: "cmos::writer", "{}", line),
            LogLevel::Error => tracing::error!(target: "cmos::writer", "{}", line),
        }
    }

    fn on_tool_status(&self, status: &WriterStatus) {
        match &status.copy {
            Some(copy) => tracing::debug!(
                phase = %status.phase,
                file = copy.file.as_deref().unwrap_or("-"),
                percent = copy.percent,
                "Writer progress"
            ),
            None => tracing::debug!(phase = %status.phase, "Writer phase"),
        }
    }
}

/// Everything an observer can be told, as one value.
#[derive(Debug, Clone, PartialEq)]
pub enum CmosEvent {
    Status(StatusMessage),
    Progress(ProgressEvent),
    GatherComplete,
    ToolOutput { level: LogLevel, line: String },
    ToolStatus(WriterStatus),
}

/// Forwards events through a channel so another thread can render them.
pub struct ChannelObserver {
    sender: Sender<CmosEvent>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<CmosEvent>) -> Self {
        Self { sender }
    }

    fn send(&self, event: CmosEvent) {
        // A dropped receiver means nobody is watching any more.
        let _ = self.sender.send(event);
    }
}

impl StatusObserver for ChannelObserver {
    fn on_status(&self, message: &StatusMessage) {
        self.send(CmosEvent::Status(message.clone()));
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        self.send(CmosEvent::Progress(event.clone()));
    }

    fn on_complete(&self) {
        self.send(CmosEvent::GatherComplete);
    }
}

impl WriterObserver for ChannelObserver {
    fn on_tool_output(&self, level: LogLevel, line: &str) {
        self.send(CmosEvent::ToolOutput {
            level,
            line: line.to_string(),
        });
    }

    fn on_tool_status(&self, status: &WriterStatus) {
        self.send(CmosEvent::ToolStatus(status.clone()));
    }
}
