//! Scripted writer for testing.

use std::sync::Mutex;
use std::time::Duration;

use super::{WriterError, WriterPhase, WriterRequest, WriterStatus, WriterTool};
use crate::events::{LogLevel, ObserverSet};

/// Replays a fixed list of output lines instead of running a tool.
#[derive(Default)]
pub struct MockWriter {
    script: Vec<String>,
    line_delay: Duration,
    exit_code: Option<i32>,
    status: Mutex<WriterStatus>,
    requests: Mutex<Vec<WriterRequest>>,
}

impl MockWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines to emit, in order, as if printed by the tool.
    pub fn with_script<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Pause after each line so a status poller can observe it.
    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }

    /// Finish with this non-zero exit code.
    pub fn failing_with(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<WriterRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl WriterTool for MockWriter {
    fn write(&self, request: &WriterRequest, observers: &ObserverSet) -> Result<(), WriterError> {
        self.requests.lock().unwrap().push(request.clone());
        *self.status.lock().unwrap() = WriterStatus::with_phase(WriterPhase::Starting);

        for line in &self.script {
            let level = if line.contains("Error:") {
                LogLevel::Error
            } else {
                LogLevel::Info
            };
            observers.notify_tool_output(level, line);
            self.status.lock().unwrap().apply_line(line);
            if !self.line_delay.is_zero() {
                std::thread::sleep(self.line_delay);
            }
        }

        let mut status = self.status.lock().unwrap();
        match self.exit_code {
            Some(code) => {
                status.phase = WriterPhase::Failed;
                Err(WriterError::ExitStatus { code: Some(code) })
            }
            None => {
                status.phase = WriterPhase::Done;
                Ok(())
            }
        }
    }

    fn status(&self) -> WriterStatus {
        self.status.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_writer_replays_script() {
        let writer = MockWriter::new().with_script(["Copying files from source media...", "Done :)"]);
        let request = WriterRequest::new("/tmp/a.iso", "/dev/sdc");

        writer.write(&request, &ObserverSet::new()).unwrap();
        assert_eq!(writer.status().phase, WriterPhase::Done);
        assert_eq!(writer.requests(), vec![request]);
    }

    #[test]
    fn test_mock_writer_failure() {
        let writer = MockWriter::new().failing_with(2);
        let request = WriterRequest::new("/tmp/a.iso", "/dev/sdc");

        let err = writer.write(&request, &ObserverSet::new()).unwrap_err();
        assert!(matches!(err, WriterError::ExitStatus { code: Some(2) }));
        assert_eq!(writer.status().phase, WriterPhase::Failed);
    }
}
