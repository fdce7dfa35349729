//! WoeUSB backend.
//!
//! Runs `woeusb` as a child process. stdout and stderr are drained on two
//! scoped threads so neither pipe can fill up and stall the tool; every line
//! is cleaned of terminal escapes, forwarded to observers and folded into the
//! shared [`WriterStatus`].

use std::io::{BufRead, BufReader, ErrorKind};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;

use tracing::{debug, info, instrument, warn};

use super::{WriterError, WriterPhase, WriterRequest, WriterStatus, WriterTool};
use crate::events::{LogLevel, ObserverSet};

/// Default program name, looked up on `PATH`.
pub const DEFAULT_PROGRAM: &str = "woeusb";

pub struct WoeUsb {
    program: String,
    status: Mutex<WriterStatus>,
}

impl Default for WoeUsb {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl WoeUsb {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            status: Mutex::new(WriterStatus::default()),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Command-line arguments for `request`.
    pub fn arguments(request: &WriterRequest) -> Vec<String> {
        let mut args = Vec::new();
        if request.device_mode {
            args.push("--device".to_string());
        }
        args.push("--target-filesystem".to_string());
        args.push(request.filesystem.to_string());
        args.push("--label".to_string());
        args.push(request.label.clone());
        if request.no_color {
            args.push("--no-color".to_string());
        }
        if request.skip_grub_workaround {
            args.push("--workaround-skip-grub".to_string());
        }
        args.push(request.image.display().to_string());
        args.push(request.target_device.clone());
        args
    }

    fn set_phase(&self, phase: WriterPhase) {
        if let Ok(mut status) = self.status.lock() {
            status.phase = phase;
            if phase != WriterPhase::CopyingFiles {
                status.copy = None;
            }
        }
    }
}

impl WriterTool for WoeUsb {
    #[instrument(skip(self, observers), fields(program = %self.program))]
    fn write(&self, request: &WriterRequest, observers: &ObserverSet) -> Result<(), WriterError> {
        let args = Self::arguments(request);
        info!("Running: {} {}", self.program, args.join(" "));
        self.set_phase(WriterPhase::Starting);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| {
                self.set_phase(WriterPhase::Failed);
                WriterError::Spawn {
                    program: self.program.clone(),
                    source,
                }
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let pumped = thread::scope(|s| {
            let out = stdout.map(|pipe| {
                s.spawn(|| pump_lines(BufReader::new(pipe), observers, &self.status))
            });
            let err = stderr.map(|pipe| {
                s.spawn(|| pump_lines(BufReader::new(pipe), observers, &self.status))
            });

            let mut result = Ok(());
            for handle in [out, err].into_iter().flatten() {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => result = Err(e),
                    Err(_) => warn!("Writer output reader panicked"),
                }
            }
            result
        });

        let exit = child.wait()?;
        if let Err(e) = pumped {
            self.set_phase(WriterPhase::Failed);
            return Err(WriterError::Output(e));
        }

        if exit.success() {
            info!("Writer finished successfully");
            self.set_phase(WriterPhase::Done);
            Ok(())
        } else {
            self.set_phase(WriterPhase::Failed);
            Err(WriterError::ExitStatus { code: exit.code() })
        }
    }

    fn status(&self) -> WriterStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

/// Forward every line from `reader` to the writer observers.
///
/// Both `\r` and `\n` end a line, and a line is emitted as soon as its
/// terminator has been read, so in-place progress updates arrive while the
/// tool is still running. Bytes that are not UTF-8 are replaced.
pub fn pump_lines<R: BufRead>(
    mut reader: R,
    observers: &ObserverSet,
    status: &Mutex<WriterStatus>,
) -> std::io::Result<()> {
    let mut pending = Vec::new();
    loop {
        let available = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            emit_line(&pending, observers, status);
            return Ok(());
        }

        let consumed = available.len();
        for &byte in available {
            if byte == b'\n' || byte == b'\r' {
                emit_line(&pending, observers, status);
                pending.clear();
            } else {
                pending.push(byte);
            }
        }
        reader.consume(consumed);
    }
}

fn emit_line(raw: &[u8], observers: &ObserverSet, status: &Mutex<WriterStatus>) {
    let line = strip_ansi(&String::from_utf8_lossy(raw));
    let line = line.trim_end();
    if line.is_empty() {
        return;
    }
    let level = line_level(line);
    debug!(?level, "{}", line);
    observers.notify_tool_output(level, line);

    if let Ok(mut current) = status.lock() {
        current.apply_line(line);
    }
}

fn line_level(line: &str) -> LogLevel {
    if line.contains("Error:") {
        LogLevel::Error
    } else {
        LogLevel::Info
    }
}

/// Remove CSI escape sequences (`ESC [ ... final-byte`).
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            // Parameters and intermediates run until a byte in '@'..='~'.
            for next in chars.by_ref() {
                if ('@'..='~').contains(&next) {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::WriterObserver;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[derive(Default)]
    struct Lines {
        lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl WriterObserver for Lines {
        fn on_tool_output(&self, level: LogLevel, line: &str) {
            self.lines.lock().unwrap().push((level, line.to_string()));
        }
    }

    fn observed() -> (Arc<Lines>, ObserverSet) {
        let lines = Arc::new(Lines::default());
        let mut set = ObserverSet::new();
        set.attach_writer(lines.clone());
        (lines, set)
    }

    #[test]
    fn test_arguments_match_cli_contract() {
        let request = WriterRequest::new(PathBuf::from("/home/u/iso/win.iso"), "/dev/sdc");
        assert_eq!(
            WoeUsb::arguments(&request),
            [
                "--device",
                "--target-filesystem",
                "NTFS",
                "--label",
                "Windows USB",
                "--no-color",
                "--workaround-skip-grub",
                "/home/u/iso/win.iso",
                "/dev/sdc",
            ]
        );
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1;32mDone :)\x1b[0m"), "Done :)");
        assert_eq!(strip_ansi("\x1b[Kplain"), "plain");
        assert_eq!(strip_ansi("no escapes"), "no escapes");
    }

    #[test]
    fn test_pump_routes_error_lines_and_updates_status() {
        let (lines, set) = observed();
        let status = Mutex::new(WriterStatus::with_phase(WriterPhase::Starting));
        let output = "Mounting source filesystem...\n\
                      Copying files from source media...\r 10%\r 55%\n\
                      \x1b[31mError: Target device is busy\x1b[0m\n\
                      \n";

        pump_lines(Cursor::new(output), &set, &status).unwrap();

        let lines = lines.lines.lock().unwrap();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], (LogLevel::Info, "Mounting source filesystem...".to_string()));
        assert_eq!(lines[2], (LogLevel::Info, " 10%".to_string()));
        assert_eq!(
            lines[4],
            (LogLevel::Error, "Error: Target device is busy".to_string())
        );

        let status = status.lock().unwrap();
        assert_eq!(status.phase, WriterPhase::CopyingFiles);
        assert_eq!(status.copy.as_ref().map(|c| c.percent), Some(55.0));
    }

    /// Hands out one chunk per read and records how many lines had been
    /// observed before each read.
    struct Chunked<'a> {
        chunks: std::vec::IntoIter<&'static [u8]>,
        lines: &'a Lines,
        seen: Vec<usize>,
    }

    impl std::io::Read for Chunked<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.seen.push(self.lines.lines.lock().unwrap().len());
            let Some(chunk) = self.chunks.next() else {
                return Ok(0);
            };
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_carriage_return_updates_arrive_before_newline() {
        let (lines, set) = observed();
        let status = Mutex::new(WriterStatus::default());
        let chunks: Vec<&'static [u8]> = vec![
            b"Copying files from source media...\n",
            b" 10%\r",
            b" 20%\r",
            b" 30%\r",
            b"done\n",
        ];
        let mut source = Chunked {
            chunks: chunks.into_iter(),
            lines: &lines,
            seen: Vec::new(),
        };

        pump_lines(BufReader::new(&mut source), &set, &status).unwrap();

        assert_eq!(source.seen, [0, 1, 2, 3, 4, 5]);
        assert_eq!(lines.lines.lock().unwrap()[3].1, " 30%");
        assert_eq!(status.lock().unwrap().phase, WriterPhase::Done);
    }

    #[test]
    fn test_unterminated_last_line_is_flushed() {
        let (lines, set) = observed();
        let status = Mutex::new(WriterStatus::default());
        pump_lines(Cursor::new("first\nlast"), &set, &status).unwrap();

        let lines = lines.lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].1, "last");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let (lines, set) = observed();
        let status = Mutex::new(WriterStatus::default());
        pump_lines(Cursor::new(&b"bad \xff byte\n"[..]), &set, &status).unwrap();
        assert_eq!(lines.lines.lock().unwrap()[0].1, "bad \u{fffd} byte");
    }

    #[test]
    fn test_zero_exit_is_success() {
        let writer = WoeUsb::new("true");
        let request = WriterRequest::new("/nonexistent.iso", "/dev/null");
        writer.write(&request, &ObserverSet::new()).unwrap();
        assert_eq!(writer.status().phase, WriterPhase::Done);
    }

    #[test]
    fn test_nonzero_exit_is_error() {
        let writer = WoeUsb::new("false");
        let request = WriterRequest::new("/nonexistent.iso", "/dev/null");
        let err = writer.write(&request, &ObserverSet::new()).unwrap_err();
        assert!(matches!(err, WriterError::ExitStatus { code: Some(1) }));
        assert_eq!(writer.status().phase, WriterPhase::Failed);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let writer = WoeUsb::new("/nonexistent/woeusb-for-tests");
        let request = WriterRequest::new("/nonexistent.iso", "/dev/null");
        let err = writer.write(&request, &ObserverSet::new()).unwrap_err();
        assert!(matches!(err, WriterError::Spawn { .. }));
    }
}
