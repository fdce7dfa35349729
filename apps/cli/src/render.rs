//! Terminal rendering of session events.
//!
//! The session runs on a worker thread and reports through a
//! [`ChannelObserver`](cmos_core::ChannelObserver); everything here runs on
//! the main thread.

use std::sync::mpsc::Receiver;

use cmos_core::{CmosEvent, LogLevel, ProgressEvent, RunState, StatusMessage, WriterStatus};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

fn bar_style(color: &str) -> ProgressStyle {
    let template = format!(
        "{{prefix:12}} [{{elapsed_precise}}] [{{bar:40.{color}/black}}] {{pos:>3}}% {{msg}}"
    );
    ProgressStyle::default_bar()
        .template(&template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("■ ")
}

#[derive(Default)]
struct Renderer {
    gather: Option<ProgressBar>,
    write: Option<ProgressBar>,
}

impl Renderer {
    fn handle(&mut self, event: CmosEvent) {
        match event {
            CmosEvent::Status(message) => self.on_status(&message),
            CmosEvent::Progress(event) => self.on_progress(&event),
            CmosEvent::GatherComplete => {
                if let Some(bar) = self.gather.take() {
                    bar.finish_with_message("Concatenation complete.");
                }
            }
            CmosEvent::ToolOutput { level, line } => {
                let line = match level {
                    LogLevel::Info => style(line).dim(),
                    LogLevel::Error => style(line).red(),
                };
                self.print(&line.to_string());
            }
            CmosEvent::ToolStatus(status) => self.on_tool_status(&status),
        }
    }

    fn on_status(&mut self, message: &StatusMessage) {
        if let Some(bar) = self.gather.take() {
            bar.finish_and_clear();
        }
        if let Some(bar) = self.write.take() {
            bar.finish_and_clear();
        }

        let headline = match message.state {
            RunState::Failed => style(&message.status).red().bold(),
            RunState::PostProcessing | RunState::Succeeded => style(&message.status).green().bold(),
            _ => style(&message.status).cyan().bold(),
        };
        println!("{headline}");
        if !message.description.is_empty() && message.description != "N/A" {
            println!("  {}", style(&message.description).dim());
        }
    }

    fn on_progress(&mut self, event: &ProgressEvent) {
        let bar = self.gather.get_or_insert_with(|| {
            let bar = ProgressBar::new(100);
            bar.set_style(bar_style("green"));
            bar.set_prefix("Concatenate");
            bar
        });
        bar.set_position(u64::from(event.percent));
        if let Some(name) = event.file.file_name() {
            bar.set_message(name.to_string_lossy().into_owned());
        }
    }

    fn on_tool_status(&mut self, status: &WriterStatus) {
        let bar = self.write.get_or_insert_with(|| {
            let bar = ProgressBar::new(100);
            bar.set_style(bar_style("magenta"));
            bar.set_prefix("WoeUSB");
            bar
        });
        match &status.copy {
            Some(copy) => {
                bar.set_position(copy.percent.clamp(0.0, 100.0) as u64);
                let file = copy.file.as_deref().unwrap_or("");
                bar.set_message(format!("{} {}", status.phase, file));
            }
            None => bar.set_message(status.phase.to_string()),
        }
    }

    fn print(&self, line: &str) {
        match self.write.as_ref().or(self.gather.as_ref()) {
            Some(bar) => bar.println(line),
            None => println!("{line}"),
        }
    }

    fn finish(self) {
        for bar in [self.gather, self.write].into_iter().flatten() {
            bar.finish_and_clear();
        }
    }
}

/// Render events until every sender is gone.
pub fn drain(events: Receiver<CmosEvent>) {
    let mut renderer = Renderer::default();
    for event in events {
        renderer.handle(event);
    }
    renderer.finish();
}
