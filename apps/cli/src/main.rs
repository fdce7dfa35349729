mod logging;
mod render;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use anyhow::{Result, anyhow};
use clap::Parser;
use cmos_core::{
    BlockDeviceCatalog, ChannelObserver, CmosSession, LsblkCatalog, PostProcessTask, SessionConfig,
};
use console::style;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "CMOS Windows USB builder", long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory under which devices are probe-mounted
    #[arg(long)]
    mount_root: Option<PathBuf>,

    /// Directory the ISO is gathered into
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// What to do after a successful run (shutdown, restart, none)
    #[arg(long)]
    post_process: Option<PostProcessTask>,

    /// Seconds the final status stays on screen
    #[arg(long)]
    grace_period: Option<u64>,

    /// Writer program to run instead of `woeusb`
    #[arg(long)]
    woeusb: Option<String>,

    /// Exit code to use when the run fails
    #[arg(long)]
    failure_exit_code: Option<i32>,

    /// List block devices and exit
    #[arg(long)]
    list: bool,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn session_config(&self) -> Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load_from_file(path)?,
            None => SessionConfig::default(),
        };
        if let Some(dir) = &self.mount_root {
            config.mount_root = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(task) = self.post_process {
            config.post_process = task;
        }
        if let Some(secs) = self.grace_period {
            config.grace_period_secs = secs;
        }
        if let Some(program) = &self.woeusb {
            config.writer.program = program.clone();
        }
        if let Some(code) = self.failure_exit_code {
            config.failure_exit_code = code;
        }
        Ok(config)
    }
}

fn list_devices() -> Result<()> {
    let devices = LsblkCatalog::new().list_devices()?;
    println!("{:<20} {:<10} {}", "NAME", "REMOVABLE", "MOUNTPOINT");
    for device in devices {
        let mountpoint = device
            .mountpoint
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!(
            "{:<20} {:<10} {}",
            style(&device.name).cyan(),
            if device.removable { "yes" } else { "no" },
            mountpoint
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

    let config = args.session_config()?;

    if let Some(path) = &args.save_config {
        config.save_to_file(path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }
    if args.list {
        return list_devices();
    }

    info!("Starting CMOS...");

    let (tx, rx) = mpsc::channel();
    let mut session = CmosSession::new(config);
    session.attach_all(Arc::new(ChannelObserver::new(tx)));

    // The session (and with it the channel sender) is dropped when the
    // worker finishes, which ends the render loop.
    let worker = thread::spawn(move || {
        let outcome = session.run();
        let code = outcome.exit_code(session.config());
        (outcome, code)
    });
    render::drain(rx);

    let (outcome, code) = worker
        .join()
        .map_err(|_| anyhow!("session thread panicked"))?;
    info!(success = outcome.is_success(), code, "CMOS finished");

    drop(log_guard);
    std::process::exit(code);
}
