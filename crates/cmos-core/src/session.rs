//! CMOS session - high-level orchestrator for one USB build.
//!
//! A run walks the fixed phase order Discover, Extract, Verify,
//! ResolveTarget, Write and PostProcess. Observers hear about every phase
//! before it starts. Any error ends the run in [`RunState::Failed`]; the
//! failure is shown for a grace period and the caller exits with the
//! configured (by default non-error) exit code.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::discovery::DiscoveryEngine;
use crate::events::{
    ObserverSet, ProgressObserver, StatusMessage, StatusObserver, TracingObserver, WriterObserver,
};
use crate::fingerprint::{ContentSignature, default_signatures};
use crate::image::reassembly::{DEFAULT_CHUNK_SIZE, DEFAULT_IMAGE_NAME};
use crate::image::{ReassemblyPipeline, verify_single_image};
use crate::platform::{
    BlockDeviceCatalog, LsblkCatalog, MountManager, SystemMounter, expand_home, home_dir,
};
use crate::post_process::{PostProcessTask, PowerControl, SystemPower, execute_post_process};
use crate::state::{RunState, RunStateMachine};
use crate::target::resolve_top_level_device;
use crate::writer::woeusb::DEFAULT_PROGRAM;
use crate::writer::{TargetFilesystem, WoeUsb, WriterRequest, WriterStatus, WriterTool};

/// Settings for the external writer tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterSettings {
    /// Program to run, looked up on `PATH` unless absolute.
    pub program: String,
    pub filesystem: TargetFilesystem,
    pub label: String,
    pub skip_grub_workaround: bool,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            filesystem: TargetFilesystem::default(),
            label: WriterRequest::DEFAULT_LABEL.to_string(),
            skip_grub_workaround: true,
        }
    }
}

/// Configuration for a CMOS session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory under which probe mounts are created.
    pub mount_root: PathBuf,
    /// Where images are gathered and reassembled.
    pub output_dir: PathBuf,
    /// File name of the image built from fragments.
    pub image_name: String,
    pub chunk_size_bytes: usize,
    /// How long the final status stays on screen.
    pub grace_period_secs: u64,
    pub post_process: PostProcessTask,
    pub writer_poll_interval_ms: u64,
    /// Exit code used when a run fails.
    pub failure_exit_code: i32,
    pub writer: WriterSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let home = home_dir();
        Self {
            mount_root: home.join("mnt"),
            output_dir: home.join("iso"),
            image_name: DEFAULT_IMAGE_NAME.to_string(),
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            grace_period_secs: 30,
            post_process: PostProcessTask::None,
            writer_poll_interval_ms: 1000,
            failure_exit_code: 0,
            writer: WriterSettings::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: SessionConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn writer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.writer_poll_interval_ms.max(1))
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed {
        /// Phase that was running when the error happened.
        failed_step: Option<RunState>,
        error: String,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self, config: &SessionConfig) -> i32 {
        match self {
            RunOutcome::Succeeded => 0,
            RunOutcome::Failed { .. } => config.failure_exit_code,
        }
    }
}

/// CMOS session - orchestrates discovery, reassembly and writing.
pub struct CmosSession<C, M, W, P> {
    config: SessionConfig,
    catalog: C,
    mounter: M,
    writer: W,
    power: P,
    signatures: Vec<ContentSignature>,
    observers: ObserverSet,
}

impl CmosSession<LsblkCatalog, SystemMounter, WoeUsb, SystemPower> {
    /// Create a session backed by lsblk, mount(8), WoeUSB and the system power commands.
    pub fn new(config: SessionConfig) -> Self {
        let writer = WoeUsb::new(config.writer.program.clone());
        Self::with_parts(config, LsblkCatalog::new(), SystemMounter::new(), writer, SystemPower)
    }
}

impl<C, M, W, P> CmosSession<C, M, W, P>
where
    C: BlockDeviceCatalog,
    M: MountManager,
    W: WriterTool,
    P: PowerControl,
{
    /// Create a session with custom backends. A [`TracingObserver`] is attached.
    pub fn with_parts(config: SessionConfig, catalog: C, mounter: M, writer: W, power: P) -> Self {
        Self {
            config,
            catalog,
            mounter,
            writer,
            power,
            signatures: default_signatures(),
            observers: ObserverSet::with_all(Arc::new(TracingObserver)),
        }
    }

    /// Replace the content signatures used to recognize the CMOS device.
    pub fn with_signatures(mut self, signatures: Vec<ContentSignature>) -> Self {
        self.signatures = signatures;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn power(&self) -> &P {
        &self.power
    }

    pub fn attach_status(&mut self, observer: Arc<dyn StatusObserver>) {
        self.observers.attach_status(observer);
    }

    pub fn attach_progress(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observers.attach_progress(observer);
    }

    pub fn attach_writer(&mut self, observer: Arc<dyn WriterObserver>) {
        self.observers.attach_writer(observer);
    }

    pub fn attach_all<O>(&mut self, observer: Arc<O>)
    where
        O: StatusObserver + ProgressObserver + WriterObserver + 'static,
    {
        self.observers.attach_all(observer);
    }

    /// Run the complete session. Always ends in a terminal state.
    #[instrument(skip(self))]
    pub fn run(&self) -> RunOutcome {
        let mut machine = RunStateMachine::new();
        self.observers
            .notify_status(&StatusMessage::for_state(RunState::NotStarted));

        if let Err(e) = self.run_phases(&mut machine) {
            return self.fail(&mut machine, e);
        }

        if let Err(e) = self.enter(&mut machine, RunState::PostProcessing) {
            return self.fail(&mut machine, e);
        }
        info!("CMOS has completed successfully");
        self.dwell();
        execute_post_process(self.config.post_process, &self.power);

        if let Err(e) = self.enter(&mut machine, RunState::Succeeded) {
            return self.fail(&mut machine, e);
        }
        RunOutcome::Succeeded
    }

    fn run_phases(&self, machine: &mut RunStateMachine) -> Result<()> {
        self.enter(machine, RunState::Discovering)?;
        ensure_supported_host()?;
        let source = DiscoveryEngine::new(&self.catalog, &self.mounter, &self.signatures)
            .discover_source_device(&self.config.mount_root)
            .context("Could not find the CMOS USB")?;
        info!(device = %source.device.name, "Found CMOS USB");

        self.enter(machine, RunState::Extracting)?;
        let output_dir = expand_home(&self.config.output_dir);
        ReassemblyPipeline::new(&self.mounter, &self.observers)
            .with_image_name(self.config.image_name.clone())
            .with_chunk_size(self.config.chunk_size_bytes)
            .reassemble(&source.mount, &output_dir)
            .context("Could not gather the ISO file(s)")?;

        self.enter(machine, RunState::Verifying)?;
        let image = verify_single_image(&output_dir)?;

        self.enter(machine, RunState::ResolvingTarget)?;
        let target = resolve_top_level_device(&self.catalog, &source.device.name)
            .context("Could not determine the top-level device")?;

        self.enter(machine, RunState::Writing)?;
        self.write_image(&image, &target)
    }

    fn enter(&self, machine: &mut RunStateMachine, state: RunState) -> Result<()> {
        machine.advance(state)?;
        self.observers.notify_status(&StatusMessage::for_state(state));
        Ok(())
    }

    /// Run the writer while a scoped poller reports its status changes.
    fn write_image(&self, image: &Path, target: &str) -> Result<()> {
        let settings = &self.config.writer;
        let request = WriterRequest {
            filesystem: settings.filesystem,
            label: settings.label.clone(),
            skip_grub_workaround: settings.skip_grub_workaround,
            ..WriterRequest::new(image, target)
        };

        let done = AtomicBool::new(false);
        let result = thread::scope(|s| {
            let poller = s.spawn(|| self.poll_writer(&done));
            let result = self.writer.write(&request, &self.observers);
            done.store(true, Ordering::Release);
            poller.thread().unpark();
            result
        });

        result.with_context(|| format!("Writing {} to {} failed", image.display(), target))
    }

    fn poll_writer(&self, done: &AtomicBool) {
        let interval = self.config.writer_poll_interval();
        let mut last: Option<WriterStatus> = None;
        loop {
            let finished = done.load(Ordering::Acquire);
            let status = self.writer.status();
            if last.as_ref() != Some(&status) {
                self.observers.notify_tool_status(&status);
                last = Some(status);
            }
            if finished {
                return;
            }
            thread::park_timeout(interval);
        }
    }

    fn fail(&self, machine: &mut RunStateMachine, err: anyhow::Error) -> RunOutcome {
        let failed_step = Some(machine.state()).filter(|s| !s.is_terminal());
        if let Err(e) = machine.fail() {
            error!(error = %e, "Could not enter the failed state");
        }

        let error = format!("{err:#}");
        error!(step = ?failed_step, "{}", error);

        let (status, _) = RunState::Failed.label();
        let step = failed_step.map_or("Unknown step", |s| s.label().0);
        self.observers.notify_status(&StatusMessage::new(
            RunState::Failed,
            status,
            format!("{step} failed: {error}"),
        ));
        self.dwell();

        RunOutcome::Failed { failed_step, error }
    }

    fn dwell(&self) {
        let grace = self.config.grace_period();
        if !grace.is_zero() {
            info!("Waiting {} seconds before finishing", grace.as_secs());
            thread::sleep(grace);
        }
    }
}

fn ensure_supported_host() -> Result<()> {
    if cfg!(target_os = "linux") {
        Ok(())
    } else {
        bail!(
            "CMOS needs Linux block device tools; this host is {}",
            std::env::consts::OS
        )
    }
}
