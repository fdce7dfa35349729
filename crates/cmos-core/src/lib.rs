//! CMOS-Core: builds a bootable Windows USB from a CMOS stick.
//!
//! The CMOS stick carries a Windows image, either whole or split into
//! `.partN` fragments. This crate finds the stick among the attached block
//! devices by the files in its root directory, gathers and reassembles the
//! image into a local directory, and hands it to an external writer tool
//! that produces the Windows USB.
//!
//! # Architecture
//!
//! - **Platform**: block device catalog and mount abstraction (lsblk/mount, mock)
//! - **Fingerprint**: root-directory signatures that identify the CMOS stick
//! - **Discovery**: probe-mount every device until one matches
//! - **Image**: fragment ordering, reassembly with aggregated progress, verification
//! - **Target**: resolve the whole-disk device to write to
//! - **Writer**: external writer tool abstraction (WoeUSB, mock)
//! - **State**: run state machine
//! - **Events**: observer pattern for UI decoupling
//! - **Session**: high-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use cmos_core::session::{CmosSession, SessionConfig};
//!
//! let config = SessionConfig {
//!     grace_period_secs: 5,
//!     ..Default::default()
//! };
//!
//! let session = CmosSession::new(config);
//! let outcome = session.run();
//! std::process::exit(outcome.exit_code(session.config()));
//! ```

pub mod discovery;
pub mod events;
pub mod fingerprint;
pub mod image;
pub mod platform;
pub mod post_process;
pub mod session;
pub mod state;
pub mod target;
pub mod writer;

// Re-exports for convenience
pub use discovery::{DiscoveryEngine, DiscoveryError, SourceDevice};
pub use events::{
    ChannelObserver, CmosEvent, LogLevel, NullObserver, ObserverSet, ProgressEvent,
    ProgressObserver, StatusMessage, StatusObserver, TracingObserver, WriterObserver,
};
pub use fingerprint::{ContentSignature, default_signatures};
pub use image::{ImageError, ProgressAggregator, ReassemblyPipeline, verify_single_image};
pub use platform::{
    BlockDevice, BlockDeviceCatalog, LsblkCatalog, MockPlatform, MountManager, MountPoint,
    PlatformError, SystemMounter,
};
pub use post_process::{PostProcessTask, PowerControl, SystemPower};
pub use session::{CmosSession, RunOutcome, SessionConfig, WriterSettings};
pub use state::{RunState, RunStateMachine, StateError};
pub use target::resolve_top_level_device;
pub use writer::{
    MockWriter, TargetFilesystem, WoeUsb, WriterError, WriterPhase, WriterRequest, WriterStatus,
    WriterTool,
};
