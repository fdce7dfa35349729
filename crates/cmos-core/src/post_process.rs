//! What to do with the machine after a successful run.

use std::fmt;
use std::io;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostProcessTask {
    Shutdown,
    Restart,
    #[default]
    None,
}

impl fmt::Display for PostProcessTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PostProcessTask::Shutdown => "shutdown",
            PostProcessTask::Restart => "restart",
            PostProcessTask::None => "none",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for PostProcessTask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shutdown" => Ok(PostProcessTask::Shutdown),
            "restart" | "reboot" => Ok(PostProcessTask::Restart),
            "none" => Ok(PostProcessTask::None),
            other => Err(format!("unknown post-process task `{other}`")),
        }
    }
}

/// Host power operations.
pub trait PowerControl: Send + Sync {
    fn shutdown(&self) -> io::Result<()>;
    fn restart(&self) -> io::Result<()>;
}

/// Calls the system `shutdown` and `reboot` commands.
pub struct SystemPower;

impl SystemPower {
    fn run(program: &str, args: &[&str]) -> io::Result<()> {
        let status = Command::new(program).args(args).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("`{program}` exited with {status}")))
        }
    }
}

impl PowerControl for SystemPower {
    fn shutdown(&self) -> io::Result<()> {
        Self::run("shutdown", &["-h", "now"])
    }

    fn restart(&self) -> io::Result<()> {
        Self::run("reboot", &[])
    }
}

/// Carry out `task`. Failures are logged and otherwise ignored.
pub fn execute_post_process<P: PowerControl + ?Sized>(task: PostProcessTask, power: &P) {
    let result = match task {
        PostProcessTask::Shutdown => {
            info!("Shutting down");
            power.shutdown()
        }
        PostProcessTask::Restart => {
            info!("Restarting");
            power.restart()
        }
        PostProcessTask::None => return,
    };
    if let Err(e) = result {
        error!(%task, error = %e, "Post-process task failed");
    }
}
