//! Child-process ownership for a locally launched agent service.

use crate::error::{EvalError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};

pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(8);

/// Where and how to launch the service.
#[derive(Debug, Clone)]
pub struct ServerLaunch {
    pub exe: PathBuf,
    pub host: String,
    pub port: u16,
    pub secret: String,
}

impl ServerLaunch {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// `<exe> agent` with the bind address and secret injected. Child stdio is
    /// discarded.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("agent")
            .env("AGIME_HOST", &self.host)
            .env("AGIME_PORT", self.port.to_string())
            .env("AGIME_SERVER__SECRET_KEY", &self.secret)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if std::env::var_os("RUST_LOG").is_none() {
            cmd.env("RUST_LOG", "info");
        }
        if let Ok(cwd) = std::env::current_dir() {
            cmd.current_dir(cwd);
        }

        #[cfg(target_os = "windows")]
        {
            cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
        }
        cmd
    }
}

/// A running service process. Dropping it kills the child; call
/// [`ServerProcess::shutdown`] for a graceful stop.
pub struct ServerProcess {
    child: Child,
    label: String,
}

impl ServerProcess {
    pub fn spawn(launch: &ServerLaunch) -> Result<Self> {
        if !launch.exe.is_file() {
            return Err(EvalError::MissingExecutable {
                path: launch.exe.clone(),
            });
        }
        let process = Self::from_command(launch.command(), &launch.exe)?;
        info!(
            "Launched {} on {} (pid {:?})",
            launch.exe.display(),
            launch.base_url(),
            process.id()
        );
        Ok(process)
    }

    fn from_command(mut cmd: Command, exe: &Path) -> Result<Self> {
        let child = cmd.spawn()?;
        Ok(Self {
            child,
            label: exe.display().to_string(),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn request_stop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => return,
                Err(e) => warn!("SIGTERM to {} failed: {}", self.label, e),
            }
        }
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to stop {}: {}", self.label, e);
        }
    }

    /// Ask the child to stop, wait up to [`SHUTDOWN_GRACE`], then kill it.
    /// Never fails; problems are logged.
    pub async fn shutdown(self) {
        self.shutdown_with_grace(SHUTDOWN_GRACE).await
    }

    pub async fn shutdown_with_grace(mut self, grace: Duration) {
        if let Ok(Some(status)) = self.child.try_wait() {
            info!("{} already exited ({})", self.label, status);
            return;
        }

        self.request_stop();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => info!("{} stopped ({})", self.label, status),
            Ok(Err(e)) => warn!("Waiting for {} failed: {}", self.label, e),
            Err(_) => {
                warn!(
                    "{} still running after {}s, killing",
                    self.label,
                    grace.as_secs()
                );
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill {}: {}", self.label, e);
                }
            }
        }
    }
}
