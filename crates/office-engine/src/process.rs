//! Engine child-process handling.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::OfficeConfig;
use crate::error::OfficeError;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Create a `tokio::process::Command` that will not pop up a console
/// window on Windows. No-op elsewhere.
pub fn engine_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    #[allow(unused_mut)]
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.as_std_mut().creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// A running engine child process bound to a private profile directory.
///
/// Owned by exactly one session; killing and profile cleanup happen here,
/// graceful shutdown is negotiated over the control link by the owner.
#[derive(Debug)]
pub struct OfficeProcess {
    ordinal: u32,
    child: tokio::process::Child,
    profile_dir: PathBuf,
}

impl OfficeProcess {
    /// Spawn the engine executable for `ordinal` with a fresh profile
    /// directory. The process is not yet reachable when this returns; the
    /// caller polls the control endpoint until it is.
    pub async fn spawn(ordinal: u32, config: &OfficeConfig) -> Result<Self, OfficeError> {
        let profile_dir = config.profile_dir_for(ordinal);
        recreate_dir(&profile_dir).await.map_err(|e| OfficeError::Start {
            ordinal,
            reason: format!("profile dir `{}`: {e}", profile_dir.display()),
        })?;

        let args = config.launch_args_for(ordinal);
        debug!(ordinal, binary = %config.binary.display(), ?args, "spawning engine process");

        let child = engine_command(&config.binary)
            .args(&args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OfficeError::Start {
                ordinal,
                reason: format!("spawn `{}`: {e}", config.binary.display()),
            })?;

        Ok(Self {
            ordinal,
            child,
            profile_dir,
        })
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// True if the process has exited.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)) | Err(_))
    }

    /// Wait up to `grace` for the process to exit on its own, then kill it.
    /// The profile directory is removed either way.
    pub async fn reap(mut self, grace: std::time::Duration) {
        let exited = tokio::time::timeout(grace, self.child.wait()).await.is_ok();
        if !exited {
            warn!(ordinal = self.ordinal, "engine process ignored quit, killing");
            if let Err(e) = self.child.kill().await {
                warn!(ordinal = self.ordinal, error = %e, "kill failed");
            }
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.profile_dir).await {
            debug!(
                ordinal = self.ordinal,
                error = %e,
                "could not remove profile dir"
            );
        }
    }

    /// Kill immediately and clean up. Used when the instance is already
    /// considered dead and there is no point in a graceful quit.
    pub async fn kill(mut self) {
        let _ = self.child.kill().await;
        let _ = tokio::fs::remove_dir_all(&self.profile_dir).await;
    }
}

async fn recreate_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}
