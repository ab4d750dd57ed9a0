//! Process tree termination
//!
//! Agent CLIs fork helpers (language servers, MCP servers, shells), so killing
//! the direct child is not enough. Subprocess lanes spawn the child as the
//! leader of its own process group and hand its PID to a [`ProcessTreeKiller`].

use async_trait::async_trait;
use tracing::debug;
#[cfg(unix)]
use tracing::warn;

use crate::error::{Result, RunnerError};

/// Capability to terminate a process and all of its descendants
#[async_trait]
pub trait ProcessTreeKiller: Send + Sync {
    async fn kill_tree(&self, pid: u32) -> Result<()>;
}

/// Kills process trees through the platform's own primitives
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTreeKiller;

#[async_trait]
impl ProcessTreeKiller for SystemProcessTreeKiller {
    /// Signals the whole process group in-process, so it works without any
    /// helper binary on PATH.
    #[cfg(unix)]
    async fn kill_tree(&self, pid: u32) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, killpg, Signal};
        use nix::unistd::Pid;

        debug!("Killing process tree rooted at {}", pid);

        // 0 and negative values address our own group or every process.
        let raw = i32::try_from(pid)
            .ok()
            .filter(|raw| *raw > 0)
            .ok_or_else(|| RunnerError::KillFailed {
                pid,
                message: "not a valid process id".to_string(),
            })?;
        let target = Pid::from_raw(raw);

        match killpg(target, Signal::SIGKILL) {
            Ok(()) => return Ok(()),
            Err(Errno::ESRCH) => debug!("No process group {}, signalling the process", pid),
            Err(e) => warn!("Failed to signal process group {}: {}", pid, e),
        }

        kill(target, Signal::SIGKILL).map_err(|e| RunnerError::KillFailed {
            pid,
            message: e.to_string(),
        })
    }

    #[cfg(windows)]
    async fn kill_tree(&self, pid: u32) -> Result<()> {
        use std::process::Stdio;
        use tokio::process::Command;

        debug!("Killing process tree rooted at {}", pid);

        let status = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| RunnerError::KillFailed {
                pid,
                message: format!("taskkill unavailable: {}", e),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(RunnerError::KillFailed {
                pid,
                message: "taskkill reported failure".to_string(),
            })
        }
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::testing::wait_for_exit;
    use super::*;
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::process::Command;

    #[tokio::test]
    async fn test_kills_process_group() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30 & sleep 30; wait"])
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        SystemProcessTreeKiller.kill_tree(pid).await.unwrap();

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("child should exit after tree kill")
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_kills_background_helpers_without_path() {
        let mut child = Command::new("/bin/sh")
            .args(["-c", "/bin/sleep 30 & echo $!; /bin/sleep 30; wait"])
            .env_clear()
            .env("PATH", "/nonexistent")
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        let stdout = child.stdout.take().unwrap();
        let mut line = String::new();
        BufReader::new(stdout).read_line(&mut line).await.unwrap();
        let helper: u32 = line.trim().parse().unwrap();

        SystemProcessTreeKiller.kill_tree(pid).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("child should exit after tree kill")
            .unwrap();
        assert!(wait_for_exit(helper, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_missing_process_is_an_error() {
        // Above the Linux pid_max ceiling of 2^22.
        let result = SystemProcessTreeKiller.kill_tree(99_999_999).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_refuses_pid_zero() {
        let result = SystemProcessTreeKiller.kill_tree(0).await;
        assert!(matches!(result, Err(RunnerError::KillFailed { pid: 0, .. })));
    }
}
