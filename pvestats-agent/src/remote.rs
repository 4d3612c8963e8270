//! Remote command execution for in-guest metrics
//!
//! The Proxmox API cannot see how full a VM's own filesystem is, so for VMs
//! with a configured SSH target the agent runs `df -h /` inside the guest
//! through the system `ssh` client (key-based, non-interactive).

use crate::config::SshTarget;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Read-only disk usage of the root filesystem
pub const DF_COMMAND: &str = "df -h /";

#[async_trait]
pub trait RemoteShell {
    /// Runs `command` on `target`, returning its stdout
    async fn run(&self, target: &SshTarget, command: &str) -> Result<String>;
}

/// `ssh` binary executor
#[derive(Debug, Clone, Default)]
pub struct SshCommand;

#[async_trait]
impl RemoteShell for SshCommand {
    async fn run(&self, target: &SshTarget, command: &str) -> Result<String> {
        let start_time = Instant::now();
        debug!("Executing remote command on {}: {}", target, command);

        let output = AsyncCommand::new("ssh")
            .arg("-i")
            .arg(&target.key_path)
            .args(["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=accept-new"])
            .arg(format!("{}@{}", target.username, target.host))
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AgentError::RemoteShell {
                target: target.to_string(),
                message: format!("failed to spawn ssh: {e}"),
            })?;

        debug!(
            "Remote command on {} finished in {}ms",
            target,
            start_time.elapsed().as_millis()
        );

        if !output.status.success() {
            return Err(AgentError::RemoteShell {
                target: target.to_string(),
                message: format!(
                    "exit status {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Used percentage from `df` output: fifth column of the second line, `%` stripped
pub fn parse_df_used_percent(output: &str) -> Result<f64> {
    output
        .lines()
        .nth(1)
        .and_then(|line| line.split_whitespace().nth(4))
        .map(|field| field.trim_end_matches('%'))
        .and_then(|field| field.parse::<f64>().ok())
        .ok_or_else(|| AgentError::RemoteOutput(output.to_string()))
}

/// Runs `df` on `target` and parses the root filesystem usage
pub async fn remote_disk_used_percent<R>(shell: &R, target: &SshTarget) -> Result<f64>
where
    R: RemoteShell + ?Sized,
{
    let output = shell.run(target, DF_COMMAND).await?;
    parse_df_used_percent(&output)
}
