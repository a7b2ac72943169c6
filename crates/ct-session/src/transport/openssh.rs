//! OpenSSH ControlMaster transport
//!
//! The master connection is created with `ssh -M -f -N` (the user answers
//! password/MFA prompts on the terminal exactly once) and left listening on
//! a control socket with `ControlPersist`. Every later command, rsync
//! transfer and shell is a mux client of that socket and runs with
//! `BatchMode=yes`, so a dead master surfaces as an error instead of a new
//! password prompt.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use ct_core::config::SessionConfig;
use ct_core::lockfile::remove_if_exists;

use super::{
    shell_join, shell_quote, ChannelHandle, Direction, ExecOutput, TransferSpec, Transport,
    TransportError,
};

/// Exit status ssh reserves for its own connection errors
const SSH_CONNECTION_ERROR: i32 = 255;

/// rsync "error in rsync protocol data stream" (usually a dropped connection)
const RSYNC_STREAM_ERROR: i32 = 12;

/// Interval for keepalives on the master connection
const SERVER_ALIVE_INTERVAL_SECS: u64 = 30;

/// Transport backed by the system `ssh` and `rsync` binaries
#[derive(Debug, Clone)]
pub struct OpenSshTransport {
    ssh_program: String,
    rsync_program: String,
    extra_options: Vec<String>,
}

impl OpenSshTransport {
    /// Create a transport with explicit programs and extra `-o` options
    pub fn new(
        ssh_program: impl Into<String>,
        rsync_program: impl Into<String>,
        extra_options: Vec<String>,
    ) -> Self {
        Self {
            ssh_program: ssh_program.into(),
            rsync_program: rsync_program.into(),
            extra_options,
        }
    }

    /// Create a transport from the session configuration
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            config.ssh_program.clone(),
            config.rsync_program.clone(),
            config.ssh_options.clone(),
        )
    }

    /// Options shared by every mux client invocation
    fn client_args(&self, handle: &ChannelHandle) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            handle.control_path.display().to_string(),
            "-p".to_string(),
            handle.endpoint.port.to_string(),
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        for opt in &self.extra_options {
            args.push("-o".to_string());
            args.push(opt.clone());
        }
        args
    }

    /// `-O <ctl>` control request against the master
    fn control_command(&self, handle: &ChannelHandle, request: &str) -> Command {
        let mut cmd = Command::new(&self.ssh_program);
        cmd.arg("-S")
            .arg(&handle.control_path)
            .arg("-p")
            .arg(handle.endpoint.port.to_string())
            .arg("-O")
            .arg(request)
            .arg(handle.endpoint.destination())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// The `-e` argument for rsync: ssh as a mux client of the master
    fn rsync_shell(&self, handle: &ChannelHandle) -> String {
        let mut words = vec![self.ssh_program.clone()];
        words.extend(self.client_args(handle));
        words
            .iter()
            .map(|w| shell_quote(w))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Transport for OpenSshTransport {
    async fn authenticate(
        &self,
        handle: &ChannelHandle,
        ttl: Duration,
    ) -> Result<(), TransportError> {
        prepare_control_dir(&handle.control_path)?;
        // A socket left behind by a dead master would make ssh skip multiplexing
        remove_if_exists(&handle.control_path)?;

        let mut cmd = Command::new(&self.ssh_program);
        cmd.arg("-M")
            .arg("-N")
            .arg("-f")
            .arg("-S")
            .arg(&handle.control_path)
            .arg("-p")
            .arg(handle.endpoint.port.to_string())
            .arg("-o")
            .arg(format!("ControlPersist={}s", ttl.as_secs().max(1)))
            .arg("-o")
            .arg(format!("ServerAliveInterval={}", SERVER_ALIVE_INTERVAL_SECS));
        for opt in &self.extra_options {
            cmd.arg("-o").arg(opt);
        }
        cmd.arg(handle.endpoint.destination())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        tracing::debug!(endpoint = %handle.endpoint, "Starting ssh master");
        let status = cmd.status().await?;

        if status.success() {
            Ok(())
        } else {
            Err(TransportError::AuthRejected(match status.code() {
                Some(code) => format!("ssh exited with status {}", code),
                None => "ssh was terminated by a signal".to_string(),
            }))
        }
    }

    async fn probe(&self, handle: &ChannelHandle) -> bool {
        if !handle.control_path.exists() {
            return false;
        }
        let status = self
            .control_command(handle, "check")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        matches!(status, Ok(s) if s.success())
    }

    async fn exec(
        &self,
        handle: &ChannelHandle,
        argv: &[String],
    ) -> Result<ExecOutput, TransportError> {
        let output = Command::new(&self.ssh_program)
            .args(self.client_args(handle))
            .arg("--")
            .arg(handle.endpoint.destination())
            .arg(shell_join(argv))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        // 255 is ambiguous: a remote command may exit with it too
        if exit_code == SSH_CONNECTION_ERROR && !self.probe(handle).await {
            return Err(TransportError::ChannelLost(stderr.trim().to_string()));
        }

        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    async fn transfer(
        &self,
        handle: &ChannelHandle,
        spec: &TransferSpec,
    ) -> Result<u64, TransportError> {
        let remote = format!("{}:{}", handle.endpoint.destination(), spec.remote);
        let (source, dest) = match spec.direction {
            Direction::Upload => {
                let mut local = spec.local.display().to_string();
                if spec.local.is_dir() && !local.ends_with('/') {
                    local.push('/');
                }
                (local, remote)
            }
            Direction::Download => {
                if let Some(parent) = spec.local.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                (remote, spec.local.display().to_string())
            }
        };

        let output = Command::new(&self.rsync_program)
            .arg("--archive")
            .arg("--partial")
            .arg("--compress")
            .arg("--stats")
            .arg("-e")
            .arg(self.rsync_shell(handle))
            .arg(&source)
            .arg(&dest)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        match output.status.code() {
            Some(0) => Ok(parse_transferred_bytes(&stdout).unwrap_or(0)),
            Some(SSH_CONNECTION_ERROR) | Some(RSYNC_STREAM_ERROR) if !self.probe(handle).await => {
                Err(TransportError::ChannelLost(stderr))
            }
            Some(code) => Err(TransportError::Failed(format!(
                "rsync exited with status {}: {}",
                code, stderr
            ))),
            None => Err(TransportError::Failed(
                "rsync was terminated by a signal".to_string(),
            )),
        }
    }

    async fn shell(
        &self,
        handle: &ChannelHandle,
        command: &[String],
    ) -> Result<i32, TransportError> {
        let mut cmd = Command::new(&self.ssh_program);
        cmd.args(self.client_args(handle))
            .arg("-t")
            .arg("--")
            .arg(handle.endpoint.destination());
        if !command.is_empty() {
            cmd.arg(shell_join(command));
        }
        let status = cmd
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await?;

        match status.code() {
            Some(SSH_CONNECTION_ERROR) => Err(TransportError::ChannelLost(
                "interactive session lost its channel".to_string(),
            )),
            Some(code) => Ok(code),
            None => Ok(-1),
        }
    }

    async fn close(&self, handle: &ChannelHandle) -> Result<(), TransportError> {
        if !handle.control_path.exists() {
            return Ok(());
        }

        let output = self.control_command(handle, "exit").output().await?;
        // The master may already be gone; the socket file is cleaned up either way
        remove_if_exists(&handle.control_path)?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TransportError::Failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// Create the control directory with owner-only permissions
fn prepare_control_dir(control_path: &Path) -> std::io::Result<()> {
    if let Some(dir) = control_path.parent() {
        std::fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }
    Ok(())
}

/// Extract "Total transferred file size: N bytes" from `rsync --stats`
fn parse_transferred_bytes(stats: &str) -> Option<u64> {
    stats.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Total transferred file size:")?;
        let digits: String = rest
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
            .filter(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    })
}
