//! exec / upload / download / shell

use anyhow::{bail, Result};
use std::io::Write;
use std::path::Path;

use ct_session::{ConnectOutcome, Transport};

use crate::context::AppContext;
use crate::output::{print_info, print_success, print_warning};

fn report_connection(outcome: ConnectOutcome) {
    match outcome {
        ConnectOutcome::Reused => {}
        ConnectOutcome::Established => print_info("Authenticated a new channel"),
        ConnectOutcome::Reestablished => {
            print_warning("Previous channel had expired; re-authenticated")
        }
    }
}

/// Run a command remotely and relay its output
pub async fn exec_command<T: Transport>(ctx: &AppContext<T>, argv: &[String]) -> Result<()> {
    if argv.is_empty() {
        bail!("No command given");
    }
    let out = ctx
        .sessions
        .execute(&ctx.endpoint, argv, ctx.config.session.command_timeout)
        .await?;
    report_connection(out.connection);

    let mut stdout = std::io::stdout();
    stdout.write_all(out.stdout.as_bytes())?;
    stdout.flush()?;
    if !out.stderr.is_empty() {
        let mut stderr = std::io::stderr();
        stderr.write_all(out.stderr.as_bytes())?;
    }
    Ok(())
}

/// Remote destination for an upload when none is given: `<workdir>/<name>`
pub fn default_remote_path<T: Transport>(ctx: &AppContext<T>, local: &Path) -> String {
    let name = local
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "upload".to_string());
    ctx.config.remote.job_dir(&name)
}

pub async fn upload_command<T: Transport>(
    ctx: &AppContext<T>,
    local: &Path,
    remote: Option<&str>,
) -> Result<()> {
    let remote = match remote {
        Some(r) => r.to_string(),
        None => default_remote_path(ctx, local),
    };
    let report = ctx.sessions.upload_path(&ctx.endpoint, local, &remote).await?;
    report_connection(report.connection);
    print_success(&format!(
        "Uploaded {:?} to {} ({} bytes changed)",
        local, remote, report.bytes_transferred
    ));
    Ok(())
}

pub async fn download_command<T: Transport>(
    ctx: &AppContext<T>,
    remote: &str,
    local: &Path,
) -> Result<()> {
    let report = ctx.sessions.download_path(&ctx.endpoint, remote, local).await?;
    report_connection(report.connection);
    print_success(&format!(
        "Downloaded {} to {:?} ({} bytes changed)",
        remote, local, report.bytes_transferred
    ));
    Ok(())
}

/// Interactive shell; returns the remote shell's exit code
pub async fn shell_command<T: Transport>(ctx: &AppContext<T>, command: &[String]) -> Result<i32> {
    Ok(ctx.sessions.interactive_shell(&ctx.endpoint, command).await?)
}
