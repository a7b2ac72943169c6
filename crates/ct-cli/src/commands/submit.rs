//! Job submission with optional tracking
//!
//! ```text
//! upload job dir ──► condor_submit ──► parse cluster id
//!                                          │
//!                     ledger row (run_id = "") ◄──┘
//!                                          │ --track
//!                          create run ──► ledger row (run_id)
//! ```
//!
//! Once the scheduler has accepted the job, nothing after it can fail the
//! submission: ledger and tracking problems become warnings on the report,
//! because the job exists and its id must reach the user.

use anyhow::Result;
use std::path::{Path, PathBuf};

use ct_core::{JobId, RunId, SubmitError};
use ct_ledger::{Ledger, LedgerEntry};
use ct_session::{ConnectOutcome, Transport};
use ct_tracking::{parse_submit_resources, RunMetadata};

use crate::context::AppContext;
use crate::output::{print_info, print_success, print_warning};
use crate::scheduler::{parse_cluster_id, submit_argv};

/// What to submit
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Submit description file; its directory is uploaded as the job directory
    pub submit_file: PathBuf,
    /// Tracking project (falls back to configuration, then the default)
    pub project: Option<String>,
    /// Create a tracking run for the job
    pub track: bool,
}

/// Outcome of a submission that reached the scheduler
#[derive(Debug, Clone)]
pub struct SubmitReport {
    pub job_id: JobId,
    pub run_id: Option<RunId>,
    pub project: String,
    pub remote_dir: String,
    /// How the channel used for the upload was obtained
    pub connection: ConnectOutcome,
    /// Non-fatal problems after the job was accepted
    pub warnings: Vec<String>,
}

/// Local job directory and submit file name
fn split_submit_path(path: &Path) -> Result<(PathBuf, String), SubmitError> {
    let invalid = |reason: String| SubmitError::InvalidSubmitFile {
        path: path.to_path_buf(),
        reason,
    };

    let canonical = path.canonicalize().map_err(|e| invalid(e.to_string()))?;
    if !canonical.is_file() {
        return Err(invalid("not a regular file".to_string()));
    }
    let file_name = canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| invalid("no file name".to_string()))?;
    let dir = canonical
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| invalid("no parent directory".to_string()))?;
    Ok((dir, file_name))
}

/// Append on the blocking pool; the ledger lock may be held by another process
async fn append_row(ledger: &Ledger, entry: LedgerEntry) -> Result<(), String> {
    let ledger = ledger.clone();
    match tokio::task::spawn_blocking(move || ledger.append(&entry)).await {
        Ok(written) => written.map_err(|e| e.to_string()),
        Err(e) => Err(format!("ledger writer panicked: {}", e)),
    }
}

/// Upload, submit, and correlate; see module docs
pub async fn submit<T: Transport>(
    ctx: &AppContext<T>,
    request: &SubmitRequest,
) -> Result<SubmitReport, SubmitError> {
    let (job_dir, file_name) = split_submit_path(&request.submit_file)?;
    let submit_text = std::fs::read_to_string(&request.submit_file).map_err(|e| {
        SubmitError::InvalidSubmitFile {
            path: request.submit_file.clone(),
            reason: e.to_string(),
        }
    })?;

    let dir_name = job_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string());
    let remote_dir = ctx.config.remote.job_dir(&dir_name);

    let upload = ctx
        .sessions
        .upload_path(&ctx.endpoint, &job_dir, &remote_dir)
        .await?;
    tracing::info!(
        remote_dir = %remote_dir,
        bytes = upload.bytes_transferred,
        "Job directory synchronised"
    );

    let argv = submit_argv(&ctx.config.remote, &remote_dir, &file_name);
    let out = ctx
        .sessions
        .execute(&ctx.endpoint, &argv, ctx.config.session.command_timeout)
        .await?;

    let job_id = parse_cluster_id(&out.stdout).ok_or_else(|| SubmitError::SubmissionIdUnparseable {
        endpoint: ctx.endpoint.clone(),
        output: out.stdout.trim().to_string(),
    })?;
    tracing::info!(job_id = %job_id, "Job accepted by scheduler");

    let project = ctx.config.tracking.project_or_default(request.project.as_deref());
    let mut report = SubmitReport {
        job_id: job_id.clone(),
        run_id: None,
        project: project.clone(),
        remote_dir: remote_dir.clone(),
        connection: upload.connection,
        warnings: Vec::new(),
    };

    // The job is discoverable from here on, whatever happens to tracking
    let placeholder =
        LedgerEntry::new(job_id.clone(), RunId::none(), project.clone()).with_remote_dir(&remote_dir);
    if let Err(e) = append_row(&ctx.ledger, placeholder).await {
        report.warnings.push(format!("Ledger not updated: {}", e));
    }

    if !request.track {
        return Ok(report);
    }

    let tracker = match &ctx.tracker {
        Some(tracker) => tracker,
        None => {
            report
                .warnings
                .push("Tracking requested but no API key is configured (set WANDB_API_KEY)".to_string());
            return Ok(report);
        }
    };

    let metadata = RunMetadata::for_job(&job_id, parse_submit_resources(&submit_text));
    match tracker.create_run(&project, &metadata).await {
        Ok(run_id) => {
            tracing::info!(job_id = %job_id, run_id = %run_id.as_str(), "Tracking run created");
            let row = LedgerEntry::new(job_id.clone(), run_id.clone(), project.clone())
                .with_remote_dir(&remote_dir);
            if let Err(e) = append_row(&ctx.ledger, row).await {
                report
                    .warnings
                    .push(format!("Run {} created but not recorded in the ledger: {}", run_id.as_str(), e));
            }
            report.run_id = Some(run_id);
        }
        Err(e) => {
            tracing::warn!(job_id = %job_id, "Tracking run not created: {}", e);
            let hint = if e.is_unauthorized() {
                " (check WANDB_API_KEY)"
            } else {
                ""
            };
            report.warnings.push(format!(
                "Job submitted, but the tracking run could not be created: {}{}",
                e, hint
            ));
        }
    }

    Ok(report)
}

/// `chtc submit`
pub async fn submit_command<T: Transport>(ctx: &AppContext<T>, request: &SubmitRequest) -> Result<()> {
    print_info(&format!("Submitting {:?} to {}", request.submit_file, ctx.endpoint));
    let report = submit(ctx, request).await?;

    match report.connection {
        ConnectOutcome::Reestablished => print_warning("Previous channel had expired; re-authenticated"),
        ConnectOutcome::Established => print_info("Authenticated a new channel"),
        ConnectOutcome::Reused => {}
    }

    print_success(&format!(
        "Submitted job {} ({})",
        report.job_id, report.remote_dir
    ));
    if let Some(run_id) = &report.run_id {
        print_success(&format!(
            "Tracking run {} in project {}",
            run_id.as_str(),
            report.project
        ));
    }
    for warning in &report.warnings {
        print_warning(warning);
    }
    Ok(())
}
