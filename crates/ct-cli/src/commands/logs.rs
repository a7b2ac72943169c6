//! Fetch job outputs and push resource usage to the tracking run

use anyhow::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};

use ct_core::JobId;
use ct_session::Transport;
use ct_tracking::{parse_job_log, Metrics, Summary};

use crate::context::AppContext;
use crate::output::{print_info, print_success, print_warning};
use crate::scheduler::JobState;

use super::monitor::job_state;

/// Result of `chtc logs`
#[derive(Debug, Clone)]
pub struct LogsReport {
    pub local_dir: PathBuf,
    pub bytes_transferred: u64,
    pub log_file: Option<PathBuf>,
    pub metrics: Metrics,
    pub state: JobState,
    /// Whether the tracking run received metrics and, for finished jobs, its summary
    pub tracked: bool,
    pub warnings: Vec<String>,
}

/// Default download location for a job's outputs
pub fn default_logs_dir(job: &JobId) -> PathBuf {
    PathBuf::from(".chtc").join("logs").join(job.as_str())
}

/// The scheduler log of `job` under `dir`
///
/// Prefers `.log` files naming the job id (`job_<id>.log`); falls back to
/// the first `.log` file found.
pub fn find_job_log(dir: &Path, job: &JobId) -> Option<PathBuf> {
    let mut logs = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "log") {
                logs.push(path);
            }
        }
    }
    logs.sort();

    let named = logs.iter().find(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().contains(job.as_str()))
            .unwrap_or(false)
    });
    named.or(logs.first()).cloned()
}

/// Download outputs, parse the log, update and possibly finish the run
///
/// The remote directory is `remote` when given, else the one recorded at
/// submit time, else the configured remote workdir. Jobs without a ledger
/// row still get their outputs; only the run update is skipped.
pub async fn fetch_logs<T: Transport>(
    ctx: &AppContext<T>,
    job: &JobId,
    out_dir: Option<&Path>,
    remote: Option<&str>,
) -> Result<LogsReport> {
    let entry = ctx.ledger.latest(job)?;
    let mut warnings = Vec::new();
    let remote_dir = match (remote, entry.as_ref().and_then(|e| e.remote_dir.clone())) {
        (Some(explicit), _) => explicit.to_string(),
        (None, Some(recorded)) => recorded,
        (None, None) => {
            let workdir = ctx.config.remote.workdir.trim_end_matches('/');
            let workdir = if workdir.is_empty() { "." } else { workdir };
            if entry.is_none() {
                warnings.push(format!(
                    "Job {} is not in the ledger; fetching {} and skipping tracking",
                    job, workdir
                ));
            }
            workdir.to_string()
        }
    };

    let local_dir = out_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_logs_dir(job));
    let transfer = ctx
        .sessions
        .download_path(&ctx.endpoint, &remote_dir, &local_dir)
        .await?;

    let log_file = find_job_log(&local_dir, job);
    let metrics = match &log_file {
        Some(path) => parse_job_log(&std::fs::read_to_string(path)?),
        None => Metrics::new(),
    };
    let state = job_state(ctx, job).await?;

    let mut report = LogsReport {
        local_dir,
        bytes_transferred: transfer.bytes_transferred,
        log_file,
        metrics,
        state,
        tracked: false,
        warnings,
    };

    let Some(entry) = entry.filter(|e| e.has_run()) else {
        return Ok(report);
    };
    let Some(tracker) = &ctx.tracker else {
        report
            .warnings
            .push("Job has a tracking run but no API key is configured".to_string());
        return Ok(report);
    };

    if !report.metrics.is_empty() {
        if let Err(e) = tracker.update_run(&entry.run_id, &report.metrics).await {
            report.warnings.push(format!("Metrics not logged: {}", e));
            return Ok(report);
        }
    }

    if state.is_terminal() {
        let mut summary: Summary = report.metrics.clone();
        summary.insert("job_state".to_string(), Value::String(state.to_string()));
        summary.insert("htcondor_job_id".to_string(), Value::String(job.to_string()));
        if let Err(e) = tracker.finalize_run(&entry.run_id, &summary).await {
            report.warnings.push(format!("Run not finalised: {}", e));
            return Ok(report);
        }
    }
    report.tracked = true;
    Ok(report)
}

/// `chtc logs`
pub async fn logs_command<T: Transport>(
    ctx: &AppContext<T>,
    job: &JobId,
    out_dir: Option<&Path>,
    remote: Option<&str>,
) -> Result<()> {
    let report = fetch_logs(ctx, job, out_dir, remote).await?;

    print_success(&format!(
        "Outputs of job {} in {:?} ({} bytes changed)",
        job, report.local_dir, report.bytes_transferred
    ));
    match &report.log_file {
        Some(path) => print_info(&format!("Job log: {:?}", path)),
        None => print_warning("No job log found among the outputs"),
    }
    for (name, value) in &report.metrics {
        println!("  {}: {}", name, value);
    }
    print_info(&format!("Job state: {}", report.state));
    if report.tracked {
        print_success("Tracking run updated");
    }
    for warning in &report.warnings {
        print_warning(warning);
    }
    Ok(())
}
