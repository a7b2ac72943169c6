//! Job monitoring

use anyhow::Result;
use std::time::Duration;

use ct_core::JobId;
use ct_ledger::LedgerEntry;
use ct_session::Transport;

use crate::context::AppContext;
use crate::output::{format_jobs, print_info, print_success};
use crate::scheduler::{query_state, JobState};

/// What to watch
#[derive(Debug, Clone)]
pub struct MonitorRequest {
    /// One job, or every job of the project when `None`
    pub job: Option<JobId>,
    pub project: Option<String>,
    /// Repeat until interrupted (or, for one job, until it finishes)
    pub watch: bool,
    pub interval: Duration,
}

/// Current state of one job
pub async fn job_state<T: Transport>(ctx: &AppContext<T>, job: &JobId) -> Result<JobState> {
    Ok(query_state(
        &ctx.sessions,
        &ctx.endpoint,
        &ctx.config.remote,
        job,
        ctx.config.session.command_timeout,
    )
    .await?)
}

/// Latest ledger row per job in `project` with each job's current state
pub async fn project_states<T: Transport>(
    ctx: &AppContext<T>,
    project: &str,
) -> Result<Vec<(LedgerEntry, JobState)>> {
    let rows = ctx.ledger.latest_per_job(project)?;
    let mut states = Vec::with_capacity(rows.len());
    for row in rows {
        let state = job_state(ctx, &row.job_id).await?;
        states.push((row, state));
    }
    Ok(states)
}

/// One pass; returns whether there is nothing left to wait for
async fn render<T: Transport>(ctx: &AppContext<T>, request: &MonitorRequest) -> Result<bool> {
    match &request.job {
        Some(job) => {
            let state = job_state(ctx, job).await?;
            if state.is_terminal() {
                print_success(&format!("Job {}: {}", job, state));
            } else {
                print_info(&format!("Job {}: {}", job, state));
            }
            Ok(state.is_terminal())
        }
        None => {
            let queue = ctx
                .sessions
                .execute(
                    &ctx.endpoint,
                    &[ctx.config.remote.queue_command.clone()],
                    ctx.config.session.command_timeout,
                )
                .await?;
            print!("{}", queue.stdout);

            let project = ctx.config.tracking.project_or_default(request.project.as_deref());
            let states = project_states(ctx, &project).await?;
            if !states.is_empty() {
                println!("\nTracked jobs in project {}:", project);
                println!("{}", format_jobs(&states));
            }
            Ok(false)
        }
    }
}

/// `chtc monitor`
pub async fn monitor_command<T: Transport>(ctx: &AppContext<T>, request: &MonitorRequest) -> Result<()> {
    loop {
        let finished = render(ctx, request).await?;
        if !request.watch || finished {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(());
            }
            _ = tokio::time::sleep(request.interval) => {}
        }
    }
}
