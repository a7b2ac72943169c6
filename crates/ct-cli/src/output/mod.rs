//! Terminal output: status lines, tables and small formatting helpers

use std::io::Write;
use std::time::Duration;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{settings::Style, Table, Tabled};

use ct_core::time::elapsed_duration;
use ct_core::Endpoint;
use ct_ledger::LedgerEntry;
use ct_session::{Session, SessionStatus};

use crate::scheduler::JobState;

/// Render the session status block for `chtc status`
pub fn format_session(endpoint: &Endpoint, status: &SessionStatus, session: Option<&Session>) -> String {
    let mut output = String::new();
    output.push_str(&format!("Endpoint: {}\n", endpoint));
    output.push_str(&format!("Channel: {}\n", status));

    if let (SessionStatus::Live { age }, Some(session)) = (status, session) {
        output.push_str(&format!("Established: {} ago\n", format_duration(*age)));
        output.push_str(&format!("Expires in: {}\n", format_duration(session.expires_in())));
        output.push_str(&format!(
            "Last activity: {}\n",
            format_age(session.last_activity_ms)
        ));
    }
    output
}

/// Ledger rows as a table
pub fn format_ledger(rows: &[LedgerEntry]) -> String {
    if rows.is_empty() {
        return "No ledger entries".to_string();
    }

    #[derive(Tabled)]
    struct LedgerRow {
        #[tabled(rename = "JOB")]
        job: String,
        #[tabled(rename = "RUN")]
        run: String,
        #[tabled(rename = "PROJECT")]
        project: String,
        #[tabled(rename = "RECORDED")]
        recorded: String,
    }

    let rows: Vec<LedgerRow> = rows
        .iter()
        .map(|r| LedgerRow {
            job: r.job_id.to_string(),
            run: run_cell(r),
            project: truncate(&r.project, 24),
            recorded: format_age(r.created_at_ms),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Tracked jobs with their current scheduler state
pub fn format_jobs(rows: &[(LedgerEntry, JobState)]) -> String {
    if rows.is_empty() {
        return "No tracked jobs".to_string();
    }

    #[derive(Tabled)]
    struct JobRow {
        #[tabled(rename = "JOB")]
        job: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "RUN")]
        run: String,
        #[tabled(rename = "SUBMITTED")]
        submitted: String,
    }

    let rows: Vec<JobRow> = rows
        .iter()
        .map(|(r, state)| JobRow {
            job: r.job_id.to_string(),
            state: state.to_string(),
            run: run_cell(r),
            submitted: format_age(r.created_at_ms),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

fn run_cell(row: &LedgerEntry) -> String {
    if row.has_run() {
        row.run_id.as_str().to_string()
    } else {
        "-".to_string()
    }
}

/// "3m 12s ago" for a millisecond timestamp
pub fn format_age(timestamp_ms: u64) -> String {
    format!("{} ago", format_duration(elapsed_duration(timestamp_ms)))
}

/// Compact human-readable duration, two units at most
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m {}s", secs / 60, secs % 60),
        3600..=86_399 => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
        _ => format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600),
    }
}

/// Truncate on a character boundary, marking the cut with an ellipsis
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", kept)
}

fn print_prefixed(mut out: impl Write, color: Color, prefix: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(prefix),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Green ✓ line on stdout
pub fn print_success(msg: &str) {
    print_prefixed(std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Red ✗ line on stderr
pub fn print_error(msg: &str) {
    print_prefixed(std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Yellow ⚠ line on stderr
pub fn print_warning(msg: &str) {
    print_prefixed(std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Cyan ℹ line on stdout
pub fn print_info(msg: &str) {
    print_prefixed(std::io::stdout(), Color::Cyan, "ℹ ", msg);
}
