//! Ledger inspection

use anyhow::{anyhow, Result};

use ct_core::JobId;
use ct_ledger::{Ledger, LedgerEntry};

use crate::output::{format_age, format_ledger, print_info};

/// Every row, or every row of one project, in file order
pub fn ledger_list(ledger: &Ledger, project: Option<&str>) -> Result<()> {
    let rows: Vec<LedgerEntry> = match project {
        Some(project) => ledger.all_for_project(project).collect::<Result<_, _>>()?,
        None => ledger.entries().collect::<Result<_, _>>()?,
    };

    if rows.is_empty() {
        print_info(&format!("No ledger entries in {:?}", ledger.path()));
        return Ok(());
    }
    println!("{}", format_ledger(&rows));
    Ok(())
}

/// The authoritative row for one job
pub fn ledger_show(ledger: &Ledger, job: &JobId) -> Result<()> {
    let entry = ledger
        .latest(job)?
        .ok_or_else(|| anyhow!("Job {} is not in the ledger {:?}", job, ledger.path()))?;

    println!("Job:      {}", entry.job_id);
    println!(
        "Run:      {}",
        if entry.has_run() { entry.run_id.as_str() } else { "-" }
    );
    println!("Project:  {}", entry.project);
    println!("Recorded: {}", format_age(entry.created_at_ms));
    if let Some(dir) = &entry.remote_dir {
        println!("Remote:   {}", dir);
    }
    Ok(())
}
