//! CLI command implementations

mod config;
mod ledger;
mod logs;
mod monitor;
mod remote;
mod session;
mod submit;

pub use config::{config_path, config_show};
pub use ledger::{ledger_list, ledger_show};
pub use logs::{default_logs_dir, fetch_logs, find_job_log, logs_command, LogsReport};
pub use monitor::{job_state, monitor_command, project_states, MonitorRequest};
pub use remote::{default_remote_path, download_command, exec_command, shell_command, upload_command};
pub use session::{connect_command, disconnect_command, status_command};
pub use submit::{submit, submit_command, SubmitReport, SubmitRequest};
