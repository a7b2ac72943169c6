//! chtc CLI
//!
//! Single binary for working with the CHTC access point:
//! - Channel management (connect, status, disconnect)
//! - Remote commands and file transfer over the shared channel
//! - Job submission, monitoring and log retrieval with experiment tracking

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chtc_tools::commands::{self, MonitorRequest, SubmitRequest};
use chtc_tools::context::AppContext;
use chtc_tools::exit::{exit_code_for, SUCCESS};
use chtc_tools::output::print_error;
use ct_core::config::{ConfigFile, Overrides};
use ct_core::JobId;
use ct_ledger::Ledger;

#[derive(Parser)]
#[command(name = "chtc")]
#[command(author, version, about = "Run and track HTCondor jobs over one persistent authenticated channel")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "CHTC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Access point hostname
    #[arg(long, global = true, env = "CHTC_HOST")]
    host: Option<String>,

    /// Login user on the access point
    #[arg(long, global = true, env = "CHTC_USER")]
    user: Option<String>,

    /// SSH port
    #[arg(long, global = true, env = "CHTC_PORT")]
    port: Option<u16>,

    /// Channel lifetime in seconds
    #[arg(long, global = true, env = "CHTC_TTL")]
    ttl: Option<u64>,

    /// Ledger file
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    #[arg(long, global = true, env = "CHTC_TRACKING_URL", hide = true)]
    tracking_url: Option<String>,

    #[arg(long, global = true, env = "WANDB_API_KEY", hide = true, hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, global = true, env = "WANDB_ENTITY", hide = true)]
    entity: Option<String>,

    #[arg(long, global = true, env = "WANDB_PROJECT", hide = true)]
    tracking_project: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate once and keep the channel open for the ttl
    Connect {
        /// Replace a live channel with a freshly authenticated one
        #[arg(long)]
        replace: bool,
    },

    /// Show the channel state
    Status,

    /// Close the channel
    Disconnect,

    /// Run a command on the access point
    Exec {
        /// Command and arguments (after `--`)
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Upload a file or directory
    Upload {
        local: PathBuf,
        /// Destination (defaults to the remote work directory)
        remote: Option<String>,
    },

    /// Download a file or directory
    Download { remote: String, local: PathBuf },

    /// Open an interactive shell over the channel
    Shell {
        /// Run this command with a TTY instead of a login shell
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Upload the submit file's directory and submit the job
    Submit {
        submit_file: PathBuf,
        /// Create a tracking run for the job
        #[arg(long)]
        track: bool,
        /// Tracking project
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Show job states
    Monitor {
        /// Job id (all tracked jobs of the project when omitted)
        job: Option<String>,
        /// Keep refreshing until interrupted
        #[arg(short, long)]
        watch: bool,
        /// Refresh interval in seconds
        #[arg(short, long, default_value_t = 30)]
        interval: u64,
        /// Tracking project
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Download a job's outputs and log its resource usage
    Logs {
        job: String,
        /// Local destination directory
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Remote directory to fetch (defaults to the one recorded at submit)
        #[arg(long)]
        remote: Option<String>,
    },

    /// Inspect the job/run ledger
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum LedgerAction {
    /// List ledger rows
    List {
        /// Only rows of this project
        #[arg(short, long)]
        project: Option<String>,
    },
    /// Show the latest row for a job
    Show { job: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show config directory path
    Path,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            user: self.user.clone(),
            port: self.port,
            ttl: self.ttl.map(Duration::from_secs),
            control_dir: None,
            ledger_path: self.ledger.clone(),
            tracking_url: self.tracking_url.clone(),
            api_key: self.api_key.clone(),
            entity: self.entity.clone(),
            project: self.tracking_project.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let overrides = cli.overrides();
    let config_path = cli.config.clone();
    let config = ConfigFile::load(config_path.as_deref())?.with_overrides(&overrides);

    // Local-only commands don't need an endpoint
    match &cli.command {
        Commands::Config { action } => {
            match action {
                ConfigAction::Show => commands::config_show(&config, config_path.as_deref())?,
                ConfigAction::Path => commands::config_path(config_path.as_deref()),
            }
            return Ok(SUCCESS);
        }
        Commands::Ledger { action } => {
            let ledger = Ledger::from_config(&config.ledger);
            match action {
                LedgerAction::List { project } => commands::ledger_list(&ledger, project.as_deref())?,
                LedgerAction::Show { job } => commands::ledger_show(&ledger, &JobId::new(job.as_str()))?,
            }
            return Ok(SUCCESS);
        }
        _ => {}
    }

    let ctx = AppContext::from_config(config)?;

    match cli.command {
        Commands::Connect { replace } => commands::connect_command(&ctx, replace).await?,
        Commands::Status => commands::status_command(&ctx).await?,
        Commands::Disconnect => commands::disconnect_command(&ctx).await?,
        Commands::Exec { command } => commands::exec_command(&ctx, &command).await?,
        Commands::Upload { local, remote } => {
            commands::upload_command(&ctx, &local, remote.as_deref()).await?
        }
        Commands::Download { remote, local } => {
            commands::download_command(&ctx, &remote, &local).await?
        }
        Commands::Shell { command } => {
            let code = commands::shell_command(&ctx, &command).await?;
            return Ok(u8::try_from(code).unwrap_or(1));
        }
        Commands::Submit {
            submit_file,
            track,
            project,
        } => {
            let request = SubmitRequest {
                submit_file,
                project,
                track,
            };
            commands::submit_command(&ctx, &request).await?
        }
        Commands::Monitor {
            job,
            watch,
            interval,
            project,
        } => {
            let request = MonitorRequest {
                job: job.map(JobId::new),
                project,
                watch,
                interval: Duration::from_secs(interval.max(1)),
            };
            commands::monitor_command(&ctx, &request).await?
        }
        Commands::Logs { job, out, remote } => {
            commands::logs_command(&ctx, &JobId::new(job), out.as_deref(), remote.as_deref()).await?
        }
        Commands::Ledger { .. } | Commands::Config { .. } => {}
    }

    Ok(SUCCESS)
}
