//! Submit, monitor and logs flows against the scripted transport and the
//! in-memory tracker

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use chtc_tools::commands::{fetch_logs, job_state, project_states, submit, SubmitRequest};
use chtc_tools::context::AppContext;
use chtc_tools::exit::{exit_code_for, SUBMISSION_ID_UNPARSEABLE};
use chtc_tools::scheduler::JobState;
use ct_core::config::ConfigFile;
use ct_core::{JobId, RunId, SubmitError};
use ct_ledger::LedgerEntry;
use ct_session::{ConnectOutcome, ScriptedTransport};
use ct_tracking::{MemoryTracker, Tracker, TrackerCall};

const SUBMIT_OUTPUT: &str = "Submitting job(s).\n1 job(s) submitted to cluster 4410123.\n";

const SUBMIT_FILE: &str = "\
universe = vanilla
executable = train.sh
request_cpus = 4
request_memory = 16GB
request_disk = 20GB
queue
";

const JOB_LOG: &str = "\
000 (4410123.000.000) 2024-03-01 10:00:00 Job submitted from host: <128.104.100.44:9618>
...
005 (4410123.000.000) 2024-03-01 10:10:00 Job terminated.
\t(1) Normal termination (return value 0)
\tTotal run time: 0:10:00
\t   Memory (MB)          :      512      1024      1024
...
";

struct Harness {
    dir: TempDir,
    transport: Arc<ScriptedTransport>,
    tracker: Arc<MemoryTracker>,
    ctx: AppContext<ScriptedTransport>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(|_, _| {})
    }

    /// Harness whose config is adjusted by `tweak` before the context is built
    fn with_config(tweak: impl FnOnce(&mut ConfigFile, &Path)) -> Self {
        let dir = TempDir::new().unwrap();

        let mut config = ConfigFile::default();
        config.endpoint.host = Some("ap2002.chtc.wisc.edu".to_string());
        config.endpoint.user = "bucky".to_string();
        config.session.control_dir = dir.path().join("control");
        config.session.connect_timeout = Duration::from_secs(5);
        config.ledger.path = dir.path().join("ledger.jsonl");
        tweak(&mut config, dir.path());

        let transport = Arc::new(ScriptedTransport::new());
        let tracker = Arc::new(MemoryTracker::new());
        let ctx = AppContext::new(
            config,
            Arc::clone(&transport),
            Some(Arc::clone(&tracker) as Arc<dyn Tracker>),
        )
        .unwrap();

        Self {
            dir,
            transport,
            tracker,
            ctx,
        }
    }

    /// A local job directory `mnist/` with a submit file and an executable
    fn job_dir(&self) -> PathBuf {
        let job = self.dir.path().join("mnist");
        std::fs::create_dir_all(&job).unwrap();
        std::fs::write(job.join("job.sub"), SUBMIT_FILE).unwrap();
        std::fs::write(job.join("train.sh"), "#!/bin/sh\npython train.py\n").unwrap();
        job
    }

    fn request(&self, track: bool) -> SubmitRequest {
        SubmitRequest {
            submit_file: self.job_dir().join("job.sub"),
            project: Some("mnist".to_string()),
            track,
        }
    }

    fn rows(&self) -> Vec<LedgerEntry> {
        self.ctx.ledger.entries().collect::<Result<_, _>>().unwrap()
    }
}

fn out_dir(dir: &Path) -> PathBuf {
    dir.join("outputs")
}

#[tokio::test]
async fn test_tracked_submit_records_job_and_run() {
    let h = Harness::new();
    h.transport.on_command_stdout("condor_submit", SUBMIT_OUTPUT);

    let report = submit(&h.ctx, &h.request(true)).await.unwrap();

    assert_eq!(report.job_id, JobId::new("4410123"));
    assert_eq!(report.run_id, Some(RunId::new("run-1")));
    assert_eq!(report.project, "mnist");
    assert_eq!(report.remote_dir, "chtc-jobs/mnist");
    assert_eq!(report.connection, ConnectOutcome::Established);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);

    // Job directory went up before the submit ran
    assert_eq!(
        h.transport.remote_file("chtc-jobs/mnist/job.sub").as_deref(),
        Some(SUBMIT_FILE.as_bytes())
    );
    assert!(h.transport.remote_file("chtc-jobs/mnist/train.sh").is_some());
    assert!(h
        .transport
        .executed()
        .iter()
        .any(|line| line.contains("condor_submit")));

    // Placeholder first, then the run
    let rows = h.rows();
    assert_eq!(rows.len(), 2);
    assert!(!rows[0].has_run());
    assert_eq!(rows[1].run_id, RunId::new("run-1"));
    assert_eq!(rows[1].remote_dir.as_deref(), Some("chtc-jobs/mnist"));

    let latest = h.ctx.ledger.latest(&JobId::new("4410123")).unwrap().unwrap();
    assert_eq!(latest.run_id, RunId::new("run-1"));

    match &h.tracker.calls()[..] {
        [TrackerCall::Create { project, metadata }] => {
            assert_eq!(project, "mnist");
            assert_eq!(metadata.name, "chtc-job-4410123");
            assert_eq!(metadata.config["request_cpus"], Value::from("4"));
            assert_eq!(metadata.config["request_memory"], Value::from("16GB"));
            assert_eq!(metadata.config["htcondor_job_id"], Value::from("4410123"));
        }
        other => panic!("unexpected tracker calls: {:?}", other),
    }
}

#[tokio::test]
async fn test_tracking_failure_keeps_the_job() {
    let h = Harness::new();
    h.transport.on_command_stdout("condor_submit", SUBMIT_OUTPUT);
    h.tracker.fail_with(Some(503));

    let report = submit(&h.ctx, &h.request(true)).await.unwrap();

    assert_eq!(report.job_id, JobId::new("4410123"));
    assert_eq!(report.run_id, None);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("tracking run could not be created"));

    // The placeholder row still makes the job discoverable
    let latest = h.ctx.ledger.latest(&JobId::new("4410123")).unwrap().unwrap();
    assert!(!latest.has_run());
    assert_eq!(latest.remote_dir.as_deref(), Some("chtc-jobs/mnist"));
}

#[tokio::test]
async fn test_ledger_failure_keeps_the_job() {
    // A directory where the ledger file should be
    let h = Harness::with_config(|config, dir| config.ledger.path = dir.to_path_buf());
    h.transport.on_command_stdout("condor_submit", SUBMIT_OUTPUT);

    let report = submit(&h.ctx, &h.request(false)).await.unwrap();

    assert_eq!(report.job_id, JobId::new("4410123"));
    assert_eq!(report.warnings.len(), 1, "{:?}", report.warnings);
    assert!(report.warnings[0].contains("Ledger not updated"));
    assert!(h.tracker.calls().is_empty());
}

#[tokio::test]
async fn test_untracked_submit_skips_tracker() {
    let h = Harness::new();
    h.transport.on_command_stdout("condor_submit", SUBMIT_OUTPUT);

    let report = submit(&h.ctx, &h.request(false)).await.unwrap();

    assert_eq!(report.run_id, None);
    assert!(report.warnings.is_empty());
    assert!(h.tracker.calls().is_empty());
    assert_eq!(h.rows().len(), 1);
}

#[tokio::test]
async fn test_unparseable_submit_output() {
    let h = Harness::new();
    h.transport.on_command_stdout(
        "condor_submit",
        "ERROR: on Line 3 of submit file: Parse error\n",
    );

    let err = submit(&h.ctx, &h.request(true)).await.unwrap_err();

    match &err {
        SubmitError::SubmissionIdUnparseable { output, .. } => {
            assert!(output.contains("Parse error"));
        }
        other => panic!("expected SubmissionIdUnparseable, got {:?}", other),
    }
    assert_eq!(
        exit_code_for(&anyhow::Error::from(err)),
        SUBMISSION_ID_UNPARSEABLE
    );
    assert!(h.rows().is_empty());
    assert!(h.tracker.calls().is_empty());
}

#[tokio::test]
async fn test_missing_submit_file() {
    let h = Harness::new();
    let request = SubmitRequest {
        submit_file: h.dir.path().join("absent.sub"),
        project: None,
        track: false,
    };

    let err = submit(&h.ctx, &request).await.unwrap_err();

    assert!(matches!(err, SubmitError::InvalidSubmitFile { .. }));
    assert_eq!(h.transport.authentication_count(), 0);
}

#[tokio::test]
async fn test_logs_update_and_finish_the_run() {
    let h = Harness::new();
    h.transport.on_command_stdout("condor_submit", SUBMIT_OUTPUT);
    h.transport.on_command_stdout("condor_history", "4\n");
    submit(&h.ctx, &h.request(true)).await.unwrap();
    h.transport
        .put_remote_file("chtc-jobs/mnist/job_4410123.log", JOB_LOG.as_bytes());

    let out = out_dir(h.dir.path());
    let job = JobId::new("4410123");
    let report = fetch_logs(&h.ctx, &job, Some(&out), None).await.unwrap();

    assert_eq!(report.state, JobState::Completed);
    assert!(report.tracked);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.log_file, Some(out.join("job_4410123.log")));
    assert_eq!(report.metrics["runtime_seconds"], 600);
    assert_eq!(report.metrics["memory_mb"], 512);
    assert!(out.join("job.sub").exists());

    let calls = h.tracker.calls();
    assert_eq!(calls.len(), 3);
    match &calls[1] {
        TrackerCall::Update { run_id, metrics } => {
            assert_eq!(run_id, &RunId::new("run-1"));
            assert_eq!(metrics["runtime_seconds"], 600);
        }
        other => panic!("expected Update, got {:?}", other),
    }
    match &calls[2] {
        TrackerCall::Finalize { run_id, summary } => {
            assert_eq!(run_id, &RunId::new("run-1"));
            assert_eq!(summary["job_state"], Value::from("Completed"));
            assert_eq!(summary["htcondor_job_id"], Value::from("4410123"));
            assert_eq!(summary["memory_mb"], 512);
        }
        other => panic!("expected Finalize, got {:?}", other),
    }

    // Everything ran over the channel authenticated for the submit
    assert_eq!(h.transport.authentication_count(), 1);
}

#[tokio::test]
async fn test_logs_of_running_job_do_not_finish_the_run() {
    let h = Harness::new();
    h.transport.on_command_stdout("condor_submit", SUBMIT_OUTPUT);
    h.transport.on_command_stdout("condor_q", "2\n");
    submit(&h.ctx, &h.request(true)).await.unwrap();
    h.transport
        .put_remote_file("chtc-jobs/mnist/job_4410123.log", JOB_LOG.as_bytes());

    let out = out_dir(h.dir.path());
    let report = fetch_logs(&h.ctx, &JobId::new("4410123"), Some(&out), None)
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Running);
    let calls = h.tracker.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[1], TrackerCall::Update { .. }));
}

#[tokio::test]
async fn test_logs_of_untracked_job_touch_no_run() {
    let h = Harness::new();
    h.transport.on_command_stdout("condor_submit", SUBMIT_OUTPUT);
    h.transport.on_command_stdout("condor_history", "4\n");
    submit(&h.ctx, &h.request(false)).await.unwrap();

    let out = out_dir(h.dir.path());
    let report = fetch_logs(&h.ctx, &JobId::new("4410123"), Some(&out), None)
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Completed);
    assert!(!report.tracked);
    assert_eq!(report.log_file, None);
    assert!(h.tracker.calls().is_empty());
}

#[tokio::test]
async fn test_logs_of_unknown_job_use_the_workdir() {
    let h = Harness::new();
    h.transport.on_command_stdout("condor_history", "4\n");
    h.transport
        .put_remote_file("chtc-jobs/job_4410999.log", JOB_LOG.as_bytes());

    let out = out_dir(h.dir.path());
    let report = fetch_logs(&h.ctx, &JobId::new("4410999"), Some(&out), None)
        .await
        .unwrap();

    assert_eq!(report.log_file, Some(out.join("job_4410999.log")));
    assert_eq!(report.metrics["runtime_seconds"], 600);
    assert_eq!(report.state, JobState::Completed);
    assert!(!report.tracked);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("not in the ledger"));
    assert!(h.tracker.calls().is_empty());
    assert!(h.rows().is_empty());
}

#[tokio::test]
async fn test_logs_from_explicit_remote_dir() {
    let h = Harness::new();
    h.transport.on_command_stdout("condor_submit", SUBMIT_OUTPUT);
    h.transport.on_command_stdout("condor_history", "4\n");
    submit(&h.ctx, &h.request(true)).await.unwrap();
    h.transport
        .put_remote_file("scratch/rerun/job_4410123.log", JOB_LOG.as_bytes());

    let out = out_dir(h.dir.path());
    let report = fetch_logs(&h.ctx, &JobId::new("4410123"), Some(&out), Some("scratch/rerun"))
        .await
        .unwrap();

    // The recorded dir was not used, but the run is still updated
    assert_eq!(report.log_file, Some(out.join("job_4410123.log")));
    assert!(!out.join("job.sub").exists());
    assert!(report.tracked);
    assert_eq!(h.tracker.calls().len(), 3);
}

#[tokio::test]
async fn test_logs_of_unknown_job_without_outputs() {
    let h = Harness::new();

    let err = fetch_logs(&h.ctx, &JobId::new("1"), Some(&out_dir(h.dir.path())), None)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("chtc-jobs"), "{}", err);
    assert!(h.tracker.calls().is_empty());
}

#[tokio::test]
async fn test_monitor_states() {
    let h = Harness::new();
    h.transport.on_command_stdout("condor_submit", SUBMIT_OUTPUT);
    h.transport.on_command_stdout("condor_q", "2\n");
    submit(&h.ctx, &h.request(true)).await.unwrap();

    let state = job_state(&h.ctx, &JobId::new("4410123")).await.unwrap();
    assert_eq!(state, JobState::Running);

    // One row per job, the run row winning over the placeholder
    let states = project_states(&h.ctx, "mnist").await.unwrap();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].0.run_id, RunId::new("run-1"));
    assert_eq!(states[0].1, JobState::Running);

    assert!(project_states(&h.ctx, "other").await.unwrap().is_empty());
}
