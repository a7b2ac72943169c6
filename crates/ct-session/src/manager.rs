//! Session manager: one authenticated channel per endpoint
//!
//! # Lifecycle
//!
//! ```text
//! Absent --connect--> Live --(ttl elapsed | probe fails)--> Stale
//!    ^                  |                                      |
//!    +---disconnect-----+<-------------connect-----------------+
//! ```
//!
//! Every entry point that needs the channel (`execute`, `upload_path`,
//! `download_path`, `interactive_shell`) auto-connects. Auto-connecting from
//! `Stale` is the one unavoidable re-authentication; it is logged as a
//! warning and reported through [`ConnectOutcome::Reestablished`].
//!
//! # Locking
//!
//! Within a process, a per-endpoint async mutex serialises `connect`. Across
//! processes, the `Absent → Live` transition happens under an exclusive
//! advisory lock on the endpoint's lock file, followed by a re-check, so
//! racing callers converge on a single master channel. Commands and
//! transfers themselves are not serialised: they run as independent
//! streams over the shared channel.

use dashmap::DashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use ct_core::config::SessionConfig;
use ct_core::lockfile::{read_lock_holder, LockGuard};
use ct_core::time::{current_time_millis, elapsed_duration, has_expired};
use ct_core::{Endpoint, SessionError};

use crate::marker::{MarkerStore, SessionMarker};
use crate::session::{
    CommandOutput, ConnectOutcome, Connection, Session, SessionStatus, StaleReason,
    TransferReport,
};
use crate::transport::{
    shell_join, ChannelHandle, Direction, TransferSpec, Transport, TransportError,
};

/// How often a waiter re-tries the cross-process connect lock
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Operations that run over the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Execute,
    Upload,
    Download,
    Shell,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Execute => "execute",
            Op::Upload => "upload",
            Op::Download => "download",
            Op::Shell => "shell",
        }
    }

    fn is_transfer(self) -> bool {
        matches!(self, Op::Upload | Op::Download)
    }
}

/// Decrements the held-shell counter when an interactive session ends
struct ShellGuard(Arc<AtomicUsize>);

impl ShellGuard {
    fn hold(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ShellGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the lifecycle of the shared channel to each endpoint
pub struct SessionManager<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    markers: MarkerStore,
    /// In-process connect serialisation, one mutex per endpoint
    gates: DashMap<Endpoint, Arc<Mutex<()>>>,
    /// Cancelled by `disconnect` to abandon in-flight operations
    cancels: DashMap<Endpoint, CancellationToken>,
    active_shells: Arc<AtomicUsize>,
}

impl<T: Transport> SessionManager<T> {
    /// Create a manager that owns its transport
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self::with_shared_transport(Arc::new(transport), config)
    }

    /// Create a manager over a transport shared with other managers
    pub fn with_shared_transport(transport: Arc<T>, config: SessionConfig) -> Self {
        let markers = MarkerStore::new(config.control_dir.clone());
        Self {
            transport,
            config,
            markers,
            gates: DashMap::new(),
            cancels: DashMap::new(),
            active_shells: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    /// Number of interactive shells currently held through this manager
    pub fn active_shells(&self) -> usize {
        self.active_shells.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connect with the configured ttl; see [`Self::connect_with_ttl`]
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, SessionError> {
        self.connect_with_ttl(endpoint, self.config.ttl).await
    }

    /// Ensure a live channel exists for `endpoint`
    ///
    /// Returns the existing channel untouched (`Reused`) when one is live;
    /// otherwise authenticates exactly once, even when several callers or
    /// processes race here.
    pub async fn connect_with_ttl(
        &self,
        endpoint: &Endpoint,
        ttl: Duration,
    ) -> Result<Connection, SessionError> {
        let gate = self.gate(endpoint);
        let _gate = gate.lock().await;

        if let (SessionStatus::Live { .. }, Some(marker)) = self.inspect(endpoint).await? {
            return Ok(Connection {
                session: marker.into(),
                outcome: ConnectOutcome::Reused,
            });
        }

        let _lock = self.acquire_control_lock(endpoint).await?;

        // Another process may have established the channel while we waited
        let outcome = match self.inspect(endpoint).await? {
            (SessionStatus::Live { .. }, Some(marker)) => {
                tracing::debug!(endpoint = %endpoint, "Joined channel established by another caller");
                return Ok(Connection {
                    session: marker.into(),
                    outcome: ConnectOutcome::Reused,
                });
            }
            (SessionStatus::Stale { reason }, _) => {
                tracing::warn!(
                    endpoint = %endpoint,
                    "Channel is stale ({}); re-authentication required",
                    reason
                );
                self.teardown(endpoint).await?;
                ConnectOutcome::Reestablished
            }
            _ => ConnectOutcome::Established,
        };

        self.establish(endpoint, ttl, outcome).await
    }

    /// Replace any existing channel with a freshly authenticated one
    pub async fn connect_replace(&self, endpoint: &Endpoint) -> Result<Connection, SessionError> {
        let gate = self.gate(endpoint);
        let _gate = gate.lock().await;
        let _lock = self.acquire_control_lock(endpoint).await?;

        let outcome = if self.teardown(endpoint).await? {
            ConnectOutcome::Reestablished
        } else {
            ConnectOutcome::Established
        };
        self.establish(endpoint, self.config.ttl, outcome).await
    }

    /// Liveness of the channel, probing with a bounded timeout
    pub async fn status(&self, endpoint: &Endpoint) -> Result<SessionStatus, SessionError> {
        Ok(self.inspect(endpoint).await?.0)
    }

    /// The recorded channel descriptor, without probing
    pub fn describe(&self, endpoint: &Endpoint) -> Result<Option<Session>, SessionError> {
        Ok(self
            .markers
            .read(endpoint)
            .map_err(|source| io_error(endpoint, source))?
            .map(Session::from))
    }

    /// Tear the channel down, cancelling every in-flight operation on it
    ///
    /// Returns whether a channel existed. Disconnecting an absent endpoint
    /// is a no-op.
    pub async fn disconnect(&self, endpoint: &Endpoint) -> Result<bool, SessionError> {
        let gate = self.gate(endpoint);
        let _gate = gate.lock().await;
        let _lock = self.acquire_control_lock(endpoint).await?;

        if let Some((_, token)) = self.cancels.remove(endpoint) {
            token.cancel();
        }

        let existed = self.teardown(endpoint).await?;
        if existed {
            tracing::info!(endpoint = %endpoint, "Channel closed");
        }
        Ok(existed)
    }

    // ------------------------------------------------------------------
    // Remote operations
    // ------------------------------------------------------------------

    /// Run `argv` on the remote host over the shared channel
    ///
    /// A non-zero exit is returned as `RemoteExecutionFailed` and leaves the
    /// channel live. A lost channel is re-established once and the command
    /// retried; a second loss is `ChannelUnavailable`.
    pub async fn execute(
        &self,
        endpoint: &Endpoint,
        argv: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, SessionError> {
        let command = shell_join(argv);
        if argv.is_empty() {
            return Err(SessionError::RemoteExecutionFailed {
                endpoint: endpoint.clone(),
                command,
                exit_code: 127,
                stderr: "empty command".to_string(),
            });
        }

        let started_at_ms = current_time_millis();
        let transport = Arc::clone(&self.transport);
        let argv: Arc<[String]> = argv.into();
        let (output, connection) = self
            .run_on_channel(endpoint, Op::Execute, timeout, move |handle| {
                let transport = Arc::clone(&transport);
                let argv = Arc::clone(&argv);
                async move { transport.exec(&handle, &argv).await }
            })
            .await?;
        let finished_at_ms = current_time_millis();

        tracing::debug!(
            endpoint = %endpoint,
            exit_code = output.exit_code,
            "Executed `{}`",
            command
        );

        if output.exit_code != 0 {
            return Err(SessionError::RemoteExecutionFailed {
                endpoint: endpoint.clone(),
                command,
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            started_at_ms,
            finished_at_ms,
            connection,
        })
    }

    /// Upload `local` (file or directory contents) to `remote`
    pub async fn upload_path(
        &self,
        endpoint: &Endpoint,
        local: &Path,
        remote: &str,
    ) -> Result<TransferReport, SessionError> {
        if !local.exists() {
            return Err(SessionError::TransferFailed {
                endpoint: endpoint.clone(),
                operation: Op::Upload.name(),
                reason: format!("local path {:?} does not exist", local),
            });
        }
        let spec = TransferSpec {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            direction: Direction::Upload,
        };
        self.transfer(endpoint, spec, self.config.transfer_timeout)
            .await
    }

    /// Download `remote` into `local`
    pub async fn download_path(
        &self,
        endpoint: &Endpoint,
        remote: &str,
        local: &Path,
    ) -> Result<TransferReport, SessionError> {
        let spec = TransferSpec {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            direction: Direction::Download,
        };
        self.transfer(endpoint, spec, self.config.transfer_timeout)
            .await
    }

    /// Recursive, content-diffing transfer over the shared channel
    ///
    /// Not atomic: a failed transfer may leave partial data behind and is
    /// meant to be re-run.
    pub async fn transfer(
        &self,
        endpoint: &Endpoint,
        spec: TransferSpec,
        timeout: Duration,
    ) -> Result<TransferReport, SessionError> {
        let op = match spec.direction {
            Direction::Upload => Op::Upload,
            Direction::Download => Op::Download,
        };
        let started_at_ms = current_time_millis();
        let transport = Arc::clone(&self.transport);
        let spec = Arc::new(spec);
        let (bytes_transferred, connection) = self
            .run_on_channel(endpoint, op, timeout, move |handle| {
                let transport = Arc::clone(&transport);
                let spec = Arc::clone(&spec);
                async move { transport.transfer(&handle, &spec).await }
            })
            .await?;

        tracing::debug!(
            endpoint = %endpoint,
            bytes = bytes_transferred,
            "{} complete",
            op.name()
        );

        Ok(TransferReport {
            bytes_transferred,
            started_at_ms,
            finished_at_ms: current_time_millis(),
            connection,
        })
    }

    /// Hand the terminal to an interactive session over the channel
    ///
    /// The shell is a secondary stream: other callers keep executing over
    /// the same channel while it is held.
    pub async fn interactive_shell(
        &self,
        endpoint: &Endpoint,
        command: &[String],
    ) -> Result<i32, SessionError> {
        let connection = self.auto_connect(endpoint, Op::Shell).await?;
        let token = self.cancel_token(endpoint);
        let _held = ShellGuard::hold(&self.active_shells);
        let handle = connection.session.handle();

        let result = tokio::select! {
            _ = token.cancelled() => {
                return Err(SessionError::Cancelled {
                    endpoint: endpoint.clone(),
                    operation: Op::Shell.name(),
                });
            }
            result = self.transport.shell(&handle, command) => result,
        };

        match result {
            Ok(code) => {
                self.touch(endpoint);
                Ok(code)
            }
            Err(err) => Err(self.failure(endpoint, Op::Shell, err)),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn gate(&self, endpoint: &Endpoint) -> Arc<Mutex<()>> {
        Arc::clone(&self.gates.entry(endpoint.clone()).or_default())
    }

    fn cancel_token(&self, endpoint: &Endpoint) -> CancellationToken {
        self.cancels.entry(endpoint.clone()).or_default().clone()
    }

    /// Status plus the marker it was derived from
    async fn inspect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(SessionStatus, Option<SessionMarker>), SessionError> {
        let marker = match self
            .markers
            .read(endpoint)
            .map_err(|source| io_error(endpoint, source))?
        {
            Some(marker) => marker,
            None => return Ok((SessionStatus::Absent, None)),
        };

        if has_expired(marker.established_at_ms, marker.ttl()) {
            return Ok((
                SessionStatus::Stale {
                    reason: StaleReason::TtlElapsed,
                },
                Some(marker),
            ));
        }

        let handle = ChannelHandle {
            endpoint: endpoint.clone(),
            control_path: marker.control_path.clone(),
        };
        let alive = tokio::time::timeout(self.config.probe_timeout, self.transport.probe(&handle))
            .await
            .unwrap_or(false);

        let status = if alive {
            SessionStatus::Live {
                age: elapsed_duration(marker.established_at_ms),
            }
        } else {
            SessionStatus::Stale {
                reason: StaleReason::ProbeFailed,
            }
        };
        Ok((status, Some(marker)))
    }

    async fn acquire_control_lock(&self, endpoint: &Endpoint) -> Result<LockGuard, SessionError> {
        let path = self.markers.paths(endpoint).lock;
        let deadline = Instant::now() + self.config.connect_timeout;

        loop {
            match LockGuard::try_acquire(&path) {
                Ok(Some(guard)) => return Ok(guard),
                Ok(None) => {}
                Err(source) => return Err(io_error(endpoint, source)),
            }
            if Instant::now() >= deadline {
                if let Ok(Some(pid)) = read_lock_holder(&path) {
                    tracing::warn!(endpoint = %endpoint, pid, "Connect lock still held by another process");
                }
                return Err(SessionError::Timeout {
                    endpoint: endpoint.clone(),
                    operation: "connect",
                    timeout: self.config.connect_timeout,
                });
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    /// Authenticate and record the new channel; caller holds the control lock
    async fn establish(
        &self,
        endpoint: &Endpoint,
        ttl: Duration,
        outcome: ConnectOutcome,
    ) -> Result<Connection, SessionError> {
        let handle = ChannelHandle {
            endpoint: endpoint.clone(),
            control_path: self.markers.paths(endpoint).socket,
        };

        tracing::info!(endpoint = %endpoint, ttl = ?ttl, "Authenticating new channel");
        let authenticated = tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.authenticate(&handle, ttl),
        )
        .await
        .map_err(|_| SessionError::Timeout {
            endpoint: endpoint.clone(),
            operation: "connect",
            timeout: self.config.connect_timeout,
        })?;

        match authenticated {
            Ok(()) => {}
            Err(TransportError::AuthRejected(reason)) => {
                return Err(SessionError::AuthenticationFailed {
                    endpoint: endpoint.clone(),
                    reason,
                });
            }
            Err(other) => {
                return Err(SessionError::ChannelUnavailable {
                    endpoint: endpoint.clone(),
                    operation: "connect",
                    reason: other.to_string(),
                });
            }
        }

        let marker = SessionMarker::new(endpoint.clone(), handle.control_path, ttl);
        self.markers
            .write(&marker)
            .map_err(|source| io_error(endpoint, source))?;

        Ok(Connection {
            session: marker.into(),
            outcome,
        })
    }

    /// Close the recorded channel and forget it; caller holds the control lock
    async fn teardown(&self, endpoint: &Endpoint) -> Result<bool, SessionError> {
        let marker = match self
            .markers
            .read(endpoint)
            .map_err(|source| io_error(endpoint, source))?
        {
            Some(marker) => marker,
            None => return Ok(false),
        };

        let handle = ChannelHandle {
            endpoint: endpoint.clone(),
            control_path: marker.control_path,
        };
        if let Err(e) = self.transport.close(&handle).await {
            tracing::warn!(endpoint = %endpoint, "Failed to close channel cleanly: {}", e);
        }

        self.markers
            .remove(endpoint)
            .map_err(|source| io_error(endpoint, source))?;
        Ok(true)
    }

    /// Connect on behalf of an operation, reporting how the channel was obtained
    async fn auto_connect(&self, endpoint: &Endpoint, op: Op) -> Result<Connection, SessionError> {
        let connection = match self.connect(endpoint).await {
            Ok(connection) => connection,
            Err(err @ SessionError::AuthenticationFailed { .. }) => return Err(err),
            Err(err) => {
                return Err(SessionError::ChannelUnavailable {
                    endpoint: endpoint.clone(),
                    operation: op.name(),
                    reason: err.to_string(),
                })
            }
        };

        match connection.outcome {
            ConnectOutcome::Reused => {}
            ConnectOutcome::Established => {
                tracing::info!(endpoint = %endpoint, "No channel for {}, authenticated a new one", op.name());
            }
            ConnectOutcome::Reestablished => {
                tracing::warn!(
                    endpoint = %endpoint,
                    "Channel had gone stale; re-authenticated for {}",
                    op.name()
                );
            }
        }
        Ok(connection)
    }

    /// Run one operation with auto-connect, timeout, cancellation and a single reconnect
    async fn run_on_channel<R, F, Fut>(
        &self,
        endpoint: &Endpoint,
        op: Op,
        timeout: Duration,
        run: F,
    ) -> Result<(R, ConnectOutcome), SessionError>
    where
        F: Fn(ChannelHandle) -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
    {
        let token = self.cancel_token(endpoint);
        let mut connection = self.auto_connect(endpoint, op).await?;
        let mut outcome = connection.outcome;
        let mut reconnected = false;

        loop {
            let attempt = tokio::select! {
                _ = token.cancelled() => {
                    return Err(SessionError::Cancelled {
                        endpoint: endpoint.clone(),
                        operation: op.name(),
                    });
                }
                attempt = tokio::time::timeout(timeout, run(connection.session.handle())) => attempt,
            };

            match attempt {
                Err(_) => {
                    return Err(SessionError::Timeout {
                        endpoint: endpoint.clone(),
                        operation: op.name(),
                        timeout,
                    });
                }
                Ok(Ok(value)) => {
                    self.touch(endpoint);
                    return Ok((value, outcome));
                }
                Ok(Err(TransportError::ChannelLost(reason))) if !reconnected => {
                    tracing::warn!(
                        endpoint = %endpoint,
                        "Channel lost during {} ({}); reconnecting once",
                        op.name(),
                        reason
                    );
                    reconnected = true;
                    connection = self.auto_connect(endpoint, op).await?;
                    outcome = outcome.max(connection.outcome);
                }
                Ok(Err(TransportError::ChannelLost(reason))) => {
                    return Err(SessionError::ChannelUnavailable {
                        endpoint: endpoint.clone(),
                        operation: op.name(),
                        reason,
                    });
                }
                Ok(Err(err)) => return Err(self.failure(endpoint, op, err)),
            }
        }
    }

    fn failure(&self, endpoint: &Endpoint, op: Op, err: TransportError) -> SessionError {
        match err {
            TransportError::AuthRejected(reason) => SessionError::AuthenticationFailed {
                endpoint: endpoint.clone(),
                reason,
            },
            other if op.is_transfer() => SessionError::TransferFailed {
                endpoint: endpoint.clone(),
                operation: op.name(),
                reason: other.to_string(),
            },
            other => SessionError::ChannelUnavailable {
                endpoint: endpoint.clone(),
                operation: op.name(),
                reason: other.to_string(),
            },
        }
    }

    /// Record activity on the marker; skipped while the control lock is busy
    fn touch(&self, endpoint: &Endpoint) {
        let lock_path = self.markers.paths(endpoint).lock;
        let _lock = match LockGuard::try_acquire(&lock_path) {
            Ok(Some(guard)) => guard,
            _ => return,
        };
        if let Ok(Some(mut marker)) = self.markers.read(endpoint) {
            marker.last_activity_ms = current_time_millis();
            if let Err(e) = self.markers.write(&marker) {
                tracing::debug!(endpoint = %endpoint, "Failed to update last activity: {}", e);
            }
        }
    }
}

fn io_error(endpoint: &Endpoint, source: std::io::Error) -> SessionError {
    SessionError::Io {
        endpoint: endpoint.clone(),
        source,
    }
}
