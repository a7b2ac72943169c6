//! In-memory transport for tests
//!
//! Keeps a set of live master channels, a scripted table of command
//! responses and an in-memory remote filesystem. Counts authentications so
//! tests can assert the one-handshake-per-ttl property.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{
    shell_join, ChannelHandle, Direction, ExecOutput, TransferSpec, Transport, TransportError,
};

#[derive(Default)]
struct State {
    live: HashSet<PathBuf>,
    responses: Vec<(String, ExecOutput)>,
    executed: Vec<String>,
    lose_channel_ops: usize,
    reject_auth: Option<String>,
    remote_files: BTreeMap<String, Vec<u8>>,
    fail_next_transfer_after: Option<usize>,
    exec_delay: Duration,
    shell_delay: Duration,
}

/// Scripted transport; see module docs
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<State>,
    authentications: AtomicUsize,
    shells: AtomicUsize,
    auth_delay: Duration,
}

impl ScriptedTransport {
    /// Create an empty transport where every command succeeds with no output
    pub fn new() -> Self {
        Self::default()
    }

    /// Make each authentication take `delay`, widening race windows
    pub fn with_auth_delay(mut self, delay: Duration) -> Self {
        self.auth_delay = delay;
        self
    }

    /// Reply with `output` to any command line containing `pattern`
    ///
    /// Earlier registrations take precedence.
    pub fn on_command(&self, pattern: &str, output: ExecOutput) {
        self.lock().responses.push((pattern.to_string(), output));
    }

    /// Shorthand for a successful reply with `stdout`
    pub fn on_command_stdout(&self, pattern: &str, stdout: &str) {
        self.on_command(
            pattern,
            ExecOutput {
                exit_code: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    /// Number of authentications performed so far
    pub fn authentication_count(&self) -> usize {
        self.authentications.load(Ordering::SeqCst)
    }

    /// Number of interactive shells opened so far
    pub fn shell_count(&self) -> usize {
        self.shells.load(Ordering::SeqCst)
    }

    /// Command lines executed so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// The next exec or transfer finds the master dead
    pub fn lose_channel_on_next_op(&self) {
        self.lose_channel_on_next_ops(1);
    }

    /// The next `count` execs or transfers each find the master dead
    pub fn lose_channel_on_next_ops(&self, count: usize) {
        self.lock().lose_channel_ops = count;
    }

    /// Kill every master channel (as if the remote host dropped them)
    pub fn drop_all_channels(&self) {
        self.lock().live.clear();
    }

    /// Reject authentications with `reason` until cleared with `None`
    pub fn reject_authentication(&self, reason: Option<&str>) {
        self.lock().reject_auth = reason.map(str::to_string);
    }

    /// Delay every exec by `delay`
    pub fn set_exec_delay(&self, delay: Duration) {
        self.lock().exec_delay = delay;
    }

    /// Keep interactive shells open for `delay`
    pub fn set_shell_delay(&self, delay: Duration) {
        self.lock().shell_delay = delay;
    }

    /// Place a file on the fake remote host
    pub fn put_remote_file(&self, path: &str, contents: &[u8]) {
        self.lock()
            .remote_files
            .insert(path.to_string(), contents.to_vec());
    }

    /// Read a file from the fake remote host
    pub fn remote_file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().remote_files.get(path).cloned()
    }

    /// The next transfer writes `bytes` of the first changed file, then fails
    pub fn fail_next_transfer_after(&self, bytes: usize) {
        self.lock().fail_next_transfer_after = Some(bytes);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("scripted transport state poisoned")
    }

    fn check_channel(&self, handle: &ChannelHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.lose_channel_ops > 0 {
            state.lose_channel_ops -= 1;
            state.live.remove(&handle.control_path);
            return Err(TransportError::ChannelLost(
                "mux_client_request_session: read from master failed".to_string(),
            ));
        }
        if !state.live.contains(&handle.control_path) {
            return Err(TransportError::ChannelLost(
                "Control socket connect: No such file or directory".to_string(),
            ));
        }
        Ok(())
    }

    fn upload(&self, spec: &TransferSpec) -> Result<u64, TransportError> {
        let files = collect_local_files(&spec.local)?;
        let base = spec.remote.trim_end_matches('/');
        let mut state = self.lock();
        let mut sent = 0u64;

        for (rel, contents) in files {
            let key = if rel.is_empty() {
                base.to_string()
            } else {
                format!("{}/{}", base, rel)
            };
            if state.remote_files.get(&key) == Some(&contents) {
                continue;
            }
            if let Some(limit) = state.fail_next_transfer_after.take() {
                let cut = limit.min(contents.len());
                state.remote_files.insert(key, contents[..cut].to_vec());
                return Err(TransportError::Failed("connection reset by peer".to_string()));
            }
            sent += contents.len() as u64;
            state.remote_files.insert(key, contents);
        }
        Ok(sent)
    }

    fn download(&self, spec: &TransferSpec) -> Result<u64, TransportError> {
        let base = spec.remote.trim_end_matches('/').to_string();
        let prefix = format!("{}/", base);
        let (matches, mut fail_after) = {
            let mut state = self.lock();
            let matches: Vec<(String, Vec<u8>)> = state
                .remote_files
                .iter()
                .filter(|(k, _)| **k == base || k.starts_with(&prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            (matches, state.fail_next_transfer_after.take())
        };

        if matches.is_empty() {
            return Err(TransportError::Failed(format!(
                "rsync: link_stat \"{}\" failed: No such file or directory",
                spec.remote
            )));
        }

        let mut received = 0u64;
        for (key, contents) in matches {
            let target = if key == base {
                spec.local.clone()
            } else {
                spec.local.join(&key[prefix.len()..])
            };
            if std::fs::read(&target).ok().as_deref() == Some(contents.as_slice()) {
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if let Some(limit) = fail_after.take() {
                let cut = limit.min(contents.len());
                std::fs::write(&target, &contents[..cut])?;
                return Err(TransportError::Failed("connection reset by peer".to_string()));
            }
            std::fs::write(&target, &contents)?;
            received += contents.len() as u64;
        }
        Ok(received)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn authenticate(
        &self,
        handle: &ChannelHandle,
        _ttl: Duration,
    ) -> Result<(), TransportError> {
        if !self.auth_delay.is_zero() {
            tokio::time::sleep(self.auth_delay).await;
        }
        let mut state = self.lock();
        if let Some(reason) = &state.reject_auth {
            return Err(TransportError::AuthRejected(reason.clone()));
        }
        self.authentications.fetch_add(1, Ordering::SeqCst);
        state.live.insert(handle.control_path.clone());
        Ok(())
    }

    async fn probe(&self, handle: &ChannelHandle) -> bool {
        self.lock().live.contains(&handle.control_path)
    }

    async fn exec(
        &self,
        handle: &ChannelHandle,
        argv: &[String],
    ) -> Result<ExecOutput, TransportError> {
        self.check_channel(handle)?;
        let line = shell_join(argv);
        let delay = {
            let mut state = self.lock();
            state.executed.push(line.clone());
            state.exec_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        Ok(state
            .responses
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    async fn transfer(
        &self,
        handle: &ChannelHandle,
        spec: &TransferSpec,
    ) -> Result<u64, TransportError> {
        self.check_channel(handle)?;
        match spec.direction {
            Direction::Upload => self.upload(spec),
            Direction::Download => self.download(spec),
        }
    }

    async fn shell(
        &self,
        handle: &ChannelHandle,
        _command: &[String],
    ) -> Result<i32, TransportError> {
        self.check_channel(handle)?;
        self.shells.fetch_add(1, Ordering::SeqCst);
        let delay = self.lock().shell_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(0)
    }

    async fn close(&self, handle: &ChannelHandle) -> Result<(), TransportError> {
        self.lock().live.remove(&handle.control_path);
        Ok(())
    }
}

/// Files under `root` as (relative path, contents); a plain file has an empty relative path
fn collect_local_files(root: &Path) -> std::io::Result<Vec<(String, Vec<u8>)>> {
    let mut out = Vec::new();
    if root.is_file() {
        out.push((String::new(), std::fs::read(root)?));
        return Ok(out);
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                out.push((rel, std::fs::read(&path)?));
            }
        }
    }
    out.sort();
    Ok(out)
}
