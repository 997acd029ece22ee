//! Process supervision for the download worker.
//!
//! A `Supervisor` owns at most one session at a time. `run` opens the IPC
//! channel, spawns the worker, and blocks the calling thread until the worker
//! exits, so callers that need to stay responsive run it on their own thread
//! and call `stop` from elsewhere.
//!
//! ## Stop sequence
//!
//! ```text
//! no correlation token seen yet → kill process tree immediately
//! token seen                    → raise channel stop flag (stop frame x2)
//!                                 wait up to stop_grace for exit
//!                                 still alive → kill process tree (once)
//! ```

use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use sysinfo::{Pid, System};

use crate::error::{LauncherError, Result};
use crate::ipc::{ChannelExit, ChannelLoop, ChannelState, TransportFactory};
use crate::observer::ProgressObserver;

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(3);

/// Parameter keys whose values are filesystem paths. These are base64-encoded
/// on the command line so quoting never mangles them.
pub const PATH_PARAMS: &[&str] = &["path", "repairListPath"];

// ═══════════════════════════════════════════════════════════════════════════════
// Worker arguments
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered `key → value` parameters for one worker invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerParams {
    entries: Vec<(String, String)>,
}

impl WorkerParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an existing value in place.
    pub fn insert(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.entries.iter_mut().find(|(existing, _)| existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

pub fn encode_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    base64::engine::general_purpose::STANDARD.encode(path.as_bytes())
}

/// Builds the `--key:value` argument vector.
pub fn build_worker_args(params: &WorkerParams) -> Vec<String> {
    params
        .iter()
        .map(|(key, value)| {
            if PATH_PARAMS.contains(&key) {
                format!("--{}:{}", key, encode_path(value))
            } else {
                format!("--{}:{}", key, value)
            }
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Termination
// ═══════════════════════════════════════════════════════════════════════════════

/// Forced termination of a worker and everything it spawned.
pub trait ProcessTerminator: Send + Sync {
    /// Returns true if at least one process was signalled.
    fn kill_tree(&self, pid: u32) -> bool;
}

/// Kills descendants first, then the root, using a fresh process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTerminator;

impl ProcessTerminator for SystemTerminator {
    fn kill_tree(&self, pid: u32) -> bool {
        let mut sys = System::new();
        sys.refresh_processes();

        let root = Pid::from(pid as usize);
        let mut tree = vec![root];
        let mut cursor = 0;
        while cursor < tree.len() {
            let parent = tree[cursor];
            tree.extend(
                sys.processes()
                    .iter()
                    .filter(|(_, process)| process.parent() == Some(parent))
                    .map(|(child, _)| *child),
            );
            cursor += 1;
        }

        let mut killed = false;
        for target in tree.iter().rev() {
            if let Some(process) = sys.process(*target) {
                killed |= process.kill();
            }
        }
        tracing::info!(pid, processes = tree.len(), killed, "Worker process tree terminated");
        killed
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sessions
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// The worker ran and exited. `code` is `None` when killed by a signal.
    Exited { code: Option<i32> },
    /// The worker never started.
    SpawnFailed { reason: String },
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub exit: SessionExit,
    pub stdout: String,
    pub stderr: String,
    /// How the IPC loop ended; `None` when the channel could not be opened.
    pub channel_exit: Option<ChannelExit>,
    /// True when `stop` escalated to a forced kill.
    pub killed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionOutcome {
    pub fn success(&self) -> bool {
        matches!(self.exit, SessionExit::Exited { code: Some(0) })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// Another stop is already in progress for this session.
    AlreadyStopping,
    /// The worker exited through the protocol handshake.
    Graceful,
    Killed,
}

/// The live half of a session, shared with the stop path.
#[derive(Debug)]
pub struct SessionHandle {
    pid: u32,
    channel: Arc<ChannelState>,
    exited: Mutex<bool>,
    exit_signal: Condvar,
    stopping: AtomicBool,
    killed: AtomicBool,
}

impl SessionHandle {
    fn new(pid: u32, channel: Arc<ChannelState>) -> Self {
        Self {
            pid,
            channel,
            exited: Mutex::new(false),
            exit_signal: Condvar::new(),
            stopping: AtomicBool::new(false),
            killed: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn has_correlation_token(&self) -> bool {
        self.channel.has_token()
    }

    fn mark_exited(&self) {
        let mut exited = self.exited.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *exited = true;
        self.exit_signal.notify_all();
    }

    fn has_exited(&self) -> bool {
        *self.exited.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True if the worker exited within `timeout`.
    fn wait_exit(&self, timeout: Duration) -> bool {
        let exited = self.exited.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (exited, _) = self
            .exit_signal
            .wait_timeout_while(exited, timeout, |exited| !*exited)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *exited
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub stop_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    transports: Arc<dyn TransportFactory>,
    terminator: Arc<dyn ProcessTerminator>,
    running: AtomicBool,
    active: Mutex<Option<Arc<SessionHandle>>>,
}

/// Releases the single-session slot however `run` returns.
struct SlotGuard<'a> {
    supervisor: &'a Supervisor,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.supervisor.set_active(None);
        self.supervisor.running.store(false, Ordering::SeqCst);
    }
}

impl Supervisor {
    pub fn new(transports: Arc<dyn TransportFactory>) -> Self {
        Self::with_parts(SupervisorConfig::default(), transports, Arc::new(SystemTerminator))
    }

    pub fn with_parts(
        config: SupervisorConfig,
        transports: Arc<dyn TransportFactory>,
        terminator: Arc<dyn ProcessTerminator>,
    ) -> Self {
        Self {
            config,
            transports,
            terminator,
            running: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The active session, once its worker has been spawned.
    pub fn session(&self) -> Option<Arc<SessionHandle>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_active(&self, handle: Option<Arc<SessionHandle>>) {
        *self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = handle;
    }

    /// Runs one worker session to completion.
    ///
    /// Fails only with `AlreadyRunning`; every other problem is reported in
    /// the returned outcome, which `on_complete` also receives.
    pub fn run<F>(
        &self,
        worker: &Path,
        params: &WorkerParams,
        observer: Arc<dyn ProgressObserver>,
        on_complete: F,
    ) -> Result<SessionOutcome>
    where
        F: FnOnce(&SessionOutcome),
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LauncherError::AlreadyRunning);
        }
        let slot = SlotGuard { supervisor: self };
        let started_at = Utc::now();

        let channel = Arc::new(ChannelState::new());
        let channel_thread = self.spawn_channel(Arc::clone(&channel), observer);

        let args = build_worker_args(params);
        let (exit, stdout, stderr, killed) = match self.spawn_and_wait(worker, &args, &channel) {
            Ok(result) => result,
            Err(reason) => {
                tracing::error!(worker = %worker.display(), reason = %reason, "Worker failed to start");
                (SessionExit::SpawnFailed { reason }, String::new(), String::new(), false)
            }
        };

        channel.shutdown();
        let channel_exit = channel_thread.and_then(|handle| match handle.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                tracing::error!("IPC channel thread panicked");
                None
            }
        });

        drop(slot);

        let outcome = SessionOutcome {
            exit,
            stdout,
            stderr,
            channel_exit,
            killed,
            started_at,
            finished_at: Utc::now(),
        };

        if panic::catch_unwind(AssertUnwindSafe(|| on_complete(&outcome))).is_err() {
            tracing::error!("Session completion callback panicked");
        }

        Ok(outcome)
    }

    fn spawn_channel(
        &self,
        state: Arc<ChannelState>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Option<JoinHandle<ChannelExit>> {
        let transport = match self.transports.open() {
            Ok(transport) => transport,
            Err(err) => {
                tracing::warn!(error = %err, "IPC channel unavailable; worker will run without it");
                return None;
            }
        };

        let spawned = thread::Builder::new()
            .name("ipc-channel".to_string())
            .spawn(move || ChannelLoop::new(transport, state, observer).run());
        match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to start IPC channel thread");
                None
            }
        }
    }

    fn spawn_and_wait(
        &self,
        worker: &Path,
        args: &[String],
        channel: &Arc<ChannelState>,
    ) -> std::result::Result<(SessionExit, String, String, bool), String> {
        if !worker.exists() {
            return Err(format!("worker binary not found at {}", worker.display()));
        }

        let mut command = Command::new(worker);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        tracing::info!(worker = %worker.display(), args = %args.join(" "), "Starting worker");
        let child = command.spawn().map_err(|err| err.to_string())?;

        let handle = Arc::new(SessionHandle::new(child.id(), Arc::clone(channel)));
        self.set_active(Some(Arc::clone(&handle)));

        let waited = child.wait_with_output();
        handle.mark_exited();
        let killed = handle.killed.load(Ordering::SeqCst);

        let output = waited.map_err(|err| format!("failed to wait for worker: {}", err))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let code = output.status.code();

        if output.status.success() {
            tracing::info!("Worker exited");
        } else {
            tracing::warn!(code = ?code, stderr = %stderr.trim(), killed, "Worker exited with error");
        }

        Ok((SessionExit::Exited { code }, stdout, stderr, killed))
    }

    /// Stops the active session: protocol handshake first, forced kill after
    /// the grace period.
    pub fn stop(&self) -> StopOutcome {
        let Some(handle) = self.session() else {
            return StopOutcome::NotRunning;
        };
        // Reaped but not yet released: the pid may already belong to another process.
        if handle.has_exited() {
            return StopOutcome::NotRunning;
        }
        if handle.stopping.swap(true, Ordering::SeqCst) {
            return StopOutcome::AlreadyStopping;
        }

        if !handle.has_correlation_token() {
            tracing::info!(pid = handle.pid, "No worker token yet; terminating directly");
            return self.force_kill(&handle);
        }

        tracing::info!(pid = handle.pid, "Requesting worker stop over IPC");
        handle.channel.request_stop();
        if handle.wait_exit(self.config.stop_grace) {
            tracing::info!("Worker exited after stop request");
            return StopOutcome::Graceful;
        }

        tracing::warn!(
            grace_ms = self.config.stop_grace.as_millis() as u64,
            "Worker did not exit in time; killing"
        );
        self.force_kill(&handle)
    }

    fn force_kill(&self, handle: &SessionHandle) -> StopOutcome {
        handle.killed.store(true, Ordering::SeqCst);
        if !self.terminator.kill_tree(handle.pid) {
            tracing::warn!(pid = handle.pid, "No process was signalled during forced stop");
        }
        StopOutcome::Killed
    }
}
