//! Supervisor sessions against shell-script workers.
#![cfg(unix)]

use launcher_core::ipc::{Transport, TransportFactory};
use launcher_core::{
    LauncherError, NullObserver, ProcessTerminator, Result, SessionExit, StopOutcome, Supervisor,
    SupervisorConfig, SystemTerminator, WorkerParams,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// Serializes script creation and spawning so no concurrent fork holds a
// write handle on a freshly written script (ETXTBSY).
static SESSION_LOCK: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SESSION_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_worker(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("worker.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write worker script");
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}

/// Sends one telemetry message on first poll (so a token is known), then idles.
struct TokenTransport {
    greeted: bool,
    sent: Arc<Mutex<Vec<Vec<Vec<u8>>>>>,
}

impl Transport for TokenTransport {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<Vec<u8>>>> {
        if !self.greeted {
            self.greeted = true;
            return Ok(Some(vec![
                b"worker-1".to_vec(),
                b"4".to_vec(),
                br#"{"StateFlags": 4}"#.to_vec(),
            ]));
        }
        thread::sleep(timeout);
        Ok(None)
    }

    fn send(&mut self, frames: Vec<Vec<u8>>) -> Result<()> {
        self.sent.lock().unwrap().push(frames);
        Ok(())
    }

    fn close(&mut self) {}
}

#[derive(Default)]
struct TokenTransportFactory {
    sent: Arc<Mutex<Vec<Vec<Vec<u8>>>>>,
}

impl TransportFactory for TokenTransportFactory {
    fn open(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(TokenTransport {
            greeted: false,
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct UnavailableTransport;

impl TransportFactory for UnavailableTransport {
    fn open(&self) -> Result<Box<dyn Transport>> {
        Err(LauncherError::Transport("ports busy".to_string()))
    }
}

#[derive(Default)]
struct CountingTerminator {
    calls: AtomicUsize,
}

impl ProcessTerminator for CountingTerminator {
    fn kill_tree(&self, pid: u32) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        SystemTerminator.kill_tree(pid)
    }
}

fn supervisor(
    transports: Arc<dyn TransportFactory>,
    terminator: Arc<dyn ProcessTerminator>,
) -> Arc<Supervisor> {
    Arc::new(Supervisor::with_parts(
        SupervisorConfig {
            stop_grace: Duration::from_millis(500),
        },
        transports,
        terminator,
    ))
}

fn run_in_background(
    supervisor: &Arc<Supervisor>,
    worker: &Path,
) -> thread::JoinHandle<launcher_core::SessionOutcome> {
    let supervisor = Arc::clone(supervisor);
    let worker = worker.to_path_buf();
    thread::spawn(move || {
        supervisor
            .run(&worker, &WorkerParams::new(), Arc::new(NullObserver), |_| {})
            .expect("session should start")
    })
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not met within {:?}", timeout);
}

#[test]
fn completion_callback_runs_on_success() {
    let _serial = serial();
    let dir = TempDir::new().unwrap();
    let worker = write_worker(&dir, "echo \"$@\"");
    let supervisor = supervisor(Arc::new(UnavailableTransport), Arc::new(CountingTerminator::default()));

    let mut params = WorkerParams::new();
    params.insert("gameid", 81);
    params.insert("path", "/games/x");

    let calls = AtomicUsize::new(0);
    let outcome = supervisor
        .run(&worker, &params, Arc::new(NullObserver), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert!(outcome.success());
    assert_eq!(outcome.stdout.trim(), "--gameid:81 --path:L2dhbWVzL3g=");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(outcome.channel_exit.is_none());
    assert!(!supervisor.is_running());
}

#[test]
fn non_zero_exit_is_reported_not_raised() {
    let _serial = serial();
    let dir = TempDir::new().unwrap();
    let worker = write_worker(&dir, "echo boom >&2\nexit 3");
    let supervisor = supervisor(Arc::new(UnavailableTransport), Arc::new(CountingTerminator::default()));

    let outcome = supervisor
        .run(&worker, &WorkerParams::new(), Arc::new(NullObserver), |_| {})
        .unwrap();

    assert_eq!(outcome.exit, SessionExit::Exited { code: Some(3) });
    assert_eq!(outcome.stderr.trim(), "boom");
    assert!(!outcome.success());
}

#[test]
fn missing_worker_still_completes() {
    let _serial = serial();
    let dir = TempDir::new().unwrap();
    let supervisor = supervisor(
        Arc::new(TokenTransportFactory::default()),
        Arc::new(CountingTerminator::default()),
    );

    let calls = AtomicUsize::new(0);
    let outcome = supervisor
        .run(
            &dir.path().join("missing"),
            &WorkerParams::new(),
            Arc::new(NullObserver),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    assert!(matches!(outcome.exit, SessionExit::SpawnFailed { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!supervisor.is_running());
}

#[test]
fn panicking_callback_is_contained() {
    let _serial = serial();
    let dir = TempDir::new().unwrap();
    let worker = write_worker(&dir, "exit 0");
    let supervisor = supervisor(Arc::new(UnavailableTransport), Arc::new(CountingTerminator::default()));

    let outcome = supervisor
        .run(&worker, &WorkerParams::new(), Arc::new(NullObserver), |_| {
            panic!("front end crashed")
        })
        .unwrap();

    assert!(outcome.success());
    assert!(!supervisor.is_running());
}

#[test]
fn second_session_is_rejected_while_running() {
    let _serial = serial();
    let dir = TempDir::new().unwrap();
    let worker = write_worker(&dir, "exec sleep 30");
    let terminator = Arc::new(CountingTerminator::default());
    let supervisor = supervisor(Arc::new(UnavailableTransport), terminator.clone());

    let session = run_in_background(&supervisor, &worker);
    wait_until(Duration::from_secs(5), || supervisor.session().is_some());

    let second = supervisor.run(&worker, &WorkerParams::new(), Arc::new(NullObserver), |_| {
        panic!("must not be called")
    });
    assert!(matches!(second, Err(LauncherError::AlreadyRunning)));

    assert_eq!(supervisor.stop(), StopOutcome::Killed);
    session.join().unwrap();
}

#[test]
fn stop_without_token_kills_immediately() {
    let _serial = serial();
    let dir = TempDir::new().unwrap();
    let worker = write_worker(&dir, "exec sleep 30");
    let terminator = Arc::new(CountingTerminator::default());
    let supervisor = supervisor(Arc::new(UnavailableTransport), terminator.clone());

    let session = run_in_background(&supervisor, &worker);
    wait_until(Duration::from_secs(5), || supervisor.session().is_some());

    assert_eq!(supervisor.stop(), StopOutcome::Killed);
    let outcome = session.join().unwrap();

    assert_eq!(terminator.calls.load(Ordering::SeqCst), 1);
    assert!(outcome.killed);
    assert_eq!(outcome.exit, SessionExit::Exited { code: None });
}

#[test]
fn unresponsive_worker_is_killed_exactly_once() {
    let _serial = serial();
    let dir = TempDir::new().unwrap();
    let worker = write_worker(&dir, "exec sleep 30");
    let transports = Arc::new(TokenTransportFactory::default());
    let terminator = Arc::new(CountingTerminator::default());
    let supervisor = supervisor(transports.clone(), terminator.clone());

    let session = run_in_background(&supervisor, &worker);
    wait_until(Duration::from_secs(5), || {
        supervisor
            .session()
            .is_some_and(|handle| handle.has_correlation_token())
    });

    assert_eq!(supervisor.stop(), StopOutcome::Killed);
    let outcome = session.join().unwrap();

    assert_eq!(terminator.calls.load(Ordering::SeqCst), 1);
    assert!(outcome.killed);
    let sent = transports.sent.lock().unwrap();
    let stop_frame = vec![b"worker-1".to_vec(), b"3".to_vec()];
    assert_eq!(*sent, vec![stop_frame.clone(), stop_frame]);
}

#[test]
fn worker_exiting_within_grace_is_graceful() {
    let _serial = serial();
    let dir = TempDir::new().unwrap();
    let worker = write_worker(&dir, "sleep 1");
    let transports = Arc::new(TokenTransportFactory::default());
    let terminator = Arc::new(CountingTerminator::default());
    let supervisor = Arc::new(Supervisor::with_parts(
        SupervisorConfig {
            stop_grace: Duration::from_secs(5),
        },
        transports.clone(),
        terminator.clone(),
    ));

    let session = run_in_background(&supervisor, &worker);
    wait_until(Duration::from_secs(5), || {
        supervisor
            .session()
            .is_some_and(|handle| handle.has_correlation_token())
    });

    assert_eq!(supervisor.stop(), StopOutcome::Graceful);
    let outcome = session.join().unwrap();

    assert_eq!(terminator.calls.load(Ordering::SeqCst), 0);
    assert!(outcome.success());
    assert!(!outcome.killed);
}

#[test]
fn stop_when_idle_is_a_no_op() {
    let supervisor = supervisor(Arc::new(UnavailableTransport), Arc::new(CountingTerminator::default()));
    assert_eq!(supervisor.stop(), StopOutcome::NotRunning);
}
