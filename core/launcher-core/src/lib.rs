//! # launcher-core
//!
//! Supervises the external download worker for the game launcher: starts and
//! stops it, relays its telemetry, classifies interrupted installs, and
//! verifies installed files against their manifest to drive repairs.
//!
//! ## Design Principles
//!
//! - **Synchronous**: std threads only at the API surface. The ZeroMQ
//!   transport runs a private one-thread runtime behind a blocking trait.
//! - **Read-only over worker data**: state files and manifests are written by
//!   the worker; this crate never modifies them.
//! - **Graceful degradation**: missing or corrupt local state yields empty
//!   results, failed lookups yield `None`, and worker failures are logged.
//!   Nothing in here brings down the host process.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use launcher_core::{LauncherEngine, LauncherPaths};
//!
//! let engine = LauncherEngine::load(LauncherPaths::with_root("."));
//! if let Some(state) = engine.detect_local_state() {
//!     println!("interrupted: {}", state.is_interrupted());
//! }
//! let broken = engine.verify_integrity(|done, total| println!("{done}/{total}"));
//! if !broken.is_empty() {
//!     engine.repair_files(&broken, |outcome| println!("{:?}", outcome.exit))?;
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod observer;
pub mod repair;
pub mod state;
pub mod storage;
pub mod supervisor;
pub mod updates;
pub mod verify;

pub use backoff::RetryPolicy;
pub use config::{AppConfig, DownloadConfig, GameConfig, LauncherConfig};
pub use engine::LauncherEngine;
pub use error::{LauncherError, Result};
pub use observer::{NullObserver, ProgressObserver};
pub use state::{detect, Classification, ContentRecord, InstallState, ResumeKind};
pub use storage::{InstallLayout, LauncherPaths};
pub use supervisor::{
    ProcessTerminator, SessionExit, SessionOutcome, StopOutcome, Supervisor, SupervisorConfig,
    SystemTerminator, WorkerParams,
};
pub use updates::{LatestVersion, UpdateCheck, VersionSource};
pub use verify::verify;

pub use dlworker_protocol::{CorrelationToken, DownloadProgress, PhaseProgress};
