//! Scoped repair runs.
//!
//! A repair is a same-version re-fetch of an explicit file list: the list is
//! written to a temporary file, the download config is pointed at it with
//! `targetVersion = originVersion`, and a normal session runs. The list file
//! and the repair flags are always cleaned up before the caller's completion
//! callback sees the outcome.

use std::io::Write;
use tempfile::NamedTempFile;

use crate::engine::LauncherEngine;
use crate::error::{LauncherError, Result};
use crate::supervisor::SessionOutcome;

/// Writes one path per line to a fresh `.txt` temp file.
pub fn write_repair_list(files: &[String]) -> Result<NamedTempFile> {
    let mut artifact = tempfile::Builder::new()
        .prefix("repair-list-")
        .suffix(".txt")
        .tempfile()
        .map_err(|err| LauncherError::io("create repair list", err))?;
    artifact
        .write_all(files.join("\n").as_bytes())
        .and_then(|_| artifact.flush())
        .map_err(|err| LauncherError::io("write repair list", err))?;
    Ok(artifact)
}

/// Undoes the repair setup when dropped.
struct RepairGuard<'a> {
    engine: &'a LauncherEngine,
    artifact: Option<NamedTempFile>,
}

impl Drop for RepairGuard<'_> {
    fn drop(&mut self) {
        if let Some(artifact) = self.artifact.take() {
            let path = artifact.path().to_path_buf();
            match artifact.close() {
                Ok(()) => tracing::debug!(path = %path.display(), "Repair list removed"),
                Err(err) => tracing::warn!(error = %err, path = %path.display(), "Failed to remove repair list"),
            }
        }
        self.engine.update_config(|config| {
            config.download.is_repair_mode = 0;
            config.download.repair_list_path.clear();
        });
    }
}

impl LauncherEngine {
    /// Re-downloads `files` at the installed version.
    pub fn repair_files<F>(&self, files: &[String], on_finished: F) -> Result<SessionOutcome>
    where
        F: FnOnce(&SessionOutcome),
    {
        if files.is_empty() {
            return Err(LauncherError::RepairListEmpty);
        }
        if self.is_running() {
            return Err(LauncherError::AlreadyRunning);
        }

        let artifact = write_repair_list(files)?;
        let list_path = artifact.path().to_string_lossy().into_owned();
        self.update_config(|config| {
            config.download.target_version = config.download.origin_version.clone();
            config.download.is_repair_mode = 1;
            config.download.repair_list_path = list_path;
        });
        tracing::info!(files = files.len(), "Starting repair");

        let guard = RepairGuard {
            engine: self,
            artifact: Some(artifact),
        };
        // If the session never starts the closure is dropped, and the guard with it.
        self.start_download(move |outcome| {
            drop(guard);
            on_finished(outcome);
        })
    }
}
