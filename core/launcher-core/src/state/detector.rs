//! Classifies a detected install state into a startup path.
//!
//! ```text
//! StateFlag 0..=2, 8   → NotInterrupted
//! StateFlag 3..=7      → Interrupted
//!   + staged Mode == 3 → InterruptedRepair (carries the staged RepairFiles)
//! ```

use serde::Serialize;

use super::load_install_state;
use crate::storage::InstallLayout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResumeKind {
    NotInterrupted,
    Interrupted,
    /// Resume a scoped repair of exactly these files.
    InterruptedRepair {
        repair_files: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub state_flag: i64,
    /// AppId recorded on disk.
    pub on_disk_app_id: String,
    /// True when the on-disk AppId differs from the one we were asked about.
    pub app_id_drift: bool,
    pub origin_version: String,
    pub target_version: String,
    pub kind: ResumeKind,
}

impl Classification {
    pub fn is_interrupted(&self) -> bool {
        !matches!(self.kind, ResumeKind::NotInterrupted)
    }

    pub fn is_repair_mode(&self) -> bool {
        matches!(self.kind, ResumeKind::InterruptedRepair { .. })
    }

    pub fn repair_files(&self) -> &[String] {
        match &self.kind {
            ResumeKind::InterruptedRepair { repair_files } => repair_files,
            _ => &[],
        }
    }
}

/// Returns `None` when there is no usable state on disk (fresh install).
pub fn detect(layout: &InstallLayout, app_id: &str, content_id: &str) -> Option<Classification> {
    let state = load_install_state(layout, app_id)?;

    let app_id_drift = state.app_id != app_id;
    if app_id_drift {
        tracing::info!(
            configured = app_id,
            on_disk = %state.app_id,
            "Install state reports a different app id"
        );
    }

    let kind = if !state.is_interrupted() {
        ResumeKind::NotInterrupted
    } else {
        match state.staged(content_id) {
            Some(staged) if staged.is_repair() => ResumeKind::InterruptedRepair {
                repair_files: staged.repair_files.clone(),
            },
            _ => ResumeKind::Interrupted,
        }
    };

    let classification = Classification {
        state_flag: state.state_flag,
        on_disk_app_id: state.app_id.clone(),
        app_id_drift,
        origin_version: state.installed_version(content_id),
        target_version: state.staged_version(content_id),
        kind,
    };

    tracing::debug!(
        state_flag = classification.state_flag,
        origin = %classification.origin_version,
        target = %classification.target_version,
        interrupted = classification.is_interrupted(),
        repair = classification.is_repair_mode(),
        "Local install state classified"
    );

    Some(classification)
}
