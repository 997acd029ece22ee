//! Install-state model and resumable-state detection.
//!
//! The state file is written by the worker and re-read on every call; nothing
//! here caches it or writes it back.

mod detector;
mod types;

pub use detector::{detect, Classification, ResumeKind};
pub use types::{
    ContentRecord, InstallState, CONTENT_MODE_REPAIR, STATE_FLAG_FINALIZED,
};
pub(crate) use types::lenient_string;

use crate::storage::InstallLayout;
use fs_err as fs;

/// Loads `<install>/.dlstorage/downloading/<appId>_app.state`.
///
/// Absent or unparsable files are treated as a fresh install and yield `None`.
pub fn load_install_state(layout: &InstallLayout, app_id: &str) -> Option<InstallState> {
    let path = layout.state_file(app_id);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No install state file");
            return None;
        }
        Err(err) => {
            tracing::warn!(error = %err, "Failed to read install state");
            return None;
        }
    };

    match serde_json::from_slice(&data) {
        Ok(state) => Some(state),
        Err(err) => {
            tracing::warn!(
                error = %err,
                path = %path.display(),
                "Install state is not valid JSON; treating as fresh install"
            );
            None
        }
    }
}
