//! Update detection against the version service.
//!
//! The HTTP clients live outside this crate; they plug in through
//! `VersionSource`. What lives here is the retry policy around them and the
//! rule for ordering two version codes by their downloadable ids.

use serde::{Deserialize, Serialize};

use crate::backoff::{retry_linear, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestVersion {
    pub version: String,
    pub app_id: u32,
    pub content_id: u32,
    pub running_process_name: String,
}

/// Remote lookups. Errors are transient failures and are retried.
pub trait VersionSource: Send + Sync {
    fn latest_version(&self, app_id: u32) -> Result<LatestVersion, String>;

    /// `Ok(None)` when the service has no id for this version.
    fn downloadable_id(&self, content_id: u32, version: &str) -> Result<Option<i64>, String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCheck {
    pub success: bool,
    pub has_update: bool,
    pub latest_version: Option<String>,
}

impl UpdateCheck {
    pub fn failed() -> Self {
        Self {
            success: false,
            has_update: false,
            latest_version: None,
        }
    }
}

pub fn fetch_latest(source: &dyn VersionSource, app_id: u32, policy: RetryPolicy) -> Option<LatestVersion> {
    retry_linear("latest_version", policy, || source.latest_version(app_id))
}

/// Id embedded in a version code such as `v2_1300` (the part after the first
/// `_`), or 0.
pub fn fallback_downloadable_id(version: &str) -> i64 {
    version
        .split_once('_')
        .and_then(|(_, rest)| rest.split('_').next())
        .and_then(|id| id.trim().parse().ok())
        .unwrap_or(0)
}

/// Resolves the downloadable id used to order versions of one content.
pub fn downloadable_id_for(
    source: &dyn VersionSource,
    content_id: u32,
    version: &str,
    policy: RetryPolicy,
) -> i64 {
    if version.trim().is_empty() {
        return 0;
    }
    let fallback = fallback_downloadable_id(version);
    retry_linear("downloadable_id", policy, || {
        source.downloadable_id(content_id, version)
    })
    .flatten()
    .unwrap_or(fallback)
}

/// Strictly newer: equal ids are not an update.
pub fn is_update_available(origin_id: i64, target_id: i64) -> bool {
    origin_id < target_id
}
