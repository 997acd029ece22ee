//! Install metadata written by the worker.
//!
//! The worker is not strict about JSON types (ids show up as numbers or
//! strings, content maps can be `null`), so decoding normalizes everything
//! into one typed shape here instead of at each use site.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;

/// Phase flag once an install is fully finalized.
pub const STATE_FLAG_FINALIZED: i64 = 8;
/// Phase flags strictly above this and below finalized mean interrupted.
const STATE_FLAG_LAST_FRESH: i64 = 2;
/// `ContentRecord::mode` value marking a staged repair.
pub const CONTENT_MODE_REPAIR: i64 = 3;

/// Version marker for one content id.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContentRecord {
    #[serde(rename = "AppContentId", default, deserialize_with = "lenient_string")]
    pub app_content_id: String,
    #[serde(rename = "DownloadableId", default, deserialize_with = "lenient_string")]
    pub downloadable_id: String,
    #[serde(rename = "Version", default, deserialize_with = "lenient_string")]
    pub version: String,
    #[serde(rename = "UseCompatibleGzip", default)]
    pub use_compatible_gzip: bool,
    #[serde(rename = "Mode", default)]
    pub mode: i64,
    #[serde(rename = "RepairFiles", default, deserialize_with = "nullable_list")]
    pub repair_files: Vec<String>,
}

impl ContentRecord {
    pub fn is_repair(&self) -> bool {
        self.mode == CONTENT_MODE_REPAIR
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InstallState {
    #[serde(rename = "Name", default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(rename = "AppId", default = "default_app_id", deserialize_with = "lenient_string")]
    pub app_id: String,
    #[serde(rename = "StateFlag", default)]
    pub state_flag: i64,
    #[serde(default, deserialize_with = "content_map")]
    pub installed_contents: HashMap<String, ContentRecord>,
    #[serde(default, deserialize_with = "content_map")]
    pub staged_contents: HashMap<String, ContentRecord>,
}

impl InstallState {
    pub fn is_interrupted(&self) -> bool {
        self.state_flag > STATE_FLAG_LAST_FRESH && self.state_flag < STATE_FLAG_FINALIZED
    }

    pub fn is_finalized(&self) -> bool {
        self.state_flag == STATE_FLAG_FINALIZED
    }

    pub fn installed(&self, content_id: &str) -> Option<&ContentRecord> {
        self.installed_contents.get(content_id)
    }

    pub fn staged(&self, content_id: &str) -> Option<&ContentRecord> {
        self.staged_contents.get(content_id)
    }

    /// Installed version of a content id, empty when there is no record.
    pub fn installed_version(&self, content_id: &str) -> String {
        self.installed(content_id)
            .map(|record| record.version.clone())
            .unwrap_or_default()
    }

    /// Staged (target) version of a content id, empty when there is no record.
    pub fn staged_version(&self, content_id: &str) -> String {
        self.staged(content_id)
            .map(|record| record.version.clone())
            .unwrap_or_default()
    }
}

fn default_app_id() -> String {
    "0".to_string()
}

pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(value) => value,
        Value::Number(value) => value.to_string(),
        Value::Bool(value) => value.to_string(),
        _ => String::new(),
    })
}

fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Vec<Value>>::deserialize(deserializer)?;
    Ok(value
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| match item {
            Value::String(path) => Some(path),
            _ => None,
        })
        .collect())
}

// Entries that are not objects, or do not decode, are dropped.
fn content_map<'de, D>(deserializer: D) -> Result<HashMap<String, ContentRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Map<String, Value>>::deserialize(deserializer)?;
    Ok(value
        .unwrap_or_default()
        .into_iter()
        .filter(|(_, record)| record.is_object())
        .filter_map(|(content_id, record)| {
            serde_json::from_value::<ContentRecord>(record)
                .ok()
                .map(|record| (content_id, record))
        })
        .collect())
}
