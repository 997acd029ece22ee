//! Progress snapshots decoded from worker telemetry payloads.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_RATE_DISPLAY: &str = "0.00 B/s";

/// Rate and completion for one phase of a worker run.
///
/// `fraction_complete` is passed through exactly as the worker reports it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseProgress {
    pub rate: f64,
    pub rate_display: String,
    pub bytes: u64,
    pub fraction_complete: f64,
}

impl Default for PhaseProgress {
    fn default() -> Self {
        Self {
            rate: 0.0,
            rate_display: DEFAULT_RATE_DISPLAY.to_string(),
            bytes: 0,
            fraction_complete: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub state_flags: i64,
    pub text_key: String,
    /// Head/index phase.
    pub head: PhaseProgress,
    pub download: PhaseProgress,
    pub build: PhaseProgress,
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self {
            state_flags: -1,
            text_key: String::new(),
            head: PhaseProgress::default(),
            download: PhaseProgress::default(),
            build: PhaseProgress::default(),
        }
    }
}

// Flat layout the worker publishes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawProgress {
    #[serde(default = "default_state_flags")]
    state_flags: i64,
    #[serde(default)]
    show_text_key: String,

    #[serde(default)]
    show_download_head_rate: f64,
    #[serde(default = "default_rate_display")]
    show_download_head_rate_str: String,
    #[serde(default, deserialize_with = "lenient_size")]
    show_download_head_size: u64,
    #[serde(default)]
    show_download_head_percent: f64,

    #[serde(default)]
    show_download_rate: f64,
    #[serde(default = "default_rate_display")]
    show_download_rate_str: String,
    #[serde(default, deserialize_with = "lenient_size")]
    show_download_size: u64,
    #[serde(default)]
    show_download_percent: f64,

    #[serde(default)]
    show_build_rate: f64,
    #[serde(default = "default_rate_display")]
    show_build_rate_str: String,
    #[serde(default, deserialize_with = "lenient_size")]
    show_build_size: u64,
    #[serde(default)]
    show_build_percent: f64,
}

fn default_state_flags() -> i64 {
    -1
}

fn default_rate_display() -> String {
    DEFAULT_RATE_DISPLAY.to_string()
}

// Any JSON number, clamped into `u64`. Non-numbers read as 0.
fn lenient_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().map(|value| value.max(0.0) as u64))
            .unwrap_or(0),
        _ => 0,
    })
}

impl From<RawProgress> for DownloadProgress {
    fn from(raw: RawProgress) -> Self {
        Self {
            state_flags: raw.state_flags,
            text_key: raw.show_text_key,
            head: PhaseProgress {
                rate: raw.show_download_head_rate,
                rate_display: raw.show_download_head_rate_str,
                bytes: raw.show_download_head_size,
                fraction_complete: raw.show_download_head_percent,
            },
            download: PhaseProgress {
                rate: raw.show_download_rate,
                rate_display: raw.show_download_rate_str,
                bytes: raw.show_download_size,
                fraction_complete: raw.show_download_percent,
            },
            build: PhaseProgress {
                rate: raw.show_build_rate,
                rate_display: raw.show_build_rate_str,
                bytes: raw.show_build_size,
                fraction_complete: raw.show_build_percent,
            },
        }
    }
}

impl DownloadProgress {
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawProgress = serde_json::from_slice(payload)?;
        Ok(raw.into())
    }
}
