//! Launcher configuration loading and saving.
//!
//! `config.json` has three sections (`appConfig`, `downloadConfig`,
//! `gameConfig`). Each section is read into an all-optional patch and merged
//! into the defaults field by field, so a partial or older file still loads
//! and every field keeps its static type. Only a subset is written back:
//! versions, ports and repair state are session data, not preferences.

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{LauncherError, Result};
use crate::supervisor::WorkerParams;
use dlworker_protocol::{DEFAULT_EGRESS_PORT, DEFAULT_INGRESS_PORT};

pub const DEFAULT_APP_ID: u32 = 81;
pub const DEFAULT_CONTENT_ID: u32 = 569;

// ═══════════════════════════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub silent_mode: bool,
    pub auto_update: bool,
    pub unlimit_launch_game: bool,
}

/// Parameters handed to the worker on its command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadConfig {
    pub origin_version: String,
    pub target_version: String,
    /// Port the worker subscribes on (our egress).
    pub subport: u16,
    /// Port the worker publishes on (our ingress).
    pub pubport: u16,
    pub env: String,
    pub oversea: i64,
    #[serde(rename = "isSSD")]
    pub is_ssd: i64,
    pub rate_limit: i64,
    pub is_repair_mode: i64,
    pub repair_list_path: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            origin_version: String::new(),
            target_version: String::new(),
            subport: DEFAULT_EGRESS_PORT,
            pubport: DEFAULT_INGRESS_PORT,
            env: "dev".to_string(),
            oversea: 0,
            is_ssd: 1,
            rate_limit: 0,
            is_repair_mode: 0,
            repair_list_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameConfig {
    pub app_id: u32,
    pub content_id: u32,
    pub path: String,
    pub running_process: String,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID,
            content_id: DEFAULT_CONTENT_ID,
            path: String::new(),
            running_process: String::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Patches
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfigPatch {
    pub silent_mode: Option<bool>,
    pub auto_update: Option<bool>,
    pub unlimit_launch_game: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadConfigPatch {
    pub origin_version: Option<String>,
    pub target_version: Option<String>,
    pub subport: Option<u16>,
    pub pubport: Option<u16>,
    pub env: Option<String>,
    pub oversea: Option<i64>,
    #[serde(rename = "isSSD")]
    pub is_ssd: Option<i64>,
    pub rate_limit: Option<i64>,
    pub is_repair_mode: Option<i64>,
    pub repair_list_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GameConfigPatch {
    pub app_id: Option<u32>,
    pub content_id: Option<u32>,
    pub path: Option<String>,
    pub running_process: Option<String>,
}

fn merge_field<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl AppConfig {
    pub fn merge(&mut self, patch: AppConfigPatch) {
        merge_field(&mut self.silent_mode, patch.silent_mode);
        merge_field(&mut self.auto_update, patch.auto_update);
        merge_field(&mut self.unlimit_launch_game, patch.unlimit_launch_game);
    }
}

impl DownloadConfig {
    pub fn merge(&mut self, patch: DownloadConfigPatch) {
        merge_field(&mut self.origin_version, patch.origin_version);
        merge_field(&mut self.target_version, patch.target_version);
        merge_field(&mut self.subport, patch.subport);
        merge_field(&mut self.pubport, patch.pubport);
        merge_field(&mut self.env, patch.env);
        merge_field(&mut self.oversea, patch.oversea);
        merge_field(&mut self.is_ssd, patch.is_ssd);
        merge_field(&mut self.rate_limit, patch.rate_limit);
        merge_field(&mut self.is_repair_mode, patch.is_repair_mode);
        merge_field(&mut self.repair_list_path, patch.repair_list_path);
    }

    /// All download fields, in declaration order, as worker parameters.
    pub fn worker_params(&self) -> WorkerParams {
        let mut params = WorkerParams::new();
        params.insert("originVersion", &self.origin_version);
        params.insert("targetVersion", &self.target_version);
        params.insert("subport", self.subport);
        params.insert("pubport", self.pubport);
        params.insert("env", &self.env);
        params.insert("oversea", self.oversea);
        params.insert("isSSD", self.is_ssd);
        params.insert("rateLimit", self.rate_limit);
        params.insert("isRepairMode", self.is_repair_mode);
        params.insert("repairListPath", &self.repair_list_path);
        params
    }

    pub fn is_repair_mode(&self) -> bool {
        self.is_repair_mode != 0
    }
}

impl GameConfig {
    pub fn merge(&mut self, patch: GameConfigPatch) {
        merge_field(&mut self.app_id, patch.app_id);
        merge_field(&mut self.content_id, patch.content_id);
        merge_field(&mut self.path, patch.path);
        merge_field(&mut self.running_process, patch.running_process);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// File
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    app_config: Option<AppConfigPatch>,
    #[serde(default)]
    download_config: Option<DownloadConfigPatch>,
    #[serde(default)]
    game_config: Option<GameConfigPatch>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SavedDownloadConfig {
    #[serde(rename = "isSSD")]
    is_ssd: i64,
    rate_limit: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SavedConfig<'a> {
    app_config: &'a AppConfig,
    download_config: SavedDownloadConfig,
    game_config: &'a GameConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LauncherConfig {
    pub app: AppConfig,
    pub download: DownloadConfig,
    pub game: GameConfig,
}

impl LauncherConfig {
    /// Loads `path`, falling back to defaults when it is missing or invalid.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(error = %err, "Failed to load config; using defaults");
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file; using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(LauncherError::io("read config", err)),
        };
        let file: ConfigFile =
            serde_json::from_slice(&data).map_err(|err| LauncherError::json("parse config", err))?;

        let mut config = Self::default();
        if let Some(patch) = file.app_config {
            config.app.merge(patch);
        }
        if let Some(patch) = file.download_config {
            config.download.merge(patch);
        }
        if let Some(patch) = file.game_config {
            config.game.merge(patch);
        }
        Ok(config)
    }

    /// Writes the persisted subset atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let saved = SavedConfig {
            app_config: &self.app,
            download_config: SavedDownloadConfig {
                is_ssd: self.download.is_ssd,
                rate_limit: self.download.rate_limit,
            },
            game_config: &self.game,
        };
        let payload = serde_json::to_vec_pretty(&saved)
            .map_err(|err| LauncherError::json("serialize config", err))?;

        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|source| config_write(path, source))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|source| config_write(path, source))?;
        tmp.write_all(&payload)
            .and_then(|_| tmp.flush())
            .map_err(|source| config_write(path, source))?;
        tmp.persist(path)
            .map_err(|err| config_write(path, err.error))?;
        Ok(())
    }
}

fn config_write(path: &Path, source: std::io::Error) -> LauncherError {
    LauncherError::ConfigWrite {
        path: PathBuf::from(path),
        source,
    }
}
