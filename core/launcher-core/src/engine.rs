//! Launcher engine: the one object a front end talks to.
//!
//! Holds the configuration and the supervisor, and wires the detector,
//! verifier and update check to the configured install. Sessions block the
//! calling thread; a front end runs `start_download`/`repair_files` on a
//! worker thread and calls `stop` from its own.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::backoff::RetryPolicy;
use crate::config::LauncherConfig;
use crate::error::Result;
use crate::ipc::{ChannelPorts, ZmqTransportFactory};
use crate::observer::{NullObserver, ProgressObserver};
use crate::state::{self, Classification};
use crate::storage::{InstallLayout, LauncherPaths};
use crate::supervisor::{SessionOutcome, StopOutcome, Supervisor, WorkerParams};
use crate::updates::{self, LatestVersion, UpdateCheck, VersionSource};
use crate::verify;

pub struct LauncherEngine {
    paths: LauncherPaths,
    worker: PathBuf,
    config: Mutex<LauncherConfig>,
    supervisor: Supervisor,
    observer: Arc<dyn ProgressObserver>,
    versions: Option<Arc<dyn VersionSource>>,
    retry: RetryPolicy,
}

impl LauncherEngine {
    /// Engine over `config`, using ZeroMQ on the configured ports.
    pub fn new(paths: LauncherPaths, config: LauncherConfig) -> Self {
        let ports = ChannelPorts {
            ingress: config.download.pubport,
            egress: config.download.subport,
        };
        let supervisor = Supervisor::new(Arc::new(ZmqTransportFactory::new(ports)));
        Self {
            worker: paths.worker_binary(),
            paths,
            config: Mutex::new(config),
            supervisor,
            observer: Arc::new(NullObserver),
            versions: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Loads `config.json` from the launcher root.
    pub fn load(paths: LauncherPaths) -> Self {
        let config = LauncherConfig::load(&paths.config_file());
        Self::new(paths, config)
    }

    pub fn with_worker(mut self, worker: impl Into<PathBuf>) -> Self {
        self.worker = worker.into();
        self
    }

    pub fn with_supervisor(mut self, supervisor: Supervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_version_source(mut self, source: Arc<dyn VersionSource>) -> Self {
        self.versions = Some(source);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn worker_path(&self) -> &Path {
        &self.worker
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> LauncherConfig {
        self.config
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Applies `update` to the live configuration under its lock.
    pub fn update_config<R>(&self, update: impl FnOnce(&mut LauncherConfig) -> R) -> R {
        let mut config = self
            .config
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        update(&mut config)
    }

    fn save_config(&self) {
        let config = self.config();
        if let Err(err) = config.save(&self.paths.config_file()) {
            tracing::error!(error = %err, "Failed to save config");
        }
    }

    fn install_layout(&self) -> InstallLayout {
        InstallLayout::new(self.config().game.path)
    }

    /// Classifies the local install and records what it found in the config.
    pub fn detect_local_state(&self) -> Option<Classification> {
        let game = self.config().game;
        let classification = state::detect(
            &self.install_layout(),
            &game.app_id.to_string(),
            &game.content_id.to_string(),
        )?;

        self.update_config(|config| {
            if classification.app_id_drift {
                match classification.on_disk_app_id.parse::<u32>() {
                    Ok(app_id) => config.game.app_id = app_id,
                    Err(_) => tracing::warn!(
                        on_disk = %classification.on_disk_app_id,
                        "On-disk app id is not numeric; keeping configured id"
                    ),
                }
            }
            config.download.origin_version = classification.origin_version.clone();
            config.download.target_version = classification.target_version.clone();
        });
        self.save_config();

        Some(classification)
    }

    /// Queries the version service and adopts what it reports.
    pub fn fetch_latest_version(&self) -> Option<LatestVersion> {
        let source = self.versions.as_ref()?;
        let app_id = self.config().game.app_id;
        let latest = updates::fetch_latest(source.as_ref(), app_id, self.retry)?;

        self.update_config(|config| {
            config.download.target_version = latest.version.clone();
            config.game.app_id = latest.app_id;
            config.game.content_id = latest.content_id;
            config.game.running_process = latest.running_process_name.clone();
        });
        self.save_config();
        Some(latest)
    }

    pub fn check_for_updates(&self) -> UpdateCheck {
        let Some(source) = self.versions.as_ref() else {
            return UpdateCheck::failed();
        };
        let Some(latest) = self.fetch_latest_version() else {
            return UpdateCheck::failed();
        };

        let config = self.config();
        let content_id = config.game.content_id;
        let origin_id = updates::downloadable_id_for(
            source.as_ref(),
            content_id,
            &config.download.origin_version,
            self.retry,
        );
        let target_id = updates::downloadable_id_for(
            source.as_ref(),
            content_id,
            &config.download.target_version,
            self.retry,
        );
        tracing::info!(origin_id, target_id, "Compared installed and latest versions");

        UpdateCheck {
            success: true,
            has_update: updates::is_update_available(origin_id, target_id),
            latest_version: Some(latest.version),
        }
    }

    pub fn verify_integrity<F>(&self, on_progress: F) -> Vec<String>
    where
        F: FnMut(usize, usize),
    {
        let game = self.config().game;
        verify::verify(
            &self.install_layout(),
            &game.app_id.to_string(),
            &game.content_id.to_string(),
            on_progress,
        )
    }

    fn session_params(&self) -> WorkerParams {
        let config = self.config();
        let mut params = config.download.worker_params();
        params.insert("gameid", config.game.app_id);
        params.insert("contentid", config.game.content_id);
        params.insert("path", &config.game.path);
        params
    }

    /// Runs a download session to completion.
    pub fn start_download<F>(&self, on_finished: F) -> Result<SessionOutcome>
    where
        F: FnOnce(&SessionOutcome),
    {
        let params = self.session_params();
        self.supervisor
            .run(&self.worker, &params, Arc::clone(&self.observer), on_finished)
    }

    pub fn stop(&self) -> StopOutcome {
        tracing::info!("Stopping all tasks");
        self.supervisor.stop()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }
}
