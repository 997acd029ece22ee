//! Path management for the launcher and the install roots it inspects.
//!
//! Two roots matter:
//!
//! - **Launcher root**: where the launcher keeps `config.json`, its logs and
//!   the worker binary (`bin/`).
//! - **Install root**: the game directory. The worker keeps its metadata under
//!   `.dlstorage/`; this crate only ever reads it.
//!
//! ```text
//! <install>/.dlstorage/
//! ├── downloading/<appId>_app.state
//! └── depotcache/<contentId>_<downloadableId>.manifest
//! ```

use std::path::{Path, PathBuf};

const DLSTORAGE_DIR: &str = ".dlstorage";

#[cfg(windows)]
pub const WORKER_BINARY: &str = "downloadIPC.exe";
#[cfg(not(windows))]
pub const WORKER_BINARY: &str = "downloadIPC";

/// Paths owned by the launcher itself.
#[derive(Debug, Clone)]
pub struct LauncherPaths {
    root: PathBuf,
    config_override: Option<PathBuf>,
}

impl LauncherPaths {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            config_override: None,
        }
    }

    /// Reads and writes the config at `path` instead of `<root>/config.json`.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_override = Some(path.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_override
            .clone()
            .unwrap_or_else(|| self.root.join("config.json"))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn worker_binary(&self) -> PathBuf {
        self.root.join("bin").join(WORKER_BINARY)
    }
}

/// Read-only view of the worker's metadata inside an install root.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_file(&self, app_id: &str) -> PathBuf {
        self.root
            .join(DLSTORAGE_DIR)
            .join("downloading")
            .join(format!("{}_app.state", app_id))
    }

    pub fn manifest_file(&self, content_id: &str, downloadable_id: &str) -> PathBuf {
        self.root
            .join(DLSTORAGE_DIR)
            .join("depotcache")
            .join(format!("{}_{}.manifest", content_id, downloadable_id))
    }

    /// Resolves a manifest entry name against the install root.
    /// Manifests are produced on Windows, so `\` is accepted as a separator.
    pub fn resolve_entry(&self, name: &str) -> PathBuf {
        name.split(['/', '\\'])
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_file_is_keyed_by_app_id() {
        let layout = InstallLayout::new("/games/x");
        assert_eq!(
            layout.state_file("81"),
            PathBuf::from("/games/x/.dlstorage/downloading/81_app.state")
        );
    }

    #[test]
    fn manifest_file_is_keyed_by_content_and_downloadable_id() {
        let layout = InstallLayout::new("/games/x");
        assert_eq!(
            layout.manifest_file("569", "1234"),
            PathBuf::from("/games/x/.dlstorage/depotcache/569_1234.manifest")
        );
    }

    #[test]
    fn resolve_entry_accepts_both_separators() {
        let layout = InstallLayout::new("/games/x");
        let expected = PathBuf::from("/games/x/data/pak/a.dat");
        assert_eq!(layout.resolve_entry("data/pak/a.dat"), expected);
        assert_eq!(layout.resolve_entry("data\\pak\\a.dat"), expected);
    }

    #[test]
    fn launcher_paths_point_under_root() {
        let paths = LauncherPaths::with_root("/opt/launcher");
        assert_eq!(paths.config_file(), PathBuf::from("/opt/launcher/config.json"));
        assert_eq!(paths.logs_dir(), PathBuf::from("/opt/launcher/logs"));
        assert!(paths.worker_binary().starts_with("/opt/launcher/bin"));
    }

    #[test]
    fn config_file_can_be_overridden() {
        let paths = LauncherPaths::with_root("/opt/launcher").with_config_file("/etc/launcher.json");
        assert_eq!(paths.config_file(), PathBuf::from("/etc/launcher.json"));
        assert_eq!(paths.logs_dir(), PathBuf::from("/opt/launcher/logs"));
    }
}
