//! Content-hash verification of an installed content against its manifest.
//!
//! Verification only runs against a finalized install (StateFlag 8); any
//! other phase has no trustworthy manifest and yields an empty result. Each
//! file entry is hashed on a rayon pool scoped to the call, and verdicts are
//! collected in completion order.
//!
//! Any doubt about a file (missing, mismatched, unreadable) marks it for
//! repair. Nothing is silently skipped.

use fs_err as fs;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{mpsc, Arc};

use crate::error::{LauncherError, Result};
use crate::state::{lenient_string, load_install_state};
use crate::storage::InstallLayout;

/// Progress is reported once per this many settled entries.
pub const PROGRESS_BATCH: usize = 10;

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default, deserialize_with = "manifest_entries")]
    files: Vec<ManifestEntry>,
}

/// A null or missing `md5` reads as empty and the entry is skipped.
#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    md5: String,
    #[serde(default, deserialize_with = "truthy")]
    dir: bool,
}

// One bad entry drops that entry, never the whole manifest.
fn manifest_entries<'de, D>(deserializer: D) -> std::result::Result<Vec<ManifestEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = match Value::deserialize(deserializer)? {
        Value::Array(entries) => entries,
        _ => Vec::new(),
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<ManifestEntry>(entry) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "Dropping malformed manifest entry");
                None
            }
        })
        .collect())
}

// `false`, `0` and `null` are files; any other bool or number is a directory.
fn truthy<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::Number(number) => number.as_f64().is_some_and(|value| value != 0.0),
        _ => false,
    })
}

/// Outcome for a single manifest entry.
#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Skipped,
    Intact,
    NeedsRepair(String),
}

/// Verifies with a pool sized to the available hardware parallelism.
pub fn verify<F>(layout: &InstallLayout, app_id: &str, content_id: &str, on_progress: F) -> Vec<String>
where
    F: FnMut(usize, usize),
{
    verify_with_workers(layout, app_id, content_id, default_workers(), on_progress)
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(4, |value| value.get().max(1))
}

/// Returns the manifest names that need repair, in completion order.
pub fn verify_with_workers<F>(
    layout: &InstallLayout,
    app_id: &str,
    content_id: &str,
    workers: usize,
    mut on_progress: F,
) -> Vec<String>
where
    F: FnMut(usize, usize),
{
    let state = match load_install_state(layout, app_id) {
        Some(state) => state,
        None => return Vec::new(),
    };
    if !state.is_finalized() {
        tracing::info!(
            state_flag = state.state_flag,
            "Install is not finalized; skipping verification"
        );
        return Vec::new();
    }

    let downloadable_id = state
        .installed(content_id)
        .map(|record| record.downloadable_id.clone())
        .unwrap_or_default();
    let manifest_path = layout.manifest_file(content_id, &downloadable_id);
    let manifest = match load_manifest(&manifest_path) {
        Ok(manifest) => manifest,
        Err(err) => {
            tracing::warn!(error = %err, "Manifest unavailable; nothing to verify");
            return Vec::new();
        }
    };

    let total = manifest.files.len();
    tracing::info!(total, workers, manifest = %manifest_path.display(), "Verifying install");

    match run_checks(layout, manifest.files, workers, |completed| {
        on_progress(completed, total)
    }) {
        Ok(repairs) => {
            tracing::info!(needs_repair = repairs.len(), total, "Verification finished");
            repairs
        }
        Err(err) => {
            tracing::error!(error = %err, "Verification could not run");
            Vec::new()
        }
    }
}

fn load_manifest(path: &Path) -> Result<Manifest> {
    let data = fs::read(path).map_err(|err| LauncherError::io("read manifest", err))?;
    serde_json::from_slice(&data).map_err(|err| LauncherError::json("parse manifest", err))
}

fn run_checks<F>(
    layout: &InstallLayout,
    entries: Vec<ManifestEntry>,
    workers: usize,
    mut on_batch: F,
) -> Result<Vec<String>>
where
    F: FnMut(usize),
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|index| format!("verify-{}", index))
        .build()
        .map_err(|err| LauncherError::ThreadPool(err.to_string()))?;

    let layout = Arc::new(layout.clone());
    let (tx, rx) = mpsc::channel();
    for entry in entries {
        let tx = tx.clone();
        let layout = Arc::clone(&layout);
        pool.spawn(move || {
            let name = entry.name.clone();
            let verdict = panic::catch_unwind(AssertUnwindSafe(|| check_entry(&layout, &entry)))
                .unwrap_or(Verdict::NeedsRepair(name));
            let _ = tx.send(verdict);
        });
    }
    drop(tx);

    let mut repairs = Vec::new();
    let mut completed = 0usize;
    for verdict in rx {
        completed += 1;
        if let Verdict::NeedsRepair(name) = verdict {
            repairs.push(name);
        }
        if completed % PROGRESS_BATCH == 0 {
            on_batch(completed);
        }
    }

    Ok(repairs)
}

fn check_entry(layout: &InstallLayout, entry: &ManifestEntry) -> Verdict {
    if entry.dir || entry.name.is_empty() || entry.md5.is_empty() {
        return Verdict::Skipped;
    }

    let path = layout.resolve_entry(&entry.name);
    if !path.exists() {
        return Verdict::NeedsRepair(entry.name.clone());
    }

    match file_md5(&path) {
        Ok(digest) if digest.eq_ignore_ascii_case(&entry.md5) => Verdict::Intact,
        Ok(_) => Verdict::NeedsRepair(entry.name.clone()),
        Err(err) => {
            tracing::debug!(error = %err, file = %entry.name, "Failed to hash file");
            Verdict::NeedsRepair(entry.name.clone())
        }
    }
}

fn file_md5(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    fn write_install(dir: &TempDir, flag: i64, files: serde_json::Value) -> InstallLayout {
        let layout = InstallLayout::new(dir.path());
        let state = layout.state_file("81");
        std::fs::create_dir_all(state.parent().unwrap()).unwrap();
        std::fs::write(
            &state,
            json!({
                "AppId": "81",
                "StateFlag": flag,
                "installed_contents": {"569": {"Version": "v1_100", "DownloadableId": "100"}}
            })
            .to_string(),
        )
        .unwrap();

        let manifest = layout.manifest_file("569", "100");
        std::fs::create_dir_all(manifest.parent().unwrap()).unwrap();
        std::fs::write(&manifest, json!({ "files": files }).to_string()).unwrap();
        layout
    }

    fn single_entry() -> serde_json::Value {
        json!([{"name": "a.dat", "md5": EMPTY_MD5, "dir": 0}])
    }

    #[test]
    fn intact_empty_file_passes() {
        let dir = TempDir::new().unwrap();
        let layout = write_install(&dir, 8, single_entry());
        std::fs::write(dir.path().join("a.dat"), b"").unwrap();

        assert!(verify(&layout, "81", "569", |_, _| {}).is_empty());
    }

    #[test]
    fn modified_file_needs_repair() {
        let dir = TempDir::new().unwrap();
        let layout = write_install(&dir, 8, single_entry());
        std::fs::write(dir.path().join("a.dat"), b"changed").unwrap();

        assert_eq!(verify(&layout, "81", "569", |_, _| {}), vec!["a.dat"]);
    }

    #[test]
    fn missing_file_needs_repair() {
        let dir = TempDir::new().unwrap();
        let layout = write_install(&dir, 8, single_entry());

        assert_eq!(verify(&layout, "81", "569", |_, _| {}), vec!["a.dat"]);
    }

    #[test]
    fn unfinalized_install_skips_manifest() {
        let dir = TempDir::new().unwrap();
        let layout = write_install(&dir, 5, single_entry());
        // Would need repair if the manifest were consulted.
        assert!(verify(&layout, "81", "569", |_, _| {}).is_empty());
    }

    #[test]
    fn missing_manifest_yields_empty() {
        let dir = TempDir::new().unwrap();
        let layout = write_install(&dir, 8, single_entry());
        std::fs::remove_file(layout.manifest_file("569", "100")).unwrap();

        assert!(verify(&layout, "81", "569", |_, _| {}).is_empty());
    }

    #[test]
    fn directory_entries_are_skipped() {
        let dir = TempDir::new().unwrap();
        let layout = write_install(
            &dir,
            8,
            json!([{"name": "data", "md5": "", "dir": 1}, {"name": "gone", "md5": EMPTY_MD5, "dir": 1}]),
        );

        assert!(verify(&layout, "81", "569", |_, _| {}).is_empty());
    }

    #[test]
    fn null_md5_directory_does_not_hide_missing_files() {
        let dir = TempDir::new().unwrap();
        let layout = write_install(
            &dir,
            8,
            json!([
                {"name": "data", "md5": null, "dir": 1},
                {"name": "a.dat", "md5": EMPTY_MD5, "dir": 0}
            ]),
        );

        assert_eq!(verify(&layout, "81", "569", |_, _| {}), vec!["a.dat"]);
    }

    #[test]
    fn boolean_dir_flag_is_read_by_truthiness() {
        let dir = TempDir::new().unwrap();
        let layout = write_install(
            &dir,
            8,
            json!([
                {"name": "a.dat", "md5": EMPTY_MD5, "dir": false},
                {"name": "data", "md5": EMPTY_MD5, "dir": true}
            ]),
        );

        assert_eq!(verify(&layout, "81", "569", |_, _| {}), vec!["a.dat"]);
    }

    #[test]
    fn malformed_entry_is_dropped_alone() {
        let dir = TempDir::new().unwrap();
        let layout = write_install(
            &dir,
            8,
            json!(["not an entry", {"name": "a.dat", "md5": EMPTY_MD5}]),
        );

        assert_eq!(verify(&layout, "81", "569", |_, _| {}), vec!["a.dat"]);
    }

    #[test]
    fn unreadable_path_needs_repair() {
        let dir = TempDir::new().unwrap();
        let layout = write_install(&dir, 8, single_entry());
        // A directory where a file is expected cannot be hashed.
        std::fs::create_dir(dir.path().join("a.dat")).unwrap();

        assert_eq!(verify(&layout, "81", "569", |_, _| {}), vec!["a.dat"]);
    }

    #[test]
    fn result_is_independent_of_pool_size() {
        let dir = TempDir::new().unwrap();
        let entries: Vec<_> = (0..25)
            .map(|i| json!({"name": format!("f{i}.dat"), "md5": EMPTY_MD5, "dir": 0}))
            .collect();
        let layout = write_install(&dir, 8, json!(entries));
        for i in 0..25 {
            if i % 3 != 0 {
                std::fs::write(dir.path().join(format!("f{i}.dat")), b"").unwrap();
            }
        }

        let mut single = verify_with_workers(&layout, "81", "569", 1, |_, _| {});
        let mut many = verify_with_workers(&layout, "81", "569", 8, |_, _| {});
        single.sort();
        many.sort();

        assert_eq!(single.len(), 9);
        assert_eq!(single, many);
    }

    #[test]
    fn progress_is_reported_in_batches_of_ten() {
        let dir = TempDir::new().unwrap();
        let entries: Vec<_> = (0..25)
            .map(|i| json!({"name": format!("f{i}.dat"), "md5": EMPTY_MD5, "dir": 0}))
            .collect();
        let layout = write_install(&dir, 8, json!(entries));

        let mut reports = Vec::new();
        verify_with_workers(&layout, "81", "569", 4, |done, total| reports.push((done, total)));

        assert_eq!(reports, vec![(10, 25), (20, 25)]);
    }
}
