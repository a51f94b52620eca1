use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::Disks;
use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::sidecar;

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// What a reclamation pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub files_removed: usize,
    pub bytes_freed: u64,
    pub dirs_removed: usize,
    pub errors: usize,
}

/// Read-only view of the scratch root for health and metrics readers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub exists: bool,
    pub total_size_bytes: u64,
    pub file_count: usize,
    pub pending_scheduled_deletions: usize,
}

/// Keeps the scratch root from growing without bound.
///
/// Files are removed either on request (`schedule_delete` + `flush_scheduled`),
/// by age (`sweep_stale`, driven by `run_periodic`), or all at once when the
/// disk runs low (`emergency_sweep`).
#[derive(Debug)]
pub struct Reclaimer {
    scratch_root: PathBuf,
    max_age: Duration,
    interval: Duration,
    cooldown: Duration,
    pending: Mutex<BTreeSet<PathBuf>>,
}

impl Reclaimer {
    pub fn new(scratch_root: impl Into<PathBuf>, max_age: Duration, interval: Duration, cooldown: Duration) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            max_age,
            interval,
            cooldown,
            pending: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::new(
            cfg.scratch_root.clone(),
            cfg.max_temp_age(),
            cfg.sweep_interval(),
            cfg.sweep_cooldown(),
        )
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Create the scratch root if it is missing
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.scratch_root)
            .with_context(|| format!("Failed to create scratch root: {}", self.scratch_root.display()))
    }

    /// Mark files for deletion on the next flush. Sidecars sharing the base name go with them.
    pub fn schedule_delete<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut pending = self.pending.lock();
        for path in paths {
            let path = path.into();
            debug!("Scheduled for deletion: {}", path.display());
            pending.insert(path);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Delete every scheduled file, its sidecars and the parent directory if that emptied it.
    /// Errors are logged per path and never abort the batch.
    pub fn flush_scheduled(&self) -> ReclaimReport {
        let batch = std::mem::take(&mut *self.pending.lock());
        let mut report = ReclaimReport::default();

        for path in batch {
            let mut group = vec![path.clone()];
            group.extend(sidecar::sidecar_paths(&path));

            for file in &group {
                match remove_file_counted(file) {
                    Ok(Some(bytes)) => {
                        report.files_removed += 1;
                        report.bytes_freed += bytes;
                        debug!("Cleaned up: {}", file.display());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        report.errors += 1;
                        error!("Cleanup error for {}: {}", file.display(), e);
                    }
                }
            }

            if let Some(parent) = path.parent() {
                report.dirs_removed += self.prune_empty_dirs(parent);
            }
        }

        if report.files_removed > 0 {
            info!("🗑️  Removed {} scheduled file(s), {} bytes", report.files_removed, report.bytes_freed);
        }
        report
    }

    /// Delete files under the scratch root whose modification time is older than the max age,
    /// then prune directories those deletions left empty
    pub fn sweep_stale(&self, now: SystemTime) -> Result<ReclaimReport> {
        let mut report = ReclaimReport::default();
        if !self.scratch_root.exists() {
            return Ok(report);
        }

        let mut touched_dirs = BTreeSet::new();

        for entry in WalkDir::new(&self.scratch_root).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    report.errors += 1;
                    warn!("Error reading scratch entry: {}", e);
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    report.errors += 1;
                    warn!("Failed to stat {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            let modified = metadata.modified().unwrap_or(now);
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= self.max_age {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    report.files_removed += 1;
                    report.bytes_freed += metadata.len();
                    debug!("Removed old temp file: {} (age {}s)", entry.path().display(), age.as_secs());
                    if let Some(parent) = entry.path().parent() {
                        touched_dirs.insert(parent.to_path_buf());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    report.errors += 1;
                    error!("Error removing {}: {}", entry.path().display(), e);
                }
            }
        }

        // Deepest first so a parent sees its children already gone
        for dir in touched_dirs.iter().rev() {
            report.dirs_removed += self.prune_empty_dirs(dir);
        }

        if report.files_removed > 0 {
            info!("Cleaned up {} old temp file(s)", report.files_removed);
        }
        Ok(report)
    }

    /// One iteration of the periodic loop
    pub fn tick(&self) -> Result<ReclaimReport> {
        let flushed = self.flush_scheduled();
        let mut report = self.sweep_stale(SystemTime::now())?;
        report.files_removed += flushed.files_removed;
        report.bytes_freed += flushed.bytes_freed;
        report.dirs_removed += flushed.dirs_removed;
        report.errors += flushed.errors;
        Ok(report)
    }

    /// Sweep forever. A failed iteration is logged and retried after the cooldown.
    pub async fn run_periodic(self: Arc<Self>) {
        info!(
            "Scratch sweeper started for {} (every {}s, max age {}s)",
            self.scratch_root.display(),
            self.interval.as_secs(),
            self.max_age.as_secs()
        );

        loop {
            let this = Arc::clone(&self);
            let result = tokio::task::spawn_blocking(move || this.tick())
                .await
                .context("Sweep task panicked")
                .and_then(|r| r);

            match result {
                Ok(report) => {
                    debug!("Sweep finished: {:?}", report);
                    tokio::time::sleep(self.interval).await;
                }
                Err(e) => {
                    error!("Periodic cleanup error: {:#}", e);
                    tokio::time::sleep(self.cooldown).await;
                }
            }
        }
    }

    /// Wipe the scratch root if the filesystem holding it has less than `min_free_gb` free.
    /// Returns whether the wipe happened.
    ///
    /// In-flight artifacts are not spared; call this only when no job is writing or
    /// when losing their output is acceptable.
    pub fn emergency_sweep(&self, min_free_gb: f64) -> Result<bool> {
        match self.free_space_bytes() {
            Some(free) => self.evict_if_below(free, min_free_gb),
            None => {
                warn!("Could not determine free space for {}", self.scratch_root.display());
                Ok(false)
            }
        }
    }

    /// Threshold check and wipe, given an already measured free byte count
    pub fn evict_if_below(&self, free_bytes: u64, min_free_gb: f64) -> Result<bool> {
        let free_gb = free_bytes as f64 / BYTES_PER_GIB;
        if free_gb >= min_free_gb {
            return Ok(false);
        }

        warn!("⚠️  Low disk space: {:.2} GB free (minimum {:.2} GB)", free_gb, min_free_gb);
        let report = self.wipe()?;
        info!(
            "Emergency cleanup completed: {} file(s), {} bytes removed",
            report.files_removed, report.bytes_freed
        );
        Ok(true)
    }

    /// Remove everything under the scratch root and recreate it empty
    fn wipe(&self) -> Result<ReclaimReport> {
        let mut report = ReclaimReport::default();

        if self.scratch_root.exists() {
            for entry in WalkDir::new(&self.scratch_root)
                .min_depth(1)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| !e.file_type().is_dir())
            {
                match remove_file_counted(entry.path()) {
                    Ok(Some(bytes)) => {
                        report.files_removed += 1;
                        report.bytes_freed += bytes;
                    }
                    Ok(None) => {}
                    Err(_) => report.errors += 1,
                }
            }

            if let Err(e) = fs::remove_dir_all(&self.scratch_root) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove scratch root {}: {}", self.scratch_root.display(), e);
                }
            }
        }

        self.ensure_root()?;
        Ok(report)
    }

    /// Free bytes on the disk whose mount point is the longest prefix of the scratch root
    pub fn free_space_bytes(&self) -> Option<u64> {
        let target = nearest_existing(&self.scratch_root)?;
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }

    /// Never fails: a missing root reads as `exists = false` with zeroed counters
    pub fn usage_snapshot(&self) -> UsageSnapshot {
        let pending_scheduled_deletions = self.pending_count();
        if !self.scratch_root.is_dir() {
            return UsageSnapshot {
                pending_scheduled_deletions,
                ..UsageSnapshot::default()
            };
        }

        let mut snapshot = UsageSnapshot {
            exists: true,
            pending_scheduled_deletions,
            ..UsageSnapshot::default()
        };

        for entry in WalkDir::new(&self.scratch_root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
        {
            if let Ok(metadata) = entry.metadata() {
                snapshot.total_size_bytes += metadata.len();
                snapshot.file_count += 1;
            }
        }

        snapshot
    }

    /// Remove `dir` and then its ancestors while they are empty, stopping at the scratch root
    fn prune_empty_dirs(&self, dir: &Path) -> usize {
        let mut removed = 0;
        let mut current = Some(dir);

        while let Some(dir) = current {
            if dir == self.scratch_root || !dir.starts_with(&self.scratch_root) {
                break;
            }
            let is_empty = match fs::read_dir(dir) {
                Ok(mut entries) => entries.next().is_none(),
                Err(_) => false,
            };
            if !is_empty || fs::remove_dir(dir).is_err() {
                break;
            }
            debug!("Removed empty directory: {}", dir.display());
            removed += 1;
            current = dir.parent();
        }

        removed
    }
}

/// Remove a file if present, returning its size. A missing file is not an error.
fn remove_file_counted(path: &Path) -> io::Result<Option<u64>> {
    let len = match fs::symlink_metadata(path) {
        Ok(m) => m.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    match fs::remove_file(path) {
        Ok(()) => Ok(Some(len)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn nearest_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| p.exists())
        .and_then(|p| p.canonicalize().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn reclaimer(root: &Path) -> Reclaimer {
        Reclaimer::new(root, HOUR, Duration::from_secs(300), Duration::from_secs(60))
    }

    fn write_aged(path: &Path, age: Duration, now: SystemTime) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"data").unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(now - age).unwrap();
    }

    #[test]
    fn test_sweep_removes_only_expired_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("scratch");
        let now = SystemTime::now();

        let fresh = root.join("a").join("fresh.mp4");
        let stale = root.join("b").join("stale.mp4");
        write_aged(&fresh, Duration::from_secs(30 * 60), now);
        write_aged(&stale, Duration::from_secs(90 * 60), now);

        let report = reclaimer(&root).sweep_stale(now).unwrap();

        assert_eq!(report.files_removed, 1);
        assert_eq!(report.dirs_removed, 1);
        assert!(fresh.exists());
        assert!(!stale.exists());
        assert!(!root.join("b").exists());
        assert!(root.join("a").exists());
        assert!(root.exists());
    }

    #[test]
    fn test_sweep_keeps_directory_with_remaining_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let now = SystemTime::now();

        write_aged(&root.join("job").join("old.ts"), 2 * HOUR, now);
        write_aged(&root.join("job").join("new.ts"), Duration::from_secs(60), now);

        let report = reclaimer(&root).sweep_stale(now).unwrap();
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.dirs_removed, 0);
        assert!(root.join("job").join("new.ts").exists());
    }

    #[test]
    fn test_sweep_on_missing_root_is_noop() {
        let dir = TempDir::new().unwrap();
        let report = reclaimer(&dir.path().join("absent")).sweep_stale(SystemTime::now()).unwrap();
        assert_eq!(report, ReclaimReport::default());
    }

    #[test]
    fn test_flush_removes_sidecars_and_empty_parent() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let job_dir = root.join("job-1");
        fs::create_dir_all(&job_dir).unwrap();
        let media = job_dir.join("show_Ep1.mp4");
        for name in ["show_Ep1.mp4", "show_Ep1.srt", "show_Ep1.jpg"] {
            fs::write(job_dir.join(name), b"x").unwrap();
        }

        let reclaimer = reclaimer(&root);
        reclaimer.schedule_delete([&media]);
        assert_eq!(reclaimer.usage_snapshot().pending_scheduled_deletions, 1);

        let report = reclaimer.flush_scheduled();
        assert_eq!(report.files_removed, 3);
        assert_eq!(report.dirs_removed, 1);
        assert_eq!(report.errors, 0);
        assert!(!job_dir.exists());
        assert!(root.exists());
        assert_eq!(reclaimer.pending_count(), 0);
    }

    #[test]
    fn test_flush_tolerates_missing_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let present = root.join("present.mp4");
        fs::write(&present, b"x").unwrap();

        let reclaimer = reclaimer(&root);
        reclaimer.schedule_delete([root.join("gone.mp4"), present.clone()]);
        let report = reclaimer.flush_scheduled();

        assert_eq!(report.files_removed, 1);
        assert_eq!(report.errors, 0);
        assert!(!present.exists());
        assert!(root.exists(), "scratch root itself must never be pruned");
    }

    #[test]
    fn test_emergency_wipe_recreates_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("scratch");
        let now = SystemTime::now();
        write_aged(&root.join("x").join("one.mp4"), Duration::ZERO, now);
        write_aged(&root.join("two.srt"), Duration::ZERO, now);

        let reclaimer = reclaimer(&root);
        let wiped = reclaimer.evict_if_below(1024, 5.0).unwrap();

        assert!(wiped);
        assert!(root.is_dir());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    }

    #[test]
    fn test_emergency_skipped_with_enough_space() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        fs::write(root.join("keep.mp4"), b"x").unwrap();

        let plenty = 10 * 1024 * 1024 * 1024u64;
        assert!(!reclaimer(&root).evict_if_below(plenty, 5.0).unwrap());
        assert!(root.join("keep.mp4").exists());
    }

    #[test]
    fn test_usage_snapshot() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.mp4"), vec![0u8; 100]).unwrap();
        fs::write(root.join("sub").join("b.srt"), vec![0u8; 23]).unwrap();

        let snapshot = reclaimer(&root).usage_snapshot();
        assert!(snapshot.exists);
        assert_eq!(snapshot.file_count, 2);
        assert_eq!(snapshot.total_size_bytes, 123);

        let missing = reclaimer(&root.join("nope")).usage_snapshot();
        assert_eq!(missing, UsageSnapshot::default());
    }
}
