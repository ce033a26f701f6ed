//! On-disk bookkeeping under `.func/builds`.
//!
//! ```text
//! builds/by-hash/<hash>/    build directory, one per content hash
//! builds/by-pid/<pid>       symlink -> ../by-hash/<hash> while <pid> builds
//! builds/last               symlink -> by-hash/<hash> of the last success
//! ```

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use fnbuild_core::error::{FnError, Result};

use super::process::ProcessTable;

/// Name of the per-build-directory timestamp file.
const CREATED_STAMP: &str = "created";

#[derive(Debug, Clone)]
pub struct BuildDirs {
    root: PathBuf,
}

impl BuildDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn by_hash(&self) -> PathBuf {
        self.root.join("by-hash")
    }

    pub fn by_pid(&self) -> PathBuf {
        self.root.join("by-pid")
    }

    pub fn last(&self) -> PathBuf {
        self.root.join("last")
    }

    pub fn hash_dir(&self, hash: &str) -> PathBuf {
        self.by_hash().join(hash)
    }

    pub fn marker(&self, pid: u32) -> PathBuf {
        self.by_pid().join(pid.to_string())
    }

    /// Hash a marker points at, if the marker exists.
    pub fn marker_target(&self, pid: u32) -> Option<String> {
        link_hash(&self.marker(pid))
    }

    /// All markers as `(pid, hash)`. Entries that are not numeric PIDs are
    /// skipped; markers with an unreadable target have an empty hash.
    pub fn markers(&self) -> Result<Vec<(u32, String)>> {
        let mut markers = Vec::new();
        let entries = match std::fs::read_dir(self.by_pid()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(markers),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            markers.push((pid, link_hash(&entry.path()).unwrap_or_default()));
        }
        markers.sort();
        Ok(markers)
    }

    /// A live process holding a marker on `hash`.
    pub fn holder(&self, hash: &str, processes: &dyn ProcessTable) -> Result<Option<u32>> {
        Ok(self
            .markers()?
            .into_iter()
            .find(|(pid, target)| target == hash && processes.is_alive(*pid))
            .map(|(pid, _)| pid))
    }

    /// Register `pid` as building `hash` and make sure the build directory
    /// exists. The marker goes in before the directory, so a collector that
    /// re-reads markers before deleting sees the lock.
    pub fn acquire(&self, pid: u32, hash: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(self.by_pid())?;
        std::fs::create_dir_all(self.by_hash())?;
        symlink(&Path::new("..").join("by-hash").join(hash), &self.marker(pid))?;
        let dir = self.hash_dir(hash);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove the marker of `pid`, if any.
    pub fn release(&self, pid: u32) -> Result<()> {
        remove_link(&self.marker(pid))
    }

    /// Point `last` at `hash` with a single rename. `pid` names the staging
    /// link so concurrent builders never share one.
    pub fn set_last(&self, pid: u32, hash: &str) -> Result<()> {
        let staged = self.root.join(format!("last.{}.tmp", pid));
        remove_link(&staged)?;
        symlink(&Path::new("by-hash").join(hash), &staged)?;
        std::fs::rename(&staged, self.last())?;
        Ok(())
    }

    /// Hash `last` points at.
    pub fn last_target(&self) -> Option<String> {
        link_hash(&self.last())
    }

    /// Directory of the last successful build.
    pub fn last_build_dir(&self) -> Result<PathBuf> {
        let last = self.last();
        match self.last_target() {
            Some(hash) if self.hash_dir(&hash).is_dir() => Ok(self.hash_dir(&hash)),
            _ => Err(FnError::NoBuildFound { path: last }),
        }
    }

    /// Remove markers whose process no longer exists. Returns their PIDs.
    pub fn reclaim_stale(&self, processes: &dyn ProcessTable) -> Result<Vec<u32>> {
        let mut reclaimed = Vec::new();
        for (pid, hash) in self.markers()? {
            if !processes.is_alive(pid) {
                self.release(pid)?;
                tracing::info!(pid, hash = %hash, "Reclaimed stale build lock");
                reclaimed.push(pid);
            }
        }
        Ok(reclaimed)
    }

    /// Delete build directories neither `last` nor any live marker refers
    /// to. Returns the removed hashes.
    ///
    /// Directories are listed before any marker is read, and each candidate
    /// is checked against the current markers right before removal, so a
    /// build that acquired its directory meanwhile keeps it.
    pub fn collect_garbage(&self, processes: &dyn ProcessTable) -> Result<Vec<String>> {
        let mut candidates = Vec::new();
        let entries = match std::fs::read_dir(self.by_hash()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(candidates),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            candidates.push(entry?.file_name().to_string_lossy().to_string());
        }
        candidates.sort();

        let mut removed = Vec::new();
        for hash in candidates {
            if self.last_target().as_deref() == Some(hash.as_str()) {
                continue;
            }
            if let Some(pid) = self.holder(&hash, processes)? {
                tracing::debug!(hash = %hash, pid, "Keeping locked build directory");
                continue;
            }
            match std::fs::remove_dir_all(self.hash_dir(&hash)) {
                Ok(()) => {}
                // another collector got there first
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            tracing::debug!(hash = %hash, "Removed unreferenced build directory");
            removed.push(hash);
        }
        Ok(removed)
    }

    /// Timestamp recorded on the first build of `hash`, writing `now` if
    /// none was recorded yet.
    pub fn created_stamp(&self, hash: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let path = self.hash_dir(hash).join(CREATED_STAMP);
        if let Ok(existing) = std::fs::read_to_string(&path) {
            if let Ok(t) = DateTime::parse_from_rfc3339(existing.trim()) {
                return Ok(t.with_timezone(&Utc));
            }
        }
        let now = Utc.timestamp_opt(now.timestamp(), 0).single().unwrap_or(now);
        std::fs::write(&path, now.to_rfc3339_opts(SecondsFormat::Secs, true))?;
        Ok(now)
    }
}

/// Last path component of a symlink's target.
fn link_hash(link: &Path) -> Option<String> {
    let target = std::fs::read_link(link).ok()?;
    target.file_name().map(|n| n.to_string_lossy().to_string())
}

fn remove_link(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Process table with an explicit set of live PIDs.
    ///
    /// Tables made with [`FakeProcesses::sibling`] share the live set, so
    /// several fake builders can see each other.
    pub(crate) struct FakeProcesses {
        pub current: u32,
        pub alive: Arc<Mutex<HashSet<u32>>>,
    }

    impl FakeProcesses {
        pub(crate) fn new(current: u32, others: &[u32]) -> Self {
            let mut alive: HashSet<u32> = others.iter().copied().collect();
            alive.insert(current);
            Self {
                current,
                alive: Arc::new(Mutex::new(alive)),
            }
        }

        pub(crate) fn sibling(&self, current: u32) -> Self {
            self.alive.lock().unwrap().insert(current);
            Self {
                current,
                alive: Arc::clone(&self.alive),
            }
        }

        pub(crate) fn kill(&self, pid: u32) {
            self.alive.lock().unwrap().remove(&pid);
        }
    }

    impl ProcessTable for FakeProcesses {
        fn current_pid(&self) -> u32 {
            self.current
        }

        fn is_alive(&self, pid: u32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }
    }

    #[test]
    fn test_acquire_creates_marker_and_dir() {
        let tmp = TempDir::new().unwrap();
        let dirs = BuildDirs::new(tmp.path());
        let dir = dirs.acquire(100, "abc").unwrap();

        assert!(dir.is_dir());
        assert_eq!(dirs.marker_target(100).as_deref(), Some("abc"));
        assert_eq!(dirs.markers().unwrap(), vec![(100, "abc".to_string())]);
        // relative link resolves to the build directory
        assert_eq!(
            std::fs::canonicalize(dirs.marker(100)).unwrap(),
            std::fs::canonicalize(&dir).unwrap()
        );
    }

    #[test]
    fn test_acquire_twice_same_pid_fails() {
        let tmp = TempDir::new().unwrap();
        let dirs = BuildDirs::new(tmp.path());
        dirs.acquire(100, "abc").unwrap();
        assert!(dirs.acquire(100, "def").is_err());
    }

    #[test]
    fn test_holder_ignores_dead_processes() {
        let tmp = TempDir::new().unwrap();
        let dirs = BuildDirs::new(tmp.path());
        dirs.acquire(200, "abc").unwrap();

        let with_live = FakeProcesses::new(1, &[200]);
        assert_eq!(dirs.holder("abc", &with_live).unwrap(), Some(200));
        assert_eq!(dirs.holder("other", &with_live).unwrap(), None);

        let without = FakeProcesses::new(1, &[]);
        assert_eq!(dirs.holder("abc", &without).unwrap(), None);
    }

    #[test]
    fn test_set_last_replaces_pointer() {
        let tmp = TempDir::new().unwrap();
        let dirs = BuildDirs::new(tmp.path());
        dirs.acquire(1, "one").unwrap();
        dirs.acquire(2, "two").unwrap();

        dirs.set_last(1, "one").unwrap();
        assert_eq!(dirs.last_target().as_deref(), Some("one"));
        dirs.set_last(2, "two").unwrap();
        assert_eq!(dirs.last_target().as_deref(), Some("two"));
        assert_eq!(dirs.last_build_dir().unwrap(), dirs.hash_dir("two"));
        assert!(std::fs::symlink_metadata(dirs.last())
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[test]
    fn test_last_build_dir_missing() {
        let tmp = TempDir::new().unwrap();
        let dirs = BuildDirs::new(tmp.path());
        let err = dirs.last_build_dir().unwrap_err();
        assert!(matches!(err, FnError::NoBuildFound { .. }));
    }

    #[test]
    fn test_reclaim_stale_markers() {
        let tmp = TempDir::new().unwrap();
        let dirs = BuildDirs::new(tmp.path());
        dirs.acquire(10, "live").unwrap();
        dirs.acquire(20, "dead").unwrap();

        let processes = FakeProcesses::new(1, &[10]);
        assert_eq!(dirs.reclaim_stale(&processes).unwrap(), vec![20]);
        assert_eq!(dirs.markers().unwrap(), vec![(10, "live".to_string())]);
    }

    #[test]
    fn test_collect_garbage_precision() {
        let tmp = TempDir::new().unwrap();
        let dirs = BuildDirs::new(tmp.path());
        dirs.acquire(10, "locked").unwrap();
        dirs.acquire(11, "last").unwrap();
        dirs.acquire(12, "orphan").unwrap();
        dirs.set_last(11, "last").unwrap();
        dirs.release(11).unwrap();
        dirs.release(12).unwrap();

        let processes = FakeProcesses::new(1, &[10]);
        assert_eq!(
            dirs.collect_garbage(&processes).unwrap(),
            vec!["orphan".to_string()]
        );
        assert!(dirs.hash_dir("locked").is_dir());
        assert!(dirs.hash_dir("last").is_dir());
        assert!(!dirs.hash_dir("orphan").exists());
    }

    /// Runs an acquire the first time liveness is checked, like another
    /// process locking a directory while the collector is scanning.
    struct RacingProcesses {
        dirs: BuildDirs,
        racer: (u32, &'static str),
        raced: Mutex<bool>,
        alive: HashSet<u32>,
    }

    impl ProcessTable for RacingProcesses {
        fn current_pid(&self) -> u32 {
            1
        }

        fn is_alive(&self, pid: u32) -> bool {
            let mut raced = self.raced.lock().unwrap();
            if !*raced {
                *raced = true;
                let (racer, hash) = self.racer;
                self.dirs.acquire(racer, hash).unwrap();
            }
            pid == self.racer.0 || self.alive.contains(&pid)
        }
    }

    #[test]
    fn test_collect_garbage_keeps_directory_locked_mid_scan() {
        let tmp = TempDir::new().unwrap();
        let dirs = BuildDirs::new(tmp.path());
        dirs.acquire(10, "locked").unwrap();
        dirs.acquire(11, "reused").unwrap();
        dirs.release(11).unwrap();
        dirs.acquire(12, "orphan").unwrap();
        dirs.release(12).unwrap();

        let processes = RacingProcesses {
            dirs: dirs.clone(),
            racer: (300, "reused"),
            raced: Mutex::new(false),
            alive: [10].into_iter().collect(),
        };
        let removed = dirs.collect_garbage(&processes).unwrap();

        assert_eq!(removed, vec!["orphan".to_string()]);
        assert_eq!(dirs.marker_target(300).as_deref(), Some("reused"));
        assert!(dirs.hash_dir("reused").is_dir());
        assert!(dirs.hash_dir("locked").is_dir());
    }

    #[test]
    fn test_created_stamp_is_sticky() {
        let tmp = TempDir::new().unwrap();
        let dirs = BuildDirs::new(tmp.path());
        dirs.acquire(1, "abc").unwrap();

        let first = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let later = Utc.timestamp_opt(1_800_000_000, 0).unwrap();
        assert_eq!(dirs.created_stamp("abc", first).unwrap(), first);
        assert_eq!(dirs.created_stamp("abc", later).unwrap(), first);
    }

    #[test]
    fn test_missing_dirs_are_empty() {
        let tmp = TempDir::new().unwrap();
        let dirs = BuildDirs::new(tmp.path().join("absent"));
        let processes = FakeProcesses::new(1, &[]);
        assert!(dirs.markers().unwrap().is_empty());
        assert!(dirs.collect_garbage(&processes).unwrap().is_empty());
    }
}
