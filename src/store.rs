//! Durable refinery state
//!
//! Owns the state file under the rig's control directory, plus the advisory
//! lock that serializes read-modify-write sequences across processes. The
//! lock file holds the owner's pid; a lock whose holder is no longer alive
//! is stale and gets stolen.

use crate::process::{ProcessProbe, SystemProbe};
use crate::{Refinery, RefineryError, Result, Rig};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// State file reader/writer for one rig
#[derive(Clone)]
pub struct StateStore {
    rig_name: String,
    state_path: PathBuf,
    lock_path: PathBuf,
    probe: Arc<dyn ProcessProbe + Send + Sync>,
}

impl StateStore {
    /// Create a store for the rig's control directory
    pub fn new(rig: &Rig) -> Self {
        Self {
            rig_name: rig.name.clone(),
            state_path: rig.state_path(),
            lock_path: rig.lock_path(),
            probe: Arc::new(SystemProbe),
        }
    }

    /// Replace the probe deciding whether a lock holder is still alive
    pub fn with_probe(mut self, probe: Arc<dyn ProcessProbe + Send + Sync>) -> Self {
        self.probe = probe;
        self
    }

    /// Path of the persisted state file
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Load the agent record
    ///
    /// A missing file is not an error: the rig simply has no refinery
    /// history yet, so a default stopped record is returned.
    pub fn load(&self) -> Result<Refinery> {
        let data = match fs::read_to_string(&self.state_path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(rig = %self.rig_name, "No state file, starting from defaults");
                return Ok(Refinery::new(&self.rig_name));
            }
            Err(e) => return Err(e.into()),
        };

        let record = serde_json::from_str(&data)?;
        Ok(record)
    }

    /// Persist the agent record, creating the control directory if needed
    ///
    /// Always a full overwrite. Pretty-printed so operators can diff it.
    pub fn save(&self, record: &Refinery) -> Result<()> {
        if let Some(parent) = self.state_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut json = serde_json::to_string_pretty(record)?;
        json.push('\n');
        fs::write(&self.state_path, json)?;
        Ok(())
    }

    /// Run one load-mutate-save sequence under the advisory lock
    ///
    /// The record is saved only when the closure succeeds; on error the
    /// file is left untouched.
    pub fn update<T>(&self, f: impl FnOnce(&mut Refinery) -> Result<T>) -> Result<T> {
        let _lock = StateLock::acquire(&self.lock_path, self.probe.as_ref())?;
        let mut record = self.load()?;
        let value = f(&mut record)?;
        self.save(&record)?;
        Ok(value)
    }
}

/// Held advisory lock, released on drop
struct StateLock {
    path: PathBuf,
}

impl StateLock {
    fn acquire(path: &Path, probe: &dyn ProcessProbe) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match Self::try_create(path) {
            Ok(()) => Ok(Self {
                path: path.to_path_buf(),
            }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = Self::read_holder(path);
                match holder {
                    Some(pid) if pid != std::process::id() && probe.is_alive(pid) => {
                        Err(RefineryError::LockHeld {
                            path: path.to_path_buf(),
                            pid,
                        })
                    }
                    _ => {
                        // Holder is dead, unreadable, or a leak from this
                        // process; the lock is stale either way.
                        warn!(
                            path = %path.display(),
                            holder = holder.unwrap_or(0),
                            "Stealing stale state lock"
                        );
                        fs::remove_file(path)?;
                        Self::try_create(path).map_err(|e| {
                            if e.kind() == ErrorKind::AlreadyExists {
                                // Lost the steal to another process.
                                RefineryError::LockHeld {
                                    path: path.to_path_buf(),
                                    pid: Self::read_holder(path).unwrap_or(0),
                                }
                            } else {
                                e.into()
                            }
                        })?;
                        Ok(Self {
                            path: path.to_path_buf(),
                        })
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn try_create(path: &Path) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(std::process::id().to_string().as_bytes())?;
        Ok(())
    }

    fn read_holder(path: &Path) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Failed to remove state lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RefineryState;
    use tempfile::TempDir;

    // Above the default pid_max on Linux, so nothing alive can own it
    const DEAD_PID: u32 = 2_147_483_647;

    fn test_store(dir: &TempDir) -> StateStore {
        let rig = Rig::builder()
            .name("testrig")
            .path(dir.path())
            .build()
            .unwrap();
        StateStore::new(&rig)
    }

    #[test]
    fn test_load_missing_returns_default() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let record = store.load().unwrap();
        assert_eq!(record.rig_name, "testrig");
        assert_eq!(record.state, RefineryState::Stopped);
        assert!(record.pid.is_none());
        assert!(record.current_mr.is_none());
    }

    #[test]
    fn test_save_creates_control_dir_and_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let mut record = Refinery::new("testrig");
        record.state = RefineryState::Running;
        record.pid = Some(4242);
        store.save(&record).unwrap();

        assert!(dir.path().join(".refinery/state.json").exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.state, RefineryState::Running);
        assert_eq!(loaded.pid, Some(4242));
    }

    #[test]
    fn test_save_is_pretty_printed() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.save(&Refinery::new("testrig")).unwrap();

        let contents = fs::read_to_string(store.state_path()).unwrap();
        assert!(contents.contains("\n  \"rig_name\": \"testrig\""));
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn test_load_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        fs::create_dir_all(dir.path().join(".refinery")).unwrap();
        fs::write(store.state_path(), "{not json").unwrap();

        let result = store.load();
        assert!(matches!(result, Err(RefineryError::Json(_))));
    }

    #[test]
    fn test_update_persists_mutation() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store
            .update(|record| {
                record.state = RefineryState::Paused;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.load().unwrap().state, RefineryState::Paused);
        // Lock released once the update is done
        assert!(!dir.path().join(".refinery/state.lock").exists());
    }

    #[test]
    fn test_update_error_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let mut record = Refinery::new("testrig");
        record.stats.total_merged = 7;
        store.save(&record).unwrap();

        let result: Result<()> = store.update(|record| {
            record.stats.total_merged = 99;
            Err(RefineryError::NotRunning)
        });
        assert!(matches!(result, Err(RefineryError::NotRunning)));

        assert_eq!(store.load().unwrap().stats.total_merged, 7);
        assert!(!dir.path().join(".refinery/state.lock").exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_update_blocked_by_live_lock_holder() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        // A live process we own, so the probe sees it as alive
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();

        let lock_path = dir.path().join(".refinery/state.lock");
        fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        fs::write(&lock_path, child.id().to_string()).unwrap();

        let result: Result<()> = store.update(|_| Ok(()));
        assert!(matches!(result, Err(RefineryError::LockHeld { .. })));
        // The held lock survives the failed attempt
        assert!(lock_path.exists());

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_update_steals_stale_lock() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let lock_path = dir.path().join(".refinery/state.lock");
        fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        fs::write(&lock_path, DEAD_PID.to_string()).unwrap();

        store
            .update(|record| {
                record.state = RefineryState::Running;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.load().unwrap().state, RefineryState::Running);
        assert!(!lock_path.exists());
    }

    struct AlwaysAliveProbe;

    impl ProcessProbe for AlwaysAliveProbe {
        fn is_alive(&self, _pid: u32) -> bool {
            true
        }

        fn interrupt(&self, _pid: u32) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_injected_probe_governs_lock_stealing() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir).with_probe(Arc::new(AlwaysAliveProbe));

        // The pid is long gone, but the scripted probe vouches for it, so
        // the lock counts as held.
        let lock_path = dir.path().join(".refinery/state.lock");
        fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        fs::write(&lock_path, DEAD_PID.to_string()).unwrap();

        let result: Result<()> = store.update(|_| Ok(()));
        assert!(matches!(result, Err(RefineryError::LockHeld { pid, .. }) if pid == DEAD_PID));
        assert!(lock_path.exists());
    }

    #[test]
    fn test_update_steals_garbage_lock() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let lock_path = dir.path().join(".refinery/state.lock");
        fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
        fs::write(&lock_path, "not-a-pid").unwrap();

        let result: Result<()> = store.update(|_| Ok(()));
        assert!(result.is_ok());
    }
}
