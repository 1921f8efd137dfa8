//! State file persistence and the `Repository` mutation boundary.
//!
//! Every save writes a sibling temp file, syncs it, and renames it over the
//! destination, so a crash mid-write leaves the previous state intact.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::{StateError, StateLock};
use crate::types::{InstanceRecord, PersistedState};

/// Environment variable overriding the default state path.
pub const STATE_PATH_ENV: &str = "FLEETSTRAP_STATE";

const LOCK_TIMEOUT: Duration = Duration::from_secs(2);


/// Resolve the state file path: `$FLEETSTRAP_STATE`, else
/// `~/.fleetstrap/state.json`.
pub fn default_state_path() -> PathBuf {
    if let Ok(path) = std::env::var(STATE_PATH_ENV) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".fleetstrap").join("state.json")
}


/// Load state from `path`. A missing file yields an empty, initialized state.
pub fn load(path: &Path) -> Result<PersistedState, StateError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PersistedState::default());
        }
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if content.trim().is_empty() {
        return Ok(PersistedState::default());
    }
    serde_json::from_str(&content).map_err(|source| StateError::Parse {
        path: path.to_path_buf(),
        source,
    })
}


/// Atomically write `state` to `path` (temp file, fsync, rename).
pub fn save(path: &Path, state: &PersistedState) -> Result<(), StateError> {
    let io_err = |source: std::io::Error| StateError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(io_err)?;

    let data = serde_json::to_vec_pretty(state)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
    tmp.write_all(&data).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}


// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Exclusive owner of the persisted fleet state.
///
/// Callers read through `state()`; every mutator writes the change to disk
/// before returning, so partial progress survives a crash.
#[derive(Debug)]
pub struct Repository {
    path: PathBuf,
    state: PersistedState,
    _lock: StateLock,
}

impl Repository {
    /// Lock and load the state file at `path`.
    pub fn open(path: &Path) -> Result<Repository, StateError> {
        let lock = StateLock::acquire(path, LOCK_TIMEOUT)?;
        let state = load(path)?;
        debug!(path = %path.display(), projects = state.projects.len(), "state loaded");
        Ok(Repository {
            path: path.to_path_buf(),
            state,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    /// Instance records of `project`, in creation order.
    pub fn instances(&self, project: &str) -> &[InstanceRecord] {
        self.state.instances(project)
    }

    pub fn set_user_id(&mut self, id: u64) -> Result<(), StateError> {
        self.state.user_id = id;
        self.persist()
    }

    pub fn set_project_id(&mut self, project: &str, id: u64) -> Result<(), StateError> {
        self.state.projects.insert(project.to_string(), id);
        self.persist()
    }

    /// Append a freshly created instance to `project`.
    pub fn push_instance(&mut self, project: &str, record: InstanceRecord) -> Result<(), StateError> {
        self.state
            .instances
            .entry(project.to_string())
            .or_default()
            .push(record);
        self.persist()
    }

    /// Record the public address of instance `id`. Returns false if no such
    /// record exists in `project`.
    pub fn set_public_ip(&mut self, project: &str, id: u64, ip: &str) -> Result<bool, StateError> {
        let Some(record) = self
            .state
            .instances
            .get_mut(project)
            .and_then(|records| records.iter_mut().find(|r| r.id == id))
        else {
            return Ok(false);
        };
        if record.public_ip == ip {
            return Ok(true);
        }
        record.public_ip = ip.to_string();
        self.persist()?;
        Ok(true)
    }

    /// Remove instance `id` from `project`. Returns the removed record.
    pub fn remove_instance(&mut self, project: &str, id: u64) -> Result<Option<InstanceRecord>, StateError> {
        let Some(records) = self.state.instances.get_mut(project) else {
            return Ok(None);
        };
        let Some(idx) = records.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        let removed = records.remove(idx);
        self.persist()?;
        Ok(Some(removed))
    }

    /// Forget every instance of `project`, keeping an empty list.
    pub fn clear_instances(&mut self, project: &str) -> Result<(), StateError> {
        self.state
            .instances
            .insert(project.to_string(), Vec::new());
        self.persist()
    }

    fn persist(&self) -> Result<(), StateError> {
        save(&self.path, &self.state)
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_returns_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(state, PersistedState::default());
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load(&path), Err(StateError::Parse { .. })));
    }

    #[test]
    fn save_creates_parent_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let mut state = PersistedState::default();
        state.user_id = 4;
        save(&path, &state).unwrap();

        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(load(&path).unwrap().user_id, 4);
    }

    #[test]
    fn repository_persists_every_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let mut repo = Repository::open(&path).unwrap();
            repo.set_user_id(1).unwrap();
            repo.set_project_id("devnet", 2).unwrap();
            repo.push_instance("devnet", InstanceRecord::new(10, "validator-1")).unwrap();
            assert!(repo.set_public_ip("devnet", 10, "203.0.113.5").unwrap());
            assert!(!repo.set_public_ip("devnet", 99, "203.0.113.6").unwrap());
        }

        let state = load(&path).unwrap();
        assert_eq!(state.user(), Some(1));
        assert_eq!(state.project("devnet"), Some(2));
        assert_eq!(state.instances("devnet")[0].public_ip, "203.0.113.5");
    }

    #[test]
    fn remove_and_clear_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut repo = Repository::open(&path).unwrap();
        repo.push_instance("devnet", InstanceRecord::new(1, "a")).unwrap();
        repo.push_instance("devnet", InstanceRecord::new(2, "b")).unwrap();

        let removed = repo.remove_instance("devnet", 1).unwrap().unwrap();
        assert_eq!(removed.name, "a");
        assert!(repo.remove_instance("devnet", 1).unwrap().is_none());
        assert_eq!(load(&path).unwrap().instances("devnet").len(), 1);

        repo.clear_instances("devnet").unwrap();
        let on_disk = load(&path).unwrap();
        assert!(on_disk.instances.contains_key("devnet"));
        assert!(on_disk.instances("devnet").is_empty());
    }

    #[test]
    fn open_twice_is_rejected_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let _repo = Repository::open(&path).unwrap();
        assert!(matches!(Repository::open(&path), Err(StateError::Locked { .. })));
    }
}
