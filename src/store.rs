//! The record store: one JSON file holding the id counter and every record.
//!
//! ```json
//! { "last_app_id": 1003, "forms": [ { "app_id": 1001, ... }, ... ] }
//! ```
//!
//! Every mutation is a full load → modify → atomic-replace cycle under one
//! mutex per store file, shared by every handle opened on that file, so id
//! allocation and record writes are totally ordered within the process. The replace writes a temp file in the store's own directory,
//! fsyncs it and renames it over the old file; a crash at any point leaves
//! either the old or the new file, never a torn one.
//!
//! Reads take no lock. Because writers only ever rename complete files into
//! place, a reader always sees some complete snapshot.

use crate::error::StoreError;
use crate::schema::ApplicationRecord;
use serde::{Deserialize, Serialize};
use std::io::Write;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Write locks keyed by canonical store path. Entries live for the process.
static STORE_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = Lazy::new(Default::default);

/// Counter value of a freshly created store. The first id handed out is 1001.
pub const SEED_APP_ID: u64 = 1000;

/// Full on-disk contents of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub last_app_id: u64,
    #[serde(default)]
    pub forms: Vec<ApplicationRecord>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self {
            last_app_id: SEED_APP_ID,
            forms: Vec::new(),
        }
    }
}

/// Mutex-guarded repository over the store file.
///
/// Handles opened on the same file (under any spelling of its path) share
/// one write lock.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl Store {
    /// Open the store at `path`, creating the seed file when absent.
    ///
    /// An existing file that does not parse is reported as
    /// [`StoreError::Corrupt`] and left untouched.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let lock = shared_lock(canonical_key(&path)?)?;
        let store = Self { path, lock };
        {
            let _guard = store.lock.lock().map_err(|_| StoreError::Poisoned)?;
            if !store.path.exists() {
                info!("Creating store at {}", store.path.display());
                store.save(&StoreSnapshot::default())?;
            } else {
                store.load()?;
            }
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reserve the next application id.
    ///
    /// Ids are unique and strictly increasing across the store's lifetime.
    /// An id whose application later fails is not reused.
    pub fn allocate_id(&self) -> Result<u64, StoreError> {
        self.mutate(|snapshot| {
            snapshot.last_app_id += 1;
            snapshot.last_app_id
        })
    }

    /// Append a record.
    pub fn insert(&self, record: ApplicationRecord) -> Result<(), StoreError> {
        let app_id = record.app_id;
        self.mutate(move |snapshot| snapshot.forms.push(record))?;
        debug!(app_id, "Record inserted");
        Ok(())
    }

    /// Replace the record with `app_id`. Returns `false` when none exists.
    pub fn update(&self, app_id: u64, record: ApplicationRecord) -> Result<bool, StoreError> {
        let mut record = Some(record);
        self.mutate(|snapshot| {
            match snapshot.forms.iter_mut().find(|r| r.app_id == app_id) {
                Some(slot) => {
                    if let Some(new) = record.take() {
                        *slot = new;
                    }
                    true
                }
                None => false,
            }
        })
    }

    /// The record with `app_id`, if any.
    pub fn get(&self, app_id: u64) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self
            .load()?
            .forms
            .into_iter()
            .find(|r| r.app_id == app_id))
    }

    /// Every record, in insertion order.
    pub fn list_all(&self) -> Result<Vec<ApplicationRecord>, StoreError> {
        Ok(self.load()?.forms)
    }

    /// The full current snapshot.
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        self.load()
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn mutate<T>(&self, f: impl FnOnce(&mut StoreSnapshot) -> T) -> Result<T, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut snapshot = self.load()?;
        let out = f(&mut snapshot);
        self.save(&snapshot)?;
        Ok(out)
    }

    fn load(&self) -> Result<StoreSnapshot, StoreError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreSnapshot::default())
            }
            Err(e) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            source: e,
        })
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        let tmp = self.write_temp(snapshot)?;
        tmp.persist(&self.path).map_err(|e| StoreError::Write {
            path: self.path.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Serialise `snapshot` into a synced temp file beside the store.
    fn write_temp(&self, snapshot: &StoreSnapshot) -> Result<NamedTempFile, StoreError> {
        let body = serde_json::to_vec_pretty(snapshot).map_err(StoreError::Serialise)?;
        let write_err = |e: std::io::Error| StoreError::Write {
            path: self.path.clone(),
            source: e,
        };
        let dir = store_dir(&self.path);
        std::fs::create_dir_all(&dir).map_err(write_err)?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(&body).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        Ok(tmp)
    }
}

fn store_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Canonical directory joined with the file name; the file itself may not
/// exist yet.
fn canonical_key(path: &Path) -> Result<PathBuf, StoreError> {
    let dir = store_dir(path);
    let io_err = |e: std::io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source: e,
    };
    std::fs::create_dir_all(&dir).map_err(io_err)?;
    let dir = dir.canonicalize().map_err(io_err)?;
    Ok(match path.file_name() {
        Some(name) => dir.join(name),
        None => dir,
    })
}

fn shared_lock(key: PathBuf) -> Result<Arc<Mutex<()>>, StoreError> {
    let mut locks = STORE_LOCKS.lock().map_err(|_| StoreError::Poisoned)?;
    Ok(Arc::clone(locks.entry(key).or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_seeds_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("local_db.json");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.last_app_id, SEED_APP_ID);
        assert!(snap.forms.is_empty());
    }

    #[test]
    fn allocation_starts_after_seed_and_increments() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("db.json")).unwrap();
        assert_eq!(store.allocate_id().unwrap(), 1001);
        assert_eq!(store.allocate_id().unwrap(), 1002);
        assert_eq!(store.snapshot().unwrap().last_app_id, 1002);
    }

    #[test]
    fn counter_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        Store::open(&path).unwrap().allocate_id().unwrap();
        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.allocate_id().unwrap(), 1002);
    }

    #[test]
    fn corrupt_file_is_an_error_and_left_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, b"{\"last_app_id\": 10").unwrap();
        let err = Store::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }), "got {err:?}");
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"last_app_id\": 10");
    }

    #[test]
    fn handles_on_one_file_share_a_lock() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let a = Store::open(dir.path().join("db.json")).unwrap();
        let b = Store::open(dir.path().join("sub").join("..").join("db.json")).unwrap();
        let other = Store::open(dir.path().join("other.json")).unwrap();
        assert!(Arc::ptr_eq(&a.lock, &b.lock));
        assert!(!Arc::ptr_eq(&a.lock, &other.lock));
    }

    #[test]
    fn write_abandoned_before_rename_keeps_previous_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        let store = Store::open(&path).unwrap();
        store.allocate_id().unwrap();
        let before = store.snapshot().unwrap();

        // Same steps as `allocate_id`, stopped after the temp file is synced.
        let mut next = before.clone();
        next.last_app_id += 1;
        let (_, tmp_path) = store.write_temp(&next).unwrap().keep().unwrap();
        assert!(tmp_path.exists());

        assert_eq!(store.snapshot().unwrap(), before);
        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.snapshot().unwrap(), before);
        assert_eq!(reopened.allocate_id().unwrap(), before.last_app_id + 1);
    }

    #[test]
    fn unwritable_location_is_a_write_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();
        let err = Store::open(blocker.join("db.json")).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }), "got {err:?}");
    }

    #[test]
    fn no_temp_files_left_after_writes() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("db.json")).unwrap();
        for _ in 0..5 {
            store.allocate_id().unwrap();
        }
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
