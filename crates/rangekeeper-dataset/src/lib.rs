//! The two-slot (A/B) on-disk dataset, its crash-safe active-slot
//! persistence, and the companion `revision.json` persistence that shares
//! the same resource directory and the same `ignore`-flag two-phase-commit
//! discipline.
//!
//! All filesystem operations here are synchronous; callers on an async
//! runtime are expected to run them through `spawn_blocking`, the same way
//! the reference implementation wraps its directory operations in
//! `asyncio.to_thread`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rangekeeper_error::DatasetError;
use rangekeeper_revision::{Revision, RevisionStatus};
use rangekeeper_types::DatasetId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const STATE_FILE: &str = "state.json";
const IMPLEMENTATION_FILE: &str = "implementation.json";
const REVISION_FILE: &str = "revision.json";
const IMPLEMENTATION_NAME_KEY: &str = "name";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredState {
    #[serde(skip_serializing_if = "Option::is_none")]
    active_dataset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ignore: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRevision {
    status: RevisionStatus,
    start_ts: Option<i64>,
    end_ts: Option<i64>,
    error_message: Option<String>,
    batch_offsets: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ignore: Option<bool>,
}

fn io_err(path: &Path, source: std::io::Error) -> DatasetError {
    DatasetError::Io { path: path.display().to_string(), source }
}

fn json_err(path: &Path, source: serde_json::Error) -> DatasetError {
    DatasetError::Json { path: path.display().to_string(), source }
}

/// Recursively delete `path` if it's a directory, tolerating its absence.
fn remove_dir_if_exists(path: &Path) -> Result<(), DatasetError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(io_err(path, error)),
    }
}

fn create_dir_if_missing(path: &Path) -> Result<(), DatasetError> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(error) => Err(io_err(path, error)),
    }
}

/// Manages the storage engine's persisted state: which dataset slot is
/// active, the implementation fingerprint used to invalidate stale state
/// on a settings change, the in-flight-read counter that gates a slot
/// flip, and the last serialised revision.
pub struct DatasetManager {
    resource_dir: PathBuf,
    active_dataset: Option<DatasetId>,
    in_flight_reads: AtomicU64,
}

impl DatasetManager {
    /// Open (or initialize) the dataset manager rooted at `resource_dir`,
    /// returning it along with the persisted revision to resume from, if
    /// any.
    ///
    /// `implementation_name` and `settings_fingerprint` together identify
    /// the engine's current configuration. If `implementation.json`
    /// disagrees with them, any persisted `state.json` and `revision.json`
    /// are discarded: the engine starts as if freshly installed rather
    /// than risk misinterpreting a dataset laid out under different
    /// settings. The slot directories themselves are left untouched; they
    /// are orphaned and overwritten on the next refresh.
    pub fn open(
        resource_dir: impl Into<PathBuf>,
        implementation_name: &str,
        settings_fingerprint: Map<String, Value>,
    ) -> Result<(Self, Option<Revision>), DatasetError> {
        let resource_dir = resource_dir.into();
        create_dir_if_missing(&resource_dir)?;

        let implementation_path = resource_dir.join(IMPLEMENTATION_FILE);
        let state_path = resource_dir.join(STATE_FILE);
        let revision_path = resource_dir.join(REVISION_FILE);
        let is_relevant =
            Self::check_implementation_matches(&implementation_path, implementation_name, &settings_fingerprint)?;
        if is_relevant {
            let active_dataset = Self::read_active_dataset(&state_path)?;
            let restored_revision = Self::read_revision_if_idle(&revision_path);
            return Ok((Self { resource_dir, active_dataset, in_flight_reads: AtomicU64::new(0) }, restored_revision));
        }

        Self::write_implementation(&implementation_path, implementation_name, &settings_fingerprint)?;
        let _ = fs::remove_file(&state_path);
        let _ = fs::remove_file(&revision_path);
        Ok((Self { resource_dir, active_dataset: None, in_flight_reads: AtomicU64::new(0) }, None))
    }

    fn check_implementation_matches(
        implementation_path: &Path,
        implementation_name: &str,
        settings_fingerprint: &Map<String, Value>,
    ) -> Result<bool, DatasetError> {
        let raw = match fs::read_to_string(implementation_path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(error) => return Err(io_err(implementation_path, error)),
        };
        let Ok(Value::Object(persisted)) = serde_json::from_str::<Value>(&raw) else {
            return Ok(false);
        };
        let name_matches =
            persisted.get(IMPLEMENTATION_NAME_KEY) == Some(&Value::String(implementation_name.to_string()));
        let settings_match =
            settings_fingerprint.iter().all(|(key, value)| persisted.get(key) == Some(value));
        Ok(name_matches && settings_match)
    }

    fn write_implementation(
        implementation_path: &Path,
        implementation_name: &str,
        settings_fingerprint: &Map<String, Value>,
    ) -> Result<(), DatasetError> {
        let mut document = settings_fingerprint.clone();
        document.insert(IMPLEMENTATION_NAME_KEY.to_string(), Value::String(implementation_name.to_string()));
        let body = serde_json::to_string(&Value::Object(document)).map_err(|error| json_err(implementation_path, error))?;
        fs::write(implementation_path, body).map_err(|error| io_err(implementation_path, error))
    }

    fn read_active_dataset(state_path: &Path) -> Result<Option<DatasetId>, DatasetError> {
        let raw = match fs::read_to_string(state_path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(_) => return Ok(None),
        };
        let Ok(state) = serde_json::from_str::<StoredState>(&raw) else {
            return Ok(None);
        };
        if state.ignore == Some(true) {
            return Ok(None);
        }
        Ok(state.active_dataset.and_then(|value| DatasetId::from_str_value(&value)))
    }

    fn read_revision_if_idle(revision_path: &Path) -> Option<Revision> {
        let raw = fs::read_to_string(revision_path).ok()?;
        let stored: StoredRevision = serde_json::from_str(&raw).ok()?;
        if stored.ignore == Some(true) {
            return None;
        }
        if !stored.status.is_idle() {
            return None;
        }
        Some(Revision::from_persisted(
            stored.status,
            stored.start_ts,
            stored.end_ts,
            stored.error_message,
            stored.batch_offsets,
        ))
    }

    fn write_state(&self, pending: Option<(Option<DatasetId>, Option<bool>)>) -> Result<(), DatasetError> {
        let (active_dataset, ignore) = pending.unwrap_or((self.active_dataset, None));
        let stored = StoredState { active_dataset: active_dataset.map(|id| id.as_str().to_string()), ignore };
        let state_path = self.resource_dir.join(STATE_FILE);
        let body = serde_json::to_string(&stored).map_err(|error| json_err(&state_path, error))?;
        fs::write(&state_path, body).map_err(|error| io_err(&state_path, error))
    }

    /// Persist a revision snapshot. Per invariant I5, any snapshot of a
    /// non-idle status must be written with `ignore: true`; only the
    /// final terminal record of a run should pass `ignore = false`.
    pub fn persist_revision(&self, revision: &Revision, ignore: bool) -> Result<(), DatasetError> {
        let stored = StoredRevision {
            status: revision.status(),
            start_ts: revision.start_ts(),
            end_ts: revision.end_ts(),
            error_message: revision.error_message().map(str::to_string),
            batch_offsets: revision.batch_offsets().to_vec(),
            ignore: ignore.then_some(true),
        };
        let revision_path = self.resource_dir.join(REVISION_FILE);
        let body = serde_json::to_string(&stored).map_err(|error| json_err(&revision_path, error))?;
        fs::write(&revision_path, body).map_err(|error| io_err(&revision_path, error))
    }

    #[must_use]
    pub const fn active_dataset(&self) -> Option<DatasetId> {
        self.active_dataset
    }

    #[must_use]
    pub fn dataset_dir(&self, id: DatasetId) -> PathBuf {
        self.resource_dir.join(id.dir_name())
    }

    #[must_use]
    pub fn active_dataset_dir(&self) -> Option<PathBuf> {
        self.active_dataset.map(|id| self.dataset_dir(id))
    }

    /// Record one more in-flight read, mirroring `count_started_request`.
    pub fn begin_read(&self) {
        self.in_flight_reads.fetch_add(1, Ordering::SeqCst);
    }

    /// Release an in-flight read, mirroring `count_finished_request`.
    pub fn end_read(&self) {
        self.in_flight_reads.fetch_sub(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn has_active_reads(&self) -> bool {
        self.in_flight_reads.load(Ordering::SeqCst) > 0
    }

    /// Recreate `id`'s directory empty, deleting any prior contents.
    pub fn prepare_empty_dir(&self, id: DatasetId) -> Result<(), DatasetError> {
        let dir = self.dataset_dir(id);
        remove_dir_if_exists(&dir)?;
        create_dir_if_missing(&dir)
    }

    /// Best-effort directory removal: failures are logged and swallowed, as
    /// a stale slot on disk is harmless and not worth failing an update over.
    pub fn remove_dataset_best_effort(&self, id: DatasetId) {
        let dir = self.dataset_dir(id);
        if let Err(error) = remove_dir_if_exists(&dir) {
            tracing::warn!(dataset = ?id, error = %error, "failed to remove stale dataset directory");
        }
    }

    /// Atomically flip the active slot to `new_dataset` via a two-phase
    /// commit: first persist `new_dataset` with `ignore: true` (so a crash
    /// mid-write leaves the old slot active on restart), then clear the
    /// ignore flag once the write has landed.
    ///
    /// # Panics
    /// Panics if a read is still in flight; callers must drain readers
    /// before flipping.
    pub fn flip_active(&mut self, new_dataset: DatasetId) -> Result<(), DatasetError> {
        assert!(!self.has_active_reads(), "cannot flip the active dataset while reads are in flight");
        self.write_state(Some((Some(new_dataset), Some(true))))?;
        self.active_dataset = Some(new_dataset);
        self.write_state(Some((Some(new_dataset), None)))
    }
}
