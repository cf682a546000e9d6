//! The layout capability: the part of a storage engine that differs
//! between the text and binary concrete implementations. A
//! [`StorageEngine`](crate::StorageEngine) holds one `Layout` and is
//! otherwise identical across both.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rangekeeper_error::EngineError;
use rangekeeper_provider::RangeProvider;
use rangekeeper_revision::Revision;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, watch};

use rangekeeper_revision::RevisionStatus;

/// Cooperation surface handed to a worker so it can observe cancellation
/// and report progress without owning the revision itself.
pub struct WorkerControl {
    pub(crate) batch_index: usize,
    pub(crate) status: watch::Receiver<RevisionStatus>,
    pub(crate) revision: Arc<Mutex<Revision>>,
}

impl WorkerControl {
    /// Whether the worker should stop before starting its next prefix.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        matches!(
            *self.status.borrow(),
            RevisionStatus::Cancellation | RevisionStatus::Stoppage | RevisionStatus::Failed
        )
    }

    /// Record that this worker's batch has prepared one more prefix.
    pub async fn record_prefix_prepared(&self) {
        self.revision.lock().await.record_prepared_prefix(self.batch_index);
    }
}

/// The engine operations that differ between the text and binary storage
/// formats: how settings are fingerprinted, how a prefix is validated,
/// how one worker's batch is written, and how a read is served.
#[async_trait]
pub trait Layout: Send + Sync + 'static {
    /// Name persisted in `implementation.json`, used to detect a change
    /// of engine kind across restarts.
    fn implementation_name(&self) -> &'static str;

    /// Settings persisted in `implementation.json` alongside the name;
    /// a mismatch here (for an otherwise matching name) also invalidates
    /// persisted state.
    fn settings_fingerprint(&self) -> Map<String, Value>;

    /// Validate and uppercase a caller-supplied prefix.
    fn validate_prefix(&self, prefix: &str) -> Result<String, EngineError>;

    /// Prepare this worker's disjoint slice of the prefix space inside
    /// `dataset_dir`, resuming after `start_offset` prefixes already
    /// written in a previous run.
    async fn prepare_batch(
        &self,
        dataset_dir: &Path,
        provider: &dyn RangeProvider,
        batch_index: usize,
        start_offset: u64,
        control: &WorkerControl,
    ) -> Result<(), EngineError>;

    /// Serve a single validated, uppercased prefix query against the
    /// active dataset directory.
    fn read_range(&self, dataset_dir: &Path, prefix: &str) -> Result<String, EngineError>;
}

pub(crate) fn validate_hex_prefix(prefix: &str, allowed_lengths: &[usize]) -> Result<String, EngineError> {
    let upper = prefix.to_ascii_uppercase();
    if !upper.chars().all(|symbol| symbol.is_ascii_hexdigit()) {
        return Err(EngineError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: "the hash prefix must be a hex string",
        });
    }
    if !allowed_lengths.contains(&upper.len()) {
        return Err(EngineError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: "the hash prefix has an unsupported length",
        });
    }
    Ok(upper)
}
