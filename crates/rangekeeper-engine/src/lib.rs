//! Storage engine orchestration: the refresh pipeline, the two concrete
//! layouts (text and binary), and the public read/update API consumed by
//! an embedding front end.
//!
//! A [`StorageEngine`] is constructed once per process and shared behind
//! an `Arc`, the same way the reference implementation keeps one shared
//! storage instance for the lifetime of the HTTP server it backs.

mod binary;
mod layout;
mod text;

pub use binary::BinaryLayout;
pub use layout::{Layout, WorkerControl};
pub use text::TextLayout;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rangekeeper_config::EngineConfig;
use rangekeeper_dataset::DatasetManager;
use rangekeeper_error::EngineError;
use rangekeeper_provider::RangeProvider;
use rangekeeper_revision::{Revision, RevisionSnapshot, RevisionStatus};
use rangekeeper_types::DatasetId;
use tokio::sync::{Mutex, watch};

/// Outcome of the synchronous `update()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    Done,
    Cancelled,
    /// Paused via `request_update_pause()` before completion. Not part of
    /// the upstream reference's result set (which predates pause/resume);
    /// added for symmetry with the richer state machine this crate
    /// implements. See DESIGN.md.
    Stopped,
    Failed,
    Busy,
}

/// Outcome of the asynchronous `request_update()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResponse {
    Started,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePauseResponse {
    Accepted,
    Irrelevant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCancellationResponse {
    Accepted,
    Irrelevant,
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock is before the unix epoch").as_secs() as i64
}

/// The concurrent refresh pipeline and read path over one layout
/// (text or binary).
pub struct StorageEngine<L: Layout> {
    layout: Arc<L>,
    provider: Arc<dyn RangeProvider>,
    dataset: Arc<parking_lot::Mutex<DatasetManager>>,
    revision: Arc<Mutex<Revision>>,
    status_tx: watch::Sender<RevisionStatus>,
    worker_count: usize,
    state_wait_time: std::time::Duration,
}

impl<L: Layout> StorageEngine<L> {
    /// Open (or initialize) the engine rooted at `config.resource_dir`.
    pub async fn open(
        config: &EngineConfig,
        layout: L,
        provider: Arc<dyn RangeProvider>,
    ) -> Result<Self, EngineError> {
        let resource_dir = PathBuf::from(&config.resource_dir);
        let implementation_name = layout.implementation_name();
        let settings_fingerprint = layout.settings_fingerprint();

        let (dataset, restored_revision) = tokio::task::spawn_blocking(move || {
            DatasetManager::open(resource_dir, implementation_name, settings_fingerprint)
        })
        .await
        .expect("blocking task panicked")
        .map_err(rangekeeper_error::EngineError::Persistence)?;

        let revision = restored_revision.unwrap_or_default();
        let status_tx = watch::Sender::new(revision.status());

        Ok(Self {
            layout: Arc::new(layout),
            provider,
            dataset: Arc::new(parking_lot::Mutex::new(dataset)),
            revision: Arc::new(Mutex::new(revision)),
            status_tx,
            worker_count: config.worker_count,
            state_wait_time: config.state_wait_time,
        })
    }

    /// Snapshot of the most recent (or in-progress) refresh.
    pub async fn revision(&self) -> RevisionSnapshot {
        self.revision.lock().await.to_snapshot()
    }

    /// Validate `prefix`, wait out any in-progress slot flip, and serve
    /// the range from the currently active dataset slot.
    pub async fn get_range(&self, prefix: &str) -> Result<String, EngineError> {
        let prefix = self.layout.validate_prefix(prefix)?;

        loop {
            if *self.status_tx.subscribe().borrow() != RevisionStatus::Transition {
                break;
            }
            tokio::time::sleep(self.state_wait_time).await;
        }

        let dataset_dir = {
            let dataset = self.dataset.lock();
            dataset.begin_read();
            dataset.active_dataset_dir()
        };

        let result = match dataset_dir {
            Some(dir) => {
                let layout = Arc::clone(&self.layout);
                tokio::task::spawn_blocking(move || layout.read_range(&dir, &prefix))
                    .await
                    .expect("blocking task panicked")
            }
            None => Ok(String::new()),
        };

        self.dataset.lock().end_read();
        result
    }

    /// Run a refresh and wait for it to finish.
    pub async fn update(&self) -> UpdateResult {
        if !self.try_claim().await {
            return UpdateResult::Busy;
        }
        self.run_refresh().await
    }

    /// Start a refresh in the background and return immediately.
    pub async fn request_update(self: &Arc<Self>) -> UpdateResponse {
        if !self.try_claim().await {
            return UpdateResponse::Busy;
        }
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_refresh().await;
        });
        UpdateResponse::Started
    }

    pub async fn request_update_pause(&self) -> UpdatePauseResponse {
        let mut revision = self.revision.lock().await;
        if !revision.is_preparing() {
            return UpdatePauseResponse::Irrelevant;
        }
        revision.request_pause();
        self.status_tx.send_replace(revision.status());
        drop(revision);
        self.persist_revision_best_effort(true).await;
        UpdatePauseResponse::Accepted
    }

    pub async fn request_update_cancellation(&self) -> UpdateCancellationResponse {
        let mut revision = self.revision.lock().await;
        if !revision.is_preparing() {
            return UpdateCancellationResponse::Irrelevant;
        }
        revision.request_cancellation();
        self.status_tx.send_replace(revision.status());
        drop(revision);
        self.persist_revision_best_effort(true).await;
        UpdateCancellationResponse::Accepted
    }

    /// Claim the revision for a new run if idle; persists the new
    /// `PREPARATION` state before returning.
    async fn try_claim(&self) -> bool {
        let mut revision = self.revision.lock().await;
        if !revision.is_idle() {
            return false;
        }
        revision.start(now_unix(), self.worker_count);
        self.status_tx.send_replace(revision.status());
        drop(revision);
        self.persist_revision_best_effort(true).await;
        true
    }

    async fn persist_revision_best_effort(&self, ignore: bool) {
        let snapshot = self.revision.lock().await.clone();
        let dataset = Arc::clone(&self.dataset);
        let result =
            tokio::task::spawn_blocking(move || dataset.lock().persist_revision(&snapshot, ignore))
                .await
                .expect("blocking task panicked");
        if let Err(error) = result {
            tracing::warn!(error = %error, "failed to persist revision state");
        }
    }

    async fn prepare_empty_dir(&self, id: DatasetId) -> Result<(), EngineError> {
        let dataset = Arc::clone(&self.dataset);
        tokio::task::spawn_blocking(move || dataset.lock().prepare_empty_dir(id))
            .await
            .expect("blocking task panicked")
            .map_err(EngineError::Persistence)
    }

    async fn flip_active(&self, new_slot: DatasetId) -> Result<(), EngineError> {
        let dataset = Arc::clone(&self.dataset);
        tokio::task::spawn_blocking(move || dataset.lock().flip_active(new_slot))
            .await
            .expect("blocking task panicked")
            .map_err(EngineError::Persistence)
    }

    async fn remove_dataset_best_effort(&self, id: DatasetId) {
        let dataset = Arc::clone(&self.dataset);
        tokio::task::spawn_blocking(move || dataset.lock().remove_dataset_best_effort(id))
            .await
            .expect("blocking task panicked");
    }

    async fn run_refresh(&self) -> UpdateResult {
        match self.run_refresh_inner().await {
            Ok(result) => result,
            Err(error) => {
                let message = error.to_string();
                tracing::error!(error = %message, "refresh run failed");
                {
                    let mut revision = self.revision.lock().await;
                    revision.mark_failed(now_unix(), message);
                    self.status_tx.send_replace(revision.status());
                }
                self.persist_revision_best_effort(false).await;
                UpdateResult::Failed
            }
        }
    }

    async fn run_refresh_inner(&self) -> Result<UpdateResult, EngineError> {
        let span = tracing::info_span!("refresh_run");
        let _entered = span.enter();

        let old_active = self.dataset.lock().active_dataset();
        let new_slot = old_active.map_or(DatasetId::A, DatasetId::other);
        tracing::info!(new_slot = ?new_slot, old_slot = ?old_active, "starting refresh");

        self.prepare_empty_dir(new_slot).await?;

        let mut join_set = tokio::task::JoinSet::new();
        for batch_index in 0..self.worker_count {
            let start_offset = self.revision.lock().await.batch_offset(batch_index);
            let layout = Arc::clone(&self.layout);
            let provider = Arc::clone(&self.provider);
            let dataset_dir = self.dataset.lock().dataset_dir(new_slot);
            let control = WorkerControl {
                batch_index,
                status: self.status_tx.subscribe(),
                revision: Arc::clone(&self.revision),
            };
            join_set.spawn(async move {
                layout.prepare_batch(&dataset_dir, provider.as_ref(), batch_index, start_offset, &control).await
            });
        }
        while let Some(joined) = join_set.join_next().await {
            joined.expect("worker task panicked")?;
        }

        let status_after_workers = self.revision.lock().await.status();
        match status_after_workers {
            RevisionStatus::Cancellation => {
                {
                    let mut revision = self.revision.lock().await;
                    revision.mark_cancelled(now_unix());
                    self.status_tx.send_replace(revision.status());
                }
                self.persist_revision_best_effort(false).await;
                self.remove_dataset_best_effort(new_slot).await;
                tracing::info!("refresh cancelled");
                return Ok(UpdateResult::Cancelled);
            }
            RevisionStatus::Stoppage => {
                {
                    let mut revision = self.revision.lock().await;
                    revision.mark_stopped(now_unix());
                    self.status_tx.send_replace(revision.status());
                }
                self.persist_revision_best_effort(false).await;
                tracing::info!("refresh paused");
                return Ok(UpdateResult::Stopped);
            }
            _ => {}
        }

        {
            let mut revision = self.revision.lock().await;
            revision.mark_prepared();
            self.status_tx.send_replace(revision.status());
        }
        self.persist_revision_best_effort(true).await;
        tracing::info!("transitioning to new dataset");

        while self.dataset.lock().has_active_reads() {
            tokio::time::sleep(self.state_wait_time).await;
        }
        self.flip_active(new_slot).await?;

        {
            let mut revision = self.revision.lock().await;
            revision.mark_transited();
            self.status_tx.send_replace(revision.status());
        }
        self.persist_revision_best_effort(true).await;

        if let Some(old) = old_active {
            self.remove_dataset_best_effort(old).await;
        }

        {
            let mut revision = self.revision.lock().await;
            revision.mark_completed(now_unix());
            self.status_tx.send_replace(revision.status());
        }
        self.persist_revision_best_effort(false).await;
        tracing::info!("refresh completed");

        Ok(UpdateResult::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangekeeper_provider::mock::MockRangeProvider;

    fn test_config(resource_dir: &std::path::Path, worker_count: usize) -> EngineConfig {
        EngineConfig {
            resource_dir: resource_dir.to_string_lossy().into_owned(),
            user_agent: "rangekeeper-engine-tests/0.1".to_string(),
            file_quantity: rangekeeper_types::FileQuantity::default(),
            numeric_width: rangekeeper_types::NumericWidth::default(),
            worker_count,
            state_wait_time: std::time::Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn update_reports_busy_while_a_run_is_already_in_flight() {
        let temp = tempfile::tempdir().unwrap();
        let provider: Arc<dyn RangeProvider> = Arc::new(MockRangeProvider::new());
        let engine =
            Arc::new(StorageEngine::open(&test_config(temp.path(), 16), TextLayout::new(16), provider).await.unwrap());

        let started = engine.request_update().await;
        assert_eq!(started, UpdateResponse::Started);

        let second = engine.request_update().await;
        assert_eq!(second, UpdateResponse::Busy);

        let synchronous = engine.update().await;
        assert_eq!(synchronous, UpdateResult::Busy);
    }

    #[tokio::test]
    async fn pause_and_cancellation_are_irrelevant_while_idle() {
        let temp = tempfile::tempdir().unwrap();
        let provider: Arc<dyn RangeProvider> = Arc::new(MockRangeProvider::new());
        let engine = StorageEngine::open(&test_config(temp.path(), 4), TextLayout::new(4), provider).await.unwrap();

        assert_eq!(engine.request_update_pause().await, UpdatePauseResponse::Irrelevant);
        assert_eq!(engine.request_update_cancellation().await, UpdateCancellationResponse::Irrelevant);
    }
}
