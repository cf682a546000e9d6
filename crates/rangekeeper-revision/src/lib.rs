//! The revision state machine describing the lifecycle of one refresh run.
//!
//! [`Revision`] is the mutable, single-writer state held by the storage
//! engine. [`RevisionSnapshot`] is the immutable DTO handed back from the
//! engine's public `revision()` operation.

use rangekeeper_types::PREFIX_CAPACITY;
use serde::{Deserialize, Serialize};

/// One state in the refresh lifecycle. Terminal states accept `start()`
/// again; non-terminal states are reached only by the refresh task itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionStatus {
    New,
    Preparation,
    Transition,
    Purge,
    Stoppage,
    Cancellation,
    Completed,
    Failed,
    Stopped,
    Cancelled,
}

impl RevisionStatus {
    /// Idle statuses are the ones from which a new refresh may start.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(
            self,
            Self::New | Self::Completed | Self::Stopped | Self::Failed | Self::Cancelled
        )
    }

    /// Progress is only meaningful while prefixes are actively being
    /// counted or were being counted when the run stopped.
    #[must_use]
    const fn reports_progress(self) -> bool {
        matches!(self, Self::Preparation | Self::Stoppage | Self::Stopped | Self::Failed)
    }
}

/// The public, read-only view of a revision, as returned by
/// `StorageEngine::revision()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionSnapshot {
    pub status: RevisionStatus,
    pub progress: Option<u32>,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    pub error_message: Option<String>,
}

/// Mutable revision state, owned and transitioned exclusively by the
/// storage engine's refresh task.
#[derive(Debug, Clone)]
pub struct Revision {
    status: RevisionStatus,
    start_ts: Option<i64>,
    end_ts: Option<i64>,
    error_message: Option<String>,
    /// Prefixes prepared so far per worker batch. Empty outside a run that
    /// has ever made progress; resized to the worker count on `start()`.
    batch_offsets: Vec<u64>,
}

impl Default for Revision {
    fn default() -> Self {
        Self {
            status: RevisionStatus::New,
            start_ts: None,
            end_ts: None,
            error_message: None,
            batch_offsets: Vec::new(),
        }
    }
}

impl Revision {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrate from a previously persisted snapshot (used when resuming
    /// a `STOPPED` run across a process restart). Only valid to call before
    /// any transition has happened on a fresh `Revision`.
    #[must_use]
    pub fn from_persisted(
        status: RevisionStatus,
        start_ts: Option<i64>,
        end_ts: Option<i64>,
        error_message: Option<String>,
        batch_offsets: Vec<u64>,
    ) -> Self {
        Self { status, start_ts, end_ts, error_message, batch_offsets }
    }

    #[must_use]
    pub const fn status(&self) -> RevisionStatus {
        self.status
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.status.is_idle()
    }

    #[must_use]
    pub fn is_transiting(&self) -> bool {
        self.status == RevisionStatus::Transition
    }

    #[must_use]
    pub fn is_preparing(&self) -> bool {
        self.status == RevisionStatus::Preparation
    }

    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.status == RevisionStatus::Cancellation
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.status == RevisionStatus::Stoppage
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == RevisionStatus::Failed
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status == RevisionStatus::Cancelled
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == RevisionStatus::Completed
    }

    #[must_use]
    pub fn start_ts(&self) -> Option<i64> {
        self.start_ts
    }

    #[must_use]
    pub fn end_ts(&self) -> Option<i64> {
        self.end_ts
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    #[must_use]
    pub fn batch_offsets(&self) -> &[u64] {
        &self.batch_offsets
    }

    #[must_use]
    pub fn batch_offset(&self, batch_index: usize) -> u64 {
        self.batch_offsets.get(batch_index).copied().unwrap_or(0)
    }

    fn prepared_prefix_count(&self) -> u64 {
        self.batch_offsets.iter().sum()
    }

    #[must_use]
    pub fn progress(&self) -> Option<u32> {
        if !self.status.reports_progress() {
            return None;
        }
        let prepared = self.prepared_prefix_count();
        Some(u32::try_from(100 * prepared / u64::from(PREFIX_CAPACITY)).unwrap_or(100))
    }

    #[must_use]
    pub fn to_snapshot(&self) -> RevisionSnapshot {
        RevisionSnapshot {
            status: self.status,
            progress: self.progress(),
            start_ts: self.start_ts,
            end_ts: self.end_ts,
            error_message: self.error_message.clone(),
        }
    }

    /// `{NEW, COMPLETED, STOPPED, CANCELLED, FAILED} -> PREPARATION`.
    /// `now` is the current unix timestamp; it is only used as the new
    /// `start_ts` when not resuming from `STOPPED`.
    ///
    /// # Panics
    /// Panics if the current status is not idle.
    pub fn start(&mut self, now: i64, worker_count: usize) {
        assert!(self.is_idle(), "start() requires an idle revision");
        let resuming = self.status == RevisionStatus::Stopped
            && self.batch_offsets.len() == worker_count;
        if !resuming {
            self.start_ts = Some(now);
            self.batch_offsets = vec![0; worker_count];
        }
        self.end_ts = None;
        self.error_message = None;
        self.status = RevisionStatus::Preparation;
    }

    /// `PREPARATION -> TRANSITION`.
    pub fn mark_prepared(&mut self) {
        assert_eq!(self.status, RevisionStatus::Preparation);
        self.status = RevisionStatus::Transition;
    }

    /// `TRANSITION -> PURGE`.
    pub fn mark_transited(&mut self) {
        assert_eq!(self.status, RevisionStatus::Transition);
        self.status = RevisionStatus::Purge;
    }

    /// `PURGE -> COMPLETED`.
    pub fn mark_completed(&mut self, now: i64) {
        assert_eq!(self.status, RevisionStatus::Purge);
        self.end_ts = Some(now);
        self.status = RevisionStatus::Completed;
    }

    /// `PREPARATION -> STOPPAGE`.
    pub fn request_pause(&mut self) {
        assert_eq!(self.status, RevisionStatus::Preparation);
        self.status = RevisionStatus::Stoppage;
    }

    /// `STOPPAGE -> STOPPED`.
    pub fn mark_stopped(&mut self, now: i64) {
        assert_eq!(self.status, RevisionStatus::Stoppage);
        self.end_ts = Some(now);
        self.status = RevisionStatus::Stopped;
    }

    /// `PREPARATION -> CANCELLATION`.
    pub fn request_cancellation(&mut self) {
        assert_eq!(self.status, RevisionStatus::Preparation);
        self.status = RevisionStatus::Cancellation;
    }

    /// `CANCELLATION -> CANCELLED`.
    pub fn mark_cancelled(&mut self, now: i64) {
        assert_eq!(self.status, RevisionStatus::Cancellation);
        self.batch_offsets.clear();
        self.end_ts = Some(now);
        self.status = RevisionStatus::Cancelled;
    }

    /// Any non-terminal status `-> FAILED`.
    pub fn mark_failed(&mut self, now: i64, message: String) {
        self.batch_offsets.clear();
        self.end_ts = Some(now);
        self.error_message = Some(message);
        self.status = RevisionStatus::Failed;
    }

    /// Record that one more prefix was prepared by `batch_index`.
    ///
    /// # Panics
    /// Panics if `batch_index` is out of range for the current worker count.
    pub fn record_prepared_prefix(&mut self, batch_index: usize) {
        self.batch_offsets[batch_index] += 1;
    }
}
