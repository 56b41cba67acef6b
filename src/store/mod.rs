//! Persistence seam for the queue.
//!
//! Every queue operation is a read followed by a version-guarded write, so a
//! backend only has to provide single-record atomicity plus the admission
//! guard on [`insert`](JobStore::insert).

mod memory;

pub use memory::MemoryStore;

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::job::{AnalysisJob, JobId, JobKind, JobStatus};

/// Result of [`JobStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
  Inserted,
  /// Another pending or processing job already owns the dedupe key.
  SlotTaken(JobId),
}

pub trait JobStore: Send + Sync + fmt::Debug {
  /// Inserts `job` unless an active job with the same `dedupe_key` exists.
  /// The stored record starts at version 1.
  fn insert(&self, job: AnalysisJob) -> Result<InsertOutcome, StoreError>;

  fn get(&self, id: JobId) -> Result<Option<AnalysisJob>, StoreError>;

  /// Writes `job` iff the stored version equals `job.version`. The stored copy
  /// gets `job.version + 1`. Returns `false` when the job is gone or changed.
  fn compare_and_swap(&self, job: &AnalysisJob) -> Result<bool, StoreError>;

  fn delete(&self, id: JobId) -> Result<bool, StoreError>;

  /// Deletes the job only if it is still pending or processing at the time
  /// of the delete. Returns `false` for missing or terminal jobs.
  fn delete_if_active(&self, id: JobId) -> Result<bool, StoreError>;

  /// Jobs in `status` whose [`index_time`](AnalysisJob::index_time) is at or
  /// before `until`, oldest first, at most `limit`.
  fn scan_by_status(
    &self,
    status: JobStatus,
    until: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<AnalysisJob>, StoreError>;

  /// Every job, in any status, carrying `dedupe_key`.
  fn scan_by_dedupe_key(&self, dedupe_key: &str) -> Result<Vec<AnalysisJob>, StoreError>;

  /// Active jobs of `project_id`, optionally restricted to one kind.
  fn scan_by_project(
    &self,
    project_id: &str,
    kind: Option<JobKind>,
    limit: usize,
  ) -> Result<Vec<AnalysisJob>, StoreError>;
}
