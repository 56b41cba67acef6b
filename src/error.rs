use crate::job::{JobId, JobKind};

use thiserror::Error;

/// Errors raised while building an [`AnalysisQueue`](crate::AnalysisQueue)
/// or a [`QueueRuntime`](crate::QueueRuntime).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("Maximum worker count (`max_workers`) must be specified and greater than zero")]
  MissingOrZeroMaxWorkers,
  #[error("`{0}` must be greater than zero")]
  ZeroInterval(&'static str),
  #[error("Invalid queue configuration: {0}")]
  InvalidConfig(String),
}

/// Failures reported by a [`JobStore`](crate::store::JobStore) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
  #[error("Job store backend error: {0}")]
  Backend(String),
  #[error("A job with id {0} already exists.")]
  DuplicateId(JobId),
}

/// Errors returned by queue operations.
///
/// Lost races (a claim beaten by another worker, a finalize from a stale lease)
/// are *not* errors; they are reported through the outcome types in
/// [`outcome`](crate::outcome).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
  /// Malformed admission request. Rejected synchronously, never retried.
  #[error("Invalid enqueue request: {0}")]
  InvalidRequest(String),
  #[error("Unknown job kind {0:?}.")]
  UnknownKind(String),
  #[error("Unknown job status {0:?}.")]
  UnknownStatus(String),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error("Job {job_id} is a {expected} job but the executor produced {actual} output.")]
  OutputKindMismatch {
    job_id: JobId,
    expected: JobKind,
    actual: JobKind,
  },
  #[error("Gave up writing job {job_id}: the record kept changing underneath the update.")]
  Contention { job_id: JobId },
  #[error("Gave up admitting into slot {dedupe_key:?}: the slot kept changing underneath the enqueue.")]
  AdmissionContention { dedupe_key: String },
}

impl QueueError {
  /// True for errors caused by the caller's request rather than the system.
  pub fn is_admission(&self) -> bool {
    matches!(
      self,
      QueueError::InvalidRequest(_) | QueueError::UnknownKind(_) | QueueError::UnknownStatus(_)
    )
  }
}

/// Errors related to the runtime shutdown process (`shutdown_graceful`, `shutdown_force`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Failed to send shutdown signal (runtime already shut down or watch channel error).")]
  SignalFailed,
  #[error("Timed out waiting for runtime tasks (workers, sweeper) to complete shutdown.")]
  Timeout,
  #[error("A worker or sweeper task panicked during the shutdown process.")]
  TaskPanic,
}
