use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::job::{AnalysisJob, JobId, JobStatus, RunId};

/// Represents the requested shutdown mode. Sent via a `watch` channel.
/// `None` indicates the runtime is running normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Stop polling, let in-flight executions finish and finalize.
  Graceful,
  /// Stop as soon as possible. In-flight executions are abandoned and their
  /// leases left to expire; the stale reclaimer picks them up later.
  Force,
}

// --- Admission ---

/// What [`enqueue`](crate::AnalysisQueue::enqueue) did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueDisposition {
  /// No active job held the slot; a new pending job was created.
  Inserted,
  /// A pending job held the slot; its payload was replaced and its due time
  /// pushed out.
  Coalesced,
  /// A processing job held the slot; its payload was replaced and it was
  /// flagged dirty so it reruns after the current execution.
  MarkedDirty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOutcome {
  pub job_id: JobId,
  /// Status of the job owning the slot after admission.
  pub status: JobStatus,
  pub disposition: EnqueueDisposition,
}

// --- Claim ---

/// Why a claim did not take the lease. None of these are errors: losing a
/// race to another worker is the normal case under contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimRejection {
  /// The job no longer exists.
  Missing,
  /// The job is not pending (already claimed, or terminal).
  NotPending(JobStatus),
  /// The job is pending but its debounce or backoff window has not elapsed.
  NotDue(DateTime<Utc>),
  /// The job had used every attempt; it has been moved to `Failed`.
  AttemptsExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
  /// The caller holds the lease. `job` is the post-claim record.
  Claimed { run_id: RunId, job: AnalysisJob },
  Rejected(ClaimRejection),
}

impl ClaimOutcome {
  pub fn run_id(&self) -> Option<RunId> {
    match self {
      ClaimOutcome::Claimed { run_id, .. } => Some(*run_id),
      ClaimOutcome::Rejected(_) => None,
    }
  }

  /// Consumes the outcome, yielding the claimed job if the lease was won.
  pub fn claimed(self) -> Option<(RunId, AnalysisJob)> {
    match self {
      ClaimOutcome::Claimed { run_id, job } => Some((run_id, job)),
      ClaimOutcome::Rejected(_) => None,
    }
  }
}

// --- Completion ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
  Succeeded,
  /// The job was marked dirty while processing and went back to pending.
  Requeued { scheduled_for: DateTime<Utc> },
  /// The caller's lease is gone (job missing, reclaimed, or re-claimed). No-op.
  StaleWriter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
  /// Back to pending after a backoff.
  Retrying {
    attempts: u32,
    delay: Duration,
    scheduled_for: DateTime<Utc>,
  },
  /// Attempts exhausted; the job is terminal.
  Failed { attempts: u32 },
  /// The caller's lease is gone. No-op.
  StaleWriter,
}
