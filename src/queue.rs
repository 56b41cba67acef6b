//! The job lifecycle state machine.
//!
//! ```text
//! pending --claim--> processing
//! processing --finalize(clean)--> succeeded
//! processing --finalize(dirty)--> pending
//! processing --fail(attempts < max)--> pending (backoff)
//! processing --fail(attempts >= max)--> failed
//! processing --lease expired + reclaim--> pending (backoff)
//! pending --claim with attempts >= max--> failed
//! succeeded | failed --retention + cleanup--> deleted
//! ```
//!
//! Every transition is a read followed by a version-guarded write. A lost
//! compare-and-swap re-reads and re-validates, so two callers racing on one
//! job always agree on a single winner.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::clock::{Clock, SystemClock};
use crate::config::{to_chrono, QueueConfig};
use crate::error::{BuildError, QueueError};
use crate::job::{
  AnalysisJob, EnqueueRequest, JobCompletion, JobId, JobKind, JobStatus, RunId,
};
use crate::metrics::QueueMetrics;
use crate::outcome::{
  ClaimOutcome, ClaimRejection, EnqueueDisposition, EnqueueOutcome, FailOutcome, FinalizeOutcome,
};
use crate::store::{InsertOutcome, JobStore, MemoryStore};

/// Bound on re-read/re-write rounds for a single operation.
pub(crate) const MAX_CAS_RETRIES: usize = 64;

/// `last_error` tag written when a lapsed lease is reclaimed.
pub const STALE_PROCESSING_ERROR: &str = "stale_processing_job";

/// `last_error` tag written when a claim finds the attempt budget spent.
pub const ATTEMPTS_EXHAUSTED_ERROR: &str = "max_attempts_exceeded";

/// Handle to the analysis job queue.
///
/// Cheap to share behind an `Arc`; all state lives in the [`JobStore`].
#[derive(Debug)]
pub struct AnalysisQueue {
  store: Arc<dyn JobStore>,
  clock: Arc<dyn Clock>,
  config: QueueConfig,
  metrics: QueueMetrics,
}

/// Builder for [`AnalysisQueue`]. Defaults to a [`MemoryStore`] and the system clock.
#[derive(Debug, Default)]
pub struct QueueBuilder {
  store: Option<Arc<dyn JobStore>>,
  clock: Option<Arc<dyn Clock>>,
  config: QueueConfig,
}

impl QueueBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn store<S: JobStore + 'static>(mut self, store: Arc<S>) -> Self {
    self.store = Some(store);
    self
  }

  pub fn clock<C: Clock + 'static>(mut self, clock: Arc<C>) -> Self {
    self.clock = Some(clock);
    self
  }

  /// Replaces the whole configuration. Later setters still apply on top.
  pub fn config(mut self, config: QueueConfig) -> Self {
    self.config = config;
    self
  }

  pub fn debounce(mut self, debounce: Duration) -> Self {
    self.config.debounce = debounce;
    self
  }

  pub fn embedding_debounce(mut self, debounce: Duration) -> Self {
    self.config.embedding_debounce = debounce;
    self
  }

  pub fn lease_duration(mut self, lease: Duration) -> Self {
    self.config.lease_duration = lease;
    self
  }

  pub fn max_attempts(mut self, max_attempts: u32) -> Self {
    self.config.max_attempts = max_attempts;
    self
  }

  pub fn scan_limit(mut self, scan_limit: usize) -> Self {
    self.config.scan_limit = scan_limit;
    self
  }

  pub fn retention(mut self, retention: Duration) -> Self {
    self.config.retention = retention;
    self
  }

  pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
    self.config.backoff = backoff;
    self
  }

  pub fn build(self) -> Result<AnalysisQueue, BuildError> {
    self.config.validate()?;
    let store = self
      .store
      .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn JobStore>);
    let clock = self
      .clock
      .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
    info!(
      max_attempts = self.config.max_attempts,
      lease_duration = ?self.config.lease_duration,
      scan_limit = self.config.scan_limit,
      "Analysis queue built."
    );
    Ok(AnalysisQueue {
      store,
      clock,
      config: self.config,
      metrics: QueueMetrics::new(),
    })
  }
}

impl AnalysisQueue {
  pub fn builder() -> QueueBuilder {
    QueueBuilder::new()
  }

  pub fn config(&self) -> &QueueConfig {
    &self.config
  }

  pub fn metrics(&self) -> &QueueMetrics {
    &self.metrics
  }

  pub(crate) fn store(&self) -> &dyn JobStore {
    self.store.as_ref()
  }

  pub fn get(&self, job_id: JobId) -> Result<Option<AnalysisJob>, QueueError> {
    Ok(self.store.get(job_id)?)
  }

  /// The pending or processing job holding `dedupe_key`, if any.
  pub fn active_job_for_key(&self, dedupe_key: &str) -> Result<Option<AnalysisJob>, QueueError> {
    Ok(
      self
        .store
        .scan_by_dedupe_key(dedupe_key)?
        .into_iter()
        .find(|job| job.status.is_active()),
    )
  }

  // --- Admission ---

  /// Admits a request into its dedupe slot.
  ///
  /// A pending holder absorbs the request (trailing debounce); a processing
  /// holder is flagged dirty so it reruns once after the current execution.
  /// Otherwise a new pending job is created.
  pub fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueOutcome, QueueError> {
    request.validate()?;
    let kind = request.kind();
    let dedupe_key = request.effective_dedupe_key();
    let debounce = match request.debounce {
      Some(requested) => requested.max(ChronoDuration::zero()),
      None => to_chrono(self.config.debounce_for(kind)),
    };

    for round in 0..MAX_CAS_RETRIES {
      let now = self.clock.now();
      let scheduled_for = now + debounce;

      let outcome = match self.active_job_for_key(&dedupe_key)? {
        Some(holder) if holder.kind != kind => {
          return Err(QueueError::InvalidRequest(format!(
            "dedupe key {dedupe_key:?} is held by a {} job, cannot admit {kind}",
            holder.kind
          )));
        }
        Some(mut holder) => {
          let disposition = match holder.status {
            JobStatus::Pending => {
              holder.scheduled_for = holder.scheduled_for.max(scheduled_for);
              EnqueueDisposition::Coalesced
            }
            _ => {
              holder.dirty = true;
              EnqueueDisposition::MarkedDirty
            }
          };
          holder.payload = request.payload.clone();
          holder.content_hash = request.content_hash.clone();
          holder.updated_at = now;
          self
            .store
            .compare_and_swap(&holder)?
            .then_some(EnqueueOutcome {
              job_id: holder.id,
              status: holder.status,
              disposition,
            })
        }
        None => {
          let job = new_job(&request, kind, dedupe_key.clone(), now, scheduled_for);
          let job_id = job.id;
          match self.store.insert(job)? {
            InsertOutcome::Inserted => Some(EnqueueOutcome {
              job_id,
              status: JobStatus::Pending,
              disposition: EnqueueDisposition::Inserted,
            }),
            InsertOutcome::SlotTaken(_) => None,
          }
        }
      };

      if let Some(outcome) = outcome {
        let counter = match outcome.disposition {
          EnqueueDisposition::Inserted => &self.metrics.jobs_enqueued,
          EnqueueDisposition::Coalesced => &self.metrics.jobs_coalesced,
          EnqueueDisposition::MarkedDirty => &self.metrics.jobs_marked_dirty,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(
          job_id = %outcome.job_id,
          %kind,
          dedupe_key = %dedupe_key,
          disposition = ?outcome.disposition,
          "Enqueued."
        );
        return Ok(outcome);
      }
      trace!(dedupe_key = %dedupe_key, round, "Admission raced, re-reading slot.");
    }

    warn!(dedupe_key = %dedupe_key, "Admission gave up after repeated races.");
    Err(QueueError::AdmissionContention { dedupe_key })
  }

  // --- Claim / Lease ---

  /// Pending jobs due now, oldest due time first. `limit` is capped by the
  /// configured scan limit.
  pub fn list_due(&self, limit: usize) -> Result<Vec<AnalysisJob>, QueueError> {
    let now = self.clock.now();
    Ok(
      self
        .store
        .scan_by_status(JobStatus::Pending, now, self.config.effective_scan_limit(limit))?,
    )
  }

  /// Takes the lease on `job_id` if it is still pending and due.
  pub fn claim(&self, job_id: JobId) -> Result<ClaimOutcome, QueueError> {
    for _ in 0..MAX_CAS_RETRIES {
      let now = self.clock.now();
      let Some(mut job) = self.store.get(job_id)? else {
        return Ok(self.reject_claim(job_id, ClaimRejection::Missing));
      };
      if job.status != JobStatus::Pending {
        return Ok(self.reject_claim(job_id, ClaimRejection::NotPending(job.status)));
      }
      if job.scheduled_for > now {
        return Ok(self.reject_claim(job_id, ClaimRejection::NotDue(job.scheduled_for)));
      }

      if job.attempts >= self.config.max_attempts {
        job.status = JobStatus::Failed;
        job.dirty = false;
        job.updated_at = now;
        if job.last_error.is_none() {
          job.last_error = Some(ATTEMPTS_EXHAUSTED_ERROR.to_string());
        }
        if self.store.compare_and_swap(&job)? {
          self.metrics.claims_exhausted.fetch_add(1, Ordering::Relaxed);
          self.metrics.jobs_failed_terminal.fetch_add(1, Ordering::Relaxed);
          warn!(
            %job_id,
            kind = %job.kind,
            attempts = job.attempts,
            "Claim found attempts exhausted; job failed."
          );
          return Ok(ClaimOutcome::Rejected(ClaimRejection::AttemptsExhausted));
        }
        continue;
      }

      let run_id: RunId = Uuid::new_v4();
      let due_at = job.scheduled_for;
      job.status = JobStatus::Processing;
      job.attempts += 1;
      job.processing_run_id = Some(run_id);
      job.processing_started_at = Some(now);
      job.lease_expires_at = Some(now + to_chrono(self.config.lease_duration));
      job.last_error = None;
      job.updated_at = now;

      if self.store.compare_and_swap(&job)? {
        job.version += 1;
        self.metrics.claims_won.fetch_add(1, Ordering::Relaxed);
        if let Ok(wait) = (now - due_at).to_std() {
          self.metrics.job_queue_wait_duration.record(wait);
        }
        debug!(
          %job_id,
          %run_id,
          kind = %job.kind,
          attempt = job.attempts,
          "Claimed."
        );
        return Ok(ClaimOutcome::Claimed { run_id, job });
      }
      trace!(%job_id, "Claim write lost, re-validating.");
    }
    Err(QueueError::Contention { job_id })
  }

  fn reject_claim(&self, job_id: JobId, reason: ClaimRejection) -> ClaimOutcome {
    self.metrics.claims_rejected.fetch_add(1, Ordering::Relaxed);
    trace!(%job_id, ?reason, "Claim rejected.");
    ClaimOutcome::Rejected(reason)
  }

  // --- Completion ---

  /// Records a successful execution.
  ///
  /// A dirty job is sent back to pending with the kind's default debounce
  /// instead of succeeding; its attempt count is left as is.
  pub fn finalize(
    &self,
    job_id: JobId,
    run_id: RunId,
    completion: JobCompletion,
  ) -> Result<FinalizeOutcome, QueueError> {
    for _ in 0..MAX_CAS_RETRIES {
      let now = self.clock.now();
      let Some(mut job) = self.store.get(job_id)? else {
        return Ok(self.stale_finalize(job_id, run_id));
      };
      if !job.holds_lease(run_id) {
        return Ok(self.stale_finalize(job_id, run_id));
      }
      if let Some(output) = &completion.output {
        if output.kind() != job.kind {
          return Err(QueueError::OutputKindMismatch {
            job_id,
            expected: job.kind,
            actual: output.kind(),
          });
        }
      }

      job.clear_lease();
      job.updated_at = now;
      let outcome = if job.dirty {
        let scheduled_for = now + to_chrono(self.config.debounce_for(job.kind));
        job.status = JobStatus::Pending;
        job.dirty = false;
        job.scheduled_for = scheduled_for;
        FinalizeOutcome::Requeued { scheduled_for }
      } else {
        job.status = JobStatus::Succeeded;
        job.result_summary = completion.summary.clone();
        job.result_ref = completion.output.clone();
        job.last_error = None;
        FinalizeOutcome::Succeeded
      };

      if self.store.compare_and_swap(&job)? {
        match outcome {
          FinalizeOutcome::Requeued { scheduled_for } => {
            self.metrics.jobs_requeued_dirty.fetch_add(1, Ordering::Relaxed);
            debug!(%job_id, %run_id, %scheduled_for, "Dirty job requeued on finalize.");
          }
          _ => {
            self.metrics.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
            debug!(%job_id, %run_id, kind = %job.kind, "Job succeeded.");
          }
        }
        return Ok(outcome);
      }
    }
    Err(QueueError::Contention { job_id })
  }

  fn stale_finalize(&self, job_id: JobId, run_id: RunId) -> FinalizeOutcome {
    self.metrics.stale_writes_ignored.fetch_add(1, Ordering::Relaxed);
    debug!(%job_id, %run_id, "Ignoring finalize from a stale lease.");
    FinalizeOutcome::StaleWriter
  }

  /// Records a failed execution: backoff and retry, or terminal failure once
  /// the attempt budget is spent.
  pub fn fail(
    &self,
    job_id: JobId,
    run_id: RunId,
    error: impl Into<String>,
  ) -> Result<FailOutcome, QueueError> {
    let error = error.into();
    for _ in 0..MAX_CAS_RETRIES {
      let now = self.clock.now();
      let Some(mut job) = self.store.get(job_id)? else {
        return Ok(self.stale_fail(job_id, run_id));
      };
      if !job.holds_lease(run_id) {
        return Ok(self.stale_fail(job_id, run_id));
      }

      job.clear_lease();
      job.dirty = false;
      job.last_error = Some(error.clone());
      job.updated_at = now;
      let outcome = if job.attempts >= self.config.max_attempts {
        job.status = JobStatus::Failed;
        FailOutcome::Failed {
          attempts: job.attempts,
        }
      } else {
        let delay = self.config.backoff.delay(job.attempts);
        let scheduled_for = now + to_chrono(delay);
        job.status = JobStatus::Pending;
        job.scheduled_for = scheduled_for;
        FailOutcome::Retrying {
          attempts: job.attempts,
          delay,
          scheduled_for,
        }
      };

      if self.store.compare_and_swap(&job)? {
        match outcome {
          FailOutcome::Retrying { attempts, delay, .. } => {
            self.metrics.jobs_retried.fetch_add(1, Ordering::Relaxed);
            info!(%job_id, kind = %job.kind, attempts, ?delay, error = %error, "Job failed; retry scheduled.");
          }
          _ => {
            self.metrics.jobs_failed_terminal.fetch_add(1, Ordering::Relaxed);
            warn!(%job_id, kind = %job.kind, attempts = job.attempts, error = %error, "Job failed permanently.");
          }
        }
        return Ok(outcome);
      }
    }
    Err(QueueError::Contention { job_id })
  }

  fn stale_fail(&self, job_id: JobId, run_id: RunId) -> FailOutcome {
    self.metrics.stale_writes_ignored.fetch_add(1, Ordering::Relaxed);
    debug!(%job_id, %run_id, "Ignoring fail from a stale lease.");
    FailOutcome::StaleWriter
  }

  // --- Maintenance ---

  /// Returns processing jobs whose lease has lapsed to pending, with backoff.
  /// Handles at most one scan's worth of candidates per call.
  pub fn reclaim_stale(&self) -> Result<usize, QueueError> {
    let now = self.clock.now();
    let candidates =
      self
        .store
        .scan_by_status(JobStatus::Processing, now, self.config.effective_scan_limit(usize::MAX))?;

    let mut reclaimed = 0;
    for candidate in candidates {
      if self.reclaim_one(candidate, now)? {
        reclaimed += 1;
      }
    }
    if reclaimed > 0 {
      self.metrics.jobs_reclaimed.fetch_add(reclaimed, Ordering::Relaxed);
      info!(reclaimed, "Reclaimed stale processing jobs.");
    }
    Ok(reclaimed)
  }

  fn reclaim_one(&self, mut job: AnalysisJob, now: DateTime<Utc>) -> Result<bool, QueueError> {
    let job_id = job.id;
    for _ in 0..MAX_CAS_RETRIES {
      if !job.lease_expired(now) {
        return Ok(false);
      }
      let delay = self.config.backoff.delay(job.attempts);
      job.status = JobStatus::Pending;
      job.scheduled_for = now + to_chrono(delay);
      job.clear_lease();
      job.dirty = false;
      job.last_error = Some(STALE_PROCESSING_ERROR.to_string());
      job.updated_at = now;
      if self.store.compare_and_swap(&job)? {
        warn!(%job_id, kind = %job.kind, attempts = job.attempts, ?delay, "Reclaimed job with lapsed lease.");
        return Ok(true);
      }
      match self.store.get(job_id)? {
        Some(current) => job = current,
        None => return Ok(false),
      }
    }
    Err(QueueError::Contention { job_id })
  }

  /// Deletes terminal jobs last updated before the retention window.
  /// At most one scan's worth of jobs per call.
  pub fn cleanup(&self) -> Result<usize, QueueError> {
    let now = self.clock.now();
    let cutoff = now - to_chrono(self.config.retention);
    let mut budget = self.config.effective_scan_limit(usize::MAX);
    let mut deleted = 0;

    for status in [JobStatus::Succeeded, JobStatus::Failed] {
      if budget == 0 {
        break;
      }
      for job in self.store.scan_by_status(status, cutoff, budget)? {
        budget -= 1;
        if job.updated_at < cutoff && self.store.delete(job.id)? {
          trace!(job_id = %job.id, %status, "Collected terminal job.");
          deleted += 1;
        }
      }
    }
    if deleted > 0 {
      self.metrics.jobs_collected.fetch_add(deleted, Ordering::Relaxed);
      info!(deleted, "Collected terminal jobs past retention.");
    }
    Ok(deleted)
  }
}

fn new_job(
  request: &EnqueueRequest,
  kind: JobKind,
  dedupe_key: String,
  now: DateTime<Utc>,
  scheduled_for: DateTime<Utc>,
) -> AnalysisJob {
  AnalysisJob {
    id: Uuid::new_v4(),
    project_id: request.project_id.clone(),
    user_id: request.user_id.clone(),
    document_id: request.document_id.clone(),
    kind,
    status: JobStatus::Pending,
    attempts: 0,
    last_error: None,
    scheduled_for,
    content_hash: request.content_hash.clone(),
    dedupe_key: Some(dedupe_key),
    processing_run_id: None,
    processing_started_at: None,
    lease_expires_at: None,
    payload: request.payload.clone(),
    result_summary: None,
    result_ref: None,
    dirty: false,
    created_at: now,
    updated_at: now,
    version: 0,
  }
}
