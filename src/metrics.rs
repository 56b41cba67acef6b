use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Suitable for simple latency tracking without detailed percentile information.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  /// Gets the total sum of durations recorded (in microseconds).
  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }

  fn mean(count: usize, sum_micros: usize) -> Option<Duration> {
    if count == 0 {
      None
    } else {
      Some(Duration::from_micros((sum_micros / count) as u64))
    }
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Atomic counters shared by the queue, its workers and the sweeper.
///
/// Cloning only clones the `Arc`s.
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
  // --- Admission ---
  /// New pending jobs created by `enqueue`.
  pub jobs_enqueued: Arc<AtomicUsize>,
  /// Enqueues folded into an existing pending job.
  pub jobs_coalesced: Arc<AtomicUsize>,
  /// Enqueues that flagged a processing job dirty.
  pub jobs_marked_dirty: Arc<AtomicUsize>,

  // --- Claims ---
  pub claims_won: Arc<AtomicUsize>,
  /// Claims that lost a race or found the job not due.
  pub claims_rejected: Arc<AtomicUsize>,
  /// Claims that found attempts exhausted and failed the job instead.
  pub claims_exhausted: Arc<AtomicUsize>,

  // --- Completion ---
  pub jobs_succeeded: Arc<AtomicUsize>,
  /// Dirty jobs sent back to pending by `finalize`.
  pub jobs_requeued_dirty: Arc<AtomicUsize>,
  pub jobs_retried: Arc<AtomicUsize>,
  pub jobs_failed_terminal: Arc<AtomicUsize>,
  /// `finalize`/`fail` calls dropped because the caller's lease was gone.
  pub stale_writes_ignored: Arc<AtomicUsize>,
  pub executor_panics: Arc<AtomicUsize>,

  // --- Maintenance ---
  pub jobs_reclaimed: Arc<AtomicUsize>,
  /// Terminal jobs deleted by `cleanup`.
  pub jobs_collected: Arc<AtomicUsize>,
  pub embedding_jobs_deleted: Arc<AtomicUsize>,

  // --- Gauges ---
  /// Current number of workers actively executing a job.
  pub workers_active_current: Arc<AtomicUsize>,

  // --- Histograms ---
  /// Wall time spent inside executors.
  pub job_execution_duration: Arc<SimpleHistogram>,
  /// Time from a job's due time to its claim.
  pub job_queue_wait_duration: Arc<SimpleHistogram>,
}

impl QueueMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a snapshot of the current metric values.
  pub fn snapshot(&self) -> MetricsSnapshot {
    let order = Ordering::Relaxed;

    MetricsSnapshot {
      jobs_enqueued: self.jobs_enqueued.load(order),
      jobs_coalesced: self.jobs_coalesced.load(order),
      jobs_marked_dirty: self.jobs_marked_dirty.load(order),
      claims_won: self.claims_won.load(order),
      claims_rejected: self.claims_rejected.load(order),
      claims_exhausted: self.claims_exhausted.load(order),
      jobs_succeeded: self.jobs_succeeded.load(order),
      jobs_requeued_dirty: self.jobs_requeued_dirty.load(order),
      jobs_retried: self.jobs_retried.load(order),
      jobs_failed_terminal: self.jobs_failed_terminal.load(order),
      stale_writes_ignored: self.stale_writes_ignored.load(order),
      executor_panics: self.executor_panics.load(order),
      jobs_reclaimed: self.jobs_reclaimed.load(order),
      jobs_collected: self.jobs_collected.load(order),
      embedding_jobs_deleted: self.embedding_jobs_deleted.load(order),
      workers_active_current: self.workers_active_current.load(order),
      job_execution_duration_count: self.job_execution_duration.get_count(),
      job_execution_duration_sum_micros: self.job_execution_duration.get_sum_micros(),
      job_queue_wait_duration_count: self.job_queue_wait_duration.get_count(),
      job_queue_wait_duration_sum_micros: self.job_queue_wait_duration.get_sum_micros(),
    }
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

/// A point-in-time copy of [`QueueMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
  pub jobs_enqueued: usize,
  pub jobs_coalesced: usize,
  pub jobs_marked_dirty: usize,
  pub claims_won: usize,
  pub claims_rejected: usize,
  pub claims_exhausted: usize,
  pub jobs_succeeded: usize,
  pub jobs_requeued_dirty: usize,
  pub jobs_retried: usize,
  pub jobs_failed_terminal: usize,
  pub stale_writes_ignored: usize,
  pub executor_panics: usize,
  pub jobs_reclaimed: usize,
  pub jobs_collected: usize,
  pub embedding_jobs_deleted: usize,
  pub workers_active_current: usize,
  pub job_execution_duration_count: usize,
  pub job_execution_duration_sum_micros: usize,
  pub job_queue_wait_duration_count: usize,
  pub job_queue_wait_duration_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Mean executor wall time, if any execution finished.
  pub fn mean_execution_duration(&self) -> Option<Duration> {
    SimpleHistogram::mean(
      self.job_execution_duration_count,
      self.job_execution_duration_sum_micros,
    )
  }

  /// Mean delay between a job becoming due and being claimed.
  pub fn mean_queue_wait(&self) -> Option<Duration> {
    SimpleHistogram::mean(
      self.job_queue_wait_duration_count,
      self.job_queue_wait_duration_sum_micros,
    )
  }
}
