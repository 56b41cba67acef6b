//! tests/common.rs
//! Shared helper functions for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use analysis_queue::{
  AnalysisJob, AnalysisQueue, BoxedExecFn, EnqueueRequest, ExecFuture, ExecResult, JobCompletion,
  JobId, JobOutput, JobPayload, ManualClock, MemoryStore, QueueBuilder, RunId,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use tracing_subscriber::fmt::TestWriter;

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

/// A queue over an inspectable store and a clock that only moves when told to.
pub struct Fixture {
  pub queue: Arc<AnalysisQueue>,
  pub store: Arc<MemoryStore>,
  pub clock: Arc<ManualClock>,
}

impl Fixture {
  pub fn advance_ms(&self, millis: i64) {
    self.clock.advance(ChronoDuration::milliseconds(millis));
  }

  pub fn now(&self) -> DateTime<Utc> {
    use analysis_queue::Clock;
    self.clock.now()
  }

  pub fn job(&self, id: JobId) -> AnalysisJob {
    self
      .queue
      .get(id)
      .expect("store read failed")
      .expect("job should exist")
  }
}

pub fn epoch() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn fixture() -> Fixture {
  fixture_with(|builder| builder)
}

pub fn fixture_with(configure: impl FnOnce(QueueBuilder) -> QueueBuilder) -> Fixture {
  setup_tracing();
  let store = Arc::new(MemoryStore::new());
  let clock = Arc::new(ManualClock::new(epoch()));
  let queue = configure(AnalysisQueue::builder())
    .store(store.clone())
    .clock(clock.clone())
    .build()
    .expect("queue should build");
  Fixture {
    queue: Arc::new(queue),
    store,
    clock,
  }
}

pub fn clarity(content: &str) -> JobPayload {
  JobPayload::ClarityCheck {
    content: content.to_string(),
  }
}

/// A clarity-check request for `document_id` in project `p1`.
pub fn clarity_request(document_id: &str, content: &str) -> EnqueueRequest {
  EnqueueRequest::new("p1", "u1", clarity(content)).with_document(document_id)
}

pub fn ms(millis: i64) -> ChronoDuration {
  ChronoDuration::milliseconds(millis)
}

/// Enqueues with zero debounce and claims immediately.
pub fn enqueue_and_claim(fixture: &Fixture, document_id: &str) -> (JobId, RunId) {
  let outcome = fixture
    .queue
    .enqueue(clarity_request(document_id, "text").with_debounce(ms(0)))
    .expect("enqueue failed");
  let (run_id, _) = fixture
    .queue
    .claim(outcome.job_id)
    .expect("claim failed")
    .claimed()
    .expect("claim should win");
  (outcome.job_id, run_id)
}

// --- Executors for runtime tests ---

// Counts executions and succeeds with a clarity-check output.
pub fn exec_counter_success(counter: Arc<AtomicUsize>, delay: StdDuration) -> BoxedExecFn {
  Box::new(move |job: AnalysisJob| {
    let ctr = counter.clone();
    Box::pin(async move {
      let count = ctr.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!(job_id = %job.id, count, "Counter executor running");
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      Ok(
        JobCompletion::new()
          .with_summary(format!("run {count}"))
          .with_output(JobOutput::ClarityCheck { issue_count: 0 }),
      )
    }) as ExecFuture
  })
}

// Counts executions and always fails.
pub fn exec_counter_failure(counter: Arc<AtomicUsize>) -> BoxedExecFn {
  Box::new(move |_job: AnalysisJob| {
    let ctr = counter.clone();
    Box::pin(async move {
      let count = ctr.fetch_add(1, Ordering::SeqCst) + 1;
      Err(format!("upstream unavailable (call {count})"))
    }) as ExecFuture
  })
}

// Creates an executor that panics.
#[allow(unreachable_code)]
pub fn exec_panic() -> BoxedExecFn {
  Box::new(move |_job: AnalysisJob| {
    Box::pin(async move {
      tokio::task::yield_now().await;
      panic!("boom");
      let unreachable: ExecResult = Ok(JobCompletion::new());
      unreachable
    }) as ExecFuture
  })
}

/// Polls until `predicate` holds for the job or `timeout` elapses.
pub async fn wait_for_job(
  queue: &AnalysisQueue,
  job_id: JobId,
  timeout: StdDuration,
  predicate: impl Fn(&AnalysisJob) -> bool,
) -> AnalysisJob {
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    let job = queue
      .get(job_id)
      .expect("store read failed")
      .expect("job should exist");
    if predicate(&job) {
      return job;
    }
    if tokio::time::Instant::now() >= deadline {
      panic!("timed out waiting for job {job_id}; last state: {job:?}");
    }
    tokio::time::sleep(StdDuration::from_millis(10)).await;
  }
}
