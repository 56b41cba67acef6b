mod common;
use crate::common::{
  clarity_request, exec_counter_failure, exec_counter_success, exec_panic, setup_tracing,
  wait_for_job,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use analysis_queue::{
  AnalysisQueue, BackoffPolicy, BuildError, EnqueueRequest, JobCompletion, JobKind,
  JobPayload, JobStatus, QueueBuilder, QueueRuntime,
};

const WAIT: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(20);

fn fast_backoff() -> BackoffPolicy {
  BackoffPolicy {
    base: Duration::from_millis(20),
    cap: Duration::from_millis(50),
    jitter: 0.0,
  }
}

fn live_queue(configure: impl FnOnce(QueueBuilder) -> QueueBuilder) -> Arc<AnalysisQueue> {
  setup_tracing();
  let builder = AnalysisQueue::builder()
    .debounce(Duration::ZERO)
    .backoff(fast_backoff());
  Arc::new(configure(builder).build().expect("queue should build"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_runtime_executes_and_finalizes_due_job() {
  let queue = live_queue(|b| b);
  let counter = Arc::new(AtomicUsize::new(0));
  let runtime = QueueRuntime::builder()
    .max_workers(2)
    .poll_interval(POLL)
    .executor(
      JobKind::ClarityCheck,
      exec_counter_success(counter.clone(), Duration::ZERO),
    )
    .build(queue.clone())
    .unwrap();

  let admitted = queue.enqueue(clarity_request("d1", "hello")).unwrap();
  let job = wait_for_job(&queue, admitted.job_id, WAIT, |job| {
    job.status == JobStatus::Succeeded
  })
  .await;

  assert_eq!(counter.load(Ordering::SeqCst), 1);
  assert_eq!(job.attempts, 1);
  assert_eq!(job.result_summary.as_deref(), Some("run 1"));
  assert!(job.processing_run_id.is_none());

  runtime.shutdown_graceful(Some(WAIT)).await.unwrap();
  let metrics = runtime.metrics_snapshot();
  assert_eq!(metrics.jobs_succeeded, 1);
  assert_eq!(metrics.job_execution_duration_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_executor_retries_until_budget_is_spent() {
  let queue = live_queue(|b| b.max_attempts(3));
  let counter = Arc::new(AtomicUsize::new(0));
  let runtime = QueueRuntime::builder()
    .max_workers(2)
    .poll_interval(POLL)
    .executor(JobKind::ClarityCheck, exec_counter_failure(counter.clone()))
    .build(queue.clone())
    .unwrap();

  let admitted = queue.enqueue(clarity_request("d1", "hello")).unwrap();
  let job = wait_for_job(&queue, admitted.job_id, WAIT, |job| {
    job.status == JobStatus::Failed
  })
  .await;

  assert_eq!(job.attempts, 3);
  assert_eq!(counter.load(Ordering::SeqCst), 3);
  assert_eq!(job.last_error.as_deref(), Some("upstream unavailable (call 3)"));

  runtime.shutdown_graceful(Some(WAIT)).await.unwrap();
  let metrics = runtime.metrics_snapshot();
  assert_eq!(metrics.jobs_retried, 2);
  assert_eq!(metrics.jobs_failed_terminal, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_executor_panic_is_recorded_as_failure() {
  let queue = live_queue(|b| b.max_attempts(1));
  let runtime = QueueRuntime::builder()
    .max_workers(1)
    .poll_interval(POLL)
    .executor(JobKind::ClarityCheck, exec_panic())
    .build(queue.clone())
    .unwrap();

  let admitted = queue.enqueue(clarity_request("d1", "hello")).unwrap();
  let job = wait_for_job(&queue, admitted.job_id, WAIT, |job| {
    job.status == JobStatus::Failed
  })
  .await;
  assert_eq!(job.last_error.as_deref(), Some("executor panicked: boom"));

  // The worker survives the panic and keeps serving.
  let next = queue.enqueue(clarity_request("d2", "hello")).unwrap();
  wait_for_job(&queue, next.job_id, WAIT, |job| job.status == JobStatus::Failed).await;

  runtime.shutdown_graceful(Some(WAIT)).await.unwrap();
  assert_eq!(runtime.metrics_snapshot().executor_panics, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_kind_without_executor_fails_with_reason() {
  let queue = live_queue(|b| b.max_attempts(1));
  let runtime = QueueRuntime::builder()
    .max_workers(1)
    .poll_interval(POLL)
    .executor(
      JobKind::ClarityCheck,
      exec_counter_success(Arc::new(AtomicUsize::new(0)), Duration::ZERO),
    )
    .build(queue.clone())
    .unwrap();

  let admitted = queue
    .enqueue(
      EnqueueRequest::new(
        "p1",
        "u1",
        JobPayload::PolicyCheck {
          content: "text".to_string(),
          policy_ids: vec!["no-pii".to_string()],
        },
      )
      .with_document("d1"),
    )
    .unwrap();
  let job = wait_for_job(&queue, admitted.job_id, WAIT, |job| {
    job.status == JobStatus::Failed
  })
  .await;
  assert_eq!(
    job.last_error.as_deref(),
    Some("no executor registered for policy_check")
  );

  runtime.shutdown_graceful(Some(WAIT)).await.unwrap();
}

#[cfg(feature = "job_context")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_executor_sees_its_job_context() {
  use analysis_queue::{exec_fn, try_get_current_job_context, JobContext};
  use parking_lot::Mutex;

  let queue = live_queue(|b| b);
  let seen: Arc<Mutex<Option<JobContext>>> = Arc::new(Mutex::new(None));
  let recorder = seen.clone();
  let runtime = QueueRuntime::builder()
    .max_workers(1)
    .poll_interval(POLL)
    .executor(
      JobKind::ClarityCheck,
      exec_fn!({ let seen = recorder.clone(); } |job| {
        *seen.lock() = try_get_current_job_context();
        Ok(JobCompletion::new().with_summary(format!("checked {}", job.id)))
      }),
    )
    .build(queue.clone())
    .unwrap();

  assert!(try_get_current_job_context().is_none());

  let admitted = queue.enqueue(clarity_request("d1", "hello")).unwrap();
  let job = wait_for_job(&queue, admitted.job_id, WAIT, |job| {
    job.status == JobStatus::Succeeded
  })
  .await;
  runtime.shutdown_graceful(Some(WAIT)).await.unwrap();

  let recorded = *seen.lock();
  let context = recorded.expect("executor should have recorded its context");
  assert_eq!(context.job_id, job.id);
  assert_eq!(context.kind, JobKind::ClarityCheck);
  assert_eq!(context.attempt, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_graceful_shutdown_lets_inflight_job_finish() {
  let queue = live_queue(|b| b);
  let counter = Arc::new(AtomicUsize::new(0));
  let runtime = QueueRuntime::builder()
    .max_workers(1)
    .poll_interval(POLL)
    .executor(
      JobKind::ClarityCheck,
      exec_counter_success(counter.clone(), Duration::from_millis(300)),
    )
    .build(queue.clone())
    .unwrap();

  let admitted = queue.enqueue(clarity_request("d1", "hello")).unwrap();
  wait_for_job(&queue, admitted.job_id, WAIT, |job| {
    job.status == JobStatus::Processing
  })
  .await;

  runtime.shutdown_graceful(Some(WAIT)).await.unwrap();
  let job = queue.get(admitted.job_id).unwrap().unwrap();
  assert_eq!(job.status, JobStatus::Succeeded);
  assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_force_shutdown_abandons_inflight_job() {
  let queue = live_queue(|b| b);
  let runtime = QueueRuntime::builder()
    .max_workers(1)
    .poll_interval(POLL)
    .executor(
      JobKind::ClarityCheck,
      exec_counter_success(Arc::new(AtomicUsize::new(0)), Duration::from_secs(30)),
    )
    .build(queue.clone())
    .unwrap();

  let admitted = queue.enqueue(clarity_request("d1", "hello")).unwrap();
  wait_for_job(&queue, admitted.job_id, WAIT, |job| {
    job.status == JobStatus::Processing
  })
  .await;

  runtime.shutdown_force(Some(Duration::from_secs(2))).await.unwrap();

  // Nothing was written back; the lease is left to lapse.
  let job = queue.get(admitted.job_id).unwrap().unwrap();
  assert_eq!(job.status, JobStatus::Processing);
  assert!(job.processing_run_id.is_some());
  assert_eq!(runtime.metrics_snapshot().jobs_succeeded, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweeper_recovers_job_from_vanished_worker() {
  let queue = live_queue(|b| b.lease_duration(Duration::from_millis(200)));

  // A worker outside this runtime claims the job and never reports back.
  let admitted = queue.enqueue(clarity_request("d1", "hello")).unwrap();
  let (lost_run, _) = queue.claim(admitted.job_id).unwrap().claimed().unwrap();

  let counter = Arc::new(AtomicUsize::new(0));
  let runtime = QueueRuntime::builder()
    .max_workers(1)
    .poll_interval(POLL)
    .sweep_interval(Duration::from_millis(50))
    .executor(
      JobKind::ClarityCheck,
      exec_counter_success(counter.clone(), Duration::ZERO),
    )
    .build(queue.clone())
    .unwrap();

  let job = wait_for_job(&queue, admitted.job_id, WAIT, |job| {
    job.status == JobStatus::Succeeded
  })
  .await;
  runtime.shutdown_graceful(Some(WAIT)).await.unwrap();

  assert_eq!(job.attempts, 2);
  assert_eq!(counter.load(Ordering::SeqCst), 1);
  assert!(runtime.metrics_snapshot().jobs_reclaimed >= 1);
  assert!(queue
    .finalize(admitted.job_id, lost_run, JobCompletion::new())
    .is_ok_and(|outcome| outcome == analysis_queue::FinalizeOutcome::StaleWriter));
}

#[tokio::test]
async fn test_runtime_builder_rejects_bad_settings() {
  let queue = live_queue(|b| b);

  let missing = QueueRuntime::builder().build(queue.clone()).unwrap_err();
  assert!(matches!(missing, BuildError::MissingOrZeroMaxWorkers));

  let zero = QueueRuntime::builder().max_workers(0).build(queue.clone()).unwrap_err();
  assert!(matches!(zero, BuildError::MissingOrZeroMaxWorkers));

  let poll = QueueRuntime::builder()
    .max_workers(1)
    .poll_interval(Duration::ZERO)
    .build(queue.clone())
    .unwrap_err();
  assert!(matches!(poll, BuildError::ZeroInterval("poll_interval")));

  let sweep = QueueRuntime::builder()
    .max_workers(1)
    .sweep_interval(Duration::ZERO)
    .build(queue.clone())
    .unwrap_err();
  assert!(matches!(sweep, BuildError::ZeroInterval("sweep_interval")));

  let batch = QueueRuntime::builder()
    .max_workers(1)
    .batch_size(0)
    .build(queue)
    .unwrap_err();
  assert!(matches!(batch, BuildError::InvalidConfig(_)));
}

#[test]
fn test_runtime_requires_tokio_context() {
  let queue = live_queue(|b| b);
  let err = QueueRuntime::builder().max_workers(1).build(queue).unwrap_err();
  assert!(matches!(err, BuildError::InvalidConfig(_)));
}
