mod common;
use crate::common::{clarity_request, enqueue_and_claim, fixture, fixture_with, ms};

use analysis_queue::{JobCompletion, JobStatus};
use chrono::Duration as ChronoDuration;

const MINUTE_MS: i64 = 60 * 1_000;
const DAY_MS: i64 = 24 * 60 * MINUTE_MS;

#[test]
fn test_abandoned_job_is_reclaimed_after_lease() {
  let fx = fixture();
  let (job_id, _run_id) = enqueue_and_claim(&fx, "d1");

  fx.advance_ms(5 * MINUTE_MS - 1);
  assert_eq!(fx.queue.reclaim_stale().unwrap(), 0, "lease still valid");
  assert_eq!(fx.job(job_id).status, JobStatus::Processing);

  fx.advance_ms(1);
  assert_eq!(fx.queue.reclaim_stale().unwrap(), 1);

  let job = fx.job(job_id);
  assert_eq!(job.status, JobStatus::Pending);
  assert_eq!(job.attempts, 1, "reclaim does not refund the attempt");
  assert_eq!(job.last_error.as_deref(), Some("stale_processing_job"));
  assert!(job.processing_run_id.is_none());
  assert!(job.processing_started_at.is_none());
  assert!(job.lease_expires_at.is_none());
  assert!(job.scheduled_for >= fx.now() + ms(24_000));
  assert!(job.scheduled_for <= fx.now() + ms(36_000));
  assert_eq!(fx.queue.metrics().snapshot().jobs_reclaimed, 1);

  // Reclaiming again is a no-op.
  assert_eq!(fx.queue.reclaim_stale().unwrap(), 0);
}

#[test]
fn test_reclaim_leaves_live_and_finished_jobs_alone() {
  let fx = fixture();
  let (done_id, done_run) = enqueue_and_claim(&fx, "done");
  fx.queue
    .finalize(done_id, done_run, JobCompletion::new())
    .unwrap();
  let pending = fx.queue.enqueue(clarity_request("pending", "x")).unwrap();

  fx.advance_ms(4 * MINUTE_MS);
  let (live_id, _) = enqueue_and_claim(&fx, "live");

  fx.advance_ms(2 * MINUTE_MS);
  assert_eq!(fx.queue.reclaim_stale().unwrap(), 0);
  assert_eq!(fx.job(live_id).status, JobStatus::Processing);
  assert_eq!(fx.job(done_id).status, JobStatus::Succeeded);
  assert_eq!(fx.job(pending.job_id).status, JobStatus::Pending);
}

#[test]
fn test_reclaim_sweep_is_bounded() {
  let fx = fixture();
  for i in 0..60 {
    enqueue_and_claim(&fx, &format!("doc-{i}"));
  }
  fx.advance_ms(6 * MINUTE_MS);
  assert_eq!(fx.queue.reclaim_stale().unwrap(), 50);
  assert_eq!(fx.queue.reclaim_stale().unwrap(), 10);
  assert_eq!(fx.queue.reclaim_stale().unwrap(), 0);
}

#[test]
fn test_retention_window_is_respected() -> anyhow::Result<()> {
  let fx = fixture();
  let (job_id, run_id) = enqueue_and_claim(&fx, "d1");
  fx.queue.finalize(job_id, run_id, JobCompletion::new())?;

  fx.advance_ms(13 * DAY_MS);
  assert_eq!(fx.queue.cleanup()?, 0);

  fx.advance_ms(DAY_MS);
  assert_eq!(fx.queue.cleanup()?, 0, "exactly at the cutoff is kept");
  assert_eq!(fx.store.len(), 1);

  fx.advance_ms(1);
  assert_eq!(fx.queue.cleanup()?, 1);
  assert!(fx.store.is_empty());
  assert_eq!(fx.queue.metrics().snapshot().jobs_collected, 1);
  Ok(())
}

#[test]
fn test_cleanup_never_touches_active_jobs() {
  let fx = fixture();
  fx.queue.enqueue(clarity_request("waiting", "x")).unwrap();
  enqueue_and_claim(&fx, "running");

  fx.advance_ms(30 * DAY_MS);
  assert_eq!(fx.queue.cleanup().unwrap(), 0);
  assert_eq!(fx.store.len(), 2);
}

#[test]
fn test_cleanup_collects_both_terminal_statuses_in_bounded_batches() {
  let fx = fixture_with(|builder| builder.max_attempts(1));
  for i in 0..40 {
    let (job_id, run_id) = enqueue_and_claim(&fx, &format!("ok-{i}"));
    fx.queue
      .finalize(job_id, run_id, JobCompletion::new())
      .unwrap();
  }
  for i in 0..30 {
    let (job_id, run_id) = enqueue_and_claim(&fx, &format!("bad-{i}"));
    fx.queue.fail(job_id, run_id, "permanent").unwrap();
  }
  assert!(fx
    .store
    .jobs()
    .iter()
    .all(|job| job.status.is_terminal()));

  fx.clock.advance(ChronoDuration::days(15));
  assert_eq!(fx.queue.cleanup().unwrap(), 50);
  assert_eq!(fx.queue.cleanup().unwrap(), 20);
  assert!(fx.store.is_empty());
}
