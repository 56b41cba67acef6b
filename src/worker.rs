use crate::error::QueueError;
use crate::executor::{BoxedExecFn, ExecResult, ExecutorRegistry};
use crate::job::{AnalysisJob, JobCompletion, JobId, RunId, WorkerId};
use crate::outcome::{ClaimOutcome, ShutdownMode};
use crate::queue::AnalysisQueue;

#[cfg(feature = "job_context")]
use crate::job::context::{JobContext, CURRENT_JOB_CONTEXT};

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, error, info, trace, warn, Instrument};

/// How a single execution ended, as seen by the worker.
enum ExecOutcome {
  Completed(ExecResult),
  Panicked(String),
  /// Aborted by a forced shutdown. Nothing is written back.
  Abandoned,
}

/// A polling worker task.
///
/// Each round lists due jobs, claims them one at a time and runs the matching
/// executor outside any lock, then reports back through `finalize` or `fail`.
/// Workers share nothing but the queue; losing a claim race is routine.
pub(crate) struct Worker {
  id: WorkerId,
  queue: Arc<AnalysisQueue>,
  executors: Arc<ExecutorRegistry>,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  poll_interval: Duration,
  batch_size: usize,
  // Shared counter for tracking busy workers
  active_workers_counter: Arc<AtomicUsize>,
}

impl Worker {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    id: WorkerId,
    queue: Arc<AnalysisQueue>,
    executors: Arc<ExecutorRegistry>,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
    poll_interval: Duration,
    batch_size: usize,
    active_workers_counter: Arc<AtomicUsize>,
  ) -> Self {
    Self {
      id,
      queue,
      executors,
      shutdown_rx,
      poll_interval,
      batch_size,
      active_workers_counter,
    }
  }

  /// Runs the main loop for the worker task until a shutdown is signalled.
  pub async fn run(&mut self) {
    info!(worker_id = self.id, "Worker started. Polling for due jobs...");

    loop {
      if self.is_shutting_down() {
        break;
      }

      let executed = self.poll_once().await;
      if executed {
        // Drain the backlog before sleeping again.
        continue;
      }

      tokio::select! {
          biased;

          Ok(()) = self.shutdown_rx.changed() => {
              if self.is_shutting_down() {
                  info!(worker_id = self.id, mode = ?*self.shutdown_rx.borrow(), "Worker received shutdown signal.");
                  break;
              }
          }

          _ = tokio::time::sleep(self.poll_interval) => {}
      }
    }

    info!(worker_id = self.id, "Worker task shutting down.");
  }

  fn is_shutting_down(&self) -> bool {
    self.shutdown_rx.borrow().is_some()
  }

  /// One list-claim-execute round. Returns true if at least one job ran.
  async fn poll_once(&self) -> bool {
    let due = match self.queue.list_due(self.batch_size) {
      Ok(due) => due,
      Err(e) => {
        error!(worker_id = self.id, error = %e, "Failed to list due jobs.");
        return false;
      }
    };
    trace!(worker_id = self.id, due = due.len(), "Polled due jobs.");

    let mut executed = false;
    for candidate in due {
      if self.is_shutting_down() {
        break;
      }
      match self.queue.claim(candidate.id) {
        Ok(ClaimOutcome::Claimed { run_id, job }) => {
          let job_span = tracing::span!(
            tracing::Level::INFO,
            "job_exec",
            worker_id = self.id,
            job_id = %job.id,
            %run_id,
            kind = %job.kind,
            attempt = job.attempts
          );
          self.execute_and_handle(run_id, job).instrument(job_span).await;
          executed = true;
        }
        Ok(ClaimOutcome::Rejected(reason)) => {
          trace!(worker_id = self.id, job_id = %candidate.id, ?reason, "Lost claim.");
        }
        Err(e) => {
          warn!(worker_id = self.id, job_id = %candidate.id, error = %e, "Claim failed.");
        }
      }
    }
    executed
  }

  /// Executes the claimed job and writes the result back under its lease.
  async fn execute_and_handle(&self, run_id: RunId, job: AnalysisJob) {
    let job_id = job.id;
    let prev_count = self
      .active_workers_counter
      .fetch_add(1, AtomicOrdering::Relaxed);
    self
      .queue
      .metrics()
      .workers_active_current
      .store(prev_count + 1, AtomicOrdering::Relaxed);

    match self.executors.get(job.kind) {
      Some(exec_fn) => {
        info!("Starting job execution.");
        let start = Instant::now();
        let outcome = self.execute_job_logic(&exec_fn, run_id, job).await;
        let duration = start.elapsed();
        self.queue.metrics().job_execution_duration.record(duration);

        let outcome_str = match &outcome {
          ExecOutcome::Completed(Ok(_)) => "Success",
          ExecOutcome::Completed(Err(_)) => "Fail",
          ExecOutcome::Panicked(_) => "Panic",
          ExecOutcome::Abandoned => "Abandoned",
        };
        info!(
          duration_ms = duration.as_millis(),
          outcome = outcome_str,
          "Finished job execution."
        );
        self.report(job_id, run_id, outcome);
      }
      None => {
        warn!("No executor registered for job kind.");
        let message = format!("no executor registered for {}", job.kind);
        self.report(job_id, run_id, ExecOutcome::Completed(Err(message)));
      }
    }

    let prev_count = self
      .active_workers_counter
      .fetch_sub(1, AtomicOrdering::Relaxed);
    self
      .queue
      .metrics()
      .workers_active_current
      .store(prev_count.saturating_sub(1), AtomicOrdering::Relaxed);
  }

  /// Runs the executor in its own task so a panic is caught, racing it against
  /// a forced shutdown.
  async fn execute_job_logic(
    &self,
    exec_fn: &Arc<BoxedExecFn>,
    run_id: RunId,
    job: AnalysisJob,
  ) -> ExecOutcome {
    #[cfg(feature = "job_context")]
    let context = JobContext {
      job_id: job.id,
      run_id,
      kind: job.kind,
      attempt: job.attempts,
    };
    #[cfg(not(feature = "job_context"))]
    let _ = run_id;

    let future_to_run = exec_fn(job);

    #[cfg(feature = "job_context")]
    let mut task = tokio::spawn(CURRENT_JOB_CONTEXT.scope(context, future_to_run));
    #[cfg(not(feature = "job_context"))]
    let mut task = tokio::spawn(future_to_run);

    let mut shutdown_rx = self.shutdown_rx.clone();
    tokio::select! {
        biased;

        joined = &mut task => match joined {
          Ok(result) => ExecOutcome::Completed(result),
          Err(join_error) => ExecOutcome::Panicked(describe_join_error(join_error)),
        },

        _ = wait_for_force(&mut shutdown_rx) => {
          task.abort();
          warn!("Forced shutdown; abandoning execution. The lease will lapse and be reclaimed.");
          ExecOutcome::Abandoned
        }
    }
  }

  /// Hands the outcome to `finalize` / `fail`. Errors are logged, never propagated.
  fn report(&self, job_id: JobId, run_id: RunId, outcome: ExecOutcome) {
    match outcome {
      ExecOutcome::Completed(Ok(completion)) => self.report_success(job_id, run_id, completion),
      ExecOutcome::Completed(Err(message)) => self.report_failure(job_id, run_id, message),
      ExecOutcome::Panicked(message) => {
        self
          .queue
          .metrics()
          .executor_panics
          .fetch_add(1, AtomicOrdering::Relaxed);
        error!(panic = %message, "Executor panicked!");
        self.report_failure(job_id, run_id, format!("executor panicked: {message}"));
      }
      ExecOutcome::Abandoned => {}
    }
  }

  fn report_success(&self, job_id: JobId, run_id: RunId, completion: JobCompletion) {
    match self.queue.finalize(job_id, run_id, completion) {
      Ok(outcome) => debug!(?outcome, "Finalized."),
      Err(e @ QueueError::OutputKindMismatch { .. }) => {
        warn!(error = %e, "Executor output rejected; failing the attempt.");
        self.report_failure(job_id, run_id, e.to_string());
      }
      Err(e) => error!(error = %e, "Failed to finalize job."),
    }
  }

  fn report_failure(&self, job_id: JobId, run_id: RunId, message: String) {
    match self.queue.fail(job_id, run_id, message) {
      Ok(outcome) => debug!(?outcome, "Recorded failure."),
      Err(e) => error!(error = %e, "Failed to record job failure."),
    }
  }
}

/// Resolves once the runtime has been told to stop forcefully.
async fn wait_for_force(shutdown_rx: &mut watch::Receiver<Option<ShutdownMode>>) {
  loop {
    if *shutdown_rx.borrow() == Some(ShutdownMode::Force) {
      return;
    }
    if shutdown_rx.changed().await.is_err() {
      // Sender gone: no force signal can arrive any more.
      std::future::pending::<()>().await;
    }
  }
}

fn describe_join_error(join_error: JoinError) -> String {
  if !join_error.is_panic() {
    return "executor task was cancelled".to_string();
  }
  let payload: Box<dyn Any + Send> = join_error.into_panic();
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
