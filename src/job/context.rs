use super::{JobId, JobKind, RunId};

/// Contextual information available to a running executor via task-locals.
/// Accessible within a `BoxedExecFn` using `try_get_current_job_context()`
/// or the `job_context!()` macro when the `job_context` feature is enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobContext {
  /// The job being executed.
  pub job_id: JobId,
  /// The lease ticket of this execution. Stale once the lease is reclaimed.
  pub run_id: RunId,
  pub kind: JobKind,
  /// Claim count including this one (1 on the first execution).
  pub attempt: u32,
}

tokio::task_local! {
    /// Provides access to the current `JobContext` within an executor's scope.
    /// Set by the worker if the `job_context` feature is enabled.
    pub static CURRENT_JOB_CONTEXT: JobContext;
}

/// Attempts to retrieve the current `JobContext` for the executing job.
///
/// Returns `None` when called outside a worker-managed executor task.
pub fn try_get_current_job_context() -> Option<JobContext> {
  CURRENT_JOB_CONTEXT.try_with(|ctx| *ctx).ok()
}

/// Retrieves the current `JobContext`, panicking if called outside a
/// worker-managed executor task.
///
/// # Panics
/// Panics if the `CURRENT_JOB_CONTEXT` task local has not been set.
#[macro_export]
macro_rules! job_context {
  () => {
    $crate::job::context::CURRENT_JOB_CONTEXT.with(|ctx| *ctx)
  };
}
