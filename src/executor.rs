use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::job::{AnalysisJob, JobCompletion, JobKind};

/// What an executor resolves to: a completion to finalize, or an error message
/// to record on the job before it backs off.
pub type ExecResult = Result<JobCompletion, String>;

pub type ExecFuture = Pin<Box<dyn Future<Output = ExecResult> + Send + 'static>>;

/// Type alias for the boxed, thread-safe, async executor for one job kind.
/// It receives the claimed job and returns a pinned, boxed future.
pub type BoxedExecFn = Box<dyn Fn(AnalysisJob) -> ExecFuture + Send + Sync + 'static>;

/// Executors keyed by job kind. Shared read-only by every worker.
#[derive(Clone, Default)]
pub(crate) struct ExecutorRegistry {
  executors: HashMap<JobKind, Arc<BoxedExecFn>>,
}

impl ExecutorRegistry {
  pub(crate) fn insert(&mut self, kind: JobKind, exec_fn: BoxedExecFn) -> bool {
    self.executors.insert(kind, Arc::new(exec_fn)).is_some()
  }

  pub(crate) fn get(&self, kind: JobKind) -> Option<Arc<BoxedExecFn>> {
    self.executors.get(&kind).cloned()
  }

  pub(crate) fn len(&self) -> usize {
    self.executors.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.executors.is_empty()
  }
}

impl fmt::Debug for ExecutorRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut kinds: Vec<_> = self.executors.keys().copied().collect();
    kinds.sort();
    f.debug_struct("ExecutorRegistry").field("kinds", &kinds).finish()
  }
}
