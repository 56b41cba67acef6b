use crate::error::{BuildError, ShutdownError};
use crate::executor::{ExecFuture, ExecutorRegistry};
use crate::job::{AnalysisJob, JobKind};
use crate::metrics::MetricsSnapshot;
use crate::outcome::ShutdownMode;
use crate::queue::AnalysisQueue;
use crate::sweeper::Sweeper;
use crate::worker::Worker;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Builder for a [`QueueRuntime`]: a pool of polling workers plus one sweeper
/// driving an [`AnalysisQueue`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use analysis_queue::{exec_fn, AnalysisQueue, JobCompletion, JobKind, QueueRuntime};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = Arc::new(AnalysisQueue::builder().build()?);
/// let runtime = QueueRuntime::builder()
///     .max_workers(4)
///     .executor(JobKind::ClarityCheck, exec_fn!(|job| {
///         Ok(JobCompletion::new().with_summary(format!("checked {}", job.id)))
///     }))
///     .build(queue)?;
/// # runtime.shutdown_graceful(None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RuntimeBuilder {
  max_workers: Option<usize>,
  poll_interval: Duration,
  sweep_interval: Duration,
  batch_size: usize,
  executors: ExecutorRegistry,
}

impl Default for RuntimeBuilder {
  fn default() -> Self {
    Self {
      max_workers: None,
      poll_interval: DEFAULT_POLL_INTERVAL,
      sweep_interval: DEFAULT_SWEEP_INTERVAL,
      batch_size: crate::config::MAX_SCAN_LIMIT,
      executors: ExecutorRegistry::default(),
    }
  }
}

impl RuntimeBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the number of worker tasks (required, greater than zero).
  pub fn max_workers(mut self, count: usize) -> Self {
    self.max_workers = Some(count);
    self
  }

  /// How long an idle worker waits before polling again.
  pub fn poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  /// How often the sweeper runs `reclaim_stale` and `cleanup`.
  pub fn sweep_interval(mut self, interval: Duration) -> Self {
    self.sweep_interval = interval;
    self
  }

  /// Due jobs fetched per poll. Capped by the queue's scan limit.
  pub fn batch_size(mut self, size: usize) -> Self {
    self.batch_size = size;
    self
  }

  /// Registers the executor for `kind`, replacing any previous one.
  pub fn executor<F>(mut self, kind: JobKind, exec_fn: F) -> Self
  where
    F: Fn(AnalysisJob) -> ExecFuture + Send + Sync + 'static,
  {
    if self.executors.insert(kind, Box::new(exec_fn)) {
      warn!(%kind, "Replacing previously registered executor.");
    }
    self
  }

  /// Spawns the workers and the sweeper onto the current Tokio runtime.
  pub fn build(self, queue: Arc<AnalysisQueue>) -> Result<QueueRuntime, BuildError> {
    let max_workers = self
      .max_workers
      .filter(|count| *count > 0)
      .ok_or(BuildError::MissingOrZeroMaxWorkers)?;
    if self.poll_interval.is_zero() {
      return Err(BuildError::ZeroInterval("poll_interval"));
    }
    if self.sweep_interval.is_zero() {
      return Err(BuildError::ZeroInterval("sweep_interval"));
    }
    if self.batch_size == 0 {
      return Err(BuildError::InvalidConfig("batch_size must be at least 1".to_string()));
    }
    let handle = Handle::try_current()
      .map_err(|e| BuildError::InvalidConfig(format!("no Tokio runtime available: {e}")))?;
    if self.executors.is_empty() {
      warn!("Runtime built without executors. Claimed jobs will fail and back off.");
    }

    let executors = Arc::new(self.executors);
    let active_workers_counter = Arc::new(AtomicUsize::new(0));
    let (shutdown_tx, shutdown_rx) = watch::channel::<Option<ShutdownMode>>(None);

    // --- Spawn Sweeper ---
    let mut sweeper = Sweeper::new(queue.clone(), shutdown_rx.clone(), self.sweep_interval);
    let sweeper_handle = handle.spawn(async move {
      sweeper.run().await;
    });

    // --- Spawn Workers ---
    let mut worker_handles = Vec::with_capacity(max_workers);
    for worker_id in 0..max_workers {
      let mut worker = Worker::new(
        worker_id,
        queue.clone(),
        executors.clone(),
        shutdown_rx.clone(),
        self.poll_interval,
        self.batch_size,
        active_workers_counter.clone(),
      );
      worker_handles.push(handle.spawn(async move {
        worker.run().await;
      }));
    }

    info!(
      max_workers,
      executors = executors.len(),
      poll_interval = ?self.poll_interval,
      sweep_interval = ?self.sweep_interval,
      "Queue runtime started."
    );

    Ok(QueueRuntime {
      queue,
      shutdown_tx,
      sweeper_handle: Arc::new(Mutex::new(Some(sweeper_handle))),
      worker_handles: Arc::new(Mutex::new(worker_handles)),
    })
  }
}

/// Running workers and sweeper for one [`AnalysisQueue`].
///
/// Use [`QueueRuntime::builder()`] to create one. Stop it explicitly with
/// [`shutdown_graceful`](QueueRuntime::shutdown_graceful) or
/// [`shutdown_force`](QueueRuntime::shutdown_force).
#[derive(Debug)]
pub struct QueueRuntime {
  queue: Arc<AnalysisQueue>,
  shutdown_tx: watch::Sender<Option<ShutdownMode>>,
  sweeper_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
  worker_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl QueueRuntime {
  pub fn builder() -> RuntimeBuilder {
    RuntimeBuilder::new()
  }

  pub fn queue(&self) -> &Arc<AnalysisQueue> {
    &self.queue
  }

  pub fn metrics_snapshot(&self) -> MetricsSnapshot {
    self.queue.metrics().snapshot()
  }

  /// Initiates a graceful shutdown.
  ///
  /// Workers stop polling, finish and report their current execution, then
  /// exit. Waits for all tasks or until the optional timeout elapses.
  ///
  /// # Errors
  ///
  /// - [`ShutdownError::SignalFailed`]: Failed to send the shutdown signal.
  /// - [`ShutdownError::Timeout`]: Waiting for tasks exceeded the timeout.
  /// - [`ShutdownError::TaskPanic`]: A worker or sweeper task panicked.
  pub async fn shutdown_graceful(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating graceful shutdown...");
    self
      .shutdown_tx
      .send(Some(ShutdownMode::Graceful))
      .map_err(|_| ShutdownError::SignalFailed)?;
    self.await_shutdown(timeout).await
  }

  /// Initiates a forced shutdown.
  ///
  /// In-flight executions are aborted without writing back; their leases lapse
  /// and the stale reclaimer returns them to pending later.
  ///
  /// # Errors
  ///
  /// Same as [`shutdown_graceful`](QueueRuntime::shutdown_graceful).
  pub async fn shutdown_force(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating forced shutdown...");
    self
      .shutdown_tx
      .send(Some(ShutdownMode::Force))
      .map_err(|_| ShutdownError::SignalFailed)?;
    self.await_shutdown(timeout).await
  }

  async fn await_shutdown(&self, timeout_duration: Option<Duration>) -> Result<(), ShutdownError> {
    let sweeper_handle = self.sweeper_handle.lock().await.take();
    let worker_handles = {
      let mut guard = self.worker_handles.lock().await;
      std::mem::take(&mut *guard)
    };

    let mut tasks = Vec::with_capacity(1 + worker_handles.len());
    if let Some(handle) = sweeper_handle {
      tasks.push(tokio::spawn(async move {
        handle.await.map_err(|e| {
          error!("Sweeper task panicked: {:?}", e);
          ShutdownError::TaskPanic
        })
      }));
    }
    for (i, handle) in worker_handles.into_iter().enumerate() {
      tasks.push(tokio::spawn(async move {
        handle.await.map_err(|e| {
          error!(worker_id = i, "Worker task panicked: {:?}", e);
          ShutdownError::TaskPanic
        })
      }));
    }

    if tasks.is_empty() {
      warn!("No tasks found to await during shutdown.");
      return Ok(());
    }

    let join_all_fut = try_join_all(tasks);
    let joined = match timeout_duration {
      Some(timeout) => match tokio::time::timeout(timeout, join_all_fut).await {
        Ok(joined) => joined,
        Err(_) => {
          error!("Shutdown timed out after {:?}", timeout);
          return Err(ShutdownError::Timeout);
        }
      },
      None => join_all_fut.await,
    };

    let result = match joined {
      Ok(results) => results.into_iter().collect::<Result<Vec<()>, ShutdownError>>().map(|_| ()),
      Err(join_err) => {
        error!("A shutdown waiter panicked: {:?}", join_err);
        Err(ShutdownError::TaskPanic)
      }
    };

    if result.is_ok() {
      info!("All tasks joined successfully.");
    } else {
      error!("Error during shutdown task joining: {:?}", result);
    }
    result
  }
}
