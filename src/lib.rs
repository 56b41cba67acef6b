//! analysis-queue: A Debounced, Lease-Based Analysis Job Queue
//!
//! Schedules background analysis work (entity detection, lint passes, digests,
//! embedding generation) triggered by user edits. Bursts of edits to the same
//! target collapse into one job, concurrent pollers agree on a single owner per
//! job, and crashed or slow workers are recovered without manual intervention.
//!
//! # Features
//!
//! - Admission with trailing debounce and per-slot dedupe
//!   ([`AnalysisQueue::enqueue`]). At most one pending or processing job exists
//!   per dedupe key.
//! - A dirty flag instead of preemption: an edit that races a running job
//!   guarantees exactly one follow-up run.
//! - Exclusive claims with a per-claim lease ticket ([`RunId`]). Results from a
//!   stale lease are ignored, never applied.
//! - Capped, jittered exponential backoff and a terminal attempt ceiling.
//! - Stale lease reclamation and retention-based garbage collection.
//! - Embedding-job slots per indexed record with bulk hard deletion.
//! - An optional Tokio [`QueueRuntime`]: polling workers plus a maintenance
//!   sweeper, with graceful and forced shutdown.
//! - Built-in metrics ([`MetricsSnapshot`]) and `tracing` instrumentation.
//! - Optional task-local job context (`JobContext`) for executors (requires `job_context` feature).
//! - Optional Serde support for public types (requires `serde` feature).
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use analysis_queue::{
//!     exec_fn, AnalysisQueue, EnqueueRequest, JobCompletion, JobKind, JobOutput, JobPayload,
//!     QueueRuntime,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // tracing_subscriber::fmt().with_env_filter("warn,analysis_queue=info").init();
//!
//!     let queue = Arc::new(AnalysisQueue::builder().build()?);
//!
//!     let runtime = QueueRuntime::builder()
//!         .max_workers(2)
//!         .executor(JobKind::ClarityCheck, exec_fn!(|job| {
//!             tokio::time::sleep(Duration::from_millis(50)).await;
//!             Ok(JobCompletion::new()
//!                 .with_summary(format!("checked {}", job.id))
//!                 .with_output(JobOutput::ClarityCheck { issue_count: 0 }))
//!         }))
//!         .build(queue.clone())?;
//!
//!     // Called from an edit handler. Repeated calls within the debounce window
//!     // fold into the same job.
//!     let outcome = queue.enqueue(
//!         EnqueueRequest::new("project-1", "user-1", JobPayload::ClarityCheck {
//!             content: "The quick brown fox.".to_string(),
//!         })
//!         .with_document("doc-1"),
//!     )?;
//!     println!("admitted {} as {:?}", outcome.job_id, outcome.disposition);
//!
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     println!("{:#?}", runtime.metrics_snapshot());
//!
//!     runtime.shutdown_graceful(Some(Duration::from_secs(10))).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Driving the queue yourself
//!
//! The runtime is a convenience. Any number of processes sharing one
//! [`JobStore`](store::JobStore) can run the same loop by hand:
//! [`list_due`](AnalysisQueue::list_due) → [`claim`](AnalysisQueue::claim) →
//! execute → [`finalize`](AnalysisQueue::finalize) or
//! [`fail`](AnalysisQueue::fail), plus periodic
//! [`reclaim_stale`](AnalysisQueue::reclaim_stale) and
//! [`cleanup`](AnalysisQueue::cleanup).
//!
//! # Configuration
//!
//! Use [`QueueBuilder`] (or a [`QueueConfig`]) for debounce windows, lease
//! duration, attempt ceiling, scan limit, retention and [`BackoffPolicy`]; and
//! [`RuntimeBuilder`] for worker count, poll and sweep intervals and executors.

// --- Feature-gated Documentation ---

#[cfg(all(doc, feature = "job_context"))]
pub mod job_context_docs {
    //! # Accessing Job Context (`job_context` feature)
    //!
    //! Executors run inside a Tokio task-local scope set by the worker:
    //!
    //! 1.  **`try_get_current_job_context() -> Option<JobContext>`**: Returns
    //!     `None` outside a worker-managed executor.
    //! 2.  **`job_context!() -> JobContext`**: **Panics** outside a
    //!     worker-managed executor.
    //!
    //! ```no_run
    //! # #[cfg(feature = "job_context")] {
    //! use analysis_queue::{exec_fn, job_context, try_get_current_job_context, JobCompletion};
    //!
    //! let executor = exec_fn!(|job| {
    //!     if let Some(ctx) = try_get_current_job_context() {
    //!         println!("attempt {} of job {} under run {}", ctx.attempt, ctx.job_id, ctx.run_id);
    //!     }
    //!     let required = job_context!();
    //!     assert_eq!(required.job_id, job.id);
    //!     Ok(JobCompletion::new())
    //! });
    //! # let _ = executor;
    //! # }
    //! ```
}

pub mod backoff;
pub mod clock;
pub mod config;
pub mod embedding;
pub mod error;
pub mod executor;
pub mod job;
mod macros;
pub mod metrics;
pub mod outcome;
pub mod queue;
pub mod runtime;
pub mod store;
mod sweeper;
mod worker;

// --- Public Re-exports ---

pub use queue::{AnalysisQueue, QueueBuilder};
pub use runtime::{QueueRuntime, RuntimeBuilder};

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::QueueConfig;
pub use embedding::EmbeddingRequest;

pub use error::{BuildError, QueueError, ShutdownError, StoreError};

pub use executor::{BoxedExecFn, ExecFuture, ExecResult};
pub use job::{
  AnalysisJob, EmbeddingTarget, EmbeddingTargetType, EnqueueRequest, JobCompletion, JobId,
  JobKind, JobOutput, JobPayload, JobStatus, RunId,
};
#[cfg(feature = "job_context")]
pub use job::context::{try_get_current_job_context, JobContext};

pub use outcome::{
  ClaimOutcome, ClaimRejection, EnqueueDisposition, EnqueueOutcome, FailOutcome, FinalizeOutcome,
  ShutdownMode,
};

pub use metrics::{MetricsSnapshot, QueueMetrics};
pub use store::{InsertOutcome, JobStore, MemoryStore};
