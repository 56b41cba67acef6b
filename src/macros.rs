/// Builds a [`BoxedExecFn`](crate::executor::BoxedExecFn)-compatible closure.
///
/// Takes an optional synchronous setup block, the name to bind the claimed
/// [`AnalysisJob`](crate::AnalysisJob) to, and the async body. The setup
/// block runs on every invocation before the future is created, which is the
/// place to clone `Arc`s the body moves.
///
/// # Usage
///
/// ```ignore
/// use analysis_queue::{exec_fn, JobCompletion};
/// # use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
/// # let counter = Arc::new(AtomicUsize::new(0));
/// // With setup block:
/// let counting = exec_fn! {
///     { let counter = counter.clone(); }
///     |job| {
///         counter.fetch_add(1, Ordering::SeqCst);
///         Ok(JobCompletion::new().with_summary(format!("ran {}", job.id)))
///     }
/// };
///
/// // Without setup block:
/// let failing = exec_fn! {
///     |job| { Err(format!("upstream unavailable for {}", job.kind)) }
/// };
/// ```
#[macro_export]
macro_rules! exec_fn {
    (
        { $($setup_stmts:stmt);* $(;)? }
        |$job:ident| $main_block:block
    ) => {
        move |$job: $crate::AnalysisJob| {
            $($setup_stmts;)*

            let fut = async move {
                let result: $crate::executor::ExecResult = $main_block;
                result
            };

            Box::pin(fut) as $crate::executor::ExecFuture
        }
    };

    (
        |$job:ident| $main_block:block
    ) => {
        move |$job: $crate::AnalysisJob| {
            let fut = async move {
                let result: $crate::executor::ExecResult = $main_block;
                result
            };

            Box::pin(fut) as $crate::executor::ExecFuture
        }
    };
}
