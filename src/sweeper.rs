use crate::outcome::ShutdownMode;
use crate::queue::AnalysisQueue;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// Periodic maintenance task: reclaims lapsed leases and collects terminal
/// jobs past retention. Each pass is bounded by the queue's scan limit, so a
/// large backlog drains over several intervals.
pub(crate) struct Sweeper {
  queue: Arc<AnalysisQueue>,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  interval: Duration,
}

impl Sweeper {
  pub fn new(
    queue: Arc<AnalysisQueue>,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
    interval: Duration,
  ) -> Self {
    Self {
      queue,
      shutdown_rx,
      interval,
    }
  }

  pub async fn run(&mut self) {
    info!(interval = ?self.interval, "Sweeper started.");

    loop {
      if self.shutdown_rx.borrow().is_some() {
        break;
      }

      tokio::select! {
          biased; // Prioritize checking the shutdown signal

          Ok(()) = self.shutdown_rx.changed() => {
              if self.shutdown_rx.borrow().is_some() {
                  info!("Sweeper received shutdown signal.");
                  break;
              }
          }

          _ = sleep(self.interval) => {
              self.sweep();
          }
      }
    }

    info!("Sweeper task shutting down.");
  }

  /// One maintenance pass. Failures are logged and retried next interval.
  pub fn sweep(&self) {
    match self.queue.reclaim_stale() {
      Ok(reclaimed) => debug!(reclaimed, "Stale reclaim pass finished."),
      Err(e) => error!(error = %e, "Stale reclaim pass failed."),
    }
    match self.queue.cleanup() {
      Ok(deleted) => debug!(deleted, "Retention pass finished."),
      Err(e) => error!(error = %e, "Retention pass failed."),
    }
  }
}
