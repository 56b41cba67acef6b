//! Embedding-generation jobs: one admission slot per indexed record, plus bulk
//! hard deletion when records or whole projects go away.

use std::sync::atomic::Ordering;

use chrono::Duration as ChronoDuration;
use tracing::{debug, info};

use crate::error::QueueError;
use crate::job::{EmbeddingTarget, EmbeddingTargetType, EnqueueRequest, JobKind, JobPayload};
use crate::outcome::EnqueueOutcome;
use crate::queue::AnalysisQueue;

/// Input to [`AnalysisQueue::enqueue_embedding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingRequest {
  pub project_id: String,
  pub user_id: String,
  pub target: EmbeddingTarget,
  pub text: String,
  pub content_hash: Option<String>,
  /// Overrides the configured embedding debounce.
  pub debounce: Option<ChronoDuration>,
}

impl EmbeddingRequest {
  pub fn new(
    project_id: impl Into<String>,
    user_id: impl Into<String>,
    target: EmbeddingTarget,
    text: impl Into<String>,
  ) -> Self {
    Self {
      project_id: project_id.into(),
      user_id: user_id.into(),
      target,
      text: text.into(),
      content_hash: None,
      debounce: None,
    }
  }

  pub fn with_content_hash(mut self, content_hash: impl Into<String>) -> Self {
    self.content_hash = Some(content_hash.into());
    self
  }

  pub fn with_debounce(mut self, debounce: ChronoDuration) -> Self {
    self.debounce = Some(debounce);
    self
  }

  fn into_enqueue_request(self) -> EnqueueRequest {
    let dedupe_key = self.target.dedupe_key();
    let document_id = match self.target.target_type {
      EmbeddingTargetType::Document => Some(self.target.target_id.clone()),
      _ => None,
    };
    EnqueueRequest {
      project_id: self.project_id,
      user_id: self.user_id,
      document_id,
      payload: JobPayload::EmbeddingGeneration {
        target: self.target,
        text: self.text,
      },
      content_hash: self.content_hash,
      dedupe_key: Some(dedupe_key),
      debounce: self.debounce,
    }
  }
}

impl AnalysisQueue {
  /// Admits an embedding job into the `embedding_generation:<type>:<id>` slot.
  pub fn enqueue_embedding(&self, request: EmbeddingRequest) -> Result<EnqueueOutcome, QueueError> {
    self.enqueue(request.into_enqueue_request())
  }

  /// Hard-deletes every pending or processing embedding job for `target`.
  ///
  /// An in-flight execution is not interrupted; its later finalize or fail
  /// finds the job gone and is ignored. A job that reaches a terminal state
  /// between the scan and the delete is kept.
  pub fn delete_embedding_jobs_for_target(&self, target: &EmbeddingTarget) -> Result<usize, QueueError> {
    let dedupe_key = target.dedupe_key();
    let mut deleted = 0;
    for job in self.store().scan_by_dedupe_key(&dedupe_key)? {
      if job.kind.is_embedding() && job.status.is_active() && self.store().delete_if_active(job.id)? {
        deleted += 1;
      }
    }
    self.metrics().embedding_jobs_deleted.fetch_add(deleted, Ordering::Relaxed);
    debug!(dedupe_key = %dedupe_key, deleted, "Deleted embedding jobs for target.");
    Ok(deleted)
  }

  /// Hard-deletes every pending or processing embedding job in `project_id`,
  /// in scan-limit sized batches until none remain.
  pub fn delete_embedding_jobs_for_project(&self, project_id: &str) -> Result<usize, QueueError> {
    let batch = self.config().effective_scan_limit(usize::MAX);
    let mut deleted = 0;
    loop {
      let jobs = self
        .store()
        .scan_by_project(project_id, Some(JobKind::EmbeddingGeneration), batch)?;
      if jobs.is_empty() {
        break;
      }
      let mut progressed = false;
      for job in jobs {
        if self.store().delete_if_active(job.id)? {
          deleted += 1;
          progressed = true;
        }
      }
      if !progressed {
        break;
      }
    }
    self.metrics().embedding_jobs_deleted.fetch_add(deleted, Ordering::Relaxed);
    info!(project_id, deleted, "Deleted embedding jobs for project.");
    Ok(deleted)
  }
}
