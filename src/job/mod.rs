#[cfg(feature = "job_context")]
pub mod context;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::error::QueueError;

// --- Public Type Aliases ---

/// Identity of a job row. Uses UUID v4.
pub type JobId = Uuid;

/// Lease ticket proving the current claim on a processing job.
/// A fresh UUID v4 is issued on every successful claim.
pub type RunId = Uuid;

/// Type alias for the simple numeric ID assigned to worker tasks for logging.
pub(crate) type WorkerId = usize;

// --- Enumerations ---

/// The fixed set of analysis kinds the queue schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
  feature = "serde",
  derive(serde::Serialize, serde::Deserialize),
  serde(rename_all = "snake_case")
)]
pub enum JobKind {
  DetectEntities,
  CoherenceLint,
  ClarityCheck,
  PolicyCheck,
  DigestDocument,
  EmbeddingGeneration,
}

impl JobKind {
  pub const ALL: [JobKind; 6] = [
    JobKind::DetectEntities,
    JobKind::CoherenceLint,
    JobKind::ClarityCheck,
    JobKind::PolicyCheck,
    JobKind::DigestDocument,
    JobKind::EmbeddingGeneration,
  ];

  /// The snake_case wire name, also used as the dedupe key prefix.
  pub const fn as_str(self) -> &'static str {
    match self {
      JobKind::DetectEntities => "detect_entities",
      JobKind::CoherenceLint => "coherence_lint",
      JobKind::ClarityCheck => "clarity_check",
      JobKind::PolicyCheck => "policy_check",
      JobKind::DigestDocument => "digest_document",
      JobKind::EmbeddingGeneration => "embedding_generation",
    }
  }

  pub const fn is_embedding(self) -> bool {
    matches!(self, JobKind::EmbeddingGeneration)
  }
}

impl fmt::Display for JobKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for JobKind {
  type Err = QueueError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    JobKind::ALL
      .into_iter()
      .find(|kind| kind.as_str() == value)
      .ok_or_else(|| QueueError::UnknownKind(value.to_string()))
  }
}

/// Lifecycle state of a job.
///
/// `Pending` and `Processing` are the *active* states: at most one job per
/// dedupe key may be in either of them. `Succeeded` and `Failed` are terminal.
///
/// The variant order matters: the store's status index sorts by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
  feature = "serde",
  derive(serde::Serialize, serde::Deserialize),
  serde(rename_all = "snake_case")
)]
pub enum JobStatus {
  Pending,
  Processing,
  Succeeded,
  Failed,
}

impl JobStatus {
  pub const fn as_str(self) -> &'static str {
    match self {
      JobStatus::Pending => "pending",
      JobStatus::Processing => "processing",
      JobStatus::Succeeded => "succeeded",
      JobStatus::Failed => "failed",
    }
  }

  pub const fn is_active(self) -> bool {
    matches!(self, JobStatus::Pending | JobStatus::Processing)
  }

  pub const fn is_terminal(self) -> bool {
    !self.is_active()
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for JobStatus {
  type Err = QueueError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    match value {
      "pending" => Ok(JobStatus::Pending),
      "processing" => Ok(JobStatus::Processing),
      "succeeded" => Ok(JobStatus::Succeeded),
      "failed" => Ok(JobStatus::Failed),
      other => Err(QueueError::UnknownStatus(other.to_string())),
    }
  }
}

// --- Embedding Targets ---

/// What kind of record an embedding job reindexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
  feature = "serde",
  derive(serde::Serialize, serde::Deserialize),
  serde(rename_all = "snake_case")
)]
pub enum EmbeddingTargetType {
  Document,
  Entity,
  Memory,
}

impl EmbeddingTargetType {
  pub const fn as_str(self) -> &'static str {
    match self {
      EmbeddingTargetType::Document => "document",
      EmbeddingTargetType::Entity => "entity",
      EmbeddingTargetType::Memory => "memory",
    }
  }
}

impl fmt::Display for EmbeddingTargetType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The record an embedding job belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmbeddingTarget {
  pub target_type: EmbeddingTargetType,
  pub target_id: String,
}

impl EmbeddingTarget {
  pub fn new(target_type: EmbeddingTargetType, target_id: impl Into<String>) -> Self {
    Self {
      target_type,
      target_id: target_id.into(),
    }
  }

  /// Dedupe key shape for embedding jobs: `embedding_generation:<type>:<id>`.
  pub fn dedupe_key(&self) -> String {
    format!(
      "{}:{}:{}",
      JobKind::EmbeddingGeneration.as_str(),
      self.target_type.as_str(),
      self.target_id
    )
  }
}

// --- Payload & Output ---

/// Kind-specific executor input. The queue never inspects the contents;
/// the variant alone determines the job's [`JobKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
  feature = "serde",
  derive(serde::Serialize, serde::Deserialize),
  serde(tag = "kind", rename_all = "snake_case")
)]
pub enum JobPayload {
  DetectEntities {
    content: String,
    known_entity_ids: Vec<String>,
  },
  CoherenceLint {
    content: String,
    rule_ids: Vec<String>,
  },
  ClarityCheck {
    content: String,
  },
  PolicyCheck {
    content: String,
    policy_ids: Vec<String>,
  },
  DigestDocument {
    content: String,
    max_summary_chars: Option<u32>,
  },
  EmbeddingGeneration {
    target: EmbeddingTarget,
    text: String,
  },
}

impl JobPayload {
  pub const fn kind(&self) -> JobKind {
    match self {
      JobPayload::DetectEntities { .. } => JobKind::DetectEntities,
      JobPayload::CoherenceLint { .. } => JobKind::CoherenceLint,
      JobPayload::ClarityCheck { .. } => JobKind::ClarityCheck,
      JobPayload::PolicyCheck { .. } => JobKind::PolicyCheck,
      JobPayload::DigestDocument { .. } => JobKind::DigestDocument,
      JobPayload::EmbeddingGeneration { .. } => JobKind::EmbeddingGeneration,
    }
  }
}

/// Kind-specific executor output, persisted as the job's `result_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
  feature = "serde",
  derive(serde::Serialize, serde::Deserialize),
  serde(tag = "kind", rename_all = "snake_case")
)]
pub enum JobOutput {
  DetectEntities { entity_ids: Vec<String> },
  CoherenceLint { issue_count: u32, report_ref: Option<String> },
  ClarityCheck { issue_count: u32 },
  PolicyCheck { violation_count: u32 },
  DigestDocument { digest_ref: String },
  EmbeddingGeneration { vector_ids: Vec<String> },
}

impl JobOutput {
  pub const fn kind(&self) -> JobKind {
    match self {
      JobOutput::DetectEntities { .. } => JobKind::DetectEntities,
      JobOutput::CoherenceLint { .. } => JobKind::CoherenceLint,
      JobOutput::ClarityCheck { .. } => JobKind::ClarityCheck,
      JobOutput::PolicyCheck { .. } => JobKind::PolicyCheck,
      JobOutput::DigestDocument { .. } => JobKind::DigestDocument,
      JobOutput::EmbeddingGeneration { .. } => JobKind::EmbeddingGeneration,
    }
  }
}

/// What an executor hands back on success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobCompletion {
  pub summary: Option<String>,
  pub output: Option<JobOutput>,
}

impl JobCompletion {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
    self.summary = Some(summary.into());
    self
  }

  pub fn with_output(mut self, output: JobOutput) -> Self {
    self.output = Some(output);
    self
  }
}

// --- The Job Row ---

/// A single analysis job as persisted in the [`JobStore`](crate::store::JobStore).
///
/// Invariants maintained by [`AnalysisQueue`](crate::queue::AnalysisQueue):
/// - `processing_run_id` and `lease_expires_at` are set iff `status` is `Processing`.
/// - `attempts` only increases on a successful claim.
/// - `dirty` is only ever set while `Processing`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnalysisJob {
  pub id: JobId,
  pub project_id: String,
  pub user_id: String,
  pub document_id: Option<String>,
  pub kind: JobKind,
  pub status: JobStatus,
  /// Number of successful claims so far.
  pub attempts: u32,
  /// Most recent failure message. Observability only.
  pub last_error: Option<String>,
  /// Next due time while pending.
  pub scheduled_for: DateTime<Utc>,
  pub content_hash: Option<String>,
  pub dedupe_key: Option<String>,
  pub processing_run_id: Option<RunId>,
  pub processing_started_at: Option<DateTime<Utc>>,
  pub lease_expires_at: Option<DateTime<Utc>>,
  pub payload: JobPayload,
  pub result_summary: Option<String>,
  pub result_ref: Option<JobOutput>,
  /// Superseded by a newer enqueue while processing.
  pub dirty: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  /// Compare-and-swap token. Bumped by the store on every successful write.
  pub version: u64,
}

impl AnalysisJob {
  /// The timestamp the store's status index sorts this job by.
  ///
  /// - pending: `scheduled_for` (due time)
  /// - processing: the lease expiry, falling back to the claim time
  /// - terminal: `updated_at` (retention age)
  pub fn index_time(&self) -> DateTime<Utc> {
    match self.status {
      JobStatus::Pending => self.scheduled_for,
      JobStatus::Processing => self
        .lease_expires_at
        .or(self.processing_started_at)
        .unwrap_or(self.updated_at),
      JobStatus::Succeeded | JobStatus::Failed => self.updated_at,
    }
  }

  /// True when the job is processing and its lease is missing or has passed.
  pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
    self.status == JobStatus::Processing
      && self.lease_expires_at.map_or(true, |expires| expires <= now)
  }

  /// True when `run_id` is the ticket of the current claim.
  pub fn holds_lease(&self, run_id: RunId) -> bool {
    self.status == JobStatus::Processing && self.processing_run_id == Some(run_id)
  }

  pub(crate) fn clear_lease(&mut self) {
    self.processing_run_id = None;
    self.processing_started_at = None;
    self.lease_expires_at = None;
  }
}

// --- Admission Request ---

/// Input to [`AnalysisQueue::enqueue`](crate::queue::AnalysisQueue::enqueue).
///
/// Built with [`EnqueueRequest::new`] plus the `with_*` methods. The job kind is
/// implied by the payload variant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnqueueRequest {
  pub project_id: String,
  pub user_id: String,
  pub document_id: Option<String>,
  pub payload: JobPayload,
  pub content_hash: Option<String>,
  /// Explicit admission slot. Overrides the derived `kind:document` / `kind:project` key.
  pub dedupe_key: Option<String>,
  /// Debounce window. `None` uses the kind's configured default; negative values clamp to zero.
  #[cfg_attr(feature = "serde", serde(skip))]
  pub debounce: Option<ChronoDuration>,
}

impl EnqueueRequest {
  pub fn new(project_id: impl Into<String>, user_id: impl Into<String>, payload: JobPayload) -> Self {
    Self {
      project_id: project_id.into(),
      user_id: user_id.into(),
      document_id: None,
      payload,
      content_hash: None,
      dedupe_key: None,
      debounce: None,
    }
  }

  pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
    self.document_id = Some(document_id.into());
    self
  }

  pub fn with_content_hash(mut self, content_hash: impl Into<String>) -> Self {
    self.content_hash = Some(content_hash.into());
    self
  }

  pub fn with_dedupe_key(mut self, dedupe_key: impl Into<String>) -> Self {
    self.dedupe_key = Some(dedupe_key.into());
    self
  }

  pub fn with_debounce(mut self, debounce: ChronoDuration) -> Self {
    self.debounce = Some(debounce);
    self
  }

  pub fn kind(&self) -> JobKind {
    self.payload.kind()
  }

  /// Explicit override, else the embedding target's slot, else
  /// `kind:documentId`, else `kind:projectId`.
  pub fn effective_dedupe_key(&self) -> String {
    if let Some(key) = &self.dedupe_key {
      return key.clone();
    }
    if let JobPayload::EmbeddingGeneration { target, .. } = &self.payload {
      return target.dedupe_key();
    }
    match &self.document_id {
      Some(document_id) => format!("{}:{}", self.kind().as_str(), document_id),
      None => format!("{}:{}", self.kind().as_str(), self.project_id),
    }
  }

  /// Synchronous admission checks. Failures are never retried.
  pub(crate) fn validate(&self) -> Result<(), QueueError> {
    ensure_non_empty(&self.project_id, "project_id")?;
    ensure_non_empty(&self.user_id, "user_id")?;
    if let Some(document_id) = &self.document_id {
      ensure_non_empty(document_id, "document_id")?;
    }
    if let Some(key) = &self.dedupe_key {
      ensure_non_empty(key, "dedupe_key")?;
    }
    if let JobPayload::EmbeddingGeneration { target, .. } = &self.payload {
      ensure_non_empty(&target.target_id, "target_id")?;
    }
    Ok(())
  }
}

fn ensure_non_empty(value: &str, field: &str) -> Result<(), QueueError> {
  if value.trim().is_empty() {
    return Err(QueueError::InvalidRequest(format!("{field} must not be empty")));
  }
  Ok(())
}
