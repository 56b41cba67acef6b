use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;
use uuid::Uuid;

use super::{InsertOutcome, JobStore};
use crate::error::StoreError;
use crate::job::{AnalysisJob, JobId, JobKind, JobStatus};

type StatusKey = (JobStatus, DateTime<Utc>, JobId);

/// In-process [`JobStore`]. One mutex guards the rows and all secondary
/// indexes, so every method is atomic with respect to every other.
#[derive(Debug, Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
  jobs: HashMap<JobId, AnalysisJob>,
  by_status: BTreeSet<StatusKey>,
  by_dedupe: HashMap<String, BTreeSet<JobId>>,
  by_project: HashMap<String, BTreeSet<JobId>>,
}

impl Inner {
  fn index(&mut self, job: &AnalysisJob) {
    self.by_status.insert((job.status, job.index_time(), job.id));
    if let Some(key) = &job.dedupe_key {
      self.by_dedupe.entry(key.clone()).or_default().insert(job.id);
    }
    self
      .by_project
      .entry(job.project_id.clone())
      .or_default()
      .insert(job.id);
  }

  fn unindex(&mut self, job: &AnalysisJob) {
    self.by_status.remove(&(job.status, job.index_time(), job.id));
    if let Some(key) = &job.dedupe_key {
      remove_from_bucket(&mut self.by_dedupe, key, job.id);
    }
    remove_from_bucket(&mut self.by_project, &job.project_id, job.id);
  }

  fn active_holder(&self, dedupe_key: &str) -> Option<JobId> {
    self.by_dedupe.get(dedupe_key).and_then(|ids| {
      ids
        .iter()
        .copied()
        .find(|id| self.jobs.get(id).is_some_and(|job| job.status.is_active()))
    })
  }
}

fn remove_from_bucket(buckets: &mut HashMap<String, BTreeSet<JobId>>, key: &str, id: JobId) {
  if let Some(ids) = buckets.get_mut(key) {
    ids.remove(&id);
    if ids.is_empty() {
      buckets.remove(key);
    }
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of stored jobs in any status.
  pub fn len(&self) -> usize {
    self.inner.lock().jobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Snapshot of every stored job, ordered by creation time.
  pub fn jobs(&self) -> Vec<AnalysisJob> {
    let inner = self.inner.lock();
    let mut jobs: Vec<_> = inner.jobs.values().cloned().collect();
    jobs.sort_by_key(|job| (job.created_at, job.id));
    jobs
  }
}

impl JobStore for MemoryStore {
  fn insert(&self, mut job: AnalysisJob) -> Result<InsertOutcome, StoreError> {
    let mut inner = self.inner.lock();
    if inner.jobs.contains_key(&job.id) {
      return Err(StoreError::DuplicateId(job.id));
    }
    if job.status.is_active() {
      if let Some(holder) = job.dedupe_key.as_deref().and_then(|key| inner.active_holder(key)) {
        trace!(job_id = %job.id, holder_id = %holder, "Insert refused: dedupe slot taken.");
        return Ok(InsertOutcome::SlotTaken(holder));
      }
    }
    job.version = 1;
    inner.index(&job);
    inner.jobs.insert(job.id, job);
    Ok(InsertOutcome::Inserted)
  }

  fn get(&self, id: JobId) -> Result<Option<AnalysisJob>, StoreError> {
    Ok(self.inner.lock().jobs.get(&id).cloned())
  }

  fn compare_and_swap(&self, job: &AnalysisJob) -> Result<bool, StoreError> {
    let mut inner = self.inner.lock();
    let Some(current) = inner.jobs.get(&job.id).cloned() else {
      return Ok(false);
    };
    if current.version != job.version {
      trace!(
        job_id = %job.id,
        expected = job.version,
        actual = current.version,
        "Compare-and-swap lost."
      );
      return Ok(false);
    }
    let mut next = job.clone();
    next.version = current.version + 1;
    inner.unindex(&current);
    inner.index(&next);
    inner.jobs.insert(next.id, next);
    Ok(true)
  }

  fn delete(&self, id: JobId) -> Result<bool, StoreError> {
    let mut inner = self.inner.lock();
    match inner.jobs.remove(&id) {
      Some(job) => {
        inner.unindex(&job);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn delete_if_active(&self, id: JobId) -> Result<bool, StoreError> {
    let mut inner = self.inner.lock();
    if !inner.jobs.get(&id).is_some_and(|job| job.status.is_active()) {
      return Ok(false);
    }
    match inner.jobs.remove(&id) {
      Some(job) => {
        inner.unindex(&job);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn scan_by_status(
    &self,
    status: JobStatus,
    until: DateTime<Utc>,
    limit: usize,
  ) -> Result<Vec<AnalysisJob>, StoreError> {
    let inner = self.inner.lock();
    let lower = (status, DateTime::<Utc>::MIN_UTC, Uuid::nil());
    let upper = (status, until, Uuid::from_u128(u128::MAX));
    Ok(
      inner
        .by_status
        .range(lower..=upper)
        .take(limit)
        .filter_map(|(_, _, id)| inner.jobs.get(id).cloned())
        .collect(),
    )
  }

  fn scan_by_dedupe_key(&self, dedupe_key: &str) -> Result<Vec<AnalysisJob>, StoreError> {
    let inner = self.inner.lock();
    Ok(
      inner
        .by_dedupe
        .get(dedupe_key)
        .map(|ids| ids.iter().filter_map(|id| inner.jobs.get(id).cloned()).collect())
        .unwrap_or_default(),
    )
  }

  fn scan_by_project(
    &self,
    project_id: &str,
    kind: Option<JobKind>,
    limit: usize,
  ) -> Result<Vec<AnalysisJob>, StoreError> {
    let inner = self.inner.lock();
    Ok(
      inner
        .by_project
        .get(project_id)
        .map(|ids| {
          ids
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|job| job.status.is_active())
            .filter(|job| kind.map_or(true, |kind| job.kind == kind))
            .take(limit)
            .cloned()
            .collect()
        })
        .unwrap_or_default(),
    )
  }
}
