use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::backoff::BackoffPolicy;
use crate::error::BuildError;
use crate::job::JobKind;

/// Hard ceiling on the number of rows any single scan may return.
pub const MAX_SCAN_LIMIT: usize = 50;

/// Longest duration the queue accepts for any setting (100 years).
const MAX_SETTING: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Tunables for an [`AnalysisQueue`](crate::AnalysisQueue).
///
/// The defaults are the production values; tests typically shrink them via
/// [`QueueBuilder`](crate::queue::QueueBuilder).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueConfig {
  /// Debounce window for every kind except embedding generation.
  pub debounce: Duration,
  pub embedding_debounce: Duration,
  /// Exclusive lease granted by a claim. Also the implicit execution timeout.
  pub lease_duration: Duration,
  /// Claim ceiling. A job that reaches it without succeeding becomes `Failed`.
  pub max_attempts: u32,
  /// Rows per scan for `list_due`, `reclaim_stale` and `cleanup` (at most [`MAX_SCAN_LIMIT`]).
  pub scan_limit: usize,
  /// How long terminal jobs are kept before `cleanup` deletes them.
  pub retention: Duration,
  pub backoff: BackoffPolicy,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      debounce: Duration::from_millis(3_000),
      embedding_debounce: Duration::from_millis(15_000),
      lease_duration: Duration::from_secs(5 * 60),
      max_attempts: 5,
      scan_limit: MAX_SCAN_LIMIT,
      retention: Duration::from_secs(14 * 24 * 60 * 60),
      backoff: BackoffPolicy::default(),
    }
  }
}

impl QueueConfig {
  /// Default debounce for `kind`.
  pub fn debounce_for(&self, kind: JobKind) -> Duration {
    if kind.is_embedding() {
      self.embedding_debounce
    } else {
      self.debounce
    }
  }

  pub fn validate(&self) -> Result<(), BuildError> {
    if self.max_attempts == 0 {
      return Err(BuildError::InvalidConfig(
        "max_attempts must be at least 1".to_string(),
      ));
    }
    if self.lease_duration.is_zero() {
      return Err(BuildError::ZeroInterval("lease_duration"));
    }
    if self.scan_limit == 0 {
      return Err(BuildError::InvalidConfig(
        "scan_limit must be at least 1".to_string(),
      ));
    }
    for (name, value) in [
      ("debounce", self.debounce),
      ("embedding_debounce", self.embedding_debounce),
      ("lease_duration", self.lease_duration),
      ("retention", self.retention),
      ("backoff.cap", self.backoff.cap),
    ] {
      if value > MAX_SETTING {
        return Err(BuildError::InvalidConfig(format!(
          "{name} of {value:?} is out of range"
        )));
      }
    }
    self.backoff.validate()
  }

  pub(crate) fn effective_scan_limit(&self, requested: usize) -> usize {
    requested.min(self.scan_limit).min(MAX_SCAN_LIMIT)
  }
}

/// Converts a validated std duration to chrono. Values past chrono's range
/// saturate at [`MAX_SETTING`], which validation already forbids exceeding.
pub(crate) fn to_chrono(duration: Duration) -> ChronoDuration {
  ChronoDuration::from_std(duration.min(MAX_SETTING)).unwrap_or_else(|_| ChronoDuration::days(36_500))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_production_values() {
    let config = QueueConfig::default();
    assert_eq!(config.debounce_for(JobKind::ClarityCheck), Duration::from_secs(3));
    assert_eq!(
      config.debounce_for(JobKind::EmbeddingGeneration),
      Duration::from_secs(15)
    );
    assert_eq!(config.max_attempts, 5);
    assert_eq!(config.scan_limit, 50);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn validation_rejects_degenerate_settings() {
    let zero_attempts = QueueConfig {
      max_attempts: 0,
      ..QueueConfig::default()
    };
    assert!(zero_attempts.validate().is_err());

    let zero_lease = QueueConfig {
      lease_duration: Duration::ZERO,
      ..QueueConfig::default()
    };
    assert_eq!(
      zero_lease.validate(),
      Err(BuildError::ZeroInterval("lease_duration"))
    );

    let huge_retention = QueueConfig {
      retention: Duration::MAX,
      ..QueueConfig::default()
    };
    assert!(huge_retention.validate().is_err());
  }

  #[test]
  fn scan_limit_is_capped() {
    let config = QueueConfig {
      scan_limit: 10,
      ..QueueConfig::default()
    };
    assert_eq!(config.effective_scan_limit(500), 10);
    assert_eq!(config.effective_scan_limit(3), 3);
    assert_eq!(QueueConfig::default().effective_scan_limit(500), MAX_SCAN_LIMIT);
  }
}
