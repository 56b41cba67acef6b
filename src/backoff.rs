use std::time::Duration;

use rand::Rng;

use crate::error::BuildError;

const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Capped exponential backoff with uniform jitter.
///
/// `delay(n) = min(base * 2^(n-1), cap) * U[1 - jitter, 1 + jitter]`, clamped to `cap`.
/// `n` is the job's attempt count at the time of the failure; `0` is treated as `1`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BackoffPolicy {
  pub base: Duration,
  pub cap: Duration,
  /// Relative jitter half-width, in `[0, 1)`.
  pub jitter: f64,
}

impl Default for BackoffPolicy {
  fn default() -> Self {
    Self {
      base: Duration::from_secs(30),
      cap: Duration::from_secs(15 * 60),
      jitter: 0.2,
    }
  }
}

impl BackoffPolicy {
  /// The un-jittered delay. Non-decreasing in `attempts` and never above `cap`.
  pub fn base_delay(&self, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);
    self
      .base
      .checked_mul(factor)
      .unwrap_or(self.cap)
      .min(self.cap)
  }

  /// Jittered delay drawn from `rng`.
  pub fn delay_with<R: Rng + ?Sized>(&self, attempts: u32, rng: &mut R) -> Duration {
    let base = self.base_delay(attempts);
    if base.is_zero() || self.jitter <= 0.0 {
      return base;
    }
    let factor = rng.gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
    Duration::try_from_secs_f64(base.as_secs_f64() * factor)
      .unwrap_or(base)
      .min(self.cap)
  }

  /// Jittered delay using the thread-local RNG.
  pub fn delay(&self, attempts: u32) -> Duration {
    self.delay_with(attempts, &mut rand::thread_rng())
  }

  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if !(0.0..1.0).contains(&self.jitter) {
      return Err(BuildError::InvalidConfig(format!(
        "backoff jitter must be in [0, 1), got {}",
        self.jitter
      )));
    }
    if self.cap < self.base {
      return Err(BuildError::InvalidConfig(format!(
        "backoff cap {:?} is below backoff base {:?}",
        self.cap, self.base
      )));
    }
    Ok(())
  }
}
