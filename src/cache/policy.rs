//! Cache Eviction Policies
//!
//! Hysteresis thresholds shared by the memory and disk caches. Eviction runs
//! only when a hard limit is crossed and then continues down to a lower
//! watermark, so a cache sitting near its limit does not evict on every insert.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A fraction applied to a limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub numerator: u64,
    pub denominator: u64,
}

impl Watermark {
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// `limit * numerator / denominator`, rounded down
    pub fn scale(&self, limit: u64) -> u64 {
        if self.denominator == 0 {
            return limit;
        }
        let scaled = limit as u128 * self.numerator as u128 / self.denominator as u128;
        scaled.min(u64::MAX as u128) as u64
    }

    /// `limit * numerator / denominator`, rounded up
    pub fn scale_ceil(&self, limit: u64) -> u64 {
        if self.denominator == 0 {
            return limit;
        }
        let scaled = (limit as u128 * self.numerator as u128).div_ceil(self.denominator as u128);
        scaled.min(u64::MAX as u128) as u64
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.denominator == 0 {
            return Err(Error::Config(format!("{} has a zero denominator", name)));
        }
        if self.numerator > self.denominator {
            return Err(Error::Config(format!(
                "{} must not exceed 1 ({}/{})",
                name, self.numerator, self.denominator
            )));
        }
        Ok(())
    }
}

/// Eviction hysteresis configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisPolicy {
    /// Disk eviction continues until bytes and count are at or below this
    /// fraction of their limits (rounded up)
    pub disk_low_watermark: Watermark,
    /// Strong memory tier trims to this fraction of capacity after an
    /// over-capacity insert
    pub memory_low_watermark: Watermark,
    /// Fraction of the current strong-tier size kept by a background trim
    pub background_trim: Watermark,
    /// A background trim never goes below `capacity / min_trim_divisor`
    pub min_trim_divisor: u64,
}

impl Default for HysteresisPolicy {
    fn default() -> Self {
        Self {
            disk_low_watermark: Watermark::new(7, 8),
            memory_low_watermark: Watermark::new(9, 10),
            background_trim: Watermark::new(1, 2),
            min_trim_divisor: 64,
        }
    }
}

impl HysteresisPolicy {
    /// Reject thresholds that would make eviction a no-op or unbounded
    pub fn validate(&self) -> Result<()> {
        self.disk_low_watermark.validate("disk_low_watermark")?;
        self.memory_low_watermark.validate("memory_low_watermark")?;
        self.background_trim.validate("background_trim")?;
        if self.min_trim_divisor == 0 {
            return Err(Error::Config("min_trim_divisor must be positive".into()));
        }
        Ok(())
    }

    /// Floor for background trims of a tier with the given capacity
    pub fn min_trim_size(&self, capacity: u64) -> u64 {
        capacity / self.min_trim_divisor.max(1)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = HysteresisPolicy::default();
        assert_eq!(policy.disk_low_watermark.scale(800), 700);
        assert_eq!(policy.memory_low_watermark.scale(1000), 900);
        assert_eq!(policy.min_trim_size(6400), 100);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_scale_rounding() {
        let wm = Watermark::new(7, 8);
        assert_eq!(wm.scale(2), 1);
        assert_eq!(wm.scale_ceil(2), 2);
        assert_eq!(wm.scale_ceil(8), 7);
        assert_eq!(wm.scale_ceil(0), 0);
    }

    #[test]
    fn test_scale_does_not_overflow() {
        let wm = Watermark::new(9, 10);
        assert_eq!(wm.scale(u64::MAX), (u64::MAX as u128 * 9 / 10) as u64);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let mut policy = HysteresisPolicy::default();
        policy.disk_low_watermark = Watermark::new(9, 8);
        assert!(policy.validate().is_err());

        let mut policy = HysteresisPolicy::default();
        policy.memory_low_watermark = Watermark::new(1, 0);
        assert!(policy.validate().is_err());

        let mut policy = HysteresisPolicy::default();
        policy.min_trim_divisor = 0;
        assert!(policy.validate().is_err());
    }
}
