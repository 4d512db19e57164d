//! Alarm volume ramp.
//!
//! The level is a pure function of wall-clock time since `start`:
//!
//! ```text
//! level = min + (max - min) * clamp(elapsed / duration, 0, 1)
//! ```
//!
//! There are no internal timers; consumers poll `current_level(now)`. The
//! owner must call `stop()` on every exit path, otherwise the ramp keeps
//! reporting an escalating level after its alarm is gone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RampConfig {
    pub min: f64,
    pub max: f64,
    pub duration_ms: u64,
}

impl RampConfig {
    pub fn new(min: f64, max: f64, duration_ms: u64) -> Result<Self, ValidationError> {
        let cfg = Self {
            min,
            max,
            duration_ms,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Constant level, used when an alarm has ramping disabled.
    pub fn flat(level: f64) -> Self {
        Self {
            min: level,
            max: level,
            duration_ms: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(self.min) || !in_range(self.max) || self.min > self.max {
            return Err(ValidationError::InvalidRamp {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// A running ramp. Never persisted: after a restart it starts over at `min`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RampState {
    pub started_at: DateTime<Utc>,
    pub config: RampConfig,
}

impl RampState {
    pub fn level_at(&self, now: DateTime<Utc>) -> f64 {
        let RampConfig {
            min,
            max,
            duration_ms,
        } = self.config;
        if duration_ms == 0 {
            return max;
        }
        let elapsed_ms = (now - self.started_at).num_milliseconds().max(0) as f64;
        let fraction = (elapsed_ms / duration_ms as f64).clamp(0.0, 1.0);
        if fraction >= 1.0 {
            return max;
        }
        (min + (max - min) * fraction).clamp(min, max)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RampController {
    state: Option<RampState>,
    /// Level reported once stopped.
    floor: f64,
}

impl RampController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the ramp at `now`.
    pub fn start(&mut self, config: RampConfig, now: DateTime<Utc>) -> Result<(), ValidationError> {
        config.validate()?;
        self.floor = config.min;
        self.state = Some(RampState {
            started_at: now,
            config,
        });
        Ok(())
    }

    /// Current intensity in `[min, max]`; `min` once stopped.
    pub fn current_level(&self, now: DateTime<Utc>) -> f64 {
        self.state
            .map(|s| s.level_at(now))
            .unwrap_or(self.floor)
    }

    /// Idempotent. Returns the level the ramp had reached, if it was running.
    pub fn stop_at(&mut self, now: DateTime<Utc>) -> Option<f64> {
        self.state.take().map(|s| s.level_at(now))
    }

    pub fn stop(&mut self) {
        self.state = None;
    }

    pub fn is_running(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&RampState> {
        self.state.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 3, 7, 0, 0).unwrap()
    }

    #[test]
    fn endpoints_are_min_and_max() {
        let mut ramp = RampController::new();
        ramp.start(RampConfig::new(0.2, 1.0, 60_000).unwrap(), t0())
            .unwrap();
        assert_eq!(ramp.current_level(t0()), 0.2);
        assert_eq!(ramp.current_level(t0() + Duration::seconds(60)), 1.0);
        assert_eq!(ramp.current_level(t0() + Duration::hours(3)), 1.0);
        let mid = ramp.current_level(t0() + Duration::seconds(30));
        assert!((mid - 0.6).abs() < 1e-9);
    }

    #[test]
    fn clock_before_start_clamps_to_min() {
        let mut ramp = RampController::new();
        ramp.start(RampConfig::new(0.1, 0.9, 1_000).unwrap(), t0())
            .unwrap();
        assert_eq!(ramp.current_level(t0() - Duration::seconds(5)), 0.1);
    }

    #[test]
    fn zero_duration_is_immediately_max() {
        let mut ramp = RampController::new();
        ramp.start(RampConfig::new(0.3, 0.8, 0).unwrap(), t0())
            .unwrap();
        assert_eq!(ramp.current_level(t0()), 0.8);
    }

    #[test]
    fn stop_is_idempotent_and_reports_min() {
        let mut ramp = RampController::new();
        ramp.start(RampConfig::new(0.2, 1.0, 10_000).unwrap(), t0())
            .unwrap();
        let reached = ramp.stop_at(t0() + Duration::seconds(5)).unwrap();
        assert!((reached - 0.6).abs() < 1e-9);
        assert!(ramp.stop_at(t0()).is_none());
        ramp.stop();
        assert!(!ramp.is_running());
        assert_eq!(ramp.current_level(t0() + Duration::hours(1)), 0.2);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        assert!(RampConfig::new(0.9, 0.1, 1_000).is_err());
        assert!(RampConfig::new(-0.1, 0.5, 1_000).is_err());
        assert!(RampConfig::new(0.0, 1.5, 1_000).is_err());
        let mut ramp = RampController::new();
        let bad = RampConfig {
            min: 0.8,
            max: 0.2,
            duration_ms: 1,
        };
        assert!(ramp.start(bad, t0()).is_err());
        assert!(!ramp.is_running());
    }

    proptest! {
        #[test]
        fn level_is_monotonic_and_bounded(
            min in 0.0f64..=1.0,
            span in 0.0f64..=1.0,
            duration_ms in 1u64..600_000,
            a in 0i64..700_000,
            b in 0i64..700_000,
        ) {
            let max = (min + span).min(1.0);
            let state = RampState { started_at: t0(), config: RampConfig::new(min, max, duration_ms).unwrap() };
            let (early, late) = if a <= b { (a, b) } else { (b, a) };
            let l1 = state.level_at(t0() + Duration::milliseconds(early));
            let l2 = state.level_at(t0() + Duration::milliseconds(late));
            prop_assert!(l1 <= l2);
            prop_assert!(l1 >= min && l2 <= max);
            prop_assert_eq!(state.level_at(t0()), min);
            prop_assert_eq!(state.level_at(t0() + Duration::milliseconds(duration_ms as i64)), max);
        }
    }
}
