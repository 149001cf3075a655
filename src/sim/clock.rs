use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

use crate::error::{GridError, Result};

/// A rate-scalable virtual clock.
///
/// Simulated time is derived from two anchors and a rate:
///
/// `sim = sim_anchor + rate * (real_now - real_anchor)`
///
/// A rate of `0.0` freezes simulated time at `sim_anchor`. Changing the
/// rate first moves both anchors to "now" (using the old rate), so derived
/// time never jumps.
///
/// # Examples
///
/// ```
/// use chrono::{TimeDelta, TimeZone, Utc};
/// use vpp_agents::sim::clock::VirtualClock;
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let real = Utc.with_ymd_and_hms(2030, 5, 5, 12, 0, 0).unwrap();
/// let clock = VirtualClock::new(start, 60.0, real).unwrap();
///
/// let later = clock.sim_time_at(real + TimeDelta::seconds(1));
/// assert_eq!(later, start + TimeDelta::minutes(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualClock {
    /// Real timestamp of the last re-anchoring
    real_anchor: DateTime<Utc>,
    /// Simulated timestamp at `real_anchor`
    sim_anchor: DateTime<Utc>,
    /// Simulated seconds per real second
    rate: f64,
}

impl VirtualClock {
    /// Creates a clock reading `sim_start` at `real_now`.
    ///
    /// # Errors
    ///
    /// Returns `GridError::NegativeRate` if `rate` is negative or not finite.
    pub fn new(sim_start: DateTime<Utc>, rate: f64, real_now: DateTime<Utc>) -> Result<Self> {
        check_rate(rate)?;
        Ok(Self {
            real_anchor: real_now,
            sim_anchor: sim_start,
            rate,
        })
    }

    /// Creates a frozen clock reading `sim_start`.
    pub fn paused(sim_start: DateTime<Utc>) -> Self {
        Self {
            real_anchor: Utc::now(),
            sim_anchor: sim_start,
            rate: 0.0,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn real_anchor(&self) -> DateTime<Utc> {
        self.real_anchor
    }

    pub fn sim_anchor(&self) -> DateTime<Utc> {
        self.sim_anchor
    }

    pub fn is_paused(&self) -> bool {
        self.rate == 0.0
    }

    /// Returns the simulated time corresponding to `real_now`.
    ///
    /// Real timestamps before the anchor read as the anchor itself, so
    /// derived time never runs backwards.
    pub fn sim_time_at(&self, real_now: DateTime<Utc>) -> DateTime<Utc> {
        if self.rate == 0.0 || real_now <= self.real_anchor {
            return self.sim_anchor;
        }
        let elapsed_us = (real_now - self.real_anchor)
            .num_microseconds()
            .unwrap_or(i64::MAX) as f64;
        let scaled_us = (elapsed_us * self.rate).min(i64::MAX as f64) as i64;
        self.sim_anchor
            .checked_add_signed(TimeDelta::microseconds(scaled_us))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Returns the simulated time now.
    pub fn sim_now(&self) -> DateTime<Utc> {
        self.sim_time_at(Utc::now())
    }

    /// Changes the rate at `real_now`, keeping derived time continuous.
    ///
    /// # Errors
    ///
    /// Returns `GridError::NegativeRate` if `new_rate` is negative or not
    /// finite; the clock is left unchanged.
    ///
    /// # Returns
    ///
    /// The previous rate.
    pub fn set_rate_at(&mut self, new_rate: f64, real_now: DateTime<Utc>) -> Result<f64> {
        check_rate(new_rate)?;
        self.sim_anchor = self.sim_time_at(real_now);
        self.real_anchor = real_now.max(self.real_anchor);
        let old = self.rate;
        self.rate = new_rate;
        Ok(old)
    }

    /// Changes the rate now. See [`VirtualClock::set_rate_at`].
    ///
    /// # Errors
    ///
    /// Returns `GridError::NegativeRate` for an invalid rate.
    pub fn set_rate(&mut self, new_rate: f64) -> Result<f64> {
        self.set_rate_at(new_rate, Utc::now())
    }

    /// Replaces both anchors and the rate, as received from the clock
    /// authority.
    ///
    /// # Errors
    ///
    /// Returns `GridError::NegativeRate` for an invalid rate.
    pub fn reanchor(&mut self, real_anchor: DateTime<Utc>, sim_anchor: DateTime<Utc>, rate: f64) -> Result<()> {
        check_rate(rate)?;
        self.real_anchor = real_anchor;
        self.sim_anchor = sim_anchor;
        self.rate = rate;
        Ok(())
    }
}

fn check_rate(rate: f64) -> Result<()> {
    if rate.is_finite() && rate >= 0.0 {
        Ok(())
    } else {
        Err(GridError::NegativeRate(rate))
    }
}

/// Rescales a real-time period when the clock rate changes.
///
/// `period' = period * r_old / r_new`. Pausing (`r_new == 0`) stores the
/// absolute simulated period `period * r_old`; resuming from a pause
/// (`r_old == 0`) turns that back into `period / r_new`. When both rates are
/// zero the period is returned unchanged.
pub fn rescale_period(period: Duration, r_old: f64, r_new: f64) -> Duration {
    let secs = period.as_secs_f64();
    let scaled = match (r_old == 0.0, r_new == 0.0) {
        (true, true) => return period,
        (false, true) => secs * r_old,
        (true, false) => secs / r_new,
        (false, false) => secs * r_old / r_new,
    };
    Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX)
}

/// Periodic work scheduled in real time on behalf of a rate-aware agent.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicTask {
    name: &'static str,
    period: Duration,
    last_run: Option<Instant>,
}

impl PeriodicTask {
    /// Creates a task that is due immediately.
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self {
            name,
            period,
            last_run: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns the instant the task is next due, or `None` if it never ran
    /// or the due instant is out of range.
    pub fn next_due(&self) -> Option<Instant> {
        self.last_run.and_then(|t| t.checked_add(self.period))
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.last_run
            .is_none_or(|t| now.saturating_duration_since(t) >= self.period)
    }

    pub fn mark_run(&mut self, now: Instant) {
        self.last_run = Some(now);
    }

    /// Applies [`rescale_period`] for a rate change `r_old -> r_new`.
    pub fn rescale(&mut self, r_old: f64, r_new: f64) {
        self.period = rescale_period(self.period, r_old, r_new);
    }
}
