use chrono::Timelike;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::devices::types::{AssetContext, PowerModel};

/// Start hours most drivers plug in at.
const COMMON_START_HOURS: [u32; 6] = [7, 8, 9, 17, 18, 19];
/// Typical session lengths in hours.
const COMMON_DURATIONS: [u32; 3] = [6, 7, 8];

/// An EV charging station with one daily charging window.
///
/// The window is sampled once from a seeded RNG: 70 % of stations start at
/// a commuter hour, 80 % charge for 6-8 hours. Windows may wrap past
/// midnight.
///
/// A *smart* station is controllable: it charges at its setpoint instead of
/// its maximum and accepts new setpoints from a coordinator or its own
/// congestion correction.
///
/// # Power Flow Convention (Feeder)
/// Returns **positive** values (consumption / load on feeder).
#[derive(Debug, Clone)]
pub struct ChargingStation {
    /// Maximum charging power in kW.
    pub max_kw: f64,
    /// Output multiplier.
    pub factor: f64,
    /// Whether the station accepts setpoints.
    pub smart: bool,
    start_hour: u32,
    stop_hour: u32,
    setpoint_kw: f64,
    charging: bool,
}

impl ChargingStation {
    /// Creates a station with a window sampled from `seed`.
    pub fn new(max_kw: f64, factor: f64, smart: bool, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let start_hour = if rng.random::<f64>() < 0.7 {
            COMMON_START_HOURS[rng.random_range(0..COMMON_START_HOURS.len())]
        } else {
            rng.random_range(0..24)
        };
        let duration = if rng.random::<f64>() < 0.8 {
            COMMON_DURATIONS[rng.random_range(0..COMMON_DURATIONS.len())]
        } else {
            rng.random_range(1..24)
        };
        Self::with_window(max_kw, factor, smart, start_hour, (start_hour + duration) % 24)
    }

    /// Creates a station with an explicit `[start_hour, stop_hour)` window.
    pub fn with_window(max_kw: f64, factor: f64, smart: bool, start_hour: u32, stop_hour: u32) -> Self {
        let max_kw = max_kw.abs();
        Self {
            max_kw,
            factor: factor.max(0.0),
            smart,
            start_hour: start_hour % 24,
            stop_hour: stop_hour % 24,
            setpoint_kw: max_kw,
            charging: false,
        }
    }

    /// Returns the `(start, stop)` hours of the charging window.
    pub fn window(&self) -> (u32, u32) {
        (self.start_hour, self.stop_hour)
    }

    /// Whether `hour` falls inside the charging window.
    pub fn in_window(&self, hour: u32) -> bool {
        if self.start_hour <= self.stop_hour {
            (self.start_hour..self.stop_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour < self.stop_hour
        }
    }
}

impl PowerModel for ChargingStation {
    fn power_kw(&mut self, context: &AssetContext<'_>) -> f64 {
        self.charging = self.in_window(context.sim_time.hour());
        if !self.charging {
            return 0.0;
        }
        let base = if self.smart { self.setpoint_kw } else { self.max_kw };
        base * self.factor
    }

    fn device_type(&self) -> &'static str {
        "chargingstation"
    }

    fn max_power_kw(&self) -> f64 {
        self.max_kw
    }

    fn status(&self) -> &'static str {
        if self.charging { "charging" } else { "idle" }
    }

    fn is_controllable(&self) -> bool {
        self.smart
    }

    fn setpoint_kw(&self) -> Option<f64> {
        self.smart.then_some(self.setpoint_kw)
    }

    fn apply_setpoint(&mut self, setpoint_kw: f64) {
        if self.smart && setpoint_kw.is_finite() {
            self.setpoint_kw = setpoint_kw.clamp(0.0, self.max_kw);
        }
    }

    fn is_active(&self) -> bool {
        self.charging
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn at(hour: u32) -> AssetContext<'static> {
        AssetContext::new(Utc.with_ymd_and_hms(2024, 5, 1, hour, 15, 0).unwrap())
    }

    #[test]
    fn deterministic_for_same_seed() {
        let a = ChargingStation::new(11.0, 1.0, false, 42);
        let b = ChargingStation::new(11.0, 1.0, false, 42);
        assert_eq!(a.window(), b.window());
        assert!(a.window().0 < 24 && a.window().1 < 24);
    }

    #[test]
    fn window_wraps_past_midnight() {
        let cs = ChargingStation::with_window(11.0, 1.0, false, 22, 4);
        assert!(cs.in_window(23));
        assert!(cs.in_window(0));
        assert!(cs.in_window(3));
        assert!(!cs.in_window(4));
        assert!(!cs.in_window(12));
    }

    #[test]
    fn dumb_station_charges_at_max_inside_window() {
        let mut cs = ChargingStation::with_window(11.0, 1.0, false, 8, 16);
        assert_eq!(cs.power_kw(&at(9)), 11.0);
        assert_eq!(cs.status(), "charging");
        assert_eq!(cs.power_kw(&at(20)), 0.0);
        assert_eq!(cs.status(), "idle");
    }

    #[test]
    fn smart_station_follows_clamped_setpoint() {
        let mut cs = ChargingStation::with_window(11.0, 1.0, true, 8, 16);
        cs.apply_setpoint(4.0);
        assert_eq!(cs.power_kw(&at(9)), 4.0);

        cs.apply_setpoint(-3.0);
        assert_eq!(cs.setpoint_kw(), Some(0.0));
        cs.apply_setpoint(50.0);
        assert_eq!(cs.setpoint_kw(), Some(11.0));
    }

    #[test]
    fn dumb_station_ignores_setpoints() {
        let mut cs = ChargingStation::with_window(11.0, 1.0, false, 8, 16);
        cs.apply_setpoint(1.0);
        assert_eq!(cs.setpoint_kw(), None);
        assert_eq!(cs.power_kw(&at(9)), 11.0);
    }
}
