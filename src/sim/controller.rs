use tracing::debug;

/// Sign of a congestion sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Balance {
    /// Net consumption: loads must come down by this many kW.
    Overconsumption(f64),
    /// Net generation: loads may go up by this many kW.
    Oversupply(f64),
    Balanced,
}

impl Balance {
    pub fn from_congestion(congestion_kw: f64) -> Self {
        if congestion_kw > 0.0 {
            Balance::Overconsumption(congestion_kw)
        } else if congestion_kw < 0.0 {
            Balance::Oversupply(-congestion_kw)
        } else {
            Balance::Balanced
        }
    }
}

/// A controllable load as seen by a fleet coordinator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllableLoad {
    pub current_kw: f64,
    pub max_kw: f64,
    pub is_active: bool,
}

/// Proportional congestion controller.
///
/// Turns a congestion sample into new setpoints, either for a whole fleet
/// of loads or for a single leaf correcting itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProportionalController {
    /// Scales the correction (1.0 corrects the full congestion).
    pub factor: f64,
}

impl Default for ProportionalController {
    fn default() -> Self {
        Self { factor: 1.0 }
    }
}

impl ProportionalController {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }

    /// Reduces every load in proportion to its share of total demand.
    ///
    /// `Δi = di * (c * factor / D)` with `D = Σ di`; new value
    /// `max(0, di - Δi)`. Returns the loads unchanged when `D` is zero or
    /// `congestion_kw` is not positive.
    pub fn distribute_power_reduction(&self, loads_kw: &[f64], congestion_kw: f64) -> Vec<f64> {
        let total: f64 = loads_kw.iter().sum();
        if total <= 0.0 || congestion_kw <= 0.0 {
            return loads_kw.to_vec();
        }
        let share = congestion_kw * self.factor / total;
        loads_kw
            .iter()
            .map(|&d| (d - d * share).max(0.0))
            .collect()
    }

    /// Spreads a surplus equally over the active loads.
    ///
    /// Each active load gets `|c| * factor / N` more, clamped to its maximum.
    /// Inactive loads are untouched. Returns the current values unchanged
    /// when no load is active.
    pub fn distribute_power_increase(&self, loads: &[ControllableLoad], congestion_kw: f64) -> Vec<f64> {
        let active = loads.iter().filter(|l| l.is_active).count();
        if active == 0 {
            return loads.iter().map(|l| l.current_kw).collect();
        }
        let delta = congestion_kw.abs() * self.factor / active as f64;
        loads
            .iter()
            .map(|l| {
                if l.is_active {
                    (l.current_kw + delta).min(l.max_kw)
                } else {
                    l.current_kw
                }
            })
            .collect()
    }

    /// Computes new setpoints for a fleet from one congestion sample.
    pub fn correct_fleet(&self, loads: &[ControllableLoad], congestion_kw: f64) -> Vec<f64> {
        match Balance::from_congestion(congestion_kw) {
            Balance::Overconsumption(c) => {
                let current: Vec<f64> = loads.iter().map(|l| l.current_kw).collect();
                self.distribute_power_reduction(&current, c)
            }
            Balance::Oversupply(c) => self.distribute_power_increase(loads, c),
            Balance::Balanced => {
                debug!("balanced");
                loads.iter().map(|l| l.current_kw).collect()
            }
        }
    }

    /// Corrects a single leaf's setpoint without an intermediary.
    ///
    /// Overconsumption gives `max(0, s - c * factor)`, oversupply gives
    /// `min(max, s + |c| * factor)`.
    pub fn adjust_setpoint(&self, setpoint_kw: f64, max_kw: f64, congestion_kw: f64) -> f64 {
        match Balance::from_congestion(congestion_kw) {
            Balance::Overconsumption(c) => (setpoint_kw - c * self.factor).max(0.0),
            Balance::Oversupply(c) => (setpoint_kw + c * self.factor).min(max_kw),
            Balance::Balanced => {
                debug!(setpoint_kw, "balanced");
                setpoint_kw
            }
        }
    }
}
