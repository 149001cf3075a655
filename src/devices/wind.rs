use crate::devices::types::{AssetContext, PowerModel};

/// Wind speed below which the rotor does not turn (m/s).
pub const CUT_IN_M_S: f64 = 3.0;
/// Wind speed at which output reaches the rated power (m/s).
pub const RATED_M_S: f64 = 12.0;
/// Wind speed above which the brake is applied (m/s).
pub const CUT_OUT_M_S: f64 = 25.0;

/// A wind turbine following a cubic power curve.
///
/// # Power Flow Convention (Feeder)
/// Returns **negative** values while generating.
#[derive(Debug, Clone)]
pub struct WindTurbine {
    /// Rated output in kW.
    pub max_kw: f64,
    /// Output multiplier.
    pub factor: f64,
    wind_speed_m_s: f64,
}

impl WindTurbine {
    pub fn new(max_kw: f64, factor: f64) -> Self {
        Self {
            max_kw: max_kw.abs(),
            factor: factor.max(0.0),
            wind_speed_m_s: 0.0,
        }
    }

    /// Generation magnitude in kW at `wind_m_s`.
    pub fn generation_kw(&self, wind_m_s: f64) -> f64 {
        let fraction = if !(CUT_IN_M_S..=CUT_OUT_M_S).contains(&wind_m_s) {
            0.0
        } else if wind_m_s >= RATED_M_S {
            1.0
        } else {
            (wind_m_s.powi(3) - CUT_IN_M_S.powi(3)) / (RATED_M_S.powi(3) - CUT_IN_M_S.powi(3))
        };
        self.max_kw * fraction * self.factor
    }
}

impl PowerModel for WindTurbine {
    fn power_kw(&mut self, context: &AssetContext<'_>) -> f64 {
        self.wind_speed_m_s = context.weather.map_or(0.0, |w| w.wind_speed_m_s);
        -self.generation_kw(self.wind_speed_m_s)
    }

    fn device_type(&self) -> &'static str {
        "windturbine"
    }

    fn max_power_kw(&self) -> f64 {
        self.max_kw
    }

    fn status(&self) -> &'static str {
        if self.wind_speed_m_s > CUT_OUT_M_S {
            "handbrake"
        } else if self.wind_speed_m_s < CUT_IN_M_S {
            "idle"
        } else {
            "generating"
        }
    }

    fn needs_weather(&self) -> bool {
        true
    }
}
