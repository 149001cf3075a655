use crate::devices::types::{AssetContext, PowerModel};

/// Irradiance at standard test conditions (W/m²).
const REFERENCE_IRRADIANCE: f64 = 1000.0;
/// Cell temperature at standard test conditions (°C).
const NOMINAL_TEMPERATURE: f64 = 25.0;
/// Relative power change per °C of cell temperature.
const TEMPERATURE_COEFFICIENT: f64 = -0.0036;

/// A solar PV panel driven by weather broadcasts.
///
/// Output scales linearly with irradiance up to the reference irradiance
/// and is derated by the cell temperature (Sandia model with wind cooling).
///
/// # Power Flow Convention (Feeder)
/// Returns **negative** values while generating.
#[derive(Debug, Clone)]
pub struct SolarPanel {
    /// Peak output in kW at standard test conditions.
    pub max_kw: f64,
    /// Output multiplier.
    pub factor: f64,
    last_kw: f64,
}

impl SolarPanel {
    /// Creates a new panel.
    ///
    /// # Arguments
    ///
    /// * `max_kw` - Peak output (negative values are treated as magnitude)
    /// * `factor` - Output multiplier (e.g. 0.5 for half of the array)
    pub fn new(max_kw: f64, factor: f64) -> Self {
        Self {
            max_kw: max_kw.abs(),
            factor: factor.max(0.0),
            last_kw: 0.0,
        }
    }

    /// Estimates cell temperature from ambient temperature, irradiance and
    /// wind speed.
    pub fn cell_temperature(ambient_c: f64, irradiance_w_m2: f64, wind_m_s: f64) -> f64 {
        let (a, b, delta_t) = (-3.47, -0.0594, 3.0);
        let module = ambient_c + irradiance_w_m2 * (a + b * wind_m_s).exp();
        module + irradiance_w_m2 / REFERENCE_IRRADIANCE * delta_t
    }

    /// Generation magnitude in kW for the given conditions.
    pub fn generation_kw(&self, irradiance_w_m2: f64, cell_temp_c: f64) -> f64 {
        let scaling = (irradiance_w_m2 / REFERENCE_IRRADIANCE).clamp(0.0, 1.0);
        let efficiency = (1.0 + TEMPERATURE_COEFFICIENT * (cell_temp_c - NOMINAL_TEMPERATURE)).max(0.0);
        self.max_kw * scaling * efficiency * self.factor
    }
}

impl PowerModel for SolarPanel {
    /// Returns 0.0 until the first weather sample arrives.
    fn power_kw(&mut self, context: &AssetContext<'_>) -> f64 {
        let Some(weather) = context.weather else {
            self.last_kw = 0.0;
            return 0.0;
        };
        let cell = Self::cell_temperature(
            weather.ambient_temp_c,
            weather.irradiance_w_m2,
            weather.wind_speed_m_s,
        );
        self.last_kw = -self.generation_kw(weather.irradiance_w_m2, cell);
        self.last_kw
    }

    fn device_type(&self) -> &'static str {
        "solarpanel"
    }

    fn max_power_kw(&self) -> f64 {
        self.max_kw
    }

    fn status(&self) -> &'static str {
        if self.last_kw < 0.0 { "generating" } else { "off" }
    }

    fn needs_weather(&self) -> bool {
        true
    }
}
