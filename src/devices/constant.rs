use crate::devices::types::{AssetContext, PowerModel};

/// A load (or generator, when negative) with a fixed power draw.
#[derive(Debug, Clone)]
pub struct ConstantLoad {
    /// Power in kW; negative values generate.
    pub kw: f64,
}

impl ConstantLoad {
    pub fn new(kw: f64) -> Self {
        Self { kw }
    }
}

impl PowerModel for ConstantLoad {
    fn power_kw(&mut self, _context: &AssetContext<'_>) -> f64 {
        self.kw
    }

    fn device_type(&self) -> &'static str {
        "constant"
    }

    fn max_power_kw(&self) -> f64 {
        self.kw.abs()
    }

    fn status(&self) -> &'static str {
        if self.kw < 0.0 { "generating" } else { "consuming" }
    }
}
