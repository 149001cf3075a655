use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::transport::Address;

/// Sums the last reported power of each child of a network node.
///
/// Net power convention:
/// - Positive values are net consumption (deficit at the root)
/// - Negative values are net generation (surplus at the root)
///
/// A child's entry is overwritten by each report and never removed.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    children: HashMap<Address, f64>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `child` with a value of 0 kW.
    ///
    /// Registering an existing child resets its value to 0.
    pub fn register_child(&mut self, child: Address) {
        self.children.insert(child, 0.0);
    }

    /// Records the latest report of `child`, creating the entry if needed.
    ///
    /// # Returns
    ///
    /// `true` if the net power changed.
    pub fn record_report(&mut self, child: Address, kw: f64) -> bool {
        let before = self.net_power_kw();
        self.children.insert(child, kw);
        self.net_power_kw() != before
    }

    /// Returns the sum of the children's last reports in kW.
    pub fn net_power_kw(&self) -> f64 {
        self.children.values().sum()
    }

    pub fn child_power_kw(&self, child: &Address) -> Option<f64> {
        self.children.get(child).copied()
    }

    /// Returns the child addresses, sorted for stable output.
    pub fn children(&self) -> Vec<Address> {
        let mut children: Vec<Address> = self.children.keys().cloned().collect();
        children.sort();
        children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// One congestion value observed by the root.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerSample {
    pub sim_time: DateTime<Utc>,
    pub net_power_kw: f64,
}

/// Aggregate statistics over the root's power samples.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PowerSummary {
    /// Number of samples.
    pub samples: usize,
    /// Mean net power (kW).
    pub avg_kw: f64,
    /// Highest net power, i.e. peak deficit (kW).
    pub max_kw: f64,
    /// Lowest net power, i.e. peak surplus (kW).
    pub min_kw: f64,
    /// Last observed net power (kW).
    pub last_kw: f64,
}

impl PowerSummary {
    /// Computes the summary from a sample log. An empty log yields zeros.
    pub fn from_samples(samples: &[PowerSample]) -> Self {
        let Some(last) = samples.last() else {
            return Self::default();
        };
        let n = samples.len() as f64;
        let mut sum = 0.0;
        let mut max = f64::NEG_INFINITY;
        let mut min = f64::INFINITY;
        for s in samples {
            sum += s.net_power_kw;
            max = max.max(s.net_power_kw);
            min = min.min(s.net_power_kw);
        }
        Self {
            samples: samples.len(),
            avg_kw: sum / n,
            max_kw: max,
            min_kw: min,
            last_kw: last.net_power_kw,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn sums_children_and_replaces_reports() {
        let mut agg = Aggregator::new();
        agg.record_report(addr("a@t"), 1.0);
        agg.record_report(addr("b@t"), 2.0);
        agg.record_report(addr("c@t"), 3.0);
        assert!((agg.net_power_kw() - 6.0).abs() < 1e-9);

        agg.record_report(addr("b@t"), -1.0);
        assert!((agg.net_power_kw() - 3.0).abs() < 1e-9);
        assert_eq!(agg.child_count(), 3);
    }

    #[test]
    fn register_child_resets_to_zero() {
        let mut agg = Aggregator::new();
        agg.record_report(addr("a@t"), 5.0);
        agg.register_child(addr("a@t"));
        assert_eq!(agg.child_power_kw(&addr("a@t")), Some(0.0));
        assert_eq!(agg.net_power_kw(), 0.0);
    }

    #[test]
    fn record_report_signals_change() {
        let mut agg = Aggregator::new();
        assert!(agg.record_report(addr("a@t"), 2.0));
        assert!(!agg.record_report(addr("a@t"), 2.0));
        assert!(!agg.record_report(addr("b@t"), 0.0));
    }

    #[test]
    fn summary_of_samples() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let samples: Vec<PowerSample> = [2.0, -4.0, 5.0]
            .iter()
            .map(|&kw| PowerSample { sim_time: t0, net_power_kw: kw })
            .collect();
        let summary = PowerSummary::from_samples(&samples);
        assert_eq!(summary.samples, 3);
        assert!((summary.avg_kw - 1.0).abs() < 1e-9);
        assert_eq!(summary.max_kw, 5.0);
        assert_eq!(summary.min_kw, -4.0);
        assert_eq!(summary.last_kw, 5.0);
    }

    #[test]
    fn summary_of_empty_log_is_zero() {
        assert_eq!(PowerSummary::from_samples(&[]), PowerSummary::default());
    }
}
