//! # Change-detection adapters
//!
//! Every local algorithm implements [`ChangeDetector`]: it receives one point's series and
//! returns a partial record ([`Fields`]) with its own columns. The cell task joins the
//! partial records on `point_id`.
//!
//! ## Series scope
//!
//! | detector                       | scope        | column prefix |
//! |--------------------------------|--------------|---------------|
//! | [`bfast::BfastMonitor`]        | `Full`       | `bfast_`      |
//! | [`cusum::Cusum`]               | `Monitoring` | `cusum_`      |
//! | [`timescan::Timescan`]         | `Monitoring` | `ts_`         |
//! | [`bs_slope::BootstrapSlope`]   | `Full`       | `bs_slope_`   |
//!
//! `Full` detectors see the whole processed series (they need a historical baseline);
//! `Monitoring` detectors only see the observations after `start_monitor`.
//!
//! Detectors never fail on short series: the columns are emitted as `Null`.
//! Bootstrap procedures draw from [`point_rng`], seeded from the run seed and the
//! `point_id`, so a point's result does not depend on which worker processed it.
//!
//! The LandTrendr adapter ([`landtrendr`]) is not a `ChangeDetector`: it calls the remote
//! segmentation primitive and is therefore asynchronous.
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::RunConfig;
use crate::constants::PointId;
use crate::results::record::{FieldValue, Fields};
use crate::timeseries::{MonitoringSubset, TimeSeries};

pub mod bfast;
pub mod bs_slope;
pub mod cusum;
pub mod landtrendr;
pub mod timescan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesScope {
    Full,
    Monitoring,
}

pub trait ChangeDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn scope(&self) -> SeriesScope;

    /// Columns produced by this detector, in output order.
    fn columns(&self) -> &'static [&'static str];

    fn detect(&self, point_id: PointId, series: &TimeSeries) -> Fields;

    /// All columns set to `Null`.
    fn null_fields(&self) -> Fields {
        self.columns()
            .iter()
            .map(|c| (c.to_string(), FieldValue::Null))
            .collect()
    }
}

/// Enabled local detectors, in a fixed order.
pub fn detectors_for(config: &RunConfig) -> Vec<Box<dyn ChangeDetector>> {
    let mut detectors: Vec<Box<dyn ChangeDetector>> = Vec::new();
    if config.bfast_params.run {
        detectors.push(Box::new(bfast::BfastMonitor::new(
            &config.bfast_params,
            config.ts_params.start_monitor,
        )));
    }
    if config.cusum_params.run {
        detectors.push(Box::new(cusum::Cusum::new(
            config.cusum_params.nr_of_bootstraps,
            config.seed,
        )));
    }
    if config.ts_metrics_params.run {
        detectors.push(Box::new(timescan::Timescan));
    }
    if config.bs_slope_params.run {
        detectors.push(Box::new(bs_slope::BootstrapSlope::new(
            config.bs_slope_params.nr_of_bootstraps,
            config.seed,
        )));
    }
    detectors
}

/// Run every detector on the series matching its scope and merge the columns.
pub fn run_detectors(
    detectors: &[Box<dyn ChangeDetector>],
    point_id: PointId,
    full: &TimeSeries,
    monitoring: &MonitoringSubset,
) -> Fields {
    let mut fields = Fields::new();
    for detector in detectors {
        let series = match detector.scope() {
            SeriesScope::Full => full,
            SeriesScope::Monitoring => &monitoring.series,
        };
        fields.extend(detector.detect(point_id, series));
    }
    fields
}

/// Deterministic generator for the bootstrap draws of one point.
pub fn point_rng(seed: u64, point_id: PointId) -> StdRng {
    StdRng::seed_from_u64(seed ^ point_id.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub(crate) fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

pub(crate) fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Least-squares slope of `y` on `x`; `None` when `x` has no spread.
pub(crate) fn ols_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    let mx = mean(x)?;
    let my = mean(y)?;
    let sxx: f64 = x.iter().map(|xi| (xi - mx).powi(2)).sum();
    if sxx <= f64::EPSILON {
        return None;
    }
    let sxy: f64 = x.iter().zip(y).map(|(xi, yi)| (xi - mx) * (yi - my)).sum();
    Some(sxy / sxx)
}
