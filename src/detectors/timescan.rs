//! Summary statistics of the monitoring period.
use crate::constants::PointId;
use crate::detectors::{mean, median, std_dev, ChangeDetector, SeriesScope};
use crate::results::record::{FieldValue, Fields};
use crate::timeseries::TimeSeries;

const COLUMNS: [&str; 5] = ["ts_mean", "ts_sd", "ts_min", "ts_max", "ts_median"];

#[derive(Debug, Clone, Copy, Default)]
pub struct Timescan;

impl ChangeDetector for Timescan {
    fn name(&self) -> &'static str {
        "ts_metrics"
    }

    fn scope(&self) -> SeriesScope {
        SeriesScope::Monitoring
    }

    fn columns(&self) -> &'static [&'static str] {
        &COLUMNS
    }

    fn detect(&self, _point_id: PointId, series: &TimeSeries) -> Fields {
        let v = series.values();
        let min = v.iter().copied().reduce(f64::min);
        let max = v.iter().copied().reduce(f64::max);
        [
            mean(v),
            std_dev(v),
            min,
            max,
            median(v),
        ]
        .into_iter()
        .zip(COLUMNS)
        .map(|(value, col)| (col.to_string(), FieldValue::optional_number(value)))
        .collect()
    }
}
