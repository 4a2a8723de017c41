//! CUSUM change detection over the monitoring period.
//!
//! The residuals to the period mean are accumulated. A loss makes the cumulative sum rise
//! while values are above average and fall afterwards, so the break sits at its maximum.
//! `cusum_change_date` is the first observation after the break and `cusum_magnitude` the
//! difference of the means after and before it (negative for a loss). When the maximum is
//! the last observation there is no loss and both columns are `Null`.
//!
//! Confidence is obtained by permutation: the residuals are shuffled `nr_of_bootstraps`
//! times and `cusum_confidence` is the share of shuffles whose cumulative-sum range is
//! strictly below the observed one.
use rand::seq::SliceRandom;

use crate::constants::{decimal_year, PointId};
use crate::detectors::{mean, point_rng, ChangeDetector, SeriesScope};
use crate::results::record::{FieldValue, Fields};
use crate::timeseries::TimeSeries;

const COLUMNS: [&str; 3] = ["cusum_change_date", "cusum_confidence", "cusum_magnitude"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cusum {
    pub nr_of_bootstraps: usize,
    pub seed: u64,
}

impl Cusum {
    pub fn new(nr_of_bootstraps: usize, seed: u64) -> Self {
        Cusum {
            nr_of_bootstraps,
            seed,
        }
    }
}

fn cumsum(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect()
}

fn range(values: &[f64]) -> f64 {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    hi - lo
}

/// Index of the first maximum.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

impl ChangeDetector for Cusum {
    fn name(&self) -> &'static str {
        "cusum"
    }

    fn scope(&self) -> SeriesScope {
        SeriesScope::Monitoring
    }

    fn columns(&self) -> &'static [&'static str] {
        &COLUMNS
    }

    fn detect(&self, point_id: PointId, series: &TimeSeries) -> Fields {
        let values = series.values();
        let Some(m) = mean(values).filter(|_| values.len() >= 2) else {
            return self.null_fields();
        };

        let residuals: Vec<f64> = values.iter().map(|v| v - m).collect();
        let sums = cumsum(&residuals);
        let idx = argmax(&sums);

        let observed = range(&sums);
        let confidence = if observed > 0.0 && self.nr_of_bootstraps > 0 {
            let mut rng = point_rng(self.seed, point_id);
            let mut shuffled = residuals.clone();
            let below = (0..self.nr_of_bootstraps)
                .filter(|_| {
                    shuffled.shuffle(&mut rng);
                    range(&cumsum(&shuffled)) < observed
                })
                .count();
            Some(below as f64 / self.nr_of_bootstraps as f64)
        } else {
            None
        };

        let (change_date, magnitude) = if idx + 1 < values.len() {
            let before = mean(&values[..=idx]);
            let after = mean(&values[idx + 1..]);
            (
                Some(decimal_year(series.dates()[idx + 1])),
                before.zip(after).map(|(b, a)| a - b),
            )
        } else {
            (None, None)
        };

        [change_date, confidence, magnitude]
            .into_iter()
            .zip(COLUMNS)
            .map(|(value, col)| (col.to_string(), FieldValue::optional_number(value)))
            .collect()
    }
}
