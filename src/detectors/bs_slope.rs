//! Bootstrap of the linear trend slope (value units per year) over the full series.
use rand::Rng;

use crate::constants::PointId;
use crate::detectors::{mean, ols_slope, point_rng, std_dev, ChangeDetector, SeriesScope};
use crate::results::record::{FieldValue, Fields};
use crate::timeseries::TimeSeries;

const COLUMNS: [&str; 4] = ["bs_slope_mean", "bs_slope_sd", "bs_slope_max", "bs_slope_min"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootstrapSlope {
    pub nr_of_bootstraps: usize,
    pub seed: u64,
}

impl BootstrapSlope {
    pub fn new(nr_of_bootstraps: usize, seed: u64) -> Self {
        BootstrapSlope {
            nr_of_bootstraps,
            seed,
        }
    }
}

impl ChangeDetector for BootstrapSlope {
    fn name(&self) -> &'static str {
        "bs_slope"
    }

    fn scope(&self) -> SeriesScope {
        SeriesScope::Full
    }

    fn columns(&self) -> &'static [&'static str] {
        &COLUMNS
    }

    fn detect(&self, point_id: PointId, series: &TimeSeries) -> Fields {
        let n = series.len();
        if n < 2 {
            return self.null_fields();
        }
        let x = series.decimal_years();
        let y = series.values();

        let mut rng = point_rng(self.seed, point_id);
        let mut xs = vec![0.0; n];
        let mut ys = vec![0.0; n];
        // resamples without spread in x have no slope and are skipped
        let slopes: Vec<f64> = (0..self.nr_of_bootstraps)
            .filter_map(|_| {
                for k in 0..n {
                    let j = rng.random_range(0..n);
                    xs[k] = x[j];
                    ys[k] = y[j];
                }
                ols_slope(&xs, &ys)
            })
            .collect();

        let max = slopes.iter().copied().reduce(f64::max);
        let min = slopes.iter().copied().reduce(f64::min);
        [mean(&slopes), std_dev(&slopes), max, min]
            .into_iter()
            .zip(COLUMNS)
            .map(|(value, col)| (col.to_string(), FieldValue::optional_number(value)))
            .collect()
    }
}
