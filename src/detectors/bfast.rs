//! # BFAST-monitor style break detection
//!
//! A season-trend model is fitted by ordinary least squares on the **history** period
//! (observations up to and including `start_monitor`), then used to predict the
//! **monitoring** period. A moving sum (MOSUM) of the standardized residuals is compared to
//! a boundary that widens with time; the first crossing is the break.
//!
//! ## Model
//! -----------------
//! For an observation at decimal year `t`:
//!
//! ```text
//! y(t) = a + b·t + Σ_{k=1..K} [ c_k·sin(2πk·t) + d_k·cos(2πk·t) ]
//! ```
//!
//! with `K = harmonics` and the trend term `b·t` only when `trend` is set.
//!
//! ## Monitoring
//! -----------------
//! * `σ` – residual standard error of the history fit.
//! * `h = max(1, ⌊hfrac · n⌋)` – MOSUM bandwidth, `n` the history length.
//! * `MOSUM_i = Σ_{s=i-h+1..i} e_s / (σ·√n)`.
//! * boundary at position `i` (1-based) is `critical_value · √max(1, ln(i / n))`.
//!
//! Output columns: `bfast_change_date` (decimal year of the first crossing, `Null` if none),
//! `bfast_magnitude` (median monitoring residual) and `bfast_means` (mean monitoring residual).
//! Too short a history, an empty monitoring period or a singular fit give `Null` columns.
use std::f64::consts::TAU;

use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};

use crate::config::BfastParams;
use crate::constants::{decimal_year, PointId};
use crate::detectors::{mean, median, ChangeDetector, SeriesScope};
use crate::results::record::{FieldValue, Fields};
use crate::timeseries::TimeSeries;

const COLUMNS: [&str; 3] = ["bfast_change_date", "bfast_magnitude", "bfast_means"];

#[derive(Debug, Clone, PartialEq)]
pub struct BfastMonitor {
    pub harmonics: usize,
    pub hfrac: f64,
    pub critical_value: f64,
    pub trend: bool,
    pub start_monitor: NaiveDate,
}

impl BfastMonitor {
    pub fn new(params: &BfastParams, start_monitor: NaiveDate) -> Self {
        BfastMonitor {
            harmonics: params.harmonics,
            hfrac: params.hfrac,
            critical_value: params.critical_value,
            trend: params.trend,
            start_monitor,
        }
    }

    fn n_terms(&self) -> usize {
        1 + usize::from(self.trend) + 2 * self.harmonics
    }

    fn design_row(&self, t: f64) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.n_terms());
        row.push(1.0);
        if self.trend {
            row.push(t);
        }
        for k in 1..=self.harmonics {
            let w = TAU * k as f64 * t;
            row.push(w.sin());
            row.push(w.cos());
        }
        row
    }

    /// OLS coefficients of the history model.
    fn fit(&self, t: &[f64], y: &[f64]) -> Option<DVector<f64>> {
        let p = self.n_terms();
        let rows: Vec<f64> = t.iter().flat_map(|ti| self.design_row(*ti)).collect();
        let x = DMatrix::from_row_slice(t.len(), p, &rows);
        let y = DVector::from_column_slice(y);
        let beta = x.svd(true, true).solve(&y, 1e-12).ok()?;
        beta.iter().all(|b| b.is_finite()).then_some(beta)
    }

    fn predict(&self, beta: &DVector<f64>, t: f64) -> f64 {
        self.design_row(t)
            .iter()
            .zip(beta.iter())
            .map(|(x, b)| x * b)
            .sum()
    }

    fn boundary(&self, position: usize, n_hist: usize) -> f64 {
        let ratio = position as f64 / n_hist as f64;
        self.critical_value * ratio.ln().max(1.0).sqrt()
    }
}

impl ChangeDetector for BfastMonitor {
    fn name(&self) -> &'static str {
        "bfast"
    }

    fn scope(&self) -> SeriesScope {
        SeriesScope::Full
    }

    fn columns(&self) -> &'static [&'static str] {
        &COLUMNS
    }

    fn detect(&self, _point_id: PointId, series: &TimeSeries) -> Fields {
        let n_hist = series
            .dates()
            .iter()
            .take_while(|d| **d <= self.start_monitor)
            .count();
        let p = self.n_terms();
        if n_hist <= p || n_hist == series.len() {
            return self.null_fields();
        }

        let t = series.decimal_years();
        let y = series.values();
        let Some(beta) = self.fit(&t[..n_hist], &y[..n_hist]) else {
            return self.null_fields();
        };

        let residuals: Vec<f64> = t
            .iter()
            .zip(y)
            .map(|(ti, yi)| yi - self.predict(&beta, *ti))
            .collect();
        let rss: f64 = residuals[..n_hist].iter().map(|e| e * e).sum();
        let sigma = (rss / (n_hist - p) as f64).sqrt();

        let monitoring = &residuals[n_hist..];
        let magnitude = median(monitoring);
        let means = mean(monitoring);

        let change_date = if sigma.is_finite() && sigma > 0.0 {
            let h = ((self.hfrac * n_hist as f64).floor() as usize).max(1);
            let scale = sigma * (n_hist as f64).sqrt();
            (n_hist..residuals.len())
                .find(|&i| {
                    let window = &residuals[(i + 1).saturating_sub(h)..=i];
                    let mosum = window.iter().sum::<f64>() / scale;
                    mosum.abs() > self.boundary(i + 1, n_hist)
                })
                .map(|i| decimal_year(series.dates()[i]))
        } else {
            None
        };

        [change_date, magnitude, means]
            .into_iter()
            .zip(COLUMNS)
            .map(|(value, col)| (col.to_string(), FieldValue::optional_number(value)))
            .collect()
    }
}
