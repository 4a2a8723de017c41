//! # Time-series preprocessing
//!
//! Turns a raw extracted series into the processed series consumed by the change
//! detectors, and cuts it to the monitoring period.
//!
//! ## Pipeline
//! -----------------
//! 1. **Missing values** – non-finite values (masked pixels) are dropped.
//! 2. **Outlier removal** – observations with `|z| > 3` are dropped, date and value
//!    together. The z-scores are recomputed on the survivors until none exceeds the
//!    threshold, so every remaining observation satisfies `|z| ≤ 3`. Series with fewer
//!    than two observations, or with zero spread, are returned unchanged.
//! 3. **Smoothing** – each value becomes the mean of the observations whose date lies in
//!    the trailing window `(t - window, t]`. The window is in days, not in observations,
//!    so irregular revisit intervals are handled; the first observations average over
//!    fewer samples.
//!
//! The monitoring subset ([`monitoring_subset`]) keeps dates strictly after
//! `start_monitor`. It feeds the algorithms that must not see pre-monitoring history,
//! while the full processed series feeds those needing a historical baseline.
use chrono::{Datelike, NaiveDate};
use itertools::Itertools;

use crate::config::TsParams;
use crate::constants::Z_SCORE_THRESHOLD;
use crate::timeseries::{MonitoringSubset, TimeSeries};

/// Population z-scores of `values`.
///
/// Return
/// ----------
/// * `None` when fewer than two values are given or the standard deviation is zero
///   (the z-score is undefined).
pub fn zscores(values: &[f64]) -> Option<Vec<f64>> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let sd = var.sqrt();
    if !(sd.is_finite() && sd > 0.0) {
        return None;
    }
    Some(values.iter().map(|x| (x - mean) / sd).collect())
}

pub fn drop_non_finite(series: &TimeSeries) -> TimeSeries {
    let keep: Vec<bool> = series.values().iter().map(|v| v.is_finite()).collect();
    series.retain_by(&keep)
}

/// Drop observations whose absolute z-score exceeds `threshold`, until stable.
pub fn remove_outliers(series: &TimeSeries, threshold: f64) -> TimeSeries {
    let mut current = series.clone();
    loop {
        let Some(z) = zscores(current.values()) else {
            return current;
        };
        let keep: Vec<bool> = z.iter().map(|z| z.abs() <= threshold).collect();
        if keep.iter().all(|k| *k) {
            return current;
        }
        current = current.retain_by(&keep);
    }
}

/// Trailing rolling mean over a `window_days` wide date window.
pub fn smooth(series: &TimeSeries, window_days: i64) -> TimeSeries {
    let dates = series.dates();
    let values = series.values();

    let mut smoothed = Vec::with_capacity(values.len());
    let mut start = 0;
    for i in 0..values.len() {
        while (dates[i] - dates[start]).num_days() >= window_days {
            start += 1;
        }
        let window = &values[start..=i];
        smoothed.push(window.iter().sum::<f64>() / window.len() as f64);
    }
    series.with_values(smoothed)
}

/// Observations dated strictly after `start_monitor`.
pub fn monitoring_subset(series: &TimeSeries, start_monitor: NaiveDate) -> MonitoringSubset {
    let keep: Vec<bool> = series.dates().iter().map(|d| *d > start_monitor).collect();
    let subset = series.retain_by(&keep);
    MonitoringSubset {
        images: subset.len(),
        series: subset,
    }
}

/// One mean value per calendar year, in ascending year order.
pub fn annual_means(series: &TimeSeries) -> Vec<(i32, f64)> {
    series
        .iter()
        .chunk_by(|(date, _)| date.year())
        .into_iter()
        .map(|(year, group)| {
            let (sum, count) = group.fold((0.0, 0usize), |(s, c), (_, v)| (s + v, c + 1));
            (year, sum / count as f64)
        })
        .collect()
}

/// Configured preprocessing chain (missing values → outliers → smoothing).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preprocessor {
    pub outlier_removal: bool,
    pub smooth: bool,
    pub window_days: i64,
}

impl Preprocessor {
    pub fn from_params(params: &TsParams) -> Self {
        Preprocessor {
            outlier_removal: params.outlier_removal,
            smooth: params.smooth_ts,
            window_days: params.smooth_window_days,
        }
    }

    pub fn process(&self, raw: &TimeSeries) -> TimeSeries {
        let mut series = drop_non_finite(raw);
        if self.outlier_removal {
            series = remove_outliers(&series, Z_SCORE_THRESHOLD);
        }
        if self.smooth {
            series = smooth(&series, self.window_days);
        }
        series
    }
}

#[cfg(test)]
mod test_preprocess {
    use super::*;
    use approx::assert_relative_eq;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn daily(values: &[f64]) -> TimeSeries {
        let start = d(2019, 1, 1);
        let dates = (0..values.len())
            .map(|i| start + chrono::Duration::days(16 * i as i64))
            .collect();
        TimeSeries::new(dates, values.to_vec()).unwrap()
    }

    #[test]
    fn test_zscores_undefined() {
        assert!(zscores(&[]).is_none());
        assert!(zscores(&[4.0]).is_none());
        assert!(zscores(&[2.0, 2.0, 2.0]).is_none());
        let z = zscores(&[1.0, 3.0]).unwrap();
        assert_relative_eq!(z[0], -1.0);
        assert_relative_eq!(z[1], 1.0);
    }

    #[test]
    fn test_remove_outliers_drops_spike() {
        let mut values: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 0.78 } else { 0.82 })
            .collect();
        values[10] = 0.81;
        values[20] = -5.0;
        let ts = daily(&values);
        let cleaned = remove_outliers(&ts, Z_SCORE_THRESHOLD);
        assert_eq!(cleaned.len(), 29);
        assert!(!cleaned.values().contains(&-5.0));
        assert!(!cleaned.dates().contains(&ts.dates()[20]));
    }

    #[test]
    fn test_outlier_invariant_holds_after_removal() {
        // heavy tail: a single pass would leave new |z| > 3 behind
        let mut values: Vec<f64> = (0..60).map(|i| 0.5 + 0.01 * ((i % 7) as f64)).collect();
        values[5] = 40.0;
        values[17] = 9.0;
        values[33] = 3.0;
        let cleaned = remove_outliers(&daily(&values), Z_SCORE_THRESHOLD);
        if let Some(z) = zscores(cleaned.values()) {
            assert!(z.iter().all(|z| z.abs() <= Z_SCORE_THRESHOLD));
        }
        assert!(cleaned.len() < values.len());
    }

    #[test]
    fn test_short_series_unchanged() {
        let ts = daily(&[100.0]);
        assert_eq!(remove_outliers(&ts, Z_SCORE_THRESHOLD), ts);
        let empty = TimeSeries::default();
        assert_eq!(remove_outliers(&empty, Z_SCORE_THRESHOLD), empty);
    }

    #[test]
    fn test_smooth_is_date_keyed() {
        let dates = vec![d(2020, 1, 1), d(2020, 1, 11), d(2020, 3, 10), d(2020, 3, 20)];
        let ts = TimeSeries::new(dates, vec![1.0, 3.0, 10.0, 20.0]).unwrap();
        let s = smooth(&ts, 60);
        // Jan 1 (1 sample), Jan 11 (2 samples), Mar 10 (Jan 11 is 59 days back), Mar 20
        assert_relative_eq!(s.values()[0], 1.0);
        assert_relative_eq!(s.values()[1], 2.0);
        assert_relative_eq!(s.values()[2], 6.5);
        assert_relative_eq!(s.values()[3], 15.0);
        assert_eq!(s.dates(), ts.dates());
    }

    #[test]
    fn test_monitoring_subset() {
        let dates = vec![d(2015, 6, 1), d(2017, 6, 1), d(2019, 6, 1), d(2021, 6, 1)];
        let ts = TimeSeries::new(dates, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mon = monitoring_subset(&ts, d(2018, 1, 1));
        assert_eq!(mon.images, 2);
        assert_eq!(mon.series.dates(), &[d(2019, 6, 1), d(2021, 6, 1)]);
        assert_eq!(mon.series.values(), &[3.0, 4.0]);
        assert_eq!(mon.series.dates().len(), mon.series.values().len());
    }

    #[test]
    fn test_monitoring_subset_is_strict() {
        let ts = TimeSeries::new(vec![d(2018, 1, 1), d(2018, 1, 2)], vec![1.0, 2.0]).unwrap();
        let mon = monitoring_subset(&ts, d(2018, 1, 1));
        assert_eq!(mon.images, 1);
    }

    #[test]
    fn test_annual_means() {
        let dates = vec![d(2018, 2, 1), d(2018, 8, 1), d(2019, 5, 1), d(2021, 1, 1)];
        let ts = TimeSeries::new(dates, vec![1.0, 3.0, 5.0, 7.0]).unwrap();
        assert_eq!(
            annual_means(&ts),
            vec![(2018, 2.0), (2019, 5.0), (2021, 7.0)]
        );
    }

    #[test]
    fn test_preprocessor_drops_nan() {
        let ts = daily(&[0.5, f64::NAN, 0.6]);
        let p = Preprocessor {
            outlier_removal: true,
            smooth: false,
            window_days: 60,
        };
        let out = p.process(&ts);
        assert_eq!(out.values(), &[0.5, 0.6]);
    }
}
