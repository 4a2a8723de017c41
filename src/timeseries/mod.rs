//! # Per-point spectral time series
//!
//! A [`TimeSeries`] is an ordered sequence of `(date, value)` pairs for one band of one
//! sample point. It is produced by the remote extractor ("raw" series), then rewritten by
//! the [`preprocess`] functions ("processed" series) and finally cut to the monitoring
//! period ([`MonitoringSubset`]).
//!
//! ## Invariants
//! -----------------
//! * `dates.len() == values.len()`
//! * dates are **strictly increasing**
//!
//! Both are checked by [`TimeSeries::new`]; every transformation in this crate keeps
//! them (observations are only ever dropped or re-valued, never reordered).
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::constants::{decimal_year, DecimalYear};
use crate::geometry::SamplePoint;
use crate::landwatch_errors::LandwatchError;

pub mod preprocess;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawTimeSeries")]
pub struct TimeSeries {
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct RawTimeSeries {
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

impl TryFrom<RawTimeSeries> for TimeSeries {
    type Error = LandwatchError;

    fn try_from(raw: RawTimeSeries) -> Result<Self, Self::Error> {
        TimeSeries::new(raw.dates, raw.values)
    }
}

impl TimeSeries {
    /// Build a series, checking length alignment and strict date ordering.
    pub fn new(dates: Vec<NaiveDate>, values: Vec<f64>) -> Result<Self, LandwatchError> {
        if dates.len() != values.len() {
            return Err(LandwatchError::InvalidSeries(format!(
                "{} dates for {} values",
                dates.len(),
                values.len()
            )));
        }
        if let Some(w) = dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(LandwatchError::InvalidSeries(format!(
                "dates not strictly increasing at {} -> {}",
                w[0], w[1]
            )));
        }
        Ok(TimeSeries { dates, values })
    }

    /// Keep the observations whose flag is `true`.
    ///
    /// The result trivially satisfies the ordering invariant.
    pub(crate) fn retain_by(&self, keep: &[bool]) -> TimeSeries {
        let (dates, values) = self
            .iter()
            .zip(keep)
            .filter(|(_, k)| **k)
            .map(|((d, v), _)| (d, v))
            .unzip();
        TimeSeries { dates, values }
    }

    /// Replace the values, keeping the dates.
    pub(crate) fn with_values(&self, values: Vec<f64>) -> TimeSeries {
        debug_assert_eq!(values.len(), self.dates.len());
        TimeSeries {
            dates: self.dates.clone(),
            values,
        }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.dates.iter().copied().zip(self.values.iter().copied())
    }

    pub fn decimal_years(&self) -> Vec<DecimalYear> {
        self.dates.iter().map(|d| decimal_year(*d)).collect()
    }
}

/// Observations strictly after `start_monitor`, with their count.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitoringSubset {
    pub series: TimeSeries,
    pub images: usize,
}

/// Raw extraction output for one point: one series per requested band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSeries {
    pub point: SamplePoint,
    pub bands: BTreeMap<String, TimeSeries>,
}

impl PointSeries {
    pub fn band(&self, name: &str) -> Option<&TimeSeries> {
        self.bands.get(name)
    }

    /// Number of observations over all bands.
    pub fn observation_count(&self) -> usize {
        self.bands.values().map(TimeSeries::len).sum()
    }
}
