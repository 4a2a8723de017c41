//! # Constants and type definitions for Landwatch
//!
//! This module centralizes the **numeric defaults**, **file naming conventions**,
//! **column names** and **common type aliases** used throughout the crate.
//!
//! ## Overview
//!
//! - Identifiers for sample points and grid cells
//! - Preprocessing and segmentation constants
//! - Checkpoint and output file prefixes
//! - Column names shared by the cell tasks and the result aggregator
//! - Calendar helpers (decimal years)

use chrono::{Datelike, NaiveDate};

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Unique identifier of a sample point
pub type PointId = u64;

/// Index of a grid cell, as produced by the grid partitioner
pub type CellIndex = usize;

/// Calendar date expressed as a fractional year (e.g. `2019.4958`)
pub type DecimalYear = f64;

/// Longitude / latitude in degrees (EPSG:4326)
pub type Degree = f64;

// -------------------------------------------------------------------------------------------------
// Preprocessing and segmentation
// -------------------------------------------------------------------------------------------------

/// Observations whose absolute z-score exceeds this value are dropped
pub const Z_SCORE_THRESHOLD: f64 = 3.0;

/// Default width of the trailing rolling-mean window, in days
pub const DEFAULT_SMOOTH_WINDOW_DAYS: i64 = 60;

/// Direction convention of the segmentation output: after multiplication by
/// this factor a positive magnitude always denotes vegetation loss
pub const DIST_DIR: f64 = -1.0;

// -------------------------------------------------------------------------------------------------
// Checkpoint and output files
// -------------------------------------------------------------------------------------------------

/// Prefix of the per-cell result checkpoints
pub const RESULT_PREFIX: &str = "tmp_results";

/// Prefix of the per-cell "nothing to process" markers
pub const EMPTY_PREFIX: &str = "tmp_noresults";

/// Extension of the per-cell result checkpoints
pub const RESULT_EXT: &str = "json";

/// Extension of the per-cell markers
pub const EMPTY_EXT: &str = "txt";

/// Sentinel recording the grid size used by the last run
pub const GRID_SENTINEL: &str = ".grid";

/// Serialized copy of the run configuration
pub const CONFIG_FILE: &str = "config.json";

/// Prefix of the final aggregated outputs
pub const FINAL_PREFIX: &str = "results";

// -------------------------------------------------------------------------------------------------
// Column names
// -------------------------------------------------------------------------------------------------

pub const COL_POINT_ID: &str = "point_id";
pub const COL_DATES: &str = "dates";
pub const COL_TS: &str = "ts";
pub const COL_MON_DATES: &str = "mon_dates";
pub const COL_MON_TS: &str = "mon_ts";
pub const COL_MON_IMAGES: &str = "mon_images";

/// Columns only meaningful inside the monitoring period; kept in the full
/// snapshot, dropped from the spatial outputs
pub const MONITORING_COLUMNS: [&str; 3] = [COL_MON_DATES, COL_MON_TS, COL_MON_IMAGES];

/// CEO-style leading columns of the flat CSV export
pub const CSV_LON: &str = "LON";
pub const CSV_LAT: &str = "LAT";
pub const CSV_PLOTID: &str = "PLOTID";

// -------------------------------------------------------------------------------------------------
// Calendar helpers
// -------------------------------------------------------------------------------------------------

/// Convert a calendar date into a fractional year.
///
/// The fraction is `(day_of_year - 1) / days_in_year`, so January 1st maps
/// exactly onto the integer year.
pub fn decimal_year(date: NaiveDate) -> DecimalYear {
    let year = date.year();
    let days_in_year = if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
        366.0
    } else {
        365.0
    };
    year as f64 + (date.ordinal0() as f64) / days_in_year
}

#[cfg(test)]
mod test_constants {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_decimal_year() {
        let jan1 = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        assert_eq!(decimal_year(jan1), 2019.0);

        let jul2 = NaiveDate::from_ymd_opt(2020, 7, 2).unwrap();
        assert_relative_eq!(decimal_year(jul2), 2020.0 + 183.0 / 366.0, epsilon = 1e-12);

        let dec31 = NaiveDate::from_ymd_opt(2021, 12, 31).unwrap();
        assert!(decimal_year(dec31) < 2022.0);
    }
}
