//! # Disturbance segment selection
//!
//! Post-processing of a LandTrendr-style temporal segmentation. The remote segmentation
//! primitive fits a piecewise-linear model to the annual series of one point and reports
//! its breakpoints ("vertices"). This module turns those vertices into **one** ranked
//! disturbance event per point.
//!
//! ## Algorithm
//! -----------------
//! 1. Consecutive vertices are paired into segments `(startYear, endYear, startVal, endVal)`.
//! 2. `duration = endYear - startYear`, `magnitude = endVal - startVal` and
//!    `rate = magnitude / duration`.
//! 3. Values are multiplied by [`DIST_DIR`] so that a positive magnitude always denotes a loss
//!    of vegetation, whatever the sign convention of the analysed index.
//! 4. Segments are ranked by flipped magnitude, descending; ties go to the earliest `startYear`.
//! 5. The top segment is emitted with `yod = startYear + 1`.
//!
//! A point with fewer than two vertices yields `None`: a null record, not an error.
//! The selector always returns the top segment. Weak events are reclassified afterwards by
//! the optional [`DisturbanceMask`].
//!
//! ## See also
//! ------------
//! * [`Segmenter`] – async seam to the remote segmentation primitive.
//! * [`crate::detectors::landtrendr`] – adapter from annual means to the selected segment.
use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{PointId, DIST_DIR};
use crate::landwatch_errors::LandwatchError;

/// Breakpoint of the fitted segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub year: i32,
    pub value: f64,
}

/// Straight line between two consecutive vertices, in the index's own sign convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start_year: i32,
    pub end_year: i32,
    pub start_val: f64,
    pub end_val: f64,
}

impl Segment {
    pub fn duration(&self) -> i32 {
        self.end_year - self.start_year
    }

    pub fn magnitude(&self) -> f64 {
        self.end_val - self.start_val
    }

    pub fn rate(&self) -> f64 {
        self.magnitude() / self.duration() as f64
    }
}

/// Selected disturbance, already flipped so that `magnitude > 0` means loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisturbanceSegment {
    /// Year of disturbance (`startYear + 1`).
    pub yod: i32,
    pub end_year: i32,
    pub start_val: f64,
    pub end_val: f64,
    pub magnitude: f64,
    pub duration: i32,
    pub rate: f64,
}

/// Pair consecutive vertices into segments.
///
/// Pairs whose years do not increase are skipped; they would give a zero or negative duration.
pub fn segments_from_vertices(vertices: &[Vertex]) -> Vec<Segment> {
    vertices
        .windows(2)
        .filter(|w| w[1].year > w[0].year)
        .map(|w| Segment {
            start_year: w[0].year,
            end_year: w[1].year,
            start_val: w[0].value,
            end_val: w[1].value,
        })
        .collect()
}

/// Select the greatest-loss segment of a point.
///
/// Arguments
/// -----------------
/// * `vertices`: breakpoints of the segmentation, ordered by year.
///
/// Return
/// ----------
/// * The flipped top-ranked segment, or `None` when no segment can be formed.
pub fn select_disturbance(vertices: &[Vertex]) -> Option<DisturbanceSegment> {
    segments_from_vertices(vertices)
        .into_iter()
        .max_by(|a, b| {
            let (ma, mb) = (a.magnitude() * DIST_DIR, b.magnitude() * DIST_DIR);
            ma.partial_cmp(&mb)
                .unwrap_or(Ordering::Equal)
                // max_by keeps the last maximum: prefer the earliest start on ties
                .then_with(|| b.start_year.cmp(&a.start_year))
        })
        .map(|s| DisturbanceSegment {
            yod: s.start_year + 1,
            end_year: s.end_year,
            start_val: s.start_val * DIST_DIR,
            end_val: s.end_val * DIST_DIR,
            magnitude: s.magnitude() * DIST_DIR,
            duration: s.duration(),
            rate: s.rate() * DIST_DIR,
        })
}

/// Reclassifies weak or slow segments as "no disturbance".
///
/// A segment is kept when `magnitude >= min_magnitude` and `duration <= max_duration`
/// (unset bounds always pass).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DisturbanceMask {
    pub min_magnitude: Option<f64>,
    pub max_duration: Option<i32>,
}

impl DisturbanceMask {
    pub fn apply(&self, segment: Option<DisturbanceSegment>) -> Option<DisturbanceSegment> {
        segment.filter(|s| {
            self.min_magnitude.map_or(true, |min| s.magnitude >= min)
                && self.max_duration.map_or(true, |max| s.duration <= max)
        })
    }
}

/// Input of one segmentation call: the annual series of one point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationRequest {
    pub point_id: PointId,
    pub years: Vec<i32>,
    pub values: Vec<f64>,
    pub params: Map<String, Value>,
}

/// Raw fitted output of a segmentation: one row per input year, with a vertex flag.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SegmentationOutput {
    pub years: Vec<i32>,
    pub fitted: Vec<f64>,
    pub is_vertex: Vec<bool>,
}

impl SegmentationOutput {
    /// Keep the vertex rows, as `(year, fitted value)` pairs.
    pub fn into_vertices(self) -> Result<Vec<Vertex>, LandwatchError> {
        if self.years.len() != self.fitted.len() || self.years.len() != self.is_vertex.len() {
            return Err(LandwatchError::Remote(format!(
                "segmentation output has misaligned rows ({} years, {} fitted, {} flags)",
                self.years.len(),
                self.fitted.len(),
                self.is_vertex.len()
            )));
        }
        Ok(self
            .years
            .into_iter()
            .zip(self.fitted)
            .zip(self.is_vertex)
            .filter(|(_, flag)| *flag)
            .map(|((year, value), _)| Vertex { year, value })
            .collect())
    }
}

/// Remote segmentation primitive.
#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment(&self, request: &SegmentationRequest) -> Result<Vec<Vertex>, LandwatchError>;
}
