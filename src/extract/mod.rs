//! # Remote time-series extraction
//!
//! The imagery platform is reached through the [`TimeSeriesExtractor`] trait. A cell task asks
//! it two things:
//!
//! 1. how many sample points fall in the cell ([`TimeSeriesExtractor::count_points`]),
//! 2. the raw per-point, per-band series of those points ([`TimeSeriesExtractor::extract`]).
//!
//! Both calls may fail transiently and are wrapped by the caller in a
//! [`RetryPolicy`](crate::extract::retry::RetryPolicy).
//!
//! ## Point counts
//!
//! The count query distinguishes an empty cell from a count the remote side could not resolve
//! ([`PointCount`]). Both end the cell with an empty marker, but with different reasons.
//!
//! ## Implementations
//!
//! * [`HttpService`](crate::extract::http::HttpService) – JSON over HTTP, also implements the
//!   [`Segmenter`](crate::segmentation::Segmenter), [`CcdcSource`](ccdc::CcdcSource) and
//!   [`GlobalProductSampler`](global_products::GlobalProductSampler) seams.
//!
//! ## Remote products
//!
//! [`ccdc`] and [`global_products`] are computed entirely on the platform. Their answers come
//! with point locations and are joined on `point_id` like any local algorithm output.
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::TsParams;
use crate::geometry::Cell;
use crate::landwatch_errors::LandwatchError;
use crate::timeseries::PointSeries;

pub mod ccdc;
pub mod global_products;
pub mod http;
pub mod retry;

/// Outcome of the point count query of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointCount {
    Resolved(usize),
    /// The remote side answered but could not resolve a count.
    Unresolved,
}

impl PointCount {
    /// Map the remote integer convention, where a negative count means "unresolved".
    pub fn from_raw(count: i64) -> Self {
        usize::try_from(count)
            .map(PointCount::Resolved)
            .unwrap_or(PointCount::Unresolved)
    }
}

/// What to extract for the points of a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub satellite: String,
    /// Primary band first.
    pub bands: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Name of the identifier attribute of the remote point dataset.
    pub point_id_field: String,
}

impl ExtractionRequest {
    /// Full calibration + monitoring range for every configured band.
    pub fn from_params(params: &TsParams) -> Self {
        ExtractionRequest {
            satellite: params.satellite.clone(),
            bands: params.all_bands(),
            start: params.start_calibration,
            end: params.end_monitor,
            point_id_field: params.point_id.clone(),
        }
    }
}

#[async_trait]
pub trait TimeSeriesExtractor: Send + Sync {
    async fn count_points(&self, cell: &Cell) -> Result<PointCount, LandwatchError>;

    async fn extract(
        &self,
        cell: &Cell,
        request: &ExtractionRequest,
    ) -> Result<Vec<PointSeries>, LandwatchError>;
}
