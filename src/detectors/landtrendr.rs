//! # LandTrendr adapter
//!
//! Chains, for every point of a cell:
//!
//! 1. [`annual_means`] of the processed series,
//! 2. the remote [`Segmenter`] (wrapped in the run's [`RetryPolicy`]),
//! 3. [`select_disturbance`],
//! 4. the optional [`DisturbanceMask`].
//!
//! Points are segmented concurrently, at most `landtrendr_params.concurrency` at a time.
//! If any segmentation still fails after its retries, the whole adapter fails: the cell
//! then writes no checkpoint and is retried on the next run.
//!
//! Output columns: `ltr_magnitude`, `ltr_dur`, `ltr_yod`, `ltr_rate`, `ltr_end_year`, all
//! `Null` when the point has fewer than two annual values or no segment could be formed.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::config::RunConfig;
use crate::constants::{CellIndex, PointId};
use crate::extract::retry::RetryPolicy;
use crate::landwatch_errors::LandwatchError;
use crate::results::record::{FieldValue, Fields};
use crate::segmentation::{
    select_disturbance, DisturbanceMask, DisturbanceSegment, SegmentationRequest, Segmenter,
};
use crate::timeseries::preprocess::annual_means;
use crate::timeseries::TimeSeries;

pub const COLUMNS: [&str; 5] = [
    "ltr_magnitude",
    "ltr_dur",
    "ltr_yod",
    "ltr_rate",
    "ltr_end_year",
];

pub struct LandTrendr {
    segmenter: Arc<dyn Segmenter>,
    retry: RetryPolicy,
    params: Map<String, Value>,
    mask: Option<DisturbanceMask>,
    concurrency: usize,
}

impl LandTrendr {
    pub fn new(config: &RunConfig, segmenter: Arc<dyn Segmenter>) -> Self {
        let ltr = &config.landtrendr_params;
        LandTrendr {
            segmenter,
            retry: config.retry.policy(),
            params: ltr.segmentation_params(),
            mask: ltr.mask,
            concurrency: ltr.concurrency.max(1),
        }
    }

    /// Segment every point of a cell.
    ///
    /// Arguments
    /// -----------------
    /// * `cell`: index of the cell, for logs and error labels.
    /// * `series`: processed series of the primary band, per point.
    ///
    /// Return
    /// ----------
    /// * One field map per input point, or the first segmentation error.
    pub async fn run(
        &self,
        cell: CellIndex,
        series: &BTreeMap<PointId, TimeSeries>,
    ) -> Result<BTreeMap<PointId, Fields>, LandwatchError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut out = BTreeMap::new();

        for (point_id, ts) in series {
            let annual = annual_means(ts);
            if annual.len() < 2 {
                out.insert(*point_id, to_fields(None));
                continue;
            }
            let (years, values) = annual.into_iter().unzip();
            let request = SegmentationRequest {
                point_id: *point_id,
                years,
                values,
                params: self.params.clone(),
            };
            let segmenter = Arc::clone(&self.segmenter);
            let semaphore = Arc::clone(&semaphore);
            let retry = self.retry;
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| LandwatchError::Remote(e.to_string()))?;
                let label = format!("segment point {} of cell {cell}", request.point_id);
                let vertices = retry
                    .run(&label, || segmenter.segment(&request))
                    .await?;
                Ok::<_, LandwatchError>((request.point_id, vertices))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (point_id, vertices) = joined.map_err(|e| LandwatchError::TaskJoin {
                cell,
                message: e.to_string(),
            })??;
            let segment = select_disturbance(&vertices);
            let segment = match &self.mask {
                Some(mask) => mask.apply(segment),
                None => segment,
            };
            debug!(cell, point_id, found = segment.is_some(), "Point segmented");
            out.insert(point_id, to_fields(segment));
        }
        Ok(out)
    }
}

fn to_fields(segment: Option<DisturbanceSegment>) -> Fields {
    let values = match segment {
        Some(s) => [
            FieldValue::number(s.magnitude),
            FieldValue::Integer(s.duration.into()),
            FieldValue::Integer(s.yod.into()),
            FieldValue::number(s.rate),
            FieldValue::Integer(s.end_year.into()),
        ],
        None => std::array::from_fn(|_| FieldValue::Null),
    };
    COLUMNS
        .iter()
        .map(|c| c.to_string())
        .zip(values)
        .collect()
}
