//! CCDC break extraction.
//!
//! Continuous Change Detection and Classification runs on the imagery platform, over the whole
//! image stack of a cell. Only its summary reaches the cell task: per point, the date and
//! magnitude of the first break in the monitoring period. Points come back with their own
//! location, so a run where only the remote products are enabled needs no time-series
//! extraction at all.
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::RunConfig;
use crate::constants::{DecimalYear, Degree, PointId};
use crate::geometry::{Cell, SamplePoint};
use crate::landwatch_errors::LandwatchError;
use crate::results::record::{FieldValue, Fields};

pub const COLUMNS: [&str; 2] = ["ccdc_change_date", "ccdc_magnitude"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CcdcRequest {
    pub satellite: String,
    pub band: String,
    pub start: NaiveDate,
    /// Breaks before this date are ignored by the remote side.
    pub start_monitor: NaiveDate,
    pub end: NaiveDate,
    pub point_id_field: String,
    /// Fitting parameters, defaults overlaid with the configured keys.
    pub params: Map<String, Value>,
}

impl CcdcRequest {
    pub fn from_config(config: &RunConfig) -> Self {
        let ts = &config.ts_params;
        CcdcRequest {
            satellite: ts.satellite.clone(),
            band: ts.band.clone(),
            start: ts.start_calibration,
            start_monitor: ts.start_monitor,
            end: ts.end_monitor,
            point_id_field: ts.point_id.clone(),
            params: config.ccdc_params.fitting_params(),
        }
    }
}

/// First monitoring-period break of one point, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CcdcBreak {
    pub point: SamplePoint,
    pub change_date: Option<DecimalYear>,
    pub magnitude: Option<f64>,
}

#[async_trait]
pub trait CcdcSource: Send + Sync {
    async fn breaks(
        &self,
        cell: &Cell,
        request: &CcdcRequest,
    ) -> Result<Vec<CcdcBreak>, LandwatchError>;
}

/// Per-point fields and locations contributed by a remote product.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RemotePart {
    pub fields: BTreeMap<PointId, Fields>,
    pub geometry: BTreeMap<PointId, (Degree, Degree)>,
}

impl RemotePart {
    pub(crate) fn insert(&mut self, point: &SamplePoint, fields: Fields, source: &str) {
        if self.fields.insert(point.point_id, fields).is_some() {
            warn!(point_id = point.point_id, source, "Point returned twice, last one kept");
        }
        self.geometry.insert(point.point_id, (point.lon(), point.lat()));
    }
}

impl From<Vec<CcdcBreak>> for RemotePart {
    fn from(breaks: Vec<CcdcBreak>) -> Self {
        let mut part = RemotePart::default();
        for b in breaks {
            let fields = Fields::from([
                (
                    COLUMNS[0].to_string(),
                    FieldValue::optional_number(b.change_date),
                ),
                (
                    COLUMNS[1].to_string(),
                    FieldValue::optional_number(b.magnitude),
                ),
            ]);
            part.insert(&b.point, fields, "ccdc");
        }
        part
    }
}

#[cfg(test)]
mod test_ccdc {
    use super::*;

    #[test]
    fn test_breaks_to_part() {
        let breaks = vec![
            CcdcBreak {
                point: SamplePoint::new(4, 10.0, 1.0),
                change_date: Some(2019.5),
                magnitude: Some(-0.42),
            },
            CcdcBreak {
                point: SamplePoint::new(2, 10.5, 1.0),
                change_date: None,
                magnitude: Some(f64::NAN),
            },
        ];
        let part = RemotePart::from(breaks);
        assert_eq!(part.fields[&4]["ccdc_change_date"], FieldValue::Number(2019.5));
        assert_eq!(part.fields[&4]["ccdc_magnitude"], FieldValue::Number(-0.42));
        assert_eq!(part.fields[&2]["ccdc_change_date"], FieldValue::Null);
        assert_eq!(part.fields[&2]["ccdc_magnitude"], FieldValue::Null);
        assert_eq!(part.geometry[&2], (10.5, 1.0));
    }

    #[test]
    fn test_request_carries_fitting_defaults() {
        let mut config = RunConfig::default();
        config.ccdc_params.run = true;
        config
            .ccdc_params
            .fitting
            .insert("minObservations".into(), Value::from(8));
        let req = CcdcRequest::from_config(&config);
        assert_eq!(req.params["minObservations"], Value::from(8));
        assert_eq!(req.params["chiSquareProbability"], Value::from(0.99));
        assert_eq!(req.start_monitor, config.ts_params.start_monitor);
    }
}
