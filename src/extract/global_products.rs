//! Sampling of global land-cover and forest-change products at the sample points.
//!
//! The products (ESA WorldCover 2020, Hansen Global Forest Change, JRC Tropical Moist
//! Forest) are rasters held by the imagery platform; the remote side returns the first pixel
//! value under each point. Every value is a class code or a year, stored as an integer.
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::extract::ccdc::RemotePart;
use crate::geometry::{Cell, SamplePoint};
use crate::landwatch_errors::LandwatchError;
use crate::results::record::{FieldValue, Fields};

/// Sampled columns, in output order.
pub const COLUMNS: [&str; 16] = [
    "esa_lc20",
    "gfc_tc00",
    "gfc_loss",
    "gfc_year",
    "gfc_gain",
    "tmf_main_cl",
    "tmf_subtypes",
    "tmf_1990",
    "tmf_1995",
    "tmf_2000",
    "tmf_2005",
    "tmf_2010",
    "tmf_2015",
    "tmf_2020",
    "tmf_def_yr",
    "tmf_deg_yr",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSample {
    pub point: SamplePoint,
    /// Column name to pixel value; a missing key or `null` means no data under the point.
    #[serde(default)]
    pub values: BTreeMap<String, Option<f64>>,
}

#[async_trait]
pub trait GlobalProductSampler: Send + Sync {
    async fn sample(
        &self,
        cell: &Cell,
        point_id_field: &str,
    ) -> Result<Vec<ProductSample>, LandwatchError>;
}

fn code(value: Option<f64>) -> FieldValue {
    match value {
        Some(v) if v.is_finite() && v.fract() == 0.0 => FieldValue::Integer(v as i64),
        other => FieldValue::optional_number(other),
    }
}

impl From<Vec<ProductSample>> for RemotePart {
    fn from(samples: Vec<ProductSample>) -> Self {
        let mut part = RemotePart::default();
        for s in samples {
            let fields: Fields = COLUMNS
                .iter()
                .map(|c| (c.to_string(), code(s.values.get(*c).copied().flatten())))
                .collect();
            part.insert(&s.point, fields, "global products");
        }
        part
    }
}
