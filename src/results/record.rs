//! Per-point records and per-cell result tables.
//!
//! Every algorithm adapter emits a [`Fields`] map per point. The cell task joins those maps
//! on `point_id` into [`PointRecord`]s and stores them in one [`CellResult`], the payload of
//! a result checkpoint.
//!
//! Field maps are `BTreeMap`s so that serialized records have a stable column order.
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::constants::{CellIndex, Degree, PointId};

/// One cell of the result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Integer(i64),
    Number(f64),
    Text(String),
    Series(Vec<f64>),
    Dates(Vec<NaiveDate>),
}

impl FieldValue {
    /// Finite numbers become `Number`, anything else `Null`.
    pub fn number(value: f64) -> Self {
        if value.is_finite() {
            FieldValue::Number(value)
        } else {
            FieldValue::Null
        }
    }

    pub fn optional_number(value: Option<f64>) -> Self {
        value.map_or(FieldValue::Null, FieldValue::number)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Array-valued fields, dropped from the spatial outputs.
    pub fn is_series(&self) -> bool {
        matches!(self, FieldValue::Series(_) | FieldValue::Dates(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Number(x) => Some(*x),
            _ => None,
        }
    }

    /// Flat textual form used by the CSV export (empty for `Null`).
    pub fn to_flat_string(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Number(x) => x.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Series(v) => format!(
                "[{}]",
                v.iter().map(f64::to_string).collect::<Vec<_>>().join(",")
            ),
            FieldValue::Dates(d) => format!(
                "[{}]",
                d.iter().map(NaiveDate::to_string).collect::<Vec<_>>().join(",")
            ),
        }
    }

    /// Plain JSON value, used for GeoJSON properties.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Number(x) => Value::from(*x),
            FieldValue::Text(s) => Value::from(s.as_str()),
            FieldValue::Series(v) => Value::from(v.clone()),
            FieldValue::Dates(d) => {
                Value::from(d.iter().map(NaiveDate::to_string).collect::<Vec<_>>())
            }
        }
    }
}

pub type Fields = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub point_id: PointId,
    /// `(lon, lat)` in EPSG:4326.
    pub geometry: Option<(Degree, Degree)>,
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellResult {
    pub cell: CellIndex,
    pub records: Vec<PointRecord>,
}

/// Inner join of per-algorithm outputs on `point_id`.
///
/// A point survives only if every part has an entry for it. Column name collisions are
/// resolved in favour of the later part.
pub fn inner_join(parts: Vec<BTreeMap<PointId, Fields>>) -> BTreeMap<PointId, Fields> {
    let mut parts = parts.into_iter();
    let Some(mut joined) = parts.next() else {
        return BTreeMap::new();
    };
    for mut part in parts {
        joined.retain(|id, _| part.contains_key(id));
        for (id, fields) in joined.iter_mut() {
            if let Some(extra) = part.remove(id) {
                fields.extend(extra);
            }
        }
    }
    joined
}

#[cfg(test)]
mod test_record {
    use super::*;

    fn fields(pairs: &[(&str, FieldValue)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_number_rejects_non_finite() {
        assert_eq!(FieldValue::number(f64::NAN), FieldValue::Null);
        assert_eq!(FieldValue::number(2.5), FieldValue::Number(2.5));
        assert_eq!(FieldValue::optional_number(None), FieldValue::Null);
    }

    #[test]
    fn test_inner_join_keeps_common_points() {
        let a = BTreeMap::from([
            (1, fields(&[("ts_mean", FieldValue::Number(0.5))])),
            (2, fields(&[("ts_mean", FieldValue::Number(0.7))])),
        ]);
        let b = BTreeMap::from([
            (2, fields(&[("cusum_magnitude", FieldValue::Number(-3.0))])),
            (3, fields(&[("cusum_magnitude", FieldValue::Null)])),
        ]);
        let joined = inner_join(vec![a, b]);
        assert_eq!(joined.len(), 1);
        let row = &joined[&2];
        assert_eq!(row["ts_mean"], FieldValue::Number(0.7));
        assert_eq!(row["cusum_magnitude"], FieldValue::Number(-3.0));
    }

    #[test]
    fn test_flat_strings() {
        assert_eq!(FieldValue::Null.to_flat_string(), "");
        assert_eq!(FieldValue::Series(vec![1.0, 2.5]).to_flat_string(), "[1,2.5]");
        let d = NaiveDate::from_ymd_opt(2020, 5, 1).unwrap();
        assert_eq!(FieldValue::Dates(vec![d]).to_flat_string(), "[2020-05-01]");
    }

    #[test]
    fn test_serde_tagged_layout() {
        let json = serde_json::to_string(&FieldValue::Integer(3)).unwrap();
        assert_eq!(json, r#"{"type":"integer","value":3}"#);
        let null = serde_json::to_string(&FieldValue::Null).unwrap();
        assert_eq!(null, r#"{"type":"null"}"#);
    }
}
