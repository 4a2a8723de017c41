//! Final output files.
//!
//! | file                    | content                                                    |
//! |-------------------------|------------------------------------------------------------|
//! | `results_{sig}.json`    | full snapshot, every column including the series           |
//! | `results_{sig}.geojson` | FeatureCollection of points, scalar non-monitoring columns |
//! | `results_{sig}.csv`     | same columns as the GeoJSON, `LON,LAT,PLOTID` first        |
//!
//! All files go through [`atomic_write`], so a re-run with the same signature replaces the
//! previous outputs in one step.
use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::checkpoint::atomic_write;
use crate::config::ParamSignature;
use crate::constants::{
    COL_POINT_ID, CSV_LAT, CSV_LON, CSV_PLOTID, FINAL_PREFIX, MONITORING_COLUMNS,
};
use crate::landwatch_errors::LandwatchError;
use crate::results::record::PointRecord;

/// Full tabular snapshot, as written to `results_{sig}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub signature: String,
    pub columns: Vec<String>,
    pub rows: Vec<PointRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub snapshot: Utf8PathBuf,
    pub geojson: Utf8PathBuf,
    pub csv: Utf8PathBuf,
}

impl OutputPaths {
    pub fn new(dir: &Utf8Path, sig: &ParamSignature) -> Self {
        let stem = format!("{FINAL_PREFIX}_{sig}");
        OutputPaths {
            snapshot: dir.join(format!("{stem}.json")),
            geojson: dir.join(format!("{stem}.geojson")),
            csv: dir.join(format!("{stem}.csv")),
        }
    }
}

/// Every column name, sorted.
pub fn all_columns(rows: &[PointRecord]) -> Vec<String> {
    rows.iter()
        .flat_map(|r| r.fields.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Columns kept in the spatial outputs: no series, no monitoring-only columns.
pub fn spatial_columns(rows: &[PointRecord]) -> Vec<String> {
    let series: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.fields.iter())
        .filter(|(_, v)| v.is_series())
        .map(|(k, _)| k.as_str())
        .collect();
    all_columns(rows)
        .into_iter()
        .filter(|c| !series.contains(c.as_str()))
        .filter(|c| !MONITORING_COLUMNS.contains(&c.as_str()))
        .filter(|c| c != COL_POINT_ID)
        .collect()
}

pub fn write_snapshot(
    path: &Utf8Path,
    sig: &ParamSignature,
    rows: &[PointRecord],
) -> Result<(), LandwatchError> {
    let table = ResultTable {
        signature: sig.to_string(),
        columns: all_columns(rows),
        rows: rows.to_vec(),
    };
    atomic_write(path, &serde_json::to_vec_pretty(&table)?)
}

pub fn write_geojson(
    path: &Utf8Path,
    sig: &ParamSignature,
    rows: &[PointRecord],
    columns: &[String],
) -> Result<(), LandwatchError> {
    let features: Vec<Value> = rows
        .iter()
        .map(|r| {
            let mut props = Map::new();
            props.insert(COL_POINT_ID.to_string(), json!(r.point_id));
            for c in columns {
                let v = r.fields.get(c).map_or(Value::Null, |f| f.to_json());
                props.insert(c.clone(), v);
            }
            let geometry = r.geometry.map_or(Value::Null, |(lon, lat)| {
                json!({"type": "Point", "coordinates": [lon, lat]})
            });
            json!({"type": "Feature", "geometry": geometry, "properties": props})
        })
        .collect();

    let collection = json!({
        "type": "FeatureCollection",
        "name": format!("{FINAL_PREFIX}_{sig}"),
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:OGC:1.3:CRS84"}},
        "features": features,
    });
    atomic_write(path, &serde_json::to_vec_pretty(&collection)?)
}

pub fn write_csv(
    path: &Utf8Path,
    rows: &[PointRecord],
    columns: &[String],
) -> Result<(), LandwatchError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec![CSV_LON.to_string(), CSV_LAT.to_string(), CSV_PLOTID.to_string()];
    header.extend(columns.iter().cloned());
    writer.write_record(&header)?;

    for r in rows {
        let (lon, lat) = r
            .geometry
            .map_or((String::new(), String::new()), |(lon, lat)| {
                (lon.to_string(), lat.to_string())
            });
        let mut record = vec![lon, lat, r.point_id.to_string()];
        record.extend(
            columns
                .iter()
                .map(|c| r.fields.get(c).map(|f| f.to_flat_string()).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| LandwatchError::IoError(e.into_error()))?;
    atomic_write(path, &bytes)
}
