//! # Result aggregation
//!
//! Runs once all scheduled cell tasks have returned:
//!
//! 1. list the result checkpoints of the current signature,
//! 2. load them and check integrity: every record carries a geometry, and no `point_id`
//!    appears in two cells,
//! 3. concatenate, sort by `point_id`, coerce numeric columns,
//! 4. write the snapshot, GeoJSON and CSV outputs,
//! 5. with [`Cleanup::ClearCheckpoints`], delete the checkpoints and markers of the signature.
//!
//! A run where some cells failed aggregates with [`Cleanup::KeepCheckpoints`]: the outputs
//! hold what is done so far and the next run only processes the missing cells.
//!
//! No result checkpoint is not an error: the outcome is [`AggregateOutcome::NoData`] and the
//! store is left untouched. An integrity error aborts before anything is written or deleted,
//! so the checkpoints can be inspected and the aggregation retried.
use std::collections::BTreeSet;

use ahash::AHashMap;
use tracing::{info, warn};

use camino::Utf8Path;

use crate::checkpoint::CheckpointStore;
use crate::config::ParamSignature;
use crate::constants::{CellIndex, PointId};
use crate::landwatch_errors::LandwatchError;
use crate::results::record::{FieldValue, PointRecord};
use crate::results::writer::{
    spatial_columns, write_csv, write_geojson, write_snapshot, OutputPaths,
};

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOutcome {
    Written { rows: usize, paths: OutputPaths },
    NoData,
}

/// What happens to the checkpoints once the outputs are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    ClearCheckpoints,
    KeepCheckpoints,
}

/// Turn `Text` columns into `Number` when every non-null value parses as a float.
pub fn coerce_numeric(rows: &mut [PointRecord]) {
    let mut text_columns: BTreeSet<String> = BTreeSet::new();
    let mut blocked: BTreeSet<String> = BTreeSet::new();
    for row in rows.iter() {
        for (name, value) in &row.fields {
            match value {
                FieldValue::Null => {}
                FieldValue::Text(s) if s.trim().parse::<f64>().is_ok() => {
                    text_columns.insert(name.clone());
                }
                _ => {
                    blocked.insert(name.clone());
                }
            }
        }
    }

    for name in text_columns.difference(&blocked) {
        for row in rows.iter_mut() {
            if let Some(FieldValue::Text(s)) = row.fields.get(name) {
                let parsed = s
                    .trim()
                    .parse::<f64>()
                    .map_or(FieldValue::Null, FieldValue::number);
                row.fields.insert(name.clone(), parsed);
            }
        }
    }
}

/// Merge the result checkpoints of `sig` and write the final outputs into `out_dir`.
///
/// Arguments
/// -----------------
/// * `store`: checkpoint store of the run.
/// * `sig`: parameter signature scoping checkpoints and output names.
/// * `out_dir`: directory of the final outputs.
/// * `cleanup`: whether the checkpoints of `sig` are deleted after writing.
///
/// Return
/// ----------
/// * [`AggregateOutcome::Written`] with the row count and output paths,
///   [`AggregateOutcome::NoData`] when no result checkpoint exists,
///   or a data-integrity error ([`LandwatchError::DuplicatePoint`],
///   [`LandwatchError::MissingGeometry`]).
pub fn aggregate(
    store: &CheckpointStore,
    sig: &ParamSignature,
    out_dir: &Utf8Path,
    cleanup: Cleanup,
) -> Result<AggregateOutcome, LandwatchError> {
    let files = store.result_files(sig)?;
    if files.is_empty() {
        warn!(signature = %sig, "No data processed");
        return Ok(AggregateOutcome::NoData);
    }

    let mut owners: AHashMap<PointId, CellIndex> = AHashMap::new();
    let mut rows: Vec<PointRecord> = Vec::new();
    for (cell, path) in &files {
        let result = CheckpointStore::load_result(path)?;
        for record in result.records {
            if record.geometry.is_none() {
                return Err(LandwatchError::MissingGeometry(*cell));
            }
            if let Some(first) = owners.insert(record.point_id, *cell) {
                return Err(LandwatchError::DuplicatePoint {
                    point_id: record.point_id,
                    first,
                    second: *cell,
                });
            }
            rows.push(record);
        }
    }

    rows.sort_by_key(|r| r.point_id);
    coerce_numeric(&mut rows);

    let paths = OutputPaths::new(out_dir, sig);
    let columns = spatial_columns(&rows);
    write_snapshot(&paths.snapshot, sig, &rows)?;
    write_geojson(&paths.geojson, sig, &rows, &columns)?;
    write_csv(&paths.csv, &rows, &columns)?;

    let removed = match cleanup {
        Cleanup::ClearCheckpoints => store.clear(sig)?,
        Cleanup::KeepCheckpoints => 0,
    };
    info!(
        rows = rows.len(),
        cells = files.len(),
        removed,
        snapshot = %paths.snapshot,
        "Aggregation finished"
    );

    Ok(AggregateOutcome::Written {
        rows: rows.len(),
        paths,
    })
}
