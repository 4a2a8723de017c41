//! # Checkpoint store
//!
//! Filesystem record of which grid cells are done for a given
//! [`ParamSignature`](crate::config::ParamSignature). It is the only state shared by the
//! concurrent cell tasks, and each task writes exactly one file named after its own cell
//! index, so no locking is needed.
//!
//! ## Layout
//!
//! ```text
//! <work_dir>/
//! ├── .grid                                   # grid size of the last run
//! ├── tmp_results_{cell}_{signature}.json     # serialized CellResult
//! └── tmp_noresults_{cell}_{signature}.txt    # EmptyReason text, e.g. "0 points"
//! ```
//!
//! A cell with either file is complete: the next run skips it without any remote call.
//!
//! ## Atomicity
//!
//! Files are written to `<name>.part`, flushed, then renamed into place. A crash mid-write
//! leaves at most a `.part` file, which is never read as a checkpoint, so the cell is simply
//! processed again.
//!
//! ## Grid size
//!
//! Cell indices are only comparable between runs with the same grid size.
//! [`CheckpointStore::ensure_grid_size`] compares the configured size with the `.grid`
//! sentinel and wipes every checkpoint when they differ or the sentinel cannot be parsed.
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::Write;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::ParamSignature;
use crate::constants::{
    CellIndex, EMPTY_EXT, EMPTY_PREFIX, GRID_SENTINEL, RESULT_EXT, RESULT_PREFIX,
};
use crate::landwatch_errors::LandwatchError;
use crate::results::record::CellResult;

/// Why a cell finished without results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// No sample point intersects the cell.
    NoPoints,
    /// The point count query could not be resolved by the remote side.
    UnresolvedCount,
    /// Points were found but none had a usable observation.
    NoObservations,
}

impl EmptyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmptyReason::NoPoints => "0 points",
            EmptyReason::UnresolvedCount => "unresolved point count",
            EmptyReason::NoObservations => "0 observations",
        }
    }
}

impl fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmptyReason {
    type Err = LandwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0 points" => Ok(EmptyReason::NoPoints),
            "unresolved point count" => Ok(EmptyReason::UnresolvedCount),
            "0 observations" => Ok(EmptyReason::NoObservations),
            other => Err(LandwatchError::InvalidSeries(format!(
                "unknown empty marker content {other:?}"
            ))),
        }
    }
}

/// Write `data` to `path` through a `.part` file and a rename.
pub(crate) fn atomic_write(path: &Utf8Path, data: &[u8]) -> Result<(), LandwatchError> {
    let part = Utf8PathBuf::from(format!("{path}.part"));
    let mut file = fs::File::create(&part)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&part, path)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: Utf8PathBuf,
}

impl CheckpointStore {
    /// Open (and create if needed) the store rooted at `dir`.
    pub fn open(dir: impl Into<Utf8PathBuf>) -> Result<Self, LandwatchError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(CheckpointStore { dir })
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn result_path(&self, cell: CellIndex, sig: &ParamSignature) -> Utf8PathBuf {
        self.dir.join(format!("{RESULT_PREFIX}_{cell}_{sig}.{RESULT_EXT}"))
    }

    pub fn marker_path(&self, cell: CellIndex, sig: &ParamSignature) -> Utf8PathBuf {
        self.dir.join(format!("{EMPTY_PREFIX}_{cell}_{sig}.{EMPTY_EXT}"))
    }

    /// Whether the cell already has a result or an empty marker.
    pub fn exists(&self, cell: CellIndex, sig: &ParamSignature) -> bool {
        self.result_path(cell, sig).is_file() || self.marker_path(cell, sig).is_file()
    }

    pub fn write_result(
        &self,
        result: &CellResult,
        sig: &ParamSignature,
    ) -> Result<Utf8PathBuf, LandwatchError> {
        let path = self.result_path(result.cell, sig);
        atomic_write(&path, &serde_json::to_vec(result)?)?;
        debug!(
            cell = result.cell,
            rows = result.records.len(),
            path = %path,
            "Result checkpoint written"
        );
        Ok(path)
    }

    pub fn write_empty(
        &self,
        cell: CellIndex,
        sig: &ParamSignature,
        reason: EmptyReason,
    ) -> Result<Utf8PathBuf, LandwatchError> {
        let path = self.marker_path(cell, sig);
        atomic_write(&path, reason.as_str().as_bytes())?;
        debug!(cell, reason = %reason, "Empty marker written");
        Ok(path)
    }

    pub fn load_result(path: &Utf8Path) -> Result<CellResult, LandwatchError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn read_marker(path: &Utf8Path) -> Result<EmptyReason, LandwatchError> {
        fs::read_to_string(path)?.parse()
    }

    fn scan(&self, pattern: &Regex) -> Result<Vec<(CellIndex, Utf8PathBuf)>, LandwatchError> {
        let mut found = Vec::new();
        for entry in self.dir.read_dir_utf8()? {
            let entry = entry?;
            let Some(caps) = pattern.captures(entry.file_name()) else {
                continue;
            };
            if let Ok(cell) = caps[1].parse::<CellIndex>() {
                found.push((cell, entry.path().to_path_buf()));
            }
        }
        found.sort();
        Ok(found)
    }

    fn pattern(prefix: &str, sig: &ParamSignature, ext: &str) -> Result<Regex, LandwatchError> {
        Regex::new(&format!(
            r"^{}_(\d+)_{}\.{}$",
            regex::escape(prefix),
            regex::escape(sig.as_str()),
            regex::escape(ext)
        ))
        .map_err(|e| LandwatchError::InvalidConfig(e.to_string()))
    }

    /// Result checkpoints of a signature, sorted by cell index.
    pub fn result_files(
        &self,
        sig: &ParamSignature,
    ) -> Result<Vec<(CellIndex, Utf8PathBuf)>, LandwatchError> {
        self.scan(&Self::pattern(RESULT_PREFIX, sig, RESULT_EXT)?)
    }

    /// Empty markers of a signature, sorted by cell index.
    pub fn marker_files(
        &self,
        sig: &ParamSignature,
    ) -> Result<Vec<(CellIndex, Utf8PathBuf)>, LandwatchError> {
        self.scan(&Self::pattern(EMPTY_PREFIX, sig, EMPTY_EXT)?)
    }

    /// Cells holding a result or a marker for `sig`.
    pub fn completed_cells(
        &self,
        sig: &ParamSignature,
    ) -> Result<BTreeSet<CellIndex>, LandwatchError> {
        let mut cells: BTreeSet<CellIndex> = self
            .result_files(sig)?
            .into_iter()
            .map(|(c, _)| c)
            .collect();
        cells.extend(self.marker_files(sig)?.into_iter().map(|(c, _)| c));
        Ok(cells)
    }

    /// Remove every checkpoint and marker of `sig`. Returns the number of removed files.
    pub fn clear(&self, sig: &ParamSignature) -> Result<usize, LandwatchError> {
        let files: Vec<_> = self
            .result_files(sig)?
            .into_iter()
            .chain(self.marker_files(sig)?)
            .collect();
        for (_, path) in &files {
            fs::remove_file(path)?;
        }
        Ok(files.len())
    }

    /// Remove every checkpoint, marker and leftover `.part` file, whatever their signature.
    pub fn invalidate_all(&self) -> Result<usize, LandwatchError> {
        let mut removed = 0;
        for entry in self.dir.read_dir_utf8()? {
            let entry = entry?;
            let name = entry.file_name();
            let is_checkpoint = name.starts_with(&format!("{RESULT_PREFIX}_"))
                || name.starts_with(&format!("{EMPTY_PREFIX}_"));
            if is_checkpoint && entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn read_sentinel(&self) -> Result<Option<String>, LandwatchError> {
        let path = self.dir.join(GRID_SENTINEL);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path)?.trim().to_string()))
    }

    /// Grid size recorded by the last run, `None` when absent or unreadable.
    pub fn recorded_grid_size(&self) -> Result<Option<f64>, LandwatchError> {
        Ok(self.read_sentinel()?.and_then(|text| text.parse().ok()))
    }

    /// Invalidate every checkpoint if the grid size changed since the last run.
    ///
    /// A sentinel that does not hold a number counts as a change: the cell indices of the
    /// existing checkpoints cannot be trusted.
    ///
    /// Return
    /// ----------
    /// * `true` when checkpoints were invalidated.
    pub fn ensure_grid_size(&self, grid_size: f64) -> Result<bool, LandwatchError> {
        let text = self.read_sentinel()?;
        let recorded = text.as_deref().map(str::parse::<f64>);
        let changed = match &recorded {
            None => false,
            Some(Ok(previous)) => *previous != grid_size,
            Some(Err(_)) => {
                warn!(content = text.as_deref(), "Unreadable grid sentinel");
                true
            }
        };
        if changed {
            let removed = self.invalidate_all()?;
            warn!(
                previous = text.as_deref(),
                current = grid_size,
                removed,
                "Grid size changed, all checkpoints invalidated"
            );
        }
        if recorded != Some(Ok(grid_size)) {
            let sentinel = self.dir.join(GRID_SENTINEL);
            atomic_write(&sentinel, grid_size.to_string().as_bytes())?;
            info!(grid_size, "Grid sentinel recorded");
        }
        Ok(changed)
    }
}
