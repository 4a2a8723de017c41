//! Parameter signature scoping checkpoints and output names.
//!
//! The signature captures the configuration fields that change the *shape* of the
//! outputs: satellite, band, calibration/monitoring dates and grid size. Two runs
//! with the same signature share checkpoints; a run with another signature never
//! sees them.
use std::fmt;

use crate::config::RunConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamSignature(String);

impl ParamSignature {
    /// Build `{satellite}_{band}_{start_calibration}_{start_monitor}_{end_monitor}_{grid_size}`.
    ///
    /// Characters outside `[A-Za-z0-9._-]` are replaced by `-` so the signature
    /// can be embedded in file names.
    pub fn from_config(config: &RunConfig) -> Self {
        let ts = &config.ts_params;
        let raw = format!(
            "{}_{}_{}_{}_{}_{}",
            ts.satellite,
            ts.band,
            ts.start_calibration,
            ts.start_monitor,
            ts.end_monitor,
            ts.grid_size
        );
        ParamSignature(sanitize(&raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

impl fmt::Display for ParamSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
