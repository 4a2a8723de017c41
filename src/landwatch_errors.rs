use thiserror::Error;

use crate::constants::{CellIndex, PointId};

#[derive(Error, Debug)]
pub enum LandwatchError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid time series: {0}")]
    InvalidSeries(String),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON (de)serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV writer error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("HTTP reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("Remote service returned {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("Transient remote failure: {0}")]
    TransientRemote(String),

    #[error("Remote failure: {0}")]
    Remote(String),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Point {point_id} appears in more than one grid cell ({first} and {second})")]
    DuplicatePoint {
        point_id: PointId,
        first: CellIndex,
        second: CellIndex,
    },

    #[error("Cell {0} holds records without geometry")]
    MissingGeometry(CellIndex),

    #[error("Cell task for cell {cell} did not complete: {message}")]
    TaskJoin { cell: CellIndex, message: String },

    #[error("Unable to resolve the home directory for the default work_dir")]
    NoHomeDirectory,
}

impl LandwatchError {
    /// Whether a failed collaborator call is worth repeating.
    ///
    /// Network timeouts, connection resets, rate limiting (`429`) and server-side
    /// errors (`5xx`) are transient. Everything else (bad request, decoding errors,
    /// local I/O) would fail identically on the next attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            LandwatchError::TransientRemote(_) => true,
            LandwatchError::RemoteStatus { status, .. } => *status == 429 || *status >= 500,
            LandwatchError::ReqwestError(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status()
                        .is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
            }
            _ => false,
        }
    }

    /// Errors that must stop the aggregation step (checkpoints stay untouched).
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            LandwatchError::DuplicatePoint { .. } | LandwatchError::MissingGeometry(_)
        )
    }
}

impl PartialEq for LandwatchError {
    fn eq(&self, other: &Self) -> bool {
        use LandwatchError::*;
        match (self, other) {
            (InvalidConfig(a), InvalidConfig(b)) => a == b,
            (InvalidSeries(a), InvalidSeries(b)) => a == b,

            // Wrapped foreign errors are not comparable: same variant is enough
            (IoError(_), IoError(_)) => true,
            (JsonError(_), JsonError(_)) => true,
            (CsvError(_), CsvError(_)) => true,
            (ReqwestError(_), ReqwestError(_)) => true,

            (
                RemoteStatus {
                    status: a,
                    message: m,
                },
                RemoteStatus {
                    status: b,
                    message: n,
                },
            ) => a == b && m == n,
            (TransientRemote(a), TransientRemote(b)) => a == b,
            (Remote(a), Remote(b)) => a == b,
            (
                RetriesExhausted {
                    operation: o1,
                    attempts: a1,
                    last_error: l1,
                },
                RetriesExhausted {
                    operation: o2,
                    attempts: a2,
                    last_error: l2,
                },
            ) => o1 == o2 && a1 == a2 && l1 == l2,
            (
                DuplicatePoint {
                    point_id: p1,
                    first: f1,
                    second: s1,
                },
                DuplicatePoint {
                    point_id: p2,
                    first: f2,
                    second: s2,
                },
            ) => p1 == p2 && f1 == f2 && s1 == s2,
            (MissingGeometry(a), MissingGeometry(b)) => a == b,
            (
                TaskJoin {
                    cell: a,
                    message: m,
                },
                TaskJoin {
                    cell: b,
                    message: n,
                },
            ) => a == b && m == n,
            (NoHomeDirectory, NoHomeDirectory) => true,

            _ => false,
        }
    }
}

#[cfg(test)]
mod test_landwatch_errors {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LandwatchError::TransientRemote("reset".into()).is_transient());
        assert!(LandwatchError::RemoteStatus {
            status: 503,
            message: "busy".into()
        }
        .is_transient());
        assert!(LandwatchError::RemoteStatus {
            status: 429,
            message: "quota".into()
        }
        .is_transient());
        assert!(!LandwatchError::RemoteStatus {
            status: 400,
            message: "bad geometry".into()
        }
        .is_transient());
        assert!(!LandwatchError::Remote("invalid band".into()).is_transient());
        assert!(!LandwatchError::InvalidConfig("workers".into()).is_transient());
    }

    #[test]
    fn test_integrity_classification() {
        let dup = LandwatchError::DuplicatePoint {
            point_id: 7,
            first: 1,
            second: 4,
        };
        assert!(dup.is_data_integrity());
        assert!(LandwatchError::MissingGeometry(3).is_data_integrity());
        assert!(!LandwatchError::Remote("x".into()).is_data_integrity());
    }
}
