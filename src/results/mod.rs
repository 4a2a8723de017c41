//! # Results
//!
//! * [`record`] – per-point records, per-cell tables and the `point_id` inner join.
//! * [`aggregate`] – merge of all cell checkpoints into the final table.
//! * [`writer`] – snapshot, GeoJSON and CSV outputs.
pub mod aggregate;
pub mod record;
pub mod writer;

pub use aggregate::{aggregate, AggregateOutcome, Cleanup};
pub use record::{CellResult, FieldValue, Fields, PointRecord};
pub use writer::OutputPaths;
