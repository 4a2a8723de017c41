//! # landwatch
//!
//! Grid-partitioned, checkpointed land-cover disturbance detection over sample points.
//!
//! An area of interest is cut into grid cells ([`geometry`]). Each cell is processed by an
//! independent task ([`pipeline`]) that pulls per-point time series from a remote extractor
//! ([`extract`]), cleans them ([`timeseries`]), runs the enabled change detectors
//! ([`detectors`], [`segmentation`]) and records the outcome in a file checkpoint
//! ([`checkpoint`]). Once every cell has returned, checkpoints are merged into the final
//! snapshot and spatial outputs ([`results`]).
//!
//! Runs are resumable: a cell with a checkpoint for the current parameter signature is
//! never processed twice.
pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod detectors;
pub mod extract;
pub mod geometry;
pub mod landwatch_errors;
pub mod logging;
pub mod pipeline;
pub mod results;
pub mod segmentation;
pub mod timeseries;

pub use config::{RunConfig, RunConfigBuilder};
pub use landwatch_errors::LandwatchError;
pub use pipeline::{Pipeline, RunReport};
