//! # Pipeline
//!
//! Entry point tying the run together:
//!
//! 1. validate the configuration and resolve `work_dir`,
//! 2. persist `config.json` next to the checkpoints,
//! 3. compare the grid size with the last run and invalidate checkpoints on change,
//! 4. [`scheduler::schedule`] one [`CellTask`](cell_task::CellTask) per cell,
//! 5. [`aggregate`] the checkpoints once every task has returned.
//!
//! Checkpoints are deleted only when every dispatched cell holds one. After a partial failure
//! the outputs are written from what is done, the checkpoints stay, and the next run with the
//! same parameters only processes the failed cells.
//!
//! Collaborators are injected as trait objects, so the same pipeline runs against
//! [`HttpService`](crate::extract::http::HttpService) or in-memory fakes.
//!
//! Example
//! -----------------
//! ```rust, no_run
//! use std::sync::Arc;
//! use camino::Utf8Path;
//! use landwatch::config::RunConfig;
//! use landwatch::extract::http::HttpService;
//! use landwatch::geometry::BoundingBox;
//! use landwatch::pipeline::Pipeline;
//!
//! # async fn run() -> Result<(), landwatch::landwatch_errors::LandwatchError> {
//! let config = RunConfig::from_json_file(Utf8Path::new("run.json"))?;
//! let service = Arc::new(HttpService::new(&config.service)?);
//! let pipeline = Pipeline::new(config, service.clone(), service.clone())?
//!     .with_ccdc(service.clone())
//!     .with_global_products(service);
//! let report = pipeline.run_aoi(&BoundingBox::new(10.0, 45.0, 11.0, 46.0)?).await?;
//! println!("{report:#}");
//! # Ok(())
//! # }
//! ```
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use geo_types::Polygon;
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::RunConfig;
use crate::constants::{CellIndex, Degree};
use crate::extract::ccdc::CcdcSource;
use crate::extract::global_products::GlobalProductSampler;
use crate::extract::TimeSeriesExtractor;
use crate::geometry::{BoundingBox, Cell, GridPartitioner, RegularGrid};
use crate::landwatch_errors::LandwatchError;
use crate::results::{aggregate, AggregateOutcome, Cleanup};
use crate::segmentation::Segmenter;

pub mod cell_task;
pub mod progress;
pub mod scheduler;

pub use cell_task::{CellOutcome, CellTask, Remotes};
pub use scheduler::RunSummary;

/// What a run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub summary: RunSummary,
    pub outcome: AggregateOutcome,
    /// Whether a grid-size change wiped the checkpoints at start-up.
    pub invalidated: bool,
    /// Whether every dispatched cell ended with a checkpoint. When `false` the outputs are
    /// partial and the checkpoints were kept for the next run.
    pub complete: bool,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match &self.outcome {
            AggregateOutcome::Written { rows, paths } => {
                format!("{rows} rows written to {}", paths.snapshot)
            }
            AggregateOutcome::NoData => "no data processed".to_string(),
        };
        if f.alternate() {
            writeln!(f, "{:#}", self.summary)?;
            writeln!(f, "  {:<8} : {}", "reset", self.invalidated)?;
            writeln!(f, "  {:<8} : {}", "complete", self.complete)?;
            write!(f, "  {:<8} : {outcome}", "output")
        } else if self.complete {
            write!(f, "{} -> {outcome}", self.summary)
        } else {
            write!(f, "{} -> partial, {outcome}", self.summary)
        }
    }
}

pub struct Pipeline {
    config: RunConfig,
    remotes: Remotes,
}

impl Pipeline {
    /// Build a pipeline over validated configuration and the two remote collaborators.
    pub fn new(
        config: RunConfig,
        extractor: Arc<dyn TimeSeriesExtractor>,
        segmenter: Arc<dyn Segmenter>,
    ) -> Result<Self, LandwatchError> {
        config.validate()?;
        Ok(Pipeline {
            config,
            remotes: Remotes::new(extractor, segmenter),
        })
    }

    /// Attach the CCDC collaborator, needed when `ccdc_params.run` is set.
    pub fn with_ccdc(mut self, source: Arc<dyn CcdcSource>) -> Self {
        self.remotes = self.remotes.with_ccdc(source);
        self
    }

    /// Attach the product sampler, needed when `global_products.run` is set.
    pub fn with_global_products(mut self, sampler: Arc<dyn GlobalProductSampler>) -> Self {
        self.remotes = self.remotes.with_global_products(sampler);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Partition `aoi` with square cells of `ts_params.grid_size` degrees and run them.
    pub async fn run_aoi(&self, aoi: &BoundingBox) -> Result<RunReport, LandwatchError> {
        let size = self.config.ts_params.grid_size;
        let cells = RegularGrid.partition(aoi, size, size)?;
        self.run_cells(cells).await
    }

    /// Run over the bounding rectangle of an AOI polygon.
    pub async fn run_polygon(&self, aoi: &Polygon<Degree>) -> Result<RunReport, LandwatchError> {
        self.run_aoi(&BoundingBox::from_polygon(aoi)?).await
    }

    /// Process `cells` and aggregate.
    ///
    /// Arguments
    /// -----------------
    /// * `cells`: grid cells, indices as produced by the partitioner for the configured
    ///   grid size.
    ///
    /// Return
    /// ----------
    /// * A [`RunReport`]. Per-cell failures are reported in [`RunReport::summary`]; only
    ///   I/O errors around the store, a missing remote collaborator and aggregation
    ///   integrity errors are returned as `Err`.
    pub async fn run_cells(&self, cells: Vec<Cell>) -> Result<RunReport, LandwatchError> {
        let work_dir = self.config.resolved_work_dir()?;
        let store = CheckpointStore::open(work_dir.clone())?;
        let task = CellTask::new(&self.config, store.clone(), self.remotes.clone())?;
        self.config.persist(&work_dir)?;

        let invalidated = store.ensure_grid_size(self.config.ts_params.grid_size)?;

        let signature = self.config.signature();
        info!(
            work_dir = %work_dir,
            signature = %signature,
            cells = cells.len(),
            "Run started"
        );

        let dispatched: BTreeSet<CellIndex> = cells.iter().map(|c| c.index).collect();
        let summary = scheduler::schedule(cells, self.config.workers, Arc::new(task)).await;

        let completed = store.completed_cells(&signature)?;
        let complete = summary.is_complete() && dispatched.is_subset(&completed);
        let cleanup = if complete {
            Cleanup::ClearCheckpoints
        } else {
            warn!(
                failed = summary.failed.len(),
                missing = dispatched.difference(&completed).count(),
                "Run incomplete, checkpoints kept for the next run"
            );
            Cleanup::KeepCheckpoints
        };
        let outcome = aggregate(&store, &signature, &work_dir, cleanup)?;

        let report = RunReport {
            summary,
            outcome,
            invalidated,
            complete,
        };
        info!(report = %report, "Run finished");
        Ok(report)
    }
}
