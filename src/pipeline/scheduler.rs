//! Bounded fan-out of cell tasks.
//!
//! At most `workers` cells are in flight at any time (a [`Semaphore`] permit per task, tasks
//! held in a [`JoinSet`]). Completion order is free. A failing task, or a panicking one, is
//! logged and counted in [`RunSummary::failed`]; it never cancels its siblings. The function
//! returns only once every dispatched task has returned.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::constants::CellIndex;
use crate::geometry::Cell;
use crate::landwatch_errors::LandwatchError;
use crate::pipeline::cell_task::{CellOutcome, CellTask};
use crate::pipeline::progress::CellProgress;

/// Per-run counts of cell outcomes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub done: usize,
    /// Records written by the `done` cells of this run.
    pub rows: usize,
    pub skipped: usize,
    pub empty: usize,
    /// Failed cells with the error message, sorted by cell index.
    pub failed: Vec<(CellIndex, String)>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.done + self.skipped + self.empty + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, outcome: CellOutcome) {
        match outcome {
            CellOutcome::Done { rows } => {
                self.done += 1;
                self.rows += rows;
            }
            CellOutcome::Skipped => self.skipped += 1,
            CellOutcome::Empty(_) => self.empty += 1,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            writeln!(f, "Run summary")?;
            writeln!(f, "-----------")?;
            writeln!(f, "  {:<8} : {}", "done", self.done)?;
            writeln!(f, "  {:<8} : {}", "rows", self.rows)?;
            writeln!(f, "  {:<8} : {}", "skipped", self.skipped)?;
            writeln!(f, "  {:<8} : {}", "empty", self.empty)?;
            write!(f, "  {:<8} : {}", "failed", self.failed.len())?;
            for (cell, message) in &self.failed {
                write!(f, "\n    cell {cell}: {message}")?;
            }
            Ok(())
        } else {
            write!(
                f,
                "RunSummary(done={}, rows={}, skipped={}, empty={}, failed={})",
                self.done,
                self.rows,
                self.skipped,
                self.empty,
                self.failed.len()
            )
        }
    }
}

/// Process `cells` with at most `workers` concurrent tasks.
///
/// Arguments
/// -----------------
/// * `cells`: cells to dispatch, in any order.
/// * `workers`: upper bound on concurrently running tasks (clamped to ≥ 1).
/// * `task`: shared collaborators and configuration of the run.
///
/// Return
/// ----------
/// * A [`RunSummary`] once every task has returned. Errors never escape: they are
///   recorded per cell.
pub async fn schedule(cells: Vec<Cell>, workers: usize, task: Arc<CellTask>) -> RunSummary {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut progress = CellProgress::new(cells.len());
    let mut tasks = JoinSet::new();
    let mut owners = HashMap::new();

    info!(cells = cells.len(), workers, "Scheduling cells");
    for cell in cells {
        let task = Arc::clone(&task);
        let semaphore = Arc::clone(&semaphore);
        let handle = tasks.spawn(async move {
            let permit = semaphore.acquire_owned().await;
            let started = Instant::now();
            let result = match permit {
                Ok(_permit) => task.process(cell).await,
                Err(e) => Err(LandwatchError::TaskJoin {
                    cell: cell.index,
                    message: e.to_string(),
                }),
            };
            (result, started.elapsed())
        });
        owners.insert(handle.id(), cell.index);
    }

    let mut summary = RunSummary::default();
    while let Some(joined) = tasks.join_next_with_id().await {
        let (cell, result, work) = match joined {
            Ok((id, (result, work))) => (owners.get(&id).copied(), result, Some(work)),
            Err(e) => {
                let cell = owners.get(&e.id()).copied();
                let err = LandwatchError::TaskJoin {
                    cell: cell.unwrap_or_default(),
                    message: e.to_string(),
                };
                (cell, Err(err), None)
            }
        };
        let cell = cell.unwrap_or_default();
        match result {
            Ok(outcome) => {
                progress.cell_done(outcome.label(), work);
                summary.record(outcome);
            }
            Err(e) => {
                error!(cell, error = %e, "Cell failed, it will be retried on the next run");
                progress.cell_done("failed", work);
                summary.failed.push((cell, e.to_string()));
            }
        }
    }
    let stats = progress.finish();

    summary.failed.sort();
    info!(%stats, "All cells returned");
    summary
}
