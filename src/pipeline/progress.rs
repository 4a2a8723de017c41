//! Progress reporting over grid cells.
//!
//! Components
//! -----------------
//! * [`CellStats`] – running tally of cell outcomes plus the smoothed work time of the cells
//!   that actually called the remote side. Skipped cells return instantly and would drag the
//!   mean towards zero, so they are counted but not timed.
//! * [`short_duration`] – `"850ms"`, `"12.3s"`, `"4m05s"` or `"1h02m"`.
//! * [`CellProgress`] – a live `indicatif` bar when the `progress` feature is enabled, a
//!   `debug!` line per cell otherwise. The scheduler calls it the same way in both builds.
use std::fmt;
use std::time::Duration;

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

/// Weight of the latest cell in the smoothed work time.
const WORK_SMOOTHING: f64 = 0.2;

/// Outcome counts and smoothed work time of the cells finished so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellStats {
    pub done: usize,
    pub skipped: usize,
    pub empty: usize,
    pub failed: usize,
    mean_work_secs: Option<f64>,
}

impl CellStats {
    /// Account for a finished cell.
    ///
    /// Arguments
    /// -----------------
    /// * `status`: outcome label (`done`, `skipped`, `empty` or `failed`).
    /// * `work`: time spent by the task after it got its worker slot, `None` when unknown
    ///   (panicked task).
    pub fn record(&mut self, status: &str, work: Option<Duration>) {
        match status {
            "done" => self.done += 1,
            "skipped" => self.skipped += 1,
            "empty" => self.empty += 1,
            _ => self.failed += 1,
        }
        if status == "skipped" {
            return;
        }
        if let Some(work) = work {
            let secs = work.as_secs_f64();
            self.mean_work_secs = Some(match self.mean_work_secs {
                None => secs,
                Some(mean) => WORK_SMOOTHING * secs + (1.0 - WORK_SMOOTHING) * mean,
            });
        }
    }

    pub fn finished(&self) -> usize {
        self.done + self.skipped + self.empty + self.failed
    }

    pub fn mean_work(&self) -> Option<Duration> {
        self.mean_work_secs.map(Duration::from_secs_f64)
    }
}

impl fmt::Display for CellStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "done {} · empty {} · skipped {} · failed {}",
            self.done, self.empty, self.skipped, self.failed
        )?;
        if let Some(mean) = self.mean_work() {
            write!(f, " | ~{}/cell", short_duration(mean))?;
        }
        Ok(())
    }
}

/// Human scale rendering of a cell duration.
pub fn short_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        0 => format!("{}ms", d.as_millis()),
        1..=59 => format!("{:.1}s", d.as_secs_f64()),
        60..=3599 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

#[cfg(feature = "progress")]
pub struct CellProgress {
    bar: ProgressBar,
    stats: CellStats,
}

#[cfg(feature = "progress")]
impl CellProgress {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total.max(1) as u64);
        let style = ProgressStyle::with_template(
            "{bar:40.cyan/blue} {pos}/{len} cells | ETA {eta_precise} | {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(200));
        CellProgress {
            bar,
            stats: CellStats::default(),
        }
    }

    pub fn cell_done(&mut self, status: &str, work: Option<Duration>) {
        self.stats.record(status, work);
        self.bar.set_message(self.stats.to_string());
        self.bar.inc(1);
    }

    pub fn finish(self) -> CellStats {
        self.bar.finish_and_clear();
        self.stats
    }
}

#[cfg(not(feature = "progress"))]
pub struct CellProgress {
    total: usize,
    stats: CellStats,
}

#[cfg(not(feature = "progress"))]
impl CellProgress {
    pub fn new(total: usize) -> Self {
        CellProgress {
            total,
            stats: CellStats::default(),
        }
    }

    pub fn cell_done(&mut self, status: &str, work: Option<Duration>) {
        self.stats.record(status, work);
        tracing::debug!(
            status,
            finished = self.stats.finished(),
            total = self.total,
            "{}",
            self.stats
        );
    }

    pub fn finish(self) -> CellStats {
        self.stats
    }
}
