//! # Cell task
//!
//! One unit of scheduled work: everything that happens to a single grid cell.
//!
//! ```text
//! checkpoint? ──yes──▶ Skipped
//!     │no
//! count_points ──0──────────▶ empty marker "0 points"
//!     │        ──unresolved─▶ empty marker "unresolved point count"
//!     │n > 0
//! [series algorithms] extract ──▶ preprocess ──▶ local detectors ──▶ LandTrendr
//! [ccdc]              remote breaks
//! [global products]   remote samples
//!     │
//! inner join on point_id ──▶ result checkpoint
//! ```
//!
//! The time series are only extracted when an algorithm consumes them; a run limited to the
//! remote products goes from the count straight to their calls.
//!
//! Remote calls go through the run's [`RetryPolicy`]. A call that still fails after its
//! retries makes the whole task fail before anything is written, so the cell stays without
//! checkpoint and is picked up by the next run.
//!
//! The local part (preprocessing and detectors) is CPU-bound and runs on the blocking pool.
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, trace, warn};

use crate::checkpoint::{CheckpointStore, EmptyReason};
use crate::config::{ParamSignature, RunConfig};
use crate::constants::{
    CellIndex, Degree, PointId, COL_DATES, COL_MON_DATES, COL_MON_IMAGES, COL_MON_TS, COL_TS,
};
use crate::detectors::landtrendr::LandTrendr;
use crate::detectors::{detectors_for, run_detectors, ChangeDetector};
use crate::extract::ccdc::{CcdcRequest, CcdcSource, RemotePart};
use crate::extract::global_products::GlobalProductSampler;
use crate::extract::retry::RetryPolicy;
use crate::extract::{ExtractionRequest, PointCount, TimeSeriesExtractor};
use crate::geometry::Cell;
use crate::landwatch_errors::LandwatchError;
use crate::results::record::{inner_join, CellResult, FieldValue, Fields, PointRecord};
use crate::segmentation::Segmenter;
use crate::timeseries::preprocess::{monitoring_subset, Preprocessor};
use crate::timeseries::{MonitoringSubset, PointSeries, TimeSeries};

/// How a cell task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOutcome {
    /// A result checkpoint with `rows` records was written.
    Done { rows: usize },
    /// A checkpoint already existed, nothing was called.
    Skipped,
    /// An empty marker was written.
    Empty(EmptyReason),
}

impl CellOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CellOutcome::Done { .. } => "done",
            CellOutcome::Skipped => "skipped",
            CellOutcome::Empty(_) => "empty",
        }
    }
}

/// Local, synchronous half of a cell task.
pub(crate) struct LocalAnalysis {
    band: String,
    extra_bands: Vec<String>,
    start_monitor: NaiveDate,
    preprocessor: Preprocessor,
    detectors: Vec<Box<dyn ChangeDetector>>,
    keep_primary: bool,
}

/// Output of [`LocalAnalysis::run`], keyed by `point_id`.
#[derive(Debug, Default)]
pub(crate) struct LocalOutput {
    pub fields: BTreeMap<PointId, Fields>,
    pub geometry: BTreeMap<PointId, (Degree, Degree)>,
    /// Processed primary-band series, only filled when LandTrendr needs them.
    pub primary: BTreeMap<PointId, TimeSeries>,
}

impl LocalAnalysis {
    pub(crate) fn new(config: &RunConfig) -> Self {
        let ts = &config.ts_params;
        LocalAnalysis {
            band: ts.band.clone(),
            extra_bands: ts.extra_bands.clone(),
            start_monitor: ts.start_monitor,
            preprocessor: Preprocessor::from_params(ts),
            detectors: detectors_for(config),
            keep_primary: config.landtrendr_params.run,
        }
    }

    /// Preprocess every point and run the local detectors.
    ///
    /// Points without any usable observation in the primary band are dropped.
    pub(crate) fn run(&self, cell: CellIndex, points: Vec<PointSeries>) -> LocalOutput {
        let mut out = LocalOutput::default();
        for point in points {
            let point_id = point.point.point_id;
            let Some(raw) = point.band(&self.band) else {
                trace!(cell, point_id, band = %self.band, "Primary band missing, point dropped");
                continue;
            };
            let series = self.preprocessor.process(raw);
            if series.is_empty() {
                trace!(cell, point_id, "No usable observation, point dropped");
                continue;
            }
            let monitoring = monitoring_subset(&series, self.start_monitor);

            let mut fields = base_fields(&series, &monitoring);
            for band in &self.extra_bands {
                let (dates, values) = match point.band(band) {
                    Some(raw) => {
                        let processed = self.preprocessor.process(raw);
                        (
                            FieldValue::Dates(processed.dates().to_vec()),
                            FieldValue::Series(processed.values().to_vec()),
                        )
                    }
                    None => (FieldValue::Null, FieldValue::Null),
                };
                fields.insert(format!("{COL_DATES}_{band}"), dates);
                fields.insert(format!("{COL_TS}_{band}"), values);
            }
            fields.extend(run_detectors(&self.detectors, point_id, &series, &monitoring));

            if out.fields.insert(point_id, fields).is_some() {
                warn!(cell, point_id, "Point extracted twice in the same cell, last one kept");
            }
            out.geometry.insert(point_id, (point.point.lon(), point.point.lat()));
            if self.keep_primary {
                out.primary.insert(point_id, series);
            }
        }
        out
    }
}

fn base_fields(series: &TimeSeries, monitoring: &MonitoringSubset) -> Fields {
    Fields::from([
        (COL_DATES.to_string(), FieldValue::Dates(series.dates().to_vec())),
        (COL_TS.to_string(), FieldValue::Series(series.values().to_vec())),
        (
            COL_MON_DATES.to_string(),
            FieldValue::Dates(monitoring.series.dates().to_vec()),
        ),
        (
            COL_MON_TS.to_string(),
            FieldValue::Series(monitoring.series.values().to_vec()),
        ),
        (
            COL_MON_IMAGES.to_string(),
            FieldValue::Integer(monitoring.images as i64),
        ),
    ])
}

/// Queue a remote part for the join; local locations take precedence over remote ones.
fn add_remote_part(
    parts: &mut Vec<BTreeMap<PointId, Fields>>,
    geometry: &mut BTreeMap<PointId, (Degree, Degree)>,
    part: RemotePart,
) {
    for (point_id, location) in part.geometry {
        geometry.entry(point_id).or_insert(location);
    }
    parts.push(part.fields);
}

/// Remote collaborators of a run.
///
/// The extractor and the segmenter are always present; the CCDC source and the product
/// sampler are only required when their algorithm is enabled.
#[derive(Clone)]
pub struct Remotes {
    pub extractor: Arc<dyn TimeSeriesExtractor>,
    pub segmenter: Arc<dyn Segmenter>,
    pub ccdc: Option<Arc<dyn CcdcSource>>,
    pub products: Option<Arc<dyn GlobalProductSampler>>,
}

impl Remotes {
    pub fn new(extractor: Arc<dyn TimeSeriesExtractor>, segmenter: Arc<dyn Segmenter>) -> Self {
        Remotes {
            extractor,
            segmenter,
            ccdc: None,
            products: None,
        }
    }

    pub fn with_ccdc(mut self, source: Arc<dyn CcdcSource>) -> Self {
        self.ccdc = Some(source);
        self
    }

    pub fn with_global_products(mut self, sampler: Arc<dyn GlobalProductSampler>) -> Self {
        self.products = Some(sampler);
        self
    }
}

/// Everything a cell needs, built once per run and shared by all tasks.
pub struct CellTask {
    signature: ParamSignature,
    store: CheckpointStore,
    extractor: Arc<dyn TimeSeriesExtractor>,
    request: ExtractionRequest,
    retry: RetryPolicy,
    /// Local analysis, `None` when no algorithm consumes the time series.
    analysis: Option<Arc<LocalAnalysis>>,
    landtrendr: Option<LandTrendr>,
    ccdc: Option<(Arc<dyn CcdcSource>, CcdcRequest)>,
    products: Option<(Arc<dyn GlobalProductSampler>, String)>,
}

impl CellTask {
    /// Build the shared task of a run.
    ///
    /// Return
    /// ----------
    /// * The task, or [`LandwatchError::InvalidConfig`] when an enabled remote product has no
    ///   collaborator in `remotes`.
    pub fn new(
        config: &RunConfig,
        store: CheckpointStore,
        remotes: Remotes,
    ) -> Result<Self, LandwatchError> {
        let ccdc = match (config.ccdc_params.run, remotes.ccdc) {
            (true, Some(source)) => Some((source, CcdcRequest::from_config(config))),
            (true, None) => {
                return Err(LandwatchError::InvalidConfig(
                    "ccdc_params.run requires a CCDC source".into(),
                ))
            }
            (false, _) => None,
        };
        let products = match (config.global_products.run, remotes.products) {
            (true, Some(sampler)) => Some((sampler, config.ts_params.point_id.clone())),
            (true, None) => {
                return Err(LandwatchError::InvalidConfig(
                    "global_products.run requires a product sampler".into(),
                ))
            }
            (false, _) => None,
        };
        let segmenter = remotes.segmenter;

        Ok(CellTask {
            signature: config.signature(),
            store,
            extractor: remotes.extractor,
            request: ExtractionRequest::from_params(&config.ts_params),
            retry: config.retry.policy(),
            analysis: config
                .any_series_algorithm()
                .then(|| Arc::new(LocalAnalysis::new(config))),
            landtrendr: config
                .landtrendr_params
                .run
                .then(|| LandTrendr::new(config, segmenter)),
            ccdc,
            products,
        })
    }

    pub fn signature(&self) -> &ParamSignature {
        &self.signature
    }

    /// Process one cell.
    ///
    /// Arguments
    /// -----------------
    /// * `cell`: the grid cell to process.
    ///
    /// Return
    /// ----------
    /// * The [`CellOutcome`], or the error that prevented any checkpoint from being written
    ///   (exhausted retries, permanent remote failure, I/O).
    pub async fn process(&self, cell: Cell) -> Result<CellOutcome, LandwatchError> {
        let idx = cell.index;
        if self.store.exists(idx, &self.signature) {
            debug!(cell = idx, "Checkpoint found, cell skipped");
            return Ok(CellOutcome::Skipped);
        }

        let count = self
            .retry
            .run(&format!("count points of cell {idx}"), || {
                self.extractor.count_points(&cell)
            })
            .await?;
        match count {
            PointCount::Resolved(0) => return self.finish_empty(idx, EmptyReason::NoPoints),
            PointCount::Unresolved => {
                warn!(cell = idx, "Point count could not be resolved");
                return self.finish_empty(idx, EmptyReason::UnresolvedCount);
            }
            PointCount::Resolved(points) => debug!(cell = idx, points, "Cell holds points"),
        }

        let mut parts = Vec::new();
        let mut geometry = BTreeMap::new();

        if let Some(analysis) = &self.analysis {
            let raw = self
                .retry
                .run(&format!("extract cell {idx}"), || {
                    self.extractor.extract(&cell, &self.request)
                })
                .await?;

            let analysis = Arc::clone(analysis);
            let local = tokio::task::spawn_blocking(move || analysis.run(idx, raw))
                .await
                .map_err(|e| LandwatchError::TaskJoin {
                    cell: idx,
                    message: e.to_string(),
                })?;
            if local.fields.is_empty() {
                return self.finish_empty(idx, EmptyReason::NoObservations);
            }

            parts.push(local.fields);
            if let Some(ltr) = &self.landtrendr {
                parts.push(ltr.run(idx, &local.primary).await?);
            }
            geometry = local.geometry;
        }

        if let Some((source, request)) = &self.ccdc {
            let breaks = self
                .retry
                .run(&format!("CCDC of cell {idx}"), || source.breaks(&cell, request))
                .await?;
            add_remote_part(&mut parts, &mut geometry, RemotePart::from(breaks));
        }

        if let Some((sampler, point_id_field)) = &self.products {
            let samples = self
                .retry
                .run(&format!("global products of cell {idx}"), || {
                    sampler.sample(&cell, point_id_field)
                })
                .await?;
            add_remote_part(&mut parts, &mut geometry, RemotePart::from(samples));
        }

        let records: Vec<PointRecord> = inner_join(parts)
            .into_iter()
            .map(|(point_id, fields)| PointRecord {
                point_id,
                geometry: geometry.get(&point_id).copied(),
                fields,
            })
            .collect();
        if records.is_empty() {
            return self.finish_empty(idx, EmptyReason::NoObservations);
        }
        let rows = records.len();
        self.store
            .write_result(&CellResult { cell: idx, records }, &self.signature)?;
        info!(cell = idx, rows, "Cell done");
        Ok(CellOutcome::Done { rows })
    }

    fn finish_empty(
        &self,
        cell: CellIndex,
        reason: EmptyReason,
    ) -> Result<CellOutcome, LandwatchError> {
        self.store.write_empty(cell, &self.signature, reason)?;
        info!(cell, reason = %reason, "Cell empty");
        Ok(CellOutcome::Empty(reason))
    }
}
