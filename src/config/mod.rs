//! # Run configuration
//!
//! This module defines [`RunConfig`](crate::config::RunConfig), the **immutable parameter
//! record** shared read-only by every cell task, and its fluent builder
//! [`RunConfigBuilder`](crate::config::RunConfigBuilder).
//!
//! ## Purpose
//!
//! A run is fully described by one `RunConfig`:
//!
//! - where checkpoints and outputs live (`work_dir`) and how many cells run in parallel
//!   (`workers`),
//! - which band/satellite/date ranges are extracted and how the series are preprocessed
//!   (`ts_params`),
//! - which change-detection algorithms run and with which parameters (`*_params` blocks),
//! - how remote collaborator calls are retried (`retry`) and where the service lives (`service`).
//!
//! The record is loaded once (from JSON, or through the builder), validated once, persisted as
//! `config.json` next to the checkpoints, and then only read. Cell tasks work from read-only
//! values derived from it, so a task is reproducible from the serialized copy alone.
//!
//! ## JSON layout
//!
//! ```json
//! {
//!   "work_dir": "/data/runs/drc",
//!   "workers": 8,
//!   "ts_params": {
//!     "band": "ndfi", "satellite": "landsat",
//!     "start_calibration": "2010-01-01", "start_monitor": "2018-01-01",
//!     "end_monitor": "2021-12-31",
//!     "grid_size": 0.5, "point_id": "point_id", "outlier_removal": true, "smooth_ts": true
//!   },
//!   "cusum_params": { "run": true, "nr_of_bootstraps": 1000 },
//!   "bfast_params": { "run": true, "harmonics": 3, "hfrac": 0.25 },
//!   "bs_slope_params": { "run": false },
//!   "ts_metrics_params": { "run": true },
//!   "landtrendr_params": { "run": true, "maxSegments": 6 },
//!   "ccdc_params": { "run": false, "minObservations": 8 },
//!   "global_products": { "run": true }
//! }
//! ```
//!
//! Every field has a default; missing blocks fall back to [`Default`].
//! The keys `start_date` / `end_date` are accepted as aliases of
//! `start_calibration` / `end_monitor`.
//!
//! ## See also
//!
//! * [`ParamSignature`](crate::config::signature::ParamSignature) – key scoping checkpoints
//!   and output names.
//! * [`RetryPolicy`](crate::extract::retry::RetryPolicy) – built from the `retry` block.
use std::fmt;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::constants::{CONFIG_FILE, DEFAULT_SMOOTH_WINDOW_DAYS};
use crate::extract::retry::RetryPolicy;
use crate::landwatch_errors::LandwatchError;
use crate::segmentation::DisturbanceMask;

pub mod signature;

pub use signature::ParamSignature;

/// Time-series extraction and preprocessing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsParams {
    /// Band (or spectral index) all algorithms run on.
    pub band: String,
    /// Additional bands extracted and preprocessed alongside `band`, stored in the full snapshot.
    pub extra_bands: Vec<String>,
    pub satellite: String,
    /// Start of the historical (calibration) period.
    #[serde(alias = "start_date")]
    pub start_calibration: NaiveDate,
    /// Observations strictly after this date form the monitoring subset.
    pub start_monitor: NaiveDate,
    #[serde(alias = "end_date")]
    pub end_monitor: NaiveDate,
    /// Width and height of a processing grid cell, in degrees.
    pub grid_size: f64,
    /// Name of the point identifier attribute on the remote point dataset.
    pub point_id: String,
    pub outlier_removal: bool,
    pub smooth_ts: bool,
    pub smooth_window_days: i64,
}

impl Default for TsParams {
    fn default() -> Self {
        TsParams {
            band: "ndfi".into(),
            extra_bands: Vec::new(),
            satellite: "landsat".into(),
            start_calibration: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or_default(),
            start_monitor: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap_or_default(),
            end_monitor: NaiveDate::from_ymd_opt(2020, 12, 31).unwrap_or_default(),
            grid_size: 0.5,
            point_id: "point_id".into(),
            outlier_removal: true,
            smooth_ts: true,
            smooth_window_days: DEFAULT_SMOOTH_WINDOW_DAYS,
        }
    }
}

impl TsParams {
    /// Primary band first, then the extra bands (duplicates removed).
    pub fn all_bands(&self) -> Vec<String> {
        let mut bands = vec![self.band.clone()];
        for b in &self.extra_bands {
            if !bands.contains(b) {
                bands.push(b.clone());
            }
        }
        bands
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CusumParams {
    pub run: bool,
    pub nr_of_bootstraps: usize,
}

impl Default for CusumParams {
    fn default() -> Self {
        CusumParams {
            run: true,
            nr_of_bootstraps: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BfastParams {
    pub run: bool,
    /// Number of harmonic terms of the season model.
    pub harmonics: usize,
    /// MOSUM bandwidth as a fraction of the history length.
    pub hfrac: f64,
    /// Scale of the monitoring boundary.
    pub critical_value: f64,
    /// Include a linear trend term in the history model.
    pub trend: bool,
}

impl Default for BfastParams {
    fn default() -> Self {
        BfastParams {
            run: true,
            harmonics: 3,
            hfrac: 0.25,
            critical_value: 2.0,
            trend: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BsSlopeParams {
    pub run: bool,
    pub nr_of_bootstraps: usize,
}

impl Default for BsSlopeParams {
    fn default() -> Self {
        BsSlopeParams {
            run: true,
            nr_of_bootstraps: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsMetricsParams {
    pub run: bool,
}

impl Default for TsMetricsParams {
    fn default() -> Self {
        TsMetricsParams { run: true }
    }
}

/// LandTrendr segmentation block.
///
/// Keys other than `run`, `concurrency` and `mask` are forwarded verbatim to the
/// segmentation primitive, on top of [`LandTrendrParams::default_segmentation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandTrendrParams {
    pub run: bool,
    /// Maximum number of points of one cell segmented at the same time.
    pub concurrency: usize,
    pub mask: Option<DisturbanceMask>,
    #[serde(flatten)]
    pub segmentation: Map<String, Value>,
}

impl Default for LandTrendrParams {
    fn default() -> Self {
        LandTrendrParams {
            run: false,
            concurrency: 16,
            mask: None,
            segmentation: Map::new(),
        }
    }
}

impl LandTrendrParams {
    /// Standard LandTrendr fitting parameters.
    pub fn default_segmentation() -> Map<String, Value> {
        let defaults = json!({
            "maxSegments": 6,
            "spikeThreshold": 0.9,
            "vertexCountOvershoot": 3,
            "preventOneYearRecovery": true,
            "recoveryThreshold": 0.25,
            "pvalThreshold": 0.05,
            "bestModelProportion": 0.75,
            "minObservationsNeeded": 6
        });
        match defaults {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Defaults overlaid with the user supplied keys.
    pub fn segmentation_params(&self) -> Map<String, Value> {
        let mut params = Self::default_segmentation();
        for (k, v) in &self.segmentation {
            params.insert(k.clone(), v.clone());
        }
        params
    }
}

/// CCDC block, computed remotely.
///
/// Keys other than `run` are forwarded to the fitting primitive on top of
/// [`CcdcParams::default_fitting`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcdcParams {
    pub run: bool,
    #[serde(flatten)]
    pub fitting: Map<String, Value>,
}

impl CcdcParams {
    pub fn default_fitting() -> Map<String, Value> {
        let defaults = json!({
            "breakpointBands": ["green", "red", "nir", "swir1", "swir2"],
            "minObservations": 6,
            "chiSquareProbability": 0.99,
            "minNumOfYearsScaler": 1.33,
            "lambda": 0.002,
            "maxIterations": 25000
        });
        match defaults {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    pub fn fitting_params(&self) -> Map<String, Value> {
        let mut params = Self::default_fitting();
        params.extend(self.fitting.clone());
        params
    }
}

/// Sampling of global land-cover and forest-change products at the points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalProductsParams {
    pub run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryParams {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryParams {
    fn default() -> Self {
        RetryParams {
            max_attempts: 5,
            base_delay_ms: 1000,
            multiplier: 2.0,
        }
    }
}

impl RetryParams {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            self.multiplier,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceParams {
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for ServiceParams {
    fn default() -> Self {
        ServiceParams {
            endpoint: "http://127.0.0.1:8080".into(),
            timeout_secs: 120,
        }
    }
}

/// Complete, validated description of one processing run.
///
/// Fields
/// -----------------
/// * `work_dir` – directory holding `config.json`, the `.grid` sentinel, the per-cell
///   checkpoints and the final outputs. `None` resolves to
///   `~/module_results/sbae_point_analysis`.
/// * `workers` – size of the cell worker pool.
/// * `seed` – base seed of the bootstrap procedures; combined with each `point_id`.
/// * `ts_params` – band, satellite, calibration/monitoring dates, grid size and the
///   preprocessing toggles.
/// * `cusum_params`, `bfast_params`, `bs_slope_params`, `ts_metrics_params`,
///   `landtrendr_params`, `ccdc_params`, `global_products` – per-algorithm `{run, ...}`
///   blocks. At least one must be enabled.
/// * `retry` – retry policy of remote calls.
/// * `service` – remote extraction/segmentation endpoint.
///
/// See also
/// -----------------
/// * [`RunConfig::builder`] – fluent construction with validation.
/// * [`RunConfig::from_json_file`] – load + validate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub work_dir: Option<Utf8PathBuf>,
    pub workers: usize,
    pub seed: u64,
    pub ts_params: TsParams,
    pub cusum_params: CusumParams,
    pub bfast_params: BfastParams,
    pub bs_slope_params: BsSlopeParams,
    pub ts_metrics_params: TsMetricsParams,
    pub landtrendr_params: LandTrendrParams,
    pub ccdc_params: CcdcParams,
    pub global_products: GlobalProductsParams,
    pub retry: RetryParams,
    pub service: ServiceParams,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            work_dir: None,
            workers: 4,
            seed: 42,
            ts_params: TsParams::default(),
            cusum_params: CusumParams::default(),
            bfast_params: BfastParams::default(),
            bs_slope_params: BsSlopeParams::default(),
            ts_metrics_params: TsMetricsParams::default(),
            landtrendr_params: LandTrendrParams::default(),
            ccdc_params: CcdcParams::default(),
            global_products: GlobalProductsParams::default(),
            retry: RetryParams::default(),
            service: ServiceParams::default(),
        }
    }
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::new()
    }

    /// Load a configuration from a JSON file and validate it.
    ///
    /// Arguments
    /// -----------------
    /// * `path`: path of the JSON document.
    ///
    /// Return
    /// ----------
    /// * The validated [`RunConfig`], or [`LandwatchError::InvalidConfig`] /
    ///   I/O / JSON errors.
    pub fn from_json_file(path: &Utf8Path) -> Result<Self, LandwatchError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, LandwatchError> {
        let config: RunConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write `config.json` into `dir` and return its path.
    pub fn persist(&self, dir: &Utf8Path) -> Result<Utf8PathBuf, LandwatchError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Resolve `work_dir`, falling back to `~/module_results/sbae_point_analysis`.
    pub fn resolved_work_dir(&self) -> Result<Utf8PathBuf, LandwatchError> {
        if let Some(dir) = &self.work_dir {
            return Ok(dir.clone());
        }
        let base = BaseDirs::new().ok_or(LandwatchError::NoHomeDirectory)?;
        let home = Utf8Path::from_path(base.home_dir()).ok_or_else(|| {
            LandwatchError::InvalidConfig("home directory is not valid UTF-8".into())
        })?;
        Ok(home.join("module_results").join("sbae_point_analysis"))
    }

    pub fn signature(&self) -> ParamSignature {
        ParamSignature::from_config(self)
    }

    /// Whether any algorithm consuming the extracted time series is enabled.
    pub fn any_series_algorithm(&self) -> bool {
        self.cusum_params.run
            || self.bfast_params.run
            || self.bs_slope_params.run
            || self.ts_metrics_params.run
            || self.landtrendr_params.run
    }

    /// Whether any algorithm at all is enabled, remote products included.
    pub fn any_algorithm(&self) -> bool {
        self.any_series_algorithm() || self.ccdc_params.run || self.global_products.run
    }

    /// Check every invariant of the record.
    pub fn validate(&self) -> Result<(), LandwatchError> {
        let invalid = |msg: &str| Err(LandwatchError::InvalidConfig(msg.into()));
        let ts = &self.ts_params;

        if self.workers == 0 {
            return invalid("workers must be >= 1");
        }
        if ts.band.trim().is_empty() {
            return invalid("ts_params.band must not be empty");
        }
        if ts.satellite.trim().is_empty() {
            return invalid("ts_params.satellite must not be empty");
        }
        if !(ts.grid_size.is_finite() && ts.grid_size > 0.0) {
            return invalid("ts_params.grid_size must be > 0");
        }
        if !(ts.start_calibration < ts.start_monitor && ts.start_monitor < ts.end_monitor) {
            return invalid("require start_calibration < start_monitor < end_monitor");
        }
        if ts.smooth_window_days < 1 {
            return invalid("ts_params.smooth_window_days must be >= 1");
        }
        if !self.any_algorithm() {
            return invalid("no algorithm enabled");
        }

        if self.cusum_params.run && self.cusum_params.nr_of_bootstraps == 0 {
            return invalid("cusum_params.nr_of_bootstraps must be >= 1");
        }
        if self.bs_slope_params.run && self.bs_slope_params.nr_of_bootstraps == 0 {
            return invalid("bs_slope_params.nr_of_bootstraps must be >= 1");
        }
        let bf = &self.bfast_params;
        if bf.run {
            if bf.harmonics == 0 {
                return invalid("bfast_params.harmonics must be >= 1");
            }
            if !(bf.hfrac > 0.0 && bf.hfrac < 1.0) {
                return invalid("bfast_params.hfrac must be in (0, 1)");
            }
            if !(bf.critical_value > 0.0) {
                return invalid("bfast_params.critical_value must be > 0");
            }
        }
        if self.landtrendr_params.run && self.landtrendr_params.concurrency == 0 {
            return invalid("landtrendr_params.concurrency must be >= 1");
        }

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be >= 1");
        }
        if !(self.retry.multiplier >= 1.0) {
            return invalid("retry.multiplier must be >= 1");
        }
        if self.service.endpoint.trim().is_empty() {
            return invalid("service.endpoint must not be empty");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RunConfig::default(),
        }
    }

    pub fn work_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }
    pub fn workers(mut self, v: usize) -> Self {
        self.config.workers = v;
        self
    }
    pub fn seed(mut self, v: u64) -> Self {
        self.config.seed = v;
        self
    }

    // --- Time series ---
    pub fn band(mut self, v: impl Into<String>) -> Self {
        self.config.ts_params.band = v.into();
        self
    }
    pub fn extra_bands(mut self, v: Vec<String>) -> Self {
        self.config.ts_params.extra_bands = v;
        self
    }
    pub fn satellite(mut self, v: impl Into<String>) -> Self {
        self.config.ts_params.satellite = v.into();
        self
    }
    pub fn start_calibration(mut self, v: NaiveDate) -> Self {
        self.config.ts_params.start_calibration = v;
        self
    }
    pub fn start_monitor(mut self, v: NaiveDate) -> Self {
        self.config.ts_params.start_monitor = v;
        self
    }
    pub fn end_monitor(mut self, v: NaiveDate) -> Self {
        self.config.ts_params.end_monitor = v;
        self
    }
    pub fn grid_size(mut self, v: f64) -> Self {
        self.config.ts_params.grid_size = v;
        self
    }
    pub fn point_id(mut self, v: impl Into<String>) -> Self {
        self.config.ts_params.point_id = v.into();
        self
    }
    pub fn outlier_removal(mut self, v: bool) -> Self {
        self.config.ts_params.outlier_removal = v;
        self
    }
    pub fn smooth_ts(mut self, v: bool) -> Self {
        self.config.ts_params.smooth_ts = v;
        self
    }
    pub fn smooth_window_days(mut self, v: i64) -> Self {
        self.config.ts_params.smooth_window_days = v;
        self
    }

    // --- Algorithms ---
    pub fn cusum(mut self, params: CusumParams) -> Self {
        self.config.cusum_params = params;
        self
    }
    pub fn bfast(mut self, params: BfastParams) -> Self {
        self.config.bfast_params = params;
        self
    }
    pub fn bs_slope(mut self, params: BsSlopeParams) -> Self {
        self.config.bs_slope_params = params;
        self
    }
    pub fn ts_metrics(mut self, run: bool) -> Self {
        self.config.ts_metrics_params.run = run;
        self
    }
    pub fn landtrendr(mut self, params: LandTrendrParams) -> Self {
        self.config.landtrendr_params = params;
        self
    }
    pub fn ccdc(mut self, params: CcdcParams) -> Self {
        self.config.ccdc_params = params;
        self
    }
    pub fn global_products(mut self, run: bool) -> Self {
        self.config.global_products.run = run;
        self
    }

    // --- Remote ---
    pub fn retry(mut self, params: RetryParams) -> Self {
        self.config.retry = params;
        self
    }
    pub fn service(mut self, params: ServiceParams) -> Self {
        self.config.service = params;
        self
    }

    pub fn build(self) -> Result<RunConfig, LandwatchError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl fmt::Display for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ts = &self.ts_params;
        if f.alternate() {
            const PARAM_COL: usize = 46;
            writeln!(f, "Landwatch Run Parameters")?;
            writeln!(f, "------------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            writeln!(f, "[Run]")?;
            line!(
                "work_dir          = {}",
                self.work_dir
                    .as_ref()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "<home>/module_results/sbae_point_analysis".into()),
                "Checkpoints and outputs"
            )?;
            line!("workers           = {}", self.workers, "Parallel cell tasks")?;
            line!("seed              = {}", self.seed, "Bootstrap base seed")?;

            writeln!(f, "\n[Time series]")?;
            line!("band              = {}", ts.band, "Analysed band / index")?;
            line!("satellite         = {}", ts.satellite, "Imagery source")?;
            line!(
                "start_calibration = {}",
                ts.start_calibration,
                "Start of history"
            )?;
            line!(
                "start_monitor     = {}",
                ts.start_monitor,
                "Start of monitoring"
            )?;
            line!("end_monitor       = {}", ts.end_monitor, "End of monitoring")?;
            line!("grid_size         = {}", ts.grid_size, "Cell size (deg)")?;
            line!(
                "outlier_removal   = {}",
                ts.outlier_removal,
                "Drop |z| > 3 observations"
            )?;
            line!(
                "smooth_ts         = {}",
                ts.smooth_ts,
                "Trailing rolling mean"
            )?;
            line!(
                "smooth_window     = {} d",
                ts.smooth_window_days,
                "Rolling window width"
            )?;

            writeln!(f, "\n[Algorithms]")?;
            line!("cusum             = {}", self.cusum_params.run, "CUSUM")?;
            line!("bfast             = {}", self.bfast_params.run, "BFAST monitor")?;
            line!(
                "bs_slope          = {}",
                self.bs_slope_params.run,
                "Bootstrap slope"
            )?;
            line!(
                "ts_metrics        = {}",
                self.ts_metrics_params.run,
                "Timescan metrics"
            )?;
            line!(
                "landtrendr        = {}",
                self.landtrendr_params.run,
                "LandTrendr segmentation"
            )?;
            line!("ccdc              = {}", self.ccdc_params.run, "CCDC (remote)")?;
            line!(
                "global_products   = {}",
                self.global_products.run,
                "ESA / GFC / TMF sampling"
            )?;

            writeln!(f, "\n[Remote]")?;
            line!("endpoint          = {}", self.service.endpoint, "Service URL")?;
            line!(
                "max_attempts      = {}",
                self.retry.max_attempts,
                "Attempts per remote call"
            )?;
            Ok(())
        } else {
            write!(
                f,
                "RunConfig(workers={}, band={}, satellite={}, calibration={}, \
                 monitor=({}, {}], grid={})",
                self.workers,
                ts.band,
                ts.satellite,
                ts.start_calibration,
                ts.start_monitor,
                ts.end_monitor,
                ts.grid_size,
            )
        }
    }
}
