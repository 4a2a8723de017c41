#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Datelike, NaiveDate};
use landwatch::config::{BsSlopeParams, CusumParams, LandTrendrParams, RetryParams, RunConfig};
use landwatch::constants::{CellIndex, PointId};
use landwatch::extract::ccdc::{CcdcBreak, CcdcRequest, CcdcSource};
use landwatch::extract::global_products::{GlobalProductSampler, ProductSample};
use landwatch::extract::{ExtractionRequest, PointCount, TimeSeriesExtractor};
use landwatch::geometry::{BoundingBox, Cell, SamplePoint};
use landwatch::landwatch_errors::LandwatchError;
use landwatch::pipeline::Remotes;
use landwatch::segmentation::{SegmentationRequest, Segmenter, Vertex};
use landwatch::timeseries::{PointSeries, TimeSeries};

/// How a fake call for one cell misbehaves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Failure {
    /// Fail transiently this many times, then succeed.
    Transient(usize),
    /// Always fail transiently.
    Always,
    /// Fail once with a non-retryable status.
    Permanent,
}

/// In-memory stand-in for the imagery platform and the segmentation primitive.
///
/// Points sit on a regular 0.5° lattice over `[0, 2) x [0, 2)`, ids 1..=16. Points whose id
/// is a multiple of 3 lose vegetation in mid-2019.
#[derive(Default)]
pub struct FakeService {
    pub points: Vec<SamplePoint>,
    pub count_calls: AtomicUsize,
    pub extract_calls: AtomicUsize,
    pub segment_calls: AtomicUsize,
    pub ccdc_calls: AtomicUsize,
    pub product_calls: AtomicUsize,
    pub unresolved: HashSet<CellIndex>,
    /// Extra point injected in a cell, to provoke a duplicate across cells.
    pub injected: HashMap<CellIndex, SamplePoint>,
    failures: Mutex<HashMap<CellIndex, Failure>>,
}

impl FakeService {
    pub fn new() -> Self {
        let points = (0..4)
            .flat_map(|i| (0..4).map(move |j| (i, j)))
            .enumerate()
            .map(|(k, (i, j))| {
                let (lon, lat) = (0.25 + 0.5 * i as f64, 0.25 + 0.5 * j as f64);
                SamplePoint::new(k as PointId + 1, lon, lat)
            })
            .collect();
        FakeService {
            points,
            ..Default::default()
        }
    }

    pub fn fail_extract(self, cell: CellIndex, failure: Failure) -> Self {
        self.failures.lock().unwrap().insert(cell, failure);
        self
    }

    pub fn unresolved(mut self, cell: CellIndex) -> Self {
        self.unresolved.insert(cell);
        self
    }

    pub fn inject(mut self, cell: CellIndex, point: SamplePoint) -> Self {
        self.injected.insert(cell, point);
        self
    }

    pub fn remote_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
            + self.extract_calls.load(Ordering::SeqCst)
            + self.segment_calls.load(Ordering::SeqCst)
            + self.ccdc_calls.load(Ordering::SeqCst)
            + self.product_calls.load(Ordering::SeqCst)
    }

    fn points_in(&self, cell: &Cell) -> Vec<SamplePoint> {
        let mut points: Vec<SamplePoint> =
            self.points.iter().filter(|p| cell.contains(p)).copied().collect();
        if let Some(extra) = self.injected.get(&cell.index) {
            points.push(*extra);
        }
        points
    }

    fn take_failure(&self, cell: CellIndex) -> Option<LandwatchError> {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&cell)? {
            Failure::Always => Some(LandwatchError::TransientRemote("service unavailable".into())),
            Failure::Transient(0) => None,
            Failure::Transient(left) => {
                *left -= 1;
                Some(LandwatchError::TransientRemote("quota exceeded".into()))
            }
            Failure::Permanent => Some(LandwatchError::RemoteStatus {
                status: 400,
                message: "bad request".into(),
            }),
        }
    }
}

/// Monthly series from 2012 to 2021, one NaN in the middle.
pub fn synthetic_series(point_id: PointId, start: NaiveDate, end: NaiveDate) -> TimeSeries {
    let mut dates = Vec::new();
    let mut values = Vec::new();
    for year in 2012..=2021 {
        for month in 1..=12 {
            let Some(date) = NaiveDate::from_ymd_opt(year, month, 15) else {
                continue;
            };
            if date < start || date > end {
                continue;
            }
            let season = 0.05 * (2.0 * PI * date.month0() as f64 / 12.0).sin();
            let mut value = 0.8 + 0.01 * point_id as f64 + season;
            if point_id % 3 == 0 && date >= NaiveDate::from_ymd_opt(2019, 6, 1).unwrap() {
                value -= 0.5;
            }
            if year == 2015 && month == 7 {
                value = f64::NAN;
            }
            dates.push(date);
            values.push(value);
        }
    }
    TimeSeries::new(dates, values).unwrap()
}

#[async_trait]
impl TimeSeriesExtractor for FakeService {
    async fn count_points(&self, cell: &Cell) -> Result<PointCount, LandwatchError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if self.unresolved.contains(&cell.index) {
            return Ok(PointCount::from_raw(-1));
        }
        Ok(PointCount::from_raw(self.points_in(cell).len() as i64))
    }

    async fn extract(
        &self,
        cell: &Cell,
        request: &ExtractionRequest,
    ) -> Result<Vec<PointSeries>, LandwatchError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(err) = self.take_failure(cell.index) {
            return Err(err);
        }
        Ok(self
            .points_in(cell)
            .into_iter()
            .map(|point| PointSeries {
                point,
                bands: request
                    .bands
                    .iter()
                    .map(|b| {
                        (
                            b.clone(),
                            synthetic_series(point.point_id, request.start, request.end),
                        )
                    })
                    .collect(),
            })
            .collect())
    }
}

/// Vertices at both ends and at the lowest annual mean.
#[async_trait]
impl Segmenter for FakeService {
    async fn segment(&self, req: &SegmentationRequest) -> Result<Vec<Vertex>, LandwatchError> {
        self.segment_calls.fetch_add(1, Ordering::SeqCst);
        let imin = req
            .values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(i, _)| i);
        let mut idx = vec![0, imin, req.years.len() - 1];
        idx.dedup();
        Ok(idx
            .into_iter()
            .map(|i| Vertex {
                year: req.years[i],
                value: req.values[i],
            })
            .collect())
    }
}

/// Points whose id is a multiple of 3 break in mid-2019.
#[async_trait]
impl CcdcSource for FakeService {
    async fn breaks(
        &self,
        cell: &Cell,
        _request: &CcdcRequest,
    ) -> Result<Vec<CcdcBreak>, LandwatchError> {
        self.ccdc_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .points_in(cell)
            .into_iter()
            .map(|point| {
                let lost = point.point_id % 3 == 0;
                CcdcBreak {
                    point,
                    change_date: lost.then_some(2019.45),
                    magnitude: lost.then_some(-0.5),
                }
            })
            .collect())
    }
}

/// Forest everywhere, loss recorded on the points that lose vegetation.
#[async_trait]
impl GlobalProductSampler for FakeService {
    async fn sample(
        &self,
        cell: &Cell,
        _point_id_field: &str,
    ) -> Result<Vec<ProductSample>, LandwatchError> {
        self.product_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .points_in(cell)
            .into_iter()
            .map(|point| {
                let lost = point.point_id % 3 == 0;
                let values = HashMap::from([
                    ("esa_lc20", Some(10.0)),
                    ("gfc_tc00", Some(80.0 + point.point_id as f64)),
                    ("gfc_loss", Some(if lost { 1.0 } else { 0.0 })),
                    ("gfc_year", lost.then_some(19.0)),
                ]);
                ProductSample {
                    point,
                    values: values
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), v))
                        .collect(),
                }
            })
            .collect())
    }
}

/// Every collaborator served by the same fake.
pub fn remotes(service: &Arc<FakeService>) -> Remotes {
    Remotes::new(service.clone(), service.clone())
        .with_ccdc(service.clone())
        .with_global_products(service.clone())
}

pub fn utf8_dir(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8Path::from_path(dir.path()).unwrap().to_path_buf()
}

/// Every algorithm enabled, 1° cells, no backoff.
pub fn test_config(work_dir: &Utf8Path, workers: usize) -> RunConfig {
    RunConfig::builder()
        .work_dir(work_dir)
        .workers(workers)
        .start_calibration(NaiveDate::from_ymd_opt(2012, 1, 1).unwrap())
        .start_monitor(NaiveDate::from_ymd_opt(2018, 12, 31).unwrap())
        .end_monitor(NaiveDate::from_ymd_opt(2021, 12, 31).unwrap())
        .grid_size(1.0)
        .cusum(CusumParams {
            run: true,
            nr_of_bootstraps: 50,
        })
        .bs_slope(BsSlopeParams {
            run: true,
            nr_of_bootstraps: 50,
        })
        .landtrendr(LandTrendrParams {
            run: true,
            concurrency: 3,
            ..Default::default()
        })
        .retry(RetryParams {
            max_attempts: 3,
            base_delay_ms: 0,
            multiplier: 1.0,
        })
        .build()
        .unwrap()
}

/// 2° x 2° AOI holding all fake points, four 1° cells.
pub fn aoi() -> BoundingBox {
    BoundingBox::new(0.0, 0.0, 2.0, 2.0).unwrap()
}
