//! JSON-over-HTTP client for the remote extraction and segmentation service.
//!
//! Endpoints (all `POST`, JSON bodies):
//!
//! | path            | request                          | response                         |
//! |-----------------|----------------------------------|----------------------------------|
//! | `/points/count` | `{cell}`                         | `{"count": i64}`, `< 0` unresolved |
//! | `/timeseries`   | `{cell, request}`                | `{"points": [PointSeries]}`      |
//! | `/segment`      | [`SegmentationRequest`]          | [`SegmentationOutput`]           |
//! | `/ccdc`         | `{cell, request}`                | `{"points": [CcdcBreak]}`        |
//! | `/products`     | `{cell, point_id_field}`         | `{"points": [ProductSample]}`    |
//!
//! Non-success statuses become [`LandwatchError::RemoteStatus`]; `429` and `5xx` are retried
//! by the caller's retry policy.
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ServiceParams;
use crate::extract::ccdc::{CcdcBreak, CcdcRequest, CcdcSource};
use crate::extract::global_products::{GlobalProductSampler, ProductSample};
use crate::extract::{ExtractionRequest, PointCount, TimeSeriesExtractor};
use crate::geometry::Cell;
use crate::landwatch_errors::LandwatchError;
use crate::segmentation::{SegmentationOutput, SegmentationRequest, Segmenter, Vertex};
use crate::timeseries::PointSeries;

#[derive(Serialize)]
struct CellBody<'a> {
    cell: &'a Cell,
}

#[derive(Serialize)]
struct ExtractBody<'a> {
    cell: &'a Cell,
    request: &'a ExtractionRequest,
}

#[derive(Serialize)]
struct CcdcBody<'a> {
    cell: &'a Cell,
    request: &'a CcdcRequest,
}

#[derive(Serialize)]
struct ProductsBody<'a> {
    cell: &'a Cell,
    point_id_field: &'a str,
}

#[derive(Deserialize)]
struct PointsResponse<T> {
    points: Vec<T>,
}

#[derive(Deserialize)]
struct CountResponse {
    count: i64,
}

#[derive(Debug, Clone)]
pub struct HttpService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpService {
    pub fn new(params: &ServiceParams) -> Result<Self, LandwatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(params.timeout_secs))
            .user_agent(concat!("landwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpService {
            client,
            endpoint: params.endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, LandwatchError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned + Send,
    {
        let url = format!("{}{}", self.endpoint, path);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "Service response received");
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(url = %url, status = status.as_u16(), "Service error status");
            return Err(LandwatchError::RemoteStatus {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl TimeSeriesExtractor for HttpService {
    async fn count_points(&self, cell: &Cell) -> Result<PointCount, LandwatchError> {
        let resp: CountResponse = self.post("/points/count", &CellBody { cell }).await?;
        Ok(PointCount::from_raw(resp.count))
    }

    async fn extract(
        &self,
        cell: &Cell,
        request: &ExtractionRequest,
    ) -> Result<Vec<PointSeries>, LandwatchError> {
        let resp: PointsResponse<PointSeries> = self
            .post("/timeseries", &ExtractBody { cell, request })
            .await?;
        Ok(resp.points)
    }
}

#[async_trait]
impl Segmenter for HttpService {
    async fn segment(&self, request: &SegmentationRequest) -> Result<Vec<Vertex>, LandwatchError> {
        let output: SegmentationOutput = self.post("/segment", request).await?;
        output.into_vertices()
    }
}

#[async_trait]
impl CcdcSource for HttpService {
    async fn breaks(
        &self,
        cell: &Cell,
        request: &CcdcRequest,
    ) -> Result<Vec<CcdcBreak>, LandwatchError> {
        let resp: PointsResponse<CcdcBreak> =
            self.post("/ccdc", &CcdcBody { cell, request }).await?;
        Ok(resp.points)
    }
}

#[async_trait]
impl GlobalProductSampler for HttpService {
    async fn sample(
        &self,
        cell: &Cell,
        point_id_field: &str,
    ) -> Result<Vec<ProductSample>, LandwatchError> {
        let body = ProductsBody {
            cell,
            point_id_field,
        };
        let resp: PointsResponse<ProductSample> = self.post("/products", &body).await?;
        Ok(resp.points)
    }
}
