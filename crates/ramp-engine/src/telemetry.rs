//! Telemetry client — percentile latency queries for SLO evaluation.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Latency percentiles (milliseconds) over a query window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub p999: f64,
}

/// Answers percentile latency queries for a rollout target.
#[async_trait]
pub trait TelemetryClient: Send + Sync {
    async fn query_latency_percentiles(
        &self,
        target: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<LatencyPercentiles>;
}

/// HTTP implementation querying an external metrics API.
pub struct HttpTelemetryClient {
    base_url: String,
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl HttpTelemetryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

#[async_trait]
impl TelemetryClient for HttpTelemetryClient {
    async fn query_latency_percentiles(
        &self,
        target: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<LatencyPercentiles> {
        let uri = format!(
            "{}/percentiles?target={target}&from={}&to={}",
            self.base_url,
            from.timestamp(),
            to.timestamp()
        );
        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .body(Empty::new())
            .map_err(|e| EngineError::Telemetry(e.to_string()))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| EngineError::Telemetry(format!("{uri}: {e}")))?;

        if !resp.status().is_success() {
            return Err(EngineError::Telemetry(format!(
                "{uri} returned {}",
                resp.status()
            )));
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| EngineError::Telemetry(e.to_string()))?
            .to_bytes();
        let percentiles: LatencyPercentiles =
            serde_json::from_slice(&body).map_err(|e| EngineError::Telemetry(e.to_string()))?;
        debug!(%target, p999 = percentiles.p999, "latency percentiles fetched");
        Ok(percentiles)
    }
}

/// Stand-in client for local development: reports zero latency, so no
/// SLO ever trips.
#[derive(Default)]
pub struct FlatTelemetryClient;

#[async_trait]
impl TelemetryClient for FlatTelemetryClient {
    async fn query_latency_percentiles(
        &self,
        _target: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> EngineResult<LatencyPercentiles> {
        Ok(LatencyPercentiles {
            p50: 0.0,
            p90: 0.0,
            p99: 0.0,
            p999: 0.0,
        })
    }
}
