//! Deployment controller — the traffic-shaping collaborator.
//!
//! Each call sets a desired traffic shape and is idempotent: the
//! orchestrator may repeat a call after a crash replay or during
//! rollback convergence without changing the effect.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

/// Executes traffic changes for a rollout target.
#[async_trait]
pub trait DeployController: Send + Sync {
    /// Split traffic: `percent` to the new version, the rest to the old.
    async fn set_split(
        &self,
        target: &str,
        percent: u32,
        old_version: &str,
        new_version: &str,
    ) -> EngineResult<()>;

    /// Send all traffic to `version` (successful completion).
    async fn cutover(&self, target: &str, version: &str) -> EngineResult<()>;

    /// Send all traffic back to `version` (any non-success exit).
    async fn revert(&self, target: &str, version: &str) -> EngineResult<()>;
}

/// HTTP implementation posting desired-state calls to an external
/// deployment API.
pub struct HttpDeployController {
    base_url: String,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpDeployController {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> EngineResult<()> {
        let uri = format!("{}{path}", self.base_url);
        let req = http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .map_err(|e| EngineError::Deploy(e.to_string()))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| EngineError::Deploy(format!("{uri}: {e}")))?;

        if !resp.status().is_success() {
            return Err(EngineError::Deploy(format!(
                "{uri} returned {}",
                resp.status()
            )));
        }
        debug!(%uri, "deployment call accepted");
        Ok(())
    }
}

#[async_trait]
impl DeployController for HttpDeployController {
    async fn set_split(
        &self,
        target: &str,
        percent: u32,
        old_version: &str,
        new_version: &str,
    ) -> EngineResult<()> {
        self.post(
            "/split",
            serde_json::json!({
                "target": target,
                "percent": percent,
                "old_version": old_version,
                "new_version": new_version,
            }),
        )
        .await
    }

    async fn cutover(&self, target: &str, version: &str) -> EngineResult<()> {
        self.post(
            "/cutover",
            serde_json::json!({ "target": target, "version": version }),
        )
        .await
    }

    async fn revert(&self, target: &str, version: &str) -> EngineResult<()> {
        self.post(
            "/revert",
            serde_json::json!({ "target": target, "version": version }),
        )
        .await
    }
}

/// Stand-in controller for local development: logs the desired traffic
/// shape and succeeds.
#[derive(Default)]
pub struct LogDeployController;

#[async_trait]
impl DeployController for LogDeployController {
    async fn set_split(
        &self,
        target: &str,
        percent: u32,
        old_version: &str,
        new_version: &str,
    ) -> EngineResult<()> {
        info!(
            %target,
            percent,
            %old_version,
            %new_version,
            "traffic split (no deployment API configured)"
        );
        Ok(())
    }

    async fn cutover(&self, target: &str, version: &str) -> EngineResult<()> {
        info!(%target, %version, "traffic cutover (no deployment API configured)");
        Ok(())
    }

    async fn revert(&self, target: &str, version: &str) -> EngineResult<()> {
        info!(%target, %version, "traffic revert (no deployment API configured)");
        Ok(())
    }
}
