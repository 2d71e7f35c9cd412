//! Chain-height query against the remote daemon's JSON-RPC endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::engine::ChainQuery;

/// Per-call budget, independent of the orchestrator's retry cadence.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("daemon rpc failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("daemon returned no usable height")]
    MissingHeight,
}

#[derive(Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
}

impl DaemonClient {
    pub fn new(timeout: Duration) -> Result<Self, DaemonError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ChainQuery for DaemonClient {
    async fn chain_height(&self, node: &str) -> Result<i64, DaemonError> {
        let response: Value = self
            .http
            .post(format!("{node}/json_rpc"))
            .json(&json!({"jsonrpc": "2.0", "id": "1", "method": "DERO.GetInfo"}))
            .send()
            .await?
            .json()
            .await?;
        response
            .pointer("/result/topoheight")
            .and_then(Value::as_i64)
            .ok_or(DaemonError::MissingHeight)
    }
}
