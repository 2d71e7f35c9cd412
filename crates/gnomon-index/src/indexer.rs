use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::Store;
use crate::EngineError;

/// Heights indexed per tick while catching up in fast-sync mode.
const FAST_BATCH_LIMIT: i64 = 100;
/// Heights indexed per tick while following the tip.
const NORMAL_BATCH_LIMIT: i64 = 10;
/// Fast-sync skips straight to this many blocks behind the tip instead of
/// replaying deep history block by block.
const SNAPSHOT_GAP: i64 = 10_000;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Daemon base URL, scheme included.
    pub node: String,
    /// Substrings a contract payload must carry to be recorded.
    pub filters: Vec<String>,
    /// Height to resume from; the durable height is raised to this on start.
    pub start_height: i64,
    /// Bulk catch-up mode: larger batches plus the snapshot jump.
    pub fast_sync: bool,
}

/// One indexing run against one daemon. `start` spawns the worker task,
/// `close` fires its cancellation token; both are idempotent.
pub struct Indexer {
    store: Arc<Store>,
    config: IndexerConfig,
    http: reqwest::Client,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl Indexer {
    pub fn new(store: Arc<Store>, config: IndexerConfig) -> Self {
        Self {
            store,
            config,
            http: reqwest::Client::new(),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn start(&self, poll_interval: Duration) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let worker = Worker {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            http: self.http.clone(),
            cancel: self.cancel.clone(),
        };
        info!(
            node = %self.config.node,
            start_height = self.config.start_height,
            fast_sync = self.config.fast_sync,
            "indexer starting"
        );
        tokio::spawn(worker.run(poll_interval));
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

struct Worker {
    store: Arc<Store>,
    config: IndexerConfig,
    http: reqwest::Client,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, poll_interval: Duration) {
        if let Err(err) = self.raise_floor() {
            warn!(error = %err, "failed to persist starting height");
        }
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = sleep(poll_interval) => {}
            }
            if let Err(err) = self.tick().await {
                debug!(error = %err, "index tick failed");
            }
        }
    }

    /// The durable height never moves backwards when a run is configured to
    /// start above it.
    fn raise_floor(&self) -> Result<(), EngineError> {
        if self.config.start_height > self.store.last_indexed_height()? {
            self.store.set_last_indexed_height(self.config.start_height)?;
        }
        Ok(())
    }

    async fn tick(&self) -> Result<(), EngineError> {
        let tip = self.chain_tip().await?;
        if tip <= 0 {
            return Ok(());
        }

        let mut height = self.store.last_indexed_height()?;
        if self.config.fast_sync && tip - height > SNAPSHOT_GAP {
            height = tip - SNAPSHOT_GAP;
            self.store.set_last_indexed_height(height)?;
            info!(height, tip, "fast-sync snapshot jump");
        }

        let limit = if self.config.fast_sync {
            FAST_BATCH_LIMIT
        } else {
            NORMAL_BATCH_LIMIT
        };
        let batch_end = tip.min(height + limit);
        while height < batch_end {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            height += 1;
            if let Err(err) = self.scan_height(height).await {
                debug!(height, error = %err, "block scan failed");
            }
            self.store.set_last_indexed_height(height)?;
        }
        Ok(())
    }

    async fn chain_tip(&self) -> Result<i64, EngineError> {
        let response: Value = self
            .http
            .post(format!("{}/json_rpc", self.config.node))
            .json(&json!({"jsonrpc": "2.0", "id": "1", "method": "DERO.GetInfo"}))
            .send()
            .await?
            .json()
            .await?;
        Ok(response
            .pointer("/result/topoheight")
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    async fn scan_height(&self, height: i64) -> Result<(), EngineError> {
        let response: Value = self
            .http
            .post(format!("{}/json_rpc", self.config.node))
            .json(&json!({
                "jsonrpc": "2.0",
                "id": "1",
                "method": "DERO.GetBlock",
                "params": {"topoheight": height},
            }))
            .send()
            .await?
            .json()
            .await?;
        let Some(result) = response.get("result") else {
            return Ok(());
        };

        let raw = result.to_string();
        if !self.config.filters.iter().any(|f| raw.contains(f.as_str())) {
            return Ok(());
        }
        let hashes = result
            .pointer("/block_header/txs_hashes")
            .and_then(Value::as_array);
        for hash in hashes.into_iter().flatten() {
            if let Some(scid) = hash.as_str() {
                self.store.record_contract(scid, height)?;
            }
        }
        Ok(())
    }
}
