//! Sync orchestration: drive the indexing engine from a cold or resuming
//! state through bulk catch-up and into steady-state tip tracking.
//!
//! One logical session exists at a time. Its task tree is
//!
//!   wait for daemon height -> fast-sync poll loop -> live poll loop
//!
//! and every stage observes the session's cancellation token at each wait
//! point. Starting a new session (or disconnecting) fires the previous
//! token, so late ticks from an old generation check the token again before
//! emitting anything.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::EngineOptions;
use crate::protocol::Event;
use crate::state::BridgeState;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Pause between daemon height retries while waiting for it to answer.
    pub daemon_retry_interval: Duration,
    /// Consecutive failures before the single `node_unreachable` event.
    pub unreachable_notice_after: u32,
    /// Progress poll cadence during bulk catch-up.
    pub fast_poll_interval: Duration,
    /// Progress poll cadence once caught up.
    pub live_poll_interval: Duration,
    /// How far below the target counts as caught up, absorbing chain growth
    /// between the target snapshot and the catch-up.
    pub catch_up_tolerance: i64,
    /// Poll interval handed to the indexing engine itself.
    pub engine_poll_interval: Duration,
    /// Semantic filters selecting the contracts worth indexing.
    pub filters: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            daemon_retry_interval: Duration::from_secs(3),
            unreachable_notice_after: 2,
            fast_poll_interval: Duration::from_secs(3),
            live_poll_interval: Duration::from_secs(10),
            catch_up_tolerance: 3,
            engine_poll_interval: Duration::from_secs(5),
            filters: vec!["telaVersion".to_string()],
        }
    }
}

/// Handle to a running session. Dropping it does not stop anything; the
/// dispatcher cancels explicitly when the node changes or disconnects.
pub struct SyncSession {
    pub node: String,
    pub generation: Uuid,
    cancel: CancellationToken,
}

impl SyncSession {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Launch a session for `node` (already normalized to an absolute URL).
pub fn start(state: BridgeState, node: String) -> SyncSession {
    let cancel = CancellationToken::new();
    let generation = Uuid::new_v4();
    tokio::spawn(run_session(state, node.clone(), generation, cancel.clone()));
    SyncSession { node, generation, cancel }
}

async fn run_session(state: BridgeState, node: String, generation: Uuid, cancel: CancellationToken) {
    let cfg = state.sync_config().clone();

    let Some(target) = wait_for_target(&state, &node, &cfg, &cancel).await else {
        return;
    };
    info!(%generation, target, %node, "sync target locked");
    state.set_disconnected(false);

    let start_height = match state.store().last_indexed_height() {
        Ok(height) => height,
        Err(err) => {
            warn!(error = %err, "indexed height unavailable, resuming from genesis");
            0
        }
    };
    info!(start_height, "starting fast-sync indexer");

    // A node switch may have fired the token while the target was being
    // locked; a dead generation must not install an engine.
    if cancel.is_cancelled() {
        return;
    }
    let engine = state.factory().create(EngineOptions {
        filters: cfg.filters.clone(),
        start_height,
        node: node.clone(),
        fast_sync: true,
    });
    engine.start(cfg.engine_poll_interval);
    state.install_engine(engine);
    state.set_engine_running(true);

    fast_sync_loop(state, node, target, cfg, cancel).await;
}

/// Query the daemon until it reports a height. Emits `node_unreachable`
/// exactly once per wait, after the configured number of consecutive
/// failures, and keeps retrying regardless.
async fn wait_for_target(
    state: &BridgeState,
    node: &str,
    cfg: &SyncConfig,
    cancel: &CancellationToken,
) -> Option<i64> {
    let mut failures = 0u32;
    loop {
        let height = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = state.chain().chain_height(node) => result.unwrap_or(0),
        };
        if height > 0 {
            return Some(height);
        }

        failures += 1;
        debug!(node, attempt = failures, "daemon not reachable yet");
        if failures == cfg.unreachable_notice_after {
            state
                .send_event(Event::NodeUnreachable { node: node.to_string() })
                .await;
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(cfg.daemon_retry_interval) => {}
        }
    }
}

/// Poll the durable height against the fixed target. This loop is the sole
/// owner of the fast-to-live transition, which fires at most once.
async fn fast_sync_loop(
    state: BridgeState,
    node: String,
    target: i64,
    cfg: SyncConfig,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(cfg.fast_poll_interval) => {}
        }

        let indexed = match state.store().last_indexed_height() {
            Ok(height) => height,
            Err(err) => {
                warn!(error = %err, "indexed height read failed, skipping tick");
                continue;
            }
        };

        if cancel.is_cancelled() {
            return;
        }
        state
            .send_event(Event::SyncProgress { indexed, chain: target })
            .await;

        if indexed >= target - cfg.catch_up_tolerance {
            info!(indexed, target, "fast sync complete, switching to normal indexing");

            if let Some(engine) = state.take_engine() {
                engine.close();
            }
            let engine = state.factory().create(EngineOptions {
                filters: cfg.filters.clone(),
                start_height: indexed,
                node: node.clone(),
                fast_sync: false,
            });
            engine.start(cfg.engine_poll_interval);
            state.install_engine(engine);

            state.send_event(Event::SyncComplete { height: indexed }).await;
            tokio::spawn(live_poll_loop(state, node, indexed, cfg, cancel));
            return;
        }
    }
}

/// Steady-state loop: re-query both the durable height and the live chain
/// height each tick. Exits on cancellation or once the node has been
/// cleared (disconnect can race a tick already in flight).
async fn live_poll_loop(
    state: BridgeState,
    node: String,
    fallback_height: i64,
    cfg: SyncConfig,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(cfg.live_poll_interval) => {}
        }
        if state.node().is_none() {
            return;
        }

        let chain = match tokio::select! {
            _ = cancel.cancelled() => return,
            result = state.chain().chain_height(&node) => result,
        } {
            Ok(height) => height,
            Err(_) => 0,
        };
        let indexed = match state.store().last_indexed_height() {
            Ok(height) if height > 0 => height,
            _ => fallback_height,
        };

        if cancel.is_cancelled() {
            return;
        }
        debug!(indexed, chain, "live poll");
        state.send_event(Event::SyncProgress { indexed, chain }).await;
    }
}
