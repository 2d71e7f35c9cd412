//! Process-wide bridge context shared by the dispatcher, the sync
//! orchestrator's tasks, and the proxy listener.
//!
//! The dispatcher is the only writer of the node and session slots; both are
//! replaced wholesale, never partially mutated. Background tasks read the
//! node and flags, and push events through the shared outbound channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::engine::{ChainQuery, ContentHost, HeightStore, IndexerFactory, IndexerHandle};
use crate::protocol::{Event, Outbound};
use crate::proxy::ProxyRegistry;
use crate::sync::{SyncConfig, SyncSession};

#[derive(Clone)]
pub struct BridgeState {
    inner: Arc<Inner>,
}

struct Inner {
    config: BridgeConfig,
    sync: SyncConfig,
    node: RwLock<Option<String>>,
    session: Mutex<Option<SyncSession>>,
    engine: Mutex<Option<Box<dyn IndexerHandle>>>,
    disconnected: AtomicBool,
    engine_running: AtomicBool,
    registry: ProxyRegistry,
    factory: Arc<dyn IndexerFactory>,
    store: Arc<dyn HeightStore>,
    chain: Arc<dyn ChainQuery>,
    content: Arc<dyn ContentHost>,
    http: reqwest::Client,
    outbound: mpsc::Sender<Outbound>,
}

impl BridgeState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BridgeConfig,
        sync: SyncConfig,
        factory: Arc<dyn IndexerFactory>,
        store: Arc<dyn HeightStore>,
        chain: Arc<dyn ChainQuery>,
        content: Arc<dyn ContentHost>,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        let registry = ProxyRegistry::new(
            config.scid_root.clone(),
            format!("http://127.0.0.1:{}", config.tela_port),
            Arc::clone(&content),
        );
        Self {
            inner: Arc::new(Inner {
                config,
                sync,
                node: RwLock::new(None),
                session: Mutex::new(None),
                engine: Mutex::new(None),
                // Nothing is connected until the first set_node locks a
                // sync target.
                disconnected: AtomicBool::new(true),
                engine_running: AtomicBool::new(false),
                registry,
                factory,
                store,
                chain,
                content,
                http: reqwest::Client::new(),
                outbound,
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn sync_config(&self) -> &SyncConfig {
        &self.inner.sync
    }

    pub fn registry(&self) -> &ProxyRegistry {
        &self.inner.registry
    }

    pub fn factory(&self) -> &dyn IndexerFactory {
        self.inner.factory.as_ref()
    }

    pub fn store(&self) -> &dyn HeightStore {
        self.inner.store.as_ref()
    }

    pub fn chain(&self) -> &dyn ChainQuery {
        self.inner.chain.as_ref()
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// Base URL of the local proxy listener.
    pub fn proxy_base(&self) -> String {
        format!("http://127.0.0.1:{}", self.inner.config.tela_port)
    }

    /// Base URL of the local indexing API listener.
    pub fn index_api_base(&self) -> String {
        format!("http://127.0.0.1:{}", self.inner.config.gnomon_port)
    }

    pub fn node(&self) -> Option<String> {
        self.inner.node.read().clone()
    }

    pub fn set_node(&self, node: Option<String>) {
        *self.inner.node.write() = node;
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.disconnected.load(Ordering::SeqCst)
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        self.inner.disconnected.store(disconnected, Ordering::SeqCst);
    }

    pub fn engine_running(&self) -> bool {
        self.inner.engine_running.load(Ordering::SeqCst)
    }

    pub fn set_engine_running(&self, running: bool) {
        self.inner.engine_running.store(running, Ordering::SeqCst);
    }

    pub fn install_session(&self, session: SyncSession) {
        *self.inner.session.lock() = Some(session);
    }

    /// Fire the current session's cancellation signal, rendering every task
    /// of that generation inert. Idempotent; a missing session is a no-op.
    pub fn cancel_session(&self) {
        if let Some(session) = self.inner.session.lock().take() {
            debug!(generation = %session.generation, "cancelling sync session");
            session.cancel();
        }
    }

    pub fn install_engine(&self, handle: Box<dyn IndexerHandle>) {
        if let Some(old) = self.inner.engine.lock().replace(handle) {
            old.close();
        }
    }

    pub fn take_engine(&self) -> Option<Box<dyn IndexerHandle>> {
        self.inner.engine.lock().take()
    }

    pub async fn send(&self, message: Outbound) {
        if self.inner.outbound.send(message).await.is_err() {
            debug!("outbound channel closed, dropping message");
        }
    }

    pub async fn send_event(&self, event: Event) {
        self.send(Outbound::Event(event)).await;
    }

    /// Shutdown path shared by stream EOF and process signals: stop the
    /// session's tasks, release the indexing engine, stop content origins.
    pub async fn shutdown(&self) {
        self.cancel_session();
        if let Some(engine) = self.take_engine() {
            engine.close();
        }
        self.set_engine_running(false);
        self.inner.content.shutdown().await;
    }
}
