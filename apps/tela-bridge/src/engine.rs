//! Seams to the bridge's collaborators: the indexing engine, its durable
//! height store, the content server, and the daemon height query. The
//! orchestrator and registry only see these traits; `main` wires the real
//! implementations and tests substitute scripted fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::daemon::DaemonError;

/// What one indexing run is configured with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub filters: Vec<String>,
    pub start_height: i64,
    pub node: String,
    pub fast_sync: bool,
}

pub trait IndexerHandle: Send + Sync {
    fn start(&self, poll_interval: Duration);
    fn close(&self);
}

pub trait IndexerFactory: Send + Sync {
    fn create(&self, options: EngineOptions) -> Box<dyn IndexerHandle>;
}

pub trait HeightStore: Send + Sync {
    fn last_indexed_height(&self) -> Result<i64, gnomon_index::StoreError>;
}

#[async_trait]
pub trait ChainQuery: Send + Sync {
    async fn chain_height(&self, node: &str) -> Result<i64, DaemonError>;
}

#[async_trait]
pub trait ContentHost: Send + Sync {
    /// Start (or reuse) an HTTP origin for `scid` against `node` (bare
    /// host:port) and return its entrypoint URL.
    async fn serve(&self, scid: &str, node: &str) -> Result<String, tela_serve::ContentError>;
    fn set_allow_updates(&self, allowed: bool);
    async fn shutdown(&self);
}

/// Factory producing Gnomon indexer runs over a shared store.
pub struct GnomonFactory {
    store: Arc<gnomon_index::Store>,
}

impl GnomonFactory {
    pub fn new(store: Arc<gnomon_index::Store>) -> Self {
        Self { store }
    }
}

impl IndexerFactory for GnomonFactory {
    fn create(&self, options: EngineOptions) -> Box<dyn IndexerHandle> {
        Box::new(gnomon_index::Indexer::new(
            Arc::clone(&self.store),
            gnomon_index::IndexerConfig {
                node: options.node,
                filters: options.filters,
                start_height: options.start_height,
                fast_sync: options.fast_sync,
            },
        ))
    }
}

impl IndexerHandle for gnomon_index::Indexer {
    fn start(&self, poll_interval: Duration) {
        gnomon_index::Indexer::start(self, poll_interval);
    }

    fn close(&self) {
        gnomon_index::Indexer::close(self);
    }
}

impl HeightStore for gnomon_index::Store {
    fn last_indexed_height(&self) -> Result<i64, gnomon_index::StoreError> {
        gnomon_index::Store::last_indexed_height(self)
    }
}

#[async_trait]
impl ContentHost for tela_serve::ContentServer {
    async fn serve(&self, scid: &str, node: &str) -> Result<String, tela_serve::ContentError> {
        tela_serve::ContentServer::serve(self, scid, node).await
    }

    fn set_allow_updates(&self, allowed: bool) {
        tela_serve::ContentServer::set_allow_updates(self, allowed);
    }

    async fn shutdown(&self) {
        tela_serve::ContentServer::shutdown(self).await;
    }
}
