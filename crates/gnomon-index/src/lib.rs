//! Gnomon-style chain indexer for TELA content.
//!
//! The indexer follows a DERO daemon's topoheight over JSON-RPC, records
//! contracts whose payload matches a set of semantic filters, and keeps the
//! last fully indexed height durable so a restart resumes where it left off.
//! The bridge drives it through `Indexer::start` / `Indexer::close` and reads
//! progress back through [`Store::last_indexed_height`].

pub mod api;
mod indexer;
mod store;

pub use indexer::{Indexer, IndexerConfig};
pub use store::{Store, StoreError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("daemon rpc failed: {0}")]
    Rpc(#[from] reqwest::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}
