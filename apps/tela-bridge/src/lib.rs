//! Native-messaging bridge between a browser extension and a DERO-style
//! serving layer: a framed JSON command protocol on stdio, a sync
//! orchestrator driving the Gnomon indexer against a remote daemon, and a
//! reverse-proxy registry mapping SCIDs onto local HTTP origins.

pub mod codec;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod engine;
pub mod protocol;
pub mod proxy;
pub mod state;
pub mod sync;
pub mod telemetry;
