//! Dynamic TELA content hosting.
//!
//! `ContentServer::serve` materializes a SCID's on-chain files (fetched from
//! the daemon over JSON-RPC) into a scratch directory and serves them from a
//! loopback HTTP origin on an ephemeral port. Each SCID gets at most one
//! running origin; the bridge reverse-proxies into it and tears everything
//! down through `shutdown`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tracing::{debug, info};

const RPC_TIMEOUT: Duration = Duration::from_secs(15);
const ENTRYPOINT: &str = "index.html";

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("invalid scid: {0}")]
    InvalidScid(String),
    #[error("scid {0} has no servable content")]
    NotFound(String),
    #[error("scid has no index.html entrypoint")]
    NoEntrypoint,
    #[error("daemon rpc failed: {0}")]
    Rpc(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct ContentServer {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    allow_updates: AtomicBool,
    origins: Mutex<HashMap<String, Origin>>,
    scratch: TempDir,
}

struct Origin {
    url: String,
    server: JoinHandle<()>,
}

impl ContentServer {
    pub fn new() -> Result<Self, ContentError> {
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(ContentError::Rpc)?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                allow_updates: AtomicBool::new(false),
                origins: Mutex::new(HashMap::new()),
                scratch: TempDir::new()?,
            }),
        })
    }

    /// When enabled, serving an already-running SCID re-fetches its files so
    /// an updated contract replaces the old origin; otherwise the existing
    /// origin URL is returned unchanged.
    pub fn set_allow_updates(&self, allowed: bool) {
        self.inner.allow_updates.store(allowed, Ordering::SeqCst);
    }

    /// Start (or reuse) a local HTTP origin for `scid`, fetching its files
    /// from `node` (a bare host:port, no scheme). Returns the entrypoint URL.
    pub async fn serve(&self, scid: &str, node: &str) -> Result<String, ContentError> {
        if scid.is_empty() || !scid.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ContentError::InvalidScid(scid.to_string()));
        }

        let mut origins = self.inner.origins.lock().await;
        if let Some(url) = origins.get(scid).map(|origin| origin.url.clone()) {
            if !self.inner.allow_updates.load(Ordering::SeqCst) {
                return Ok(url);
            }
            debug!(scid, "replacing running origin with updated content");
            if let Some(old) = origins.remove(scid) {
                old.server.abort();
            }
        }

        let files = self.fetch_files(scid, node).await?;
        if !files.contains_key(Path::new(ENTRYPOINT)) {
            return Err(ContentError::NoEntrypoint);
        }

        let dir = self.inner.scratch.path().join(scid);
        let _ = tokio::fs::remove_dir_all(&dir).await;
        for (name, data) in &files {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, data).await?;
        }

        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        let service = Router::new().fallback_service(ServeDir::new(&dir));
        let server = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, service.into_make_service()).await {
                debug!(error = %err, "content origin stopped");
            }
        });

        let url = format!("http://127.0.0.1:{port}/{ENTRYPOINT}");
        info!(scid, files = files.len(), %url, "content origin started");
        origins.insert(scid.to_string(), Origin { url: url.clone(), server });
        Ok(url)
    }

    async fn fetch_files(
        &self,
        scid: &str,
        node: &str,
    ) -> Result<BTreeMap<PathBuf, Vec<u8>>, ContentError> {
        let response: Value = self
            .inner
            .http
            .post(format!("http://{node}/json_rpc"))
            .json(&json!({
                "jsonrpc": "2.0",
                "id": "1",
                "method": "DERO.GetSC",
                "params": {"scid": scid, "code": true, "variables": true},
            }))
            .send()
            .await?
            .json()
            .await?;

        let mut files = BTreeMap::new();
        if let Some(keys) = response
            .pointer("/result/stringkeys")
            .and_then(Value::as_object)
        {
            for (key, value) in keys {
                let (Some(name), Some(text)) = (file_path(key), value.as_str()) else {
                    continue;
                };
                files.insert(name, text.as_bytes().to_vec());
            }
        }
        if files.is_empty() {
            return Err(ContentError::NotFound(scid.to_string()));
        }
        Ok(files)
    }

    /// Stop every running origin and forget them. Scratch files live until
    /// the server itself is dropped.
    pub async fn shutdown(&self) {
        let mut origins = self.inner.origins.lock().await;
        for (scid, origin) in origins.drain() {
            debug!(%scid, "stopping content origin");
            origin.server.abort();
        }
    }
}

/// Contract string keys that name files become relative paths; everything
/// else (version tags, checksums, owner keys) is skipped. Traversal segments
/// are rejected outright.
fn file_path(key: &str) -> Option<PathBuf> {
    let key = key.trim_start_matches('/');
    if key.is_empty() || !key.contains('.') {
        return None;
    }
    let ok = key
        .split('/')
        .all(|seg| !seg.is_empty() && seg != ".." && seg != ".");
    if !ok {
        return None;
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'))
    {
        return None;
    }
    Some(PathBuf::from(key))
}
