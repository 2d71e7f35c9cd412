//! SCID proxy registry and its HTTP surface.
//!
//! Resolution is explicit: `GET /add/<scid>` creates (or returns) the entry,
//! `/tela/<scid>/...` only forwards to entries that already exist. Entries
//! are immutable once published and live until `reset` swaps the whole map
//! out on disconnect.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tower_http::services::ServeDir;
use tracing::{debug, info};
use url::Url;

use crate::engine::ContentHost;
use crate::state::BridgeState;

/// Cap on buffered request bodies for proxied calls.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("node not set")]
    NodeNotSet,
    #[error("SCID not loaded. Visit /add/<SCID>")]
    ScidNotLoaded,
    #[error("tela failed: {0}")]
    OriginStart(String),
    #[error("invalid origin url: {0}")]
    BadOrigin(String),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("failed to read request body")]
    BodyRead,
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::NodeNotSet | ProxyError::BodyRead => StatusCode::BAD_REQUEST,
            ProxyError::ScidNotLoaded => StatusCode::NOT_FOUND,
            ProxyError::OriginStart(_) | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::BadOrigin(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = Json(json!({"ok": false, "error": self.to_string()}));
        (self.status(), body).into_response()
    }
}

/// One resolved SCID. Immutable once inserted.
#[derive(Debug, Clone)]
pub struct ProxyEntry {
    pub scid: String,
    pub base_url: Url,
}

pub struct ProxyRegistry {
    entries: RwLock<HashMap<String, ProxyEntry>>,
    content: Arc<dyn ContentHost>,
    client: reqwest::Client,
    scid_root: PathBuf,
    local_base: String,
}

impl ProxyRegistry {
    pub fn new(scid_root: PathBuf, local_base: String, content: Arc<dyn ContentHost>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            content,
            client: reqwest::Client::new(),
            scid_root,
            local_base,
        }
    }

    /// Resolve a SCID to its origin base URL, creating the entry on first
    /// use. Creation happens under the write lock, so concurrent requests
    /// for the same unresolved SCID cannot start two origins.
    pub async fn resolve(&self, scid: &str, node: Option<&str>) -> Result<String, ProxyError> {
        let node = node.ok_or(ProxyError::NodeNotSet)?;

        if let Some(entry) = self.entries.read().await.get(scid) {
            return Ok(entry.base_url.to_string());
        }

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(scid) {
            return Ok(entry.base_url.to_string());
        }

        let raw = if self.scid_root.join(scid).is_dir() {
            info!(scid = short(scid), "serving local folder");
            format!("{}/scidfiles/{}/index.html", self.local_base, scid)
        } else {
            // The content server takes a bare address without a scheme.
            let bare = node
                .strip_prefix("http://")
                .or_else(|| node.strip_prefix("https://"))
                .unwrap_or(node);
            let url = self
                .content
                .serve(scid, bare)
                .await
                .map_err(|err| ProxyError::OriginStart(err.to_string()))?;
            info!(scid = short(scid), "started dynamic tela origin");
            url
        };

        let base_url = normalize_base(&raw)?;
        let base = base_url.to_string();
        entries.insert(
            scid.to_string(),
            ProxyEntry { scid: scid.to_string(), base_url },
        );
        Ok(base)
    }

    /// Forward a request into a resolved SCID's origin, with the path
    /// rewritten to `/<rest>` and the CSP response header stripped so the
    /// serving host may frame the content.
    pub async fn forward(&self, scid: &str, rest: &str, req: Request) -> Result<Response, ProxyError> {
        let entry = self
            .entries
            .read()
            .await
            .get(scid)
            .cloned()
            .ok_or(ProxyError::ScidNotLoaded)?;

        let mut target = entry
            .base_url
            .join(rest.trim_start_matches('/'))
            .map_err(|err| ProxyError::BadOrigin(err.to_string()))?;

        let (parts, body) = req.into_parts();
        if let Some(query) = parts.uri.query() {
            target.set_query(Some(query));
        }
        let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|_| ProxyError::BodyRead)?;

        debug!(scid = short(&entry.scid), %target, "proxying request");
        let mut upstream_req = self
            .client
            .request(parts.method, target.to_string())
            .body(bytes);
        for (name, value) in &parts.headers {
            if name == header::HOST || name == header::CONTENT_LENGTH {
                continue;
            }
            upstream_req = upstream_req.header(name, value);
        }

        let upstream = upstream_req.send().await?;
        let mut builder = Response::builder().status(upstream.status());
        for (name, value) in upstream.headers() {
            if name == header::CONTENT_SECURITY_POLICY
                || name == header::TRANSFER_ENCODING
                || name == header::CONNECTION
            {
                continue;
            }
            builder = builder.header(name, value);
        }
        builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|err| ProxyError::BadOrigin(err.to_string()))
    }

    pub async fn scids(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Swap in an empty map. Requests already being forwarded against old
    /// entries finish; future lookups miss.
    pub async fn reset(&self) {
        *self.entries.write().await = HashMap::new();
    }
}

/// Origin URLs are directory-style: no `index.html` suffix, trailing slash.
fn normalize_base(raw: &str) -> Result<Url, ProxyError> {
    let mut base = raw.strip_suffix("/index.html").unwrap_or(raw).to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base).map_err(|err| ProxyError::BadOrigin(err.to_string()))
}

fn short(scid: &str) -> &str {
    scid.get(..8).unwrap_or(scid)
}

pub fn router(state: BridgeState) -> Router {
    let scid_root = state.config().scid_root.clone();
    Router::new()
        .route("/healthz", get(healthz))
        .route("/add/:scid", get(add_scid))
        .route("/tela/:scid", any(forward_root))
        .route("/tela/:scid/*rest", any(forward_rest))
        .nest_service("/scidfiles", ServeDir::new(scid_root))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn add_scid(
    State(state): State<BridgeState>,
    Path(scid): Path<String>,
) -> Result<Json<Value>, ProxyError> {
    let node = state.node();
    let url = state.registry().resolve(&scid, node.as_deref()).await?;
    Ok(Json(json!({"ok": true, "result": {"scid": scid, "url": url}})))
}

async fn forward_root(
    State(state): State<BridgeState>,
    Path(scid): Path<String>,
    req: Request,
) -> Result<Response, ProxyError> {
    state.registry().forward(&scid, "", req).await
}

async fn forward_rest(
    State(state): State<BridgeState>,
    Path((scid, rest)): Path<(String, String)>,
    req: Request,
) -> Result<Response, ProxyError> {
    state.registry().forward(&scid, &rest, req).await
}

#[cfg(test)]
mod tests {
    use super::normalize_base;

    #[test]
    fn base_urls_are_directory_style() {
        let base = normalize_base("http://127.0.0.1:4040/scidfiles/abc/index.html").unwrap();
        assert_eq!(base.as_str(), "http://127.0.0.1:4040/scidfiles/abc/");

        let base = normalize_base("http://127.0.0.1:18888").unwrap();
        assert_eq!(base.as_str(), "http://127.0.0.1:18888/");

        let base = normalize_base("http://127.0.0.1:18888/app/").unwrap();
        assert_eq!(base.as_str(), "http://127.0.0.1:18888/app/");
    }
}
