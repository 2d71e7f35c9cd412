//! Local HTTP API over the index store, probed by the bridge's
//! `server_status` command.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tracing::warn;

use crate::store::Store;

pub fn router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/api/getinfo", get(get_info))
        .with_state(store)
}

async fn get_info(State(store): State<Arc<Store>>) -> impl IntoResponse {
    let height = store.last_indexed_height();
    let contracts = store.contracts();
    match (height, contracts) {
        (Ok(indexed_height), Ok(contracts)) => Json(json!({
            "indexed_height": indexed_height,
            "contracts": contracts.len(),
        }))
        .into_response(),
        (height, contracts) => {
            if let Err(err) = height {
                warn!(error = %err, "index api failed to read height");
            }
            if let Err(err) = contracts {
                warn!(error = %err, "index api failed to read contracts");
            }
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{self, Body};
    use axum::http::Request;
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn getinfo_reports_indexed_height() {
        let store = Arc::new(Store::in_memory().unwrap());
        store.set_last_indexed_height(512).unwrap();
        store.record_contract("abcd", 500).unwrap();

        let response = router(store)
            .oneshot(
                Request::builder()
                    .uri("/api/getinfo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let info: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(info["indexed_height"], 512);
        assert_eq!(info["contracts"], 1);
    }
}
