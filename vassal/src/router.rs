//! HTTP router for the SQS query protocol

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use bytes::Bytes;
use tower_http::trace::TraceLayer;

use vassal_queue::QueueStore;

/// Build the application router. `/` serves actions that carry a `QueueUrl`
/// parameter; `/{queue_name}` serves actions scoped to that queue. Both GET
/// (query string) and POST (form body) are accepted.
pub fn router(store: Arc<QueueStore>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/", any(handle_root))
        .route("/{queue_name}", any(handle_queue))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, r#"{"status": "running"}"#)
}

async fn handle_root(
    State(store): State<Arc<QueueStore>>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let params = merge_params(query.as_deref(), &body);
    vassal_queue::handle_request(store, None, params).await
}

async fn handle_queue(
    State(store): State<Arc<QueueStore>>,
    Path(queue_name): Path<String>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let params = merge_params(query.as_deref(), &body);
    vassal_queue::handle_request(store, Some(queue_name), params).await
}

/// SQS clients send parameters form-urlencoded on the query string, the POST
/// body, or both; body values win when a key appears in each.
fn merge_params(query: Option<&str>, body: &[u8]) -> HashMap<String, String> {
    let mut params: HashMap<String, String> = form_urlencoded::parse(body)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    if let Some(query) = query {
        for (k, v) in form_urlencoded::parse(query.as_bytes()) {
            params.entry(k.to_string()).or_insert_with(|| v.to_string());
        }
    }

    params
}
