use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use ethereal_engine::proxy::{ProxyReply, ProxyService, PROXY_ROUTE};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub fn router(service: Arc<ProxyService>) -> Router {
    Router::new()
        .route(PROXY_ROUTE, any(generate_image))
        .route("/health", get(health))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE]),
        )
        .with_state(service)
}

/// Blocks the calling thread serving the proxy on `addr`.
///
/// The service (and its blocking HTTP client) must be built outside the
/// runtime and is dropped outside it too.
pub fn serve(service: ProxyService, addr: SocketAddr) -> Result<()> {
    let service = Arc::new(service);
    let app = router(Arc::clone(&service));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(async move {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        tracing::info!(%addr, route = PROXY_ROUTE, "proxy listening");
        axum::serve(listener, app).await.context("proxy server failed")
    })
}

async fn generate_image(
    State(service): State<Arc<ProxyService>>,
    method: Method,
    body: Bytes,
) -> Response {
    let method_name = method.as_str().to_string();
    let reply = tokio::task::spawn_blocking(move || service.handle(&method_name, &body)).await;
    match reply {
        Ok(reply) => reply_response(reply),
        Err(err) => {
            tracing::error!(error = %err, "proxy handler task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Internal server error",
                    "details": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn reply_response(reply: ProxyReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match reply.body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    }
}
