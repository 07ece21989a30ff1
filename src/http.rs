//! HTTP control endpoint.
//!
//! A browser extension drives the engine with plain GETs: `/play` queues a
//! reply clip and `/status` doubles as its heartbeat. Every response carries
//! permissive CORS headers and closes the connection.

use crate::engine::EngineHandle;
use crate::task::TaskKind;
use axum::{
    Router,
    extract::{Query, Request, State, rejection::QueryRejection},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Value, json};
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 18888;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Raw query pairs, so repeated keys never fail extraction.
type QueryPairs = Query<Vec<(String, String)>>;

/// Build the control router around an engine handle.
pub fn router(handle: EngineHandle) -> Router {
    Router::new()
        .route("/play", get(play).fallback(route_not_found))
        .route("/status", get(status).fallback(route_not_found))
        .fallback(route_not_found)
        .layer(middleware::from_fn(stamp_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(handle)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    handle: EngineHandle,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control endpoint listening");
    axum::serve(listener, router(handle))
        .with_graceful_shutdown(shutdown)
        .await
}

fn reply(code: StatusCode, body: Value) -> Response {
    (
        code,
        [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
        body.to_string(),
    )
        .into_response()
}

fn error_reply(code: StatusCode, message: &str) -> Response {
    reply(code, json!({ "status": "error", "message": message }))
}

/// Answers preflights for any path and stamps CORS / close headers on
/// every response.
async fn stamp_headers(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        reply(StatusCode::OK, json!({ "status": "ok" }))
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers
        .entry(header::CONTENT_TYPE)
        .or_insert(HeaderValue::from_static(JSON_CONTENT_TYPE));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

async fn play(
    State(handle): State<EngineHandle>,
    query: Result<QueryPairs, QueryRejection>,
) -> Response {
    // The first `path` wins; an unparseable query counts as no path at all.
    let path = query.ok().and_then(|Query(pairs)| {
        pairs
            .into_iter()
            .find(|(key, _)| key == "path")
            .map(|(_, value)| value)
    });
    let Some(path) = path.filter(|p| !p.is_empty()) else {
        return error_reply(StatusCode::BAD_REQUEST, "missing_path_parameter");
    };

    match handle.enqueue(Path::new(&path), TaskKind::Reply) {
        Ok(file) => {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            reply(StatusCode::OK, json!({ "status": "success", "file": name }))
        }
        Err(e) => {
            warn!(error = %e, %path, "reply request had nothing to play");
            error_reply(StatusCode::NOT_FOUND, "no_valid_audio_file_found")
        }
    }
}

async fn status(State(handle): State<EngineHandle>) -> Response {
    handle.record_heartbeat();
    reply(StatusCode::OK, json!({ "status": "online" }))
}

async fn route_not_found() -> Response {
    error_reply(StatusCode::NOT_FOUND, "route_not_found")
}
