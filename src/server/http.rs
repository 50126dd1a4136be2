//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling.
//!
//! - `POST /mark-dirty`   `{"key": "players:42"}`        → `{}`
//! - `POST /mark-dirties` `{"keys": ["players:42", ...]}` → `{}`
//! - `GET  /health`       engine counters
//!
//! Mark calls always answer `{}`; whether a key was valid is only known at
//! flush time.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::engine::{DirtyNotifier, EngineStats, StatsSnapshot};
use crate::types::{BgSaveError, Result};

/// Shared application state
pub struct AppState {
    pub listen: SocketAddr,
    /// Request bodies larger than this are refused with 413
    pub max_body_bytes: usize,
    pub notifier: DirtyNotifier,
    pub stats: Arc<EngineStats>,
}

#[derive(Debug, Deserialize)]
struct MarkDirtyRequest {
    key: String,
}

#[derive(Debug, Deserialize)]
struct MarkDirtiesRequest {
    keys: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    healthy: bool,
    version: &'static str,
    stats: StatsSnapshot,
}

/// Accept connections until the listener fails to bind.
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.listen).await?;
    info!("bgsave listening on {}", listener.local_addr()?);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(%addr, %method, path = %path, "Request");

    let body = match read_body(req.into_body(), state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => return Ok(error_response(&e)),
    };

    Ok(route(&state, &method, &path, body).await)
}

/// Collect a request body of at most `limit` bytes.
pub async fn read_body<B>(body: B, limit: usize) -> Result<Bytes>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(
            BgSaveError::PayloadTooLarge(format!("request body exceeds {} bytes", limit)),
        ),
        Err(e) => Err(BgSaveError::BadRequest(format!("Failed to read body: {}", e))),
    }
}

/// Dispatch a request with an already collected body
pub async fn route(
    state: &AppState,
    method: &Method,
    path: &str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::POST, "/mark-dirty") => match serde_json::from_slice::<MarkDirtyRequest>(&body) {
            Ok(req) => json_response(StatusCode::OK, &state.notifier.mark_dirty(req.key).await),
            Err(e) => error_response(&BgSaveError::from(e)),
        },
        (&Method::POST, "/mark-dirties") => {
            match serde_json::from_slice::<MarkDirtiesRequest>(&body) {
                Ok(req) => {
                    json_response(StatusCode::OK, &state.notifier.mark_dirties(req.keys).await)
                }
                Err(e) => error_response(&BgSaveError::from(e)),
            }
        }
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => json_response(
            StatusCode::OK,
            &HealthResponse {
                healthy: true,
                version: env!("CARGO_PKG_VERSION"),
                stats: state.stats.snapshot(),
            },
        ),
        _ => not_found_response(path),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json_body = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json_body)))
        .unwrap()
}

fn error_response(err: &BgSaveError) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": err.kind(),
        "message": err.to_string(),
    });
    json_response(err.status_code(), &body)
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
        "hint": "POST /mark-dirty or /mark-dirties"
    });
    json_response(StatusCode::NOT_FOUND, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::MemoryStore;
    use crate::engine::{spawn_engine, EngineConfig, EngineHandle};

    fn state() -> (AppState, EngineHandle) {
        let (notifier, handle) = spawn_engine(
            EngineConfig::default(),
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryStore::new()),
        );
        let state = AppState {
            listen: "127.0.0.1:0".parse().unwrap(),
            max_body_bytes: 64,
            notifier,
            stats: handle.stats(),
        };
        (state, handle)
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_mark_dirty_acks_with_empty_object() {
        let (state, _handle) = state();
        let response = route(
            &state,
            &Method::POST,
            "/mark-dirty",
            Bytes::from_static(br#"{"key": "players:42"}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({}));
        assert_eq!(state.stats.snapshot().received, 1);
    }

    #[tokio::test]
    async fn test_malformed_key_still_acked() {
        let (state, _handle) = state();
        let response = route(
            &state,
            &Method::POST,
            "/mark-dirties",
            Bytes::from_static(br#"{"keys": ["noColonHere", "players:1"]}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.stats.snapshot().received, 2);
    }

    #[tokio::test]
    async fn test_unparsable_body_is_bad_request() {
        let (state, _handle) = state();
        let response = route(&state, &Method::POST, "/mark-dirty", Bytes::from_static(b"nope")).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_oversized_body_is_refused() {
        let small = Full::new(Bytes::from_static(br#"{"key": "players:1"}"#));
        assert_eq!(read_body(small, 64).await.unwrap().len(), 20);

        let big = Full::new(Bytes::from(vec![b' '; 65]));
        let err = read_body(big, 64).await.unwrap_err();
        assert!(matches!(err, BgSaveError::PayloadTooLarge(_)));
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_health_and_not_found() {
        let (state, _handle) = state();

        let response = route(&state, &Method::GET, "/health", Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["healthy"], true);
        assert!(json["stats"]["cycles"].is_u64());

        let response = route(&state, &Method::GET, "/nope", Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
