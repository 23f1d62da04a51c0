//! API module - REST and WebSocket

pub mod rest;
pub mod websocket;

use axum::{
    routing::{delete, get, post},
    Router,
};
use spatia_pipeline::aof::FlushMetrics;
use spatia_pipeline::Pipeline;
use spatia_telemetry::Gauge;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::webhook::HookManager;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub hooks: Arc<HookManager>,
    pub flush: FlushMetrics,
    pub live_channel_capacity: usize,
    /// Open live-query WebSockets
    pub live_sockets: Gauge,
    pub started_at: Instant,
    accepting: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<Pipeline>,
        hooks: Arc<HookManager>,
        flush: FlushMetrics,
        live_channel_capacity: usize,
    ) -> Self {
        Self {
            pipeline,
            hooks,
            flush,
            live_channel_capacity,
            live_sockets: Gauge::new("live_sockets"),
            started_at: Instant::now(),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Reject further writes; used once shutdown begins
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::ready_check))
        // Write path
        .route("/v1/commands", post(rest::execute_command))
        .route("/v1/massinsert", post(rest::mass_insert))
        // Geofence hooks
        .route("/v1/hooks", post(rest::set_hook).get(rest::list_hooks))
        .route("/v1/hooks/{name}", delete(rest::delete_hook))
        // Live queries
        .route("/v1/live/{key}", get(websocket::live_handler))
        // Stats
        .route("/v1/stats", get(rest::get_stats))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use spatia_pipeline::aof::{AofFile, AofFlusher};
    use spatia_pipeline::{FsyncPolicy, MemoryStore, PipelineConfig};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_state(dir: &tempfile::TempDir) -> AppState {
        let config = PipelineConfig::default();
        let pipeline = Arc::new(Pipeline::new(MemoryStore::new(), &config));
        let file = AofFile::open(dir.path().join("test.aof"), FsyncPolicy::No).await.unwrap();
        let flush = AofFlusher::new(Arc::clone(&pipeline), file, &config.aof).metrics();
        let hooks = Arc::new(HookManager::new(
            Arc::clone(pipeline.fences()),
            16,
            Duration::from_millis(100),
        ));
        AppState::new(pipeline, hooks, flush, 16)
    }

    async fn call(state: &AppState, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;

        let (status, body) = call(
            &state,
            Method::POST,
            "/v1/commands",
            Some(json!({"args": ["SET", "fleet", "truck1", "POINT", "33.5", "-112.2"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["stage"], "completed");
        assert_eq!(body["detail"]["seq"], 1);
        assert_eq!(body["detail"]["kind"], "create");
        assert!(body["timings"]["total_ms"].is_number());

        let (status, body) = call(
            &state,
            Method::POST,
            "/v1/commands",
            Some(json!({"args": ["FSET", "fleet", "ghost", "speed", "1"]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        let (status, body) = call(&state, Method::POST, "/v1/commands", Some(json!({"args": ["PING"]}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "MALFORMED_COMMAND");

        let (_, stats) = call(&state, Method::GET, "/v1/stats", None).await;
        assert_eq!(stats["pipeline"]["commands"], 3);
        assert_eq!(stats["pipeline"]["failures"], 2);
        assert_eq!(stats["pipeline"]["objects"], 1);
    }

    #[tokio::test]
    async fn test_hook_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        let hook = json!({
            "name": "phx",
            "key": "fleet",
            "region": {"type": "bounds", "min": {"lat": 33.0, "lon": -113.0}, "max": {"lat": 34.0, "lon": -111.0}},
            "detect": ["enter", "exit"],
            "endpoint": "http://127.0.0.1:9/hook"
        });

        let (status, body) = call(&state, Method::POST, "/v1/hooks", Some(hook)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "phx");

        let (_, body) = call(&state, Method::GET, "/v1/hooks", None).await;
        assert_eq!(body["hooks"].as_array().map(Vec::len), Some(1));

        let (status, _) = call(&state, Method::DELETE, "/v1/hooks/phx", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&state, Method::DELETE, "/v1/hooks/phx", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_writes_rejected_after_shutdown_begins() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        state.stop_accepting();

        let (status, body) = call(
            &state,
            Method::POST,
            "/v1/commands",
            Some(json!({"args": ["DEL", "fleet", "truck1"]})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "UNAVAILABLE");

        let (status, _) = call(&state, Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_mass_insert_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;

        let (status, body) = call(
            &state,
            Method::POST,
            "/v1/massinsert",
            Some(json!({"collections": 2, "objects": 10, "bounds": [33.0, -113.0, 34.0, -111.0]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["inserted"], 20);
        assert_eq!(state.pipeline.last_seq(), 20);
    }
}
