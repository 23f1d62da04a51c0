//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use spatia_core::{DependencyStatus, HealthStatus, ReadinessStatus, SpatiaError};
use spatia_pipeline::aof::FlushStats;
use spatia_pipeline::{Command, Invocation, PipelineStats};

use super::AppState;
use crate::error::ApiError;
use crate::massinsert::{self, MassInsertReport, MassInsertRequest};
use crate::webhook::{HookInfo, HookSpec};

/// Generic API response
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self { ok: true, data })
    }
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        healthy: true,
        service_id: "spatia-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// Not ready once shutdown begins. The AOF is reported as a dependency,
/// unavailable while its most recent write is failing.
pub async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessStatus>) {
    let aof = state.flush.snapshot();
    let status = ReadinessStatus {
        ready: state.is_accepting(),
        dependencies: vec![DependencyStatus {
            name: "aof".to_string(),
            available: !aof.failing,
            latency_ms: Some(aof.latency_ms.p99.ceil() as u64),
        }],
    };
    let code = if status.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

fn ensure_accepting(state: &AppState) -> Result<(), ApiError> {
    if state.is_accepting() {
        Ok(())
    } else {
        Err(SpatiaError::Unavailable("server is shutting down".to_string()).into())
    }
}

// Write path

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub args: Vec<String>,
}

pub async fn execute_command(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<ApiResponse<Invocation>>, ApiError> {
    ensure_accepting(&state)?;
    if req.args.is_empty() {
        return Err(ApiError::invalid("args must not be empty"));
    }

    let invocation = state.pipeline.execute(&Command::new(req.args))?;
    Ok(ApiResponse::success(invocation))
}

pub async fn mass_insert(
    State(state): State<AppState>,
    Json(req): Json<MassInsertRequest>,
) -> Result<Json<ApiResponse<MassInsertReport>>, ApiError> {
    ensure_accepting(&state)?;
    req.validate()?;

    let pipeline = state.pipeline.clone();
    let report = tokio::task::spawn_blocking(move || massinsert::run(&pipeline, &req, &mut rand::thread_rng()))
        .await
        .map_err(|e| SpatiaError::Internal(format!("mass insert task failed: {e}")))??;

    Ok(ApiResponse::success(report))
}

// Hooks

#[derive(Debug, Serialize)]
pub struct HookList {
    pub hooks: Vec<HookInfo>,
}

pub async fn set_hook(
    State(state): State<AppState>,
    Json(spec): Json<HookSpec>,
) -> Result<(StatusCode, Json<ApiResponse<HookInfo>>), ApiError> {
    let info = state.hooks.register(spec)?;
    Ok((StatusCode::CREATED, ApiResponse::success(info)))
}

pub async fn list_hooks(State(state): State<AppState>) -> Json<ApiResponse<HookList>> {
    ApiResponse::success(HookList {
        hooks: state.hooks.list(),
    })
}

pub async fn delete_hook(State(state): State<AppState>, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    if state.hooks.remove(&name) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("hook '{name}'")))
    }
}

// Stats

#[derive(Debug, Serialize)]
pub struct WebhookStats {
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub pipeline: PipelineStats,
    pub aof: FlushStats,
    pub webhooks: WebhookStats,
    pub live_sockets: u64,
    pub uptime_seconds: u64,
}

pub async fn get_stats(State(state): State<AppState>) -> Json<ApiResponse<StatsResponse>> {
    ApiResponse::success(StatsResponse {
        pipeline: state.pipeline.stats(),
        aof: state.flush.snapshot(),
        webhooks: WebhookStats {
            sent: state.hooks.sent_total(),
            failed: state.hooks.failed_total(),
        },
        live_sockets: state.live_sockets.get(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}
