//! 存活探针与指标接口

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use relay_shared::observability::middleware as obs_middleware;

pub const LIVENESS_MESSAGE: &str = "Notification relay is running";

#[derive(Clone)]
struct ServerState {
    service_name: Arc<str>,
    metrics: Option<PrometheusHandle>,
}

/// 构建 HTTP 路由
pub fn router(service_name: &str, metrics: Option<PrometheusHandle>) -> Router {
    let state = ServerState {
        service_name: Arc::from(service_name),
        metrics,
    };

    Router::new()
        .route("/", get(liveness))
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .with_state(state)
}

async fn liveness() -> &'static str {
    LIVENESS_MESSAGE
}

/// 存活探针：服务进程正常即返回 ok
async fn health_check(State(state): State<ServerState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": &*state.service_name
    }))
}

async fn render_metrics(State(state): State<ServerState>) -> impl IntoResponse {
    match state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
