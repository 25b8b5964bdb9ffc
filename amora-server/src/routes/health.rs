use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

use amora_shared::{HealthCheck, HealthResponse, HealthStatus};

use crate::AppState;

/// Health check that probes Postgres, Redis and RabbitMQ.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let db = state.db.clone();
    let database = match tokio::task::spawn_blocking(move || db.get().map(|_| ())).await {
        Ok(Ok(())) => check("postgres", HealthStatus::Healthy, None),
        Ok(Err(e)) => check("postgres", HealthStatus::Unhealthy, Some(e.to_string())),
        Err(e) => check("postgres", HealthStatus::Unhealthy, Some(e.to_string())),
    };

    // Cache loss degrades but never breaks correctness.
    let cache = match state.redis.ping().await {
        Ok(()) => check("redis", HealthStatus::Healthy, None),
        Err(e) => check("redis", HealthStatus::Degraded, Some(e.to_string())),
    };

    let broker = if state.rabbitmq.is_connected() {
        check("rabbitmq", HealthStatus::Healthy, None)
    } else {
        check("rabbitmq", HealthStatus::Degraded, Some("channel disconnected".into()))
    };

    let response = HealthResponse::healthy("amora-server", env!("CARGO_PKG_VERSION"))
        .with_checks(vec![database, cache, broker]);

    let status = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(response)).into_response()
}

fn check(name: &str, status: HealthStatus, message: Option<String>) -> HealthCheck {
    HealthCheck {
        name: name.to_string(),
        status,
        message,
    }
}

/// Returns Prometheus metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
