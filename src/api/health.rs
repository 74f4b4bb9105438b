//! Health check endpoints for FetchForge
//!
//! This module implements health and readiness checks for Kubernetes
//! and other orchestration platforms.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::api::{ComponentHealth, HealthResponse, HealthStatus, ReadyResponse, BUILD_INFO};
use crate::consumer::ConsumerStats;
use crate::queue::UnitQueue;

/// Application state for health checks
#[derive(Clone)]
pub struct HealthState {
    /// Work queue handle for connectivity checks
    pub queue: Arc<dyn UnitQueue>,

    /// Consumer counters
    pub stats: Arc<ConsumerStats>,

    /// Process start time
    pub started_at: DateTime<Utc>,
}

impl HealthState {
    /// Create a new health state
    pub fn new(queue: Arc<dyn UnitQueue>, stats: Arc<ConsumerStats>) -> Self {
        Self {
            queue,
            stats,
            started_at: Utc::now(),
        }
    }
}

/// Basic liveness check endpoint
///
/// Returns 200 OK if the service is alive.
/// This endpoint should be lightweight and not check external dependencies.
///
/// # Example
/// ```text
/// GET /healthz
/// ```
pub async fn health_check(State(state): State<Arc<HealthState>>) -> Response {
    let uptime = Utc::now() - state.started_at;
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some(format!("Service is running ({}s)", uptime.num_seconds())),
        timestamp: Utc::now(),
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// Readiness check endpoint
///
/// Checks if the service is ready to accept traffic by verifying the work
/// queue is reachable and the consumer is running.
///
/// # Example
/// ```text
/// GET /readyz
/// ```
pub async fn ready_check(State(state): State<Arc<HealthState>>) -> Response {
    let mut checks = HashMap::new();

    let queue_health = match state.queue.health_check().await {
        Ok(()) => ComponentHealth {
            status: HealthStatus::Healthy,
            message: Some("Work queue is reachable".to_string()),
            last_check: Utc::now(),
        },
        Err(e) => ComponentHealth {
            status: HealthStatus::Unhealthy,
            message: Some(e.to_string()),
            last_check: Utc::now(),
        },
    };
    checks.insert("queue".to_string(), queue_health);

    let consumer_running = state.stats.running.load(Ordering::Relaxed);
    checks.insert(
        "consumer".to_string(),
        ComponentHealth {
            status: if consumer_running {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            message: Some(format!(
                "ok={} failed={} restarts={}",
                state.stats.units_ok.load(Ordering::Relaxed),
                state.stats.units_failed.load(Ordering::Relaxed),
                state.stats.worker_restarts.load(Ordering::Relaxed),
            )),
            last_check: Utc::now(),
        },
    );

    let overall_status = if checks.values().all(|c| c.status.is_healthy()) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };

    let response = ReadyResponse {
        status: overall_status,
        checks,
        timestamp: Utc::now(),
    };

    (overall_status.to_status_code(), Json(response)).into_response()
}

/// Build information endpoint
///
/// Returns build metadata including version, commit hash, and build time.
///
/// # Example
/// ```text
/// GET /build
/// ```
pub async fn build_info() -> Response {
    (StatusCode::OK, Json(&BUILD_INFO)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockUnitQueue;

    fn test_state() -> Arc<HealthState> {
        Arc::new(HealthState::new(
            Arc::new(MockUnitQueue::new()),
            Arc::new(ConsumerStats::new()),
        ))
    }

    #[tokio::test]
    async fn test_health_check_endpoint() {
        let response = health_check(State(test_state())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_check_reports_stopped_consumer() {
        let state = test_state();
        // Consumer not marked running
        let response = ready_check(State(state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ready_check_healthy_when_running() {
        let state = test_state();
        state.stats.running.store(true, Ordering::Relaxed);

        let response = ready_check(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_check_unhealthy_when_queue_fails() {
        let queue = Arc::new(MockUnitQueue::new());
        queue.fail_next_operation("Redis is down");
        let stats = Arc::new(ConsumerStats::new());
        stats.running.store(true, Ordering::Relaxed);

        let state = Arc::new(HealthState::new(queue, stats));
        let response = ready_check(State(state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_build_info_endpoint() {
        let response = build_info().await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
