use super::checkers::{check_keys_health, check_store_health, run_health_check};
use super::models::{ComponentHealth, ComponentStatus, HealthResponse, HealthStatusType};
use crate::openapi::HEALTH_TAG;
use crate::state::AppState;
use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use log::{debug, error, info};

fn task_failed(name: &str, err: tokio::task::JoinError) -> ComponentStatus {
    error!("{name} check task panicked: {err:?}");
    ComponentStatus::error(format!("{name} check task failed"))
}

/// Check the health of all components
async fn check_all_health(state: &AppState) -> HealthResponse {
    let store_handle = tokio::spawn(run_health_check(
        "Store",
        check_store_health,
        state.clone(),
    ));
    let keys_handle = tokio::spawn(run_health_check("Keys", check_keys_health, state.clone()));

    let components = ComponentHealth {
        store: store_handle
            .await
            .unwrap_or_else(|e| task_failed("Store", e)),
        keys: keys_handle.await.unwrap_or_else(|e| task_failed("Keys", e)),
    };

    let all_healthy = components.all_ok();
    if all_healthy {
        debug!("Health check passed for all components");
    } else {
        let issues: Vec<String> = [("store", &components.store), ("keys", &components.keys)]
            .into_iter()
            .filter(|(_, component)| !component.is_ok())
            .map(|(name, component)| {
                format!(
                    "{name}: {}",
                    component.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        info!("Health check failed: {}", issues.join(", "));
    }

    HealthResponse {
        status: if all_healthy {
            HealthStatusType::Ok
        } else {
            HealthStatusType::Error
        },
        components,
        status_code: if all_healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        },
    }
}

/// Health check handler
#[utoipa::path(
    get,
    path = "/health",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is not healthy", body = HealthResponse)
    )
)]
pub(crate) async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    check_all_health(&state).await
}

/// Ready check handler - alias to health check
#[utoipa::path(
    get,
    path = "/ready",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse),
        (status = 503, description = "Service is not ready", body = HealthResponse)
    )
)]
pub(crate) async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    check_all_health(&state).await
}

/// Healthy check handler - alias to health check
#[utoipa::path(
    get,
    path = "/healthy",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is not healthy", body = HealthResponse)
    )
)]
pub(crate) async fn healthy_check(State(state): State<AppState>) -> impl IntoResponse {
    check_all_health(&state).await
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/healthy", get(healthy_check))
}
