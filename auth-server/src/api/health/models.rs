use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Represents the health status of a component or the overall service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum HealthStatusType {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "error")]
    Error,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatusType,
    pub components: ComponentHealth,
    #[serde(skip)]
    pub status_code: StatusCode,
}

/// Health status of individual components
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ComponentHealth {
    /// Code, refresh token and one-time password storage
    pub store: ComponentStatus,
    /// Key set used to validate issued tokens
    pub keys: ComponentStatus,
}

impl ComponentHealth {
    pub fn all_ok(&self) -> bool {
        self.store.is_ok() && self.keys.is_ok()
    }
}

/// Status of an individual component
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ComponentStatus {
    pub status: HealthStatusType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentStatus {
    pub fn ok(details: Option<serde_json::Value>) -> Self {
        Self {
            status: HealthStatusType::Ok,
            error: None,
            details,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatusType::Error,
            error: Some(message.into()),
            details: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HealthStatusType::Ok
    }
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status_code = self.status_code;
        (status_code, Json(self)).into_response()
    }
}
