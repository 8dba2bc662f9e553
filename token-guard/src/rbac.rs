//! Permission and project-membership checks over an [`AuthContext`].
//!
//! Permissions are flat strings such as `projects:read`. Holding
//! [`SUPERADMIN_PERMISSION`] satisfies every check, including project access
//! without a membership.

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;

use crate::context::AuthContext;

pub const SUPERADMIN_PERMISSION: &str = "superadmin";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub fn check_permission(ctx: &AuthContext, permission: &str) -> Result<(), AccessError> {
    if !ctx.authenticated {
        return Err(AccessError::Unauthenticated);
    }
    if ctx.is_superadmin() || ctx.permissions.contains(permission) {
        return Ok(());
    }
    Err(AccessError::Forbidden(format!(
        "missing permission '{permission}'"
    )))
}

/// Requires `permission` and a membership in `project_id`.
pub fn check_project_access(
    ctx: &AuthContext,
    permission: &str,
    project_id: &str,
) -> Result<(), AccessError> {
    if !ctx.authenticated {
        return Err(AccessError::Unauthenticated);
    }
    if ctx.is_superadmin() {
        return Ok(());
    }
    check_permission(ctx, permission)?;
    if ctx.memberships.contains_key(project_id) {
        Ok(())
    } else {
        Err(AccessError::Forbidden(format!(
            "no membership in project '{project_id}'"
        )))
    }
}

/// Passes when any one of `permissions` is held. An empty list never passes
/// except for a superadmin.
pub fn check_any_permission(ctx: &AuthContext, permissions: &[&str]) -> Result<(), AccessError> {
    if !ctx.authenticated {
        return Err(AccessError::Unauthenticated);
    }
    if ctx.is_superadmin() || permissions.iter().any(|p| ctx.permissions.contains(*p)) {
        return Ok(());
    }
    Err(AccessError::Forbidden(format!(
        "requires one of [{}]",
        permissions.join(", ")
    )))
}
