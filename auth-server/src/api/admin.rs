//! Operator endpoints, authorized with the server's own access tokens

use crate::clients::ClientError;
use crate::errors::ApiError;
use crate::headers::presets;
use crate::openapi::ADMIN_TAG;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http::StatusCode;
use log::{error, info};
use serde::{Deserialize, Serialize};
use token_guard::{AuthContext, authenticate};
use utoipa::ToSchema;

pub const MANAGE_CLIENTS_PERMISSION: &str = "clients:manage";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RotatedSecret {
    pub client_id: String,
    /// Shown once; only its hash is kept
    pub client_secret: String,
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotFound => ApiError::not_found("Client not found"),
            ClientError::PublicClient(_) => ApiError::bad_request(err.to_string()),
            other => {
                error!("Client registry failure: {other}");
                ApiError::internal("Failed to update client")
            }
        }
    }
}

#[utoipa::path(
    post,
    path = "/admin/clients/{client_id}/secret",
    tag = ADMIN_TAG,
    params(("client_id" = String, Path, description = "Confidential client to rotate")),
    responses(
        (status = 200, description = "New secret issued", body = RotatedSecret),
        (status = 400, description = "Client is public"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Caller lacks clients:manage"),
        (status = 404, description = "Unknown client")
    ),
    security(("bearer" = []))
)]
pub async fn rotate_client_secret(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(client_id): Path<String>,
) -> Result<impl IntoResponse, Response> {
    ctx.check_permission(MANAGE_CLIENTS_PERMISSION)
        .map_err(IntoResponse::into_response)?;

    let client_secret = state
        .clients
        .rotate_secret(&client_id)
        .await
        .map_err(|e| ApiError::from(e).into_response())?;

    info!("User '{}' rotated the secret of client '{}'", ctx.user_id, client_id);
    Ok((
        StatusCode::OK,
        presets::no_store(),
        Json(RotatedSecret {
            client_id,
            client_secret,
        }),
    ))
}

pub(crate) fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/admin/clients/{client_id}/secret",
            post(rotate_client_secret),
        )
        .route_layer(from_fn_with_state(state.guard.clone(), authenticate))
}
