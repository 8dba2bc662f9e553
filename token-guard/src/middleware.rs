use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::HeaderMap;

use crate::context::AuthContext;
use crate::error::GuardError;
use crate::extract::extract_bearer;
use crate::verifier::TokenVerifier;

/// Shared handle used as middleware state.
#[derive(Clone)]
pub struct TokenGuard {
    verifier: Arc<TokenVerifier>,
}

impl TokenGuard {
    pub fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self { verifier }
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Resolves the caller's context from request headers.
    /// No credentials yields an anonymous context; bad credentials are an error.
    pub async fn context_for(&self, headers: &HeaderMap) -> Result<AuthContext, GuardError> {
        match extract_bearer(headers)? {
            Some(token) => {
                let claims = self.verifier.verify(&token).await?;
                Ok(AuthContext::from_claims(&claims))
            }
            None => Ok(AuthContext::anonymous()),
        }
    }
}

/// Attaches an [`AuthContext`] to the request, or rejects it when the presented
/// token does not validate.
///
/// ```ignore
/// let app = Router::new()
///     .route("/projects/{id}", get(show_project))
///     .layer(axum::middleware::from_fn_with_state(guard, authenticate));
/// ```
pub async fn authenticate(
    State(guard): State<TokenGuard>,
    mut request: Request,
    next: Next,
) -> Response {
    match guard.context_for(request.headers()).await {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}
