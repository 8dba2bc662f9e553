use std::collections::{HashMap, HashSet};
use std::convert::Infallible;

use axum::extract::FromRequestParts;
use http::request::Parts;

use crate::claims::AccessTokenClaims;
use crate::rbac::{self, AccessError, SUPERADMIN_PERMISSION};

/// Identity attached to a request once its bearer token has been validated.
///
/// Requests without a token carry [`AuthContext::anonymous`], which fails every
/// permission check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub permissions: HashSet<String>,
    pub memberships: HashMap<String, String>,
    pub authenticated: bool,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_claims(claims: &AccessTokenClaims) -> Self {
        Self {
            user_id: claims.sub.clone(),
            email: claims.email.clone(),
            name: claims.name.clone(),
            email_verified: claims.email_verified,
            permissions: claims.perms.iter().cloned().collect(),
            memberships: claims.memberships.clone(),
            authenticated: true,
        }
    }

    pub fn is_superadmin(&self) -> bool {
        self.authenticated && self.permissions.contains(SUPERADMIN_PERMISSION)
    }

    pub fn role_in(&self, project_id: &str) -> Option<&str> {
        self.memberships.get(project_id).map(String::as_str)
    }

    pub fn check_permission(&self, permission: &str) -> Result<(), AccessError> {
        rbac::check_permission(self, permission)
    }

    pub fn check_project_access(&self, permission: &str, project_id: &str) -> Result<(), AccessError> {
        rbac::check_project_access(self, permission, project_id)
    }

    pub fn check_any_permission(&self, permissions: &[&str]) -> Result<(), AccessError> {
        rbac::check_any_permission(self, permissions)
    }
}

/// Reads the context placed by [`authenticate`](crate::middleware::authenticate).
/// Handlers on routes without the middleware see an anonymous context.
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .unwrap_or_else(AuthContext::anonymous))
    }
}
