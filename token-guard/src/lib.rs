//! # token-guard
//!
//! Stateless bearer-token validation and permission checks for services that
//! sit behind the authorization server.
//!
//! ## Components
//!
//! - **Verifier:** validates RS256 access tokens against a published key set,
//!   refreshing the set once when a key appears to have rotated.
//! - **Key set cache:** read-through JWKS cache with a TTL and a rate-limited
//!   forced-refresh path.
//! - **Authorization context:** the per-request identity derived from validated
//!   claims, plus the permission and project-membership checks evaluated on it.
//! - **Middleware:** axum layer that attaches an [`AuthContext`] to every request.

pub mod builder;
pub mod claims;
pub mod context;
pub mod error;
pub mod extract;
pub mod jwk;
pub mod jwks_cache;
pub mod key_source;
pub mod middleware;
pub mod rbac;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::TokenVerifierBuilder;
pub use claims::{AccessTokenClaims, IdTokenClaims};
pub use context::AuthContext;
pub use error::GuardError;
pub use extract::{ACCESS_TOKEN_COOKIE, extract_bearer};
pub use jwk::{Jwk, JwkSet};
pub use jwks_cache::JwksCache;
pub use key_source::{HttpKeySource, KeySource, StaticKeySource};
pub use middleware::{TokenGuard, authenticate};
pub use rbac::{
    AccessError, SUPERADMIN_PERMISSION, check_any_permission, check_permission,
    check_project_access,
};
pub use verifier::TokenVerifier;
