use axum_extra::extract::cookie::CookieJar;
use http::HeaderMap;
use http::header::AUTHORIZATION;

use crate::error::GuardError;

/// Cookie consulted when no `Authorization` header is present
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Pulls the raw bearer token out of a request.
///
/// The `Authorization` header wins. A header that is present but not of the
/// form `Bearer <token>` is an error, not a reason to fall back to the cookie.
/// `Ok(None)` means the request is anonymous.
pub fn extract_bearer(headers: &HeaderMap) -> Result<Option<String>, GuardError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let value = value.to_str().map_err(|_| GuardError::Malformed)?;
        let (scheme, token) = value.split_once(' ').ok_or(GuardError::Malformed)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(GuardError::Malformed);
        }
        let token = token.trim();
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Err(GuardError::Malformed);
        }
        return Ok(Some(token.to_string()));
    }

    let jar = CookieJar::from_headers(headers);
    Ok(jar
        .get(ACCESS_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty()))
}
