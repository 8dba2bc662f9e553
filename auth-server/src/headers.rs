use axum::http::HeaderValue;
use axum::response::{IntoResponseParts, ResponseParts};
use http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use std::convert::Infallible;

/// Cache-Control directives
#[derive(Debug, Clone, Default)]
pub struct CacheControl {
    no_cache: bool,
    no_store: bool,
    public: bool,
    max_age: Option<u64>,
}

impl CacheControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    pub fn no_store(mut self) -> Self {
        self.no_store = true;
        self
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn to_header_value(&self) -> HeaderValue {
        let mut parts = Vec::new();
        if self.no_store {
            parts.push("no-store".to_string());
        }
        if self.no_cache {
            parts.push("no-cache".to_string());
        }
        if self.public {
            parts.push("public".to_string());
        }
        if let Some(max_age) = self.max_age {
            parts.push(format!("max-age={max_age}"));
        }
        HeaderValue::from_str(&parts.join(", ")).unwrap_or(HeaderValue::from_static("no-store"))
    }
}

/// Cache headers that can be returned as part of any response, e.g.
/// `(presets::no_store(), Json(body))`
#[derive(Debug, Clone, Default)]
pub struct CacheHeaders {
    cache_control: CacheControl,
}

impl CacheHeaders {
    pub fn new(cache_control: CacheControl) -> Self {
        Self { cache_control }
    }

    pub fn apply<B>(&self, response: &mut axum::response::Response<B>) {
        self.write(response.headers_mut());
    }

    fn write(&self, headers: &mut http::HeaderMap) {
        headers.insert(CACHE_CONTROL, self.cache_control.to_header_value());
        if self.cache_control.no_store || self.cache_control.no_cache {
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
            headers.insert(EXPIRES, HeaderValue::from_static("0"));
        }
    }
}

impl IntoResponseParts for CacheHeaders {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        self.write(res.headers_mut());
        Ok(res)
    }
}

pub mod presets {
    use super::*;

    /// For responses carrying credentials (RFC 6749 §5.1)
    pub fn no_store() -> CacheHeaders {
        CacheHeaders::new(CacheControl::new().no_store())
    }

    pub fn public_cache(max_age_seconds: u64) -> CacheHeaders {
        CacheHeaders::new(CacheControl::new().public().max_age(max_age_seconds))
    }
}
