use confique::Config;

/// HTTP listener and public identity of the server
#[derive(Debug, Config, Clone)]
pub struct ServerConfig {
    /// The port the server will listen to (default: 8080)
    #[config(env = "AUTH_PORT", default = 8080)]
    pub port: u16,

    /// Public base URL, used as the token issuer and to build endpoint URLs
    #[config(env = "AUTH_ISSUER", default = "http://localhost:8080")]
    pub issuer: String,

    /// Per-component health check timeout in seconds (default: 1.0)
    #[config(env = "AUTH_HEALTHCHECK_TIMEOUT", default = 1.0)]
    pub healthcheck_timeout: f64,

    /// Timeout for outbound HTTP calls to login providers in seconds (default: 10)
    #[config(env = "AUTH_OUTBOUND_TIMEOUT", default = 10)]
    pub outbound_timeout: u64,
}

impl ServerConfig {
    /// Absolute URL of a path on this server
    pub fn url_for(&self, path: &str) -> String {
        let base = self.issuer.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}
