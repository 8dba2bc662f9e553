use confique::Config;

/// Browser session cookie
#[derive(Debug, Config, Clone)]
pub struct SessionConfig {
    /// Base64 encoded cookie key, at least 64 bytes once decoded.
    /// A random key is generated when unset, which logs everyone out on restart.
    #[config(env = "AUTH_SESSION_COOKIE_KEY")]
    pub cookie_key: Option<String>,

    #[config(env = "AUTH_SESSION_COOKIE_NAME", default = "auth_session")]
    pub cookie_name: String,

    /// Mark the cookie Secure; disable only for plain-HTTP development
    #[config(env = "AUTH_SESSION_SECURE", default = true)]
    pub secure: bool,

    /// Cookie and login lifetime in seconds (default: 86400)
    #[config(env = "AUTH_SESSION_MAX_AGE", default = 86400)]
    pub max_age: u64,

    /// Comma-separated paths reachable without a signed-in session
    #[config(
        env = "AUTH_SESSION_PUBLIC_PATHS",
        default = "/login,/auth/callback,/logout,/oauth/authorize"
    )]
    pub public_paths: String,
}

impl SessionConfig {
    pub fn public_paths(&self) -> Vec<String> {
        self.public_paths
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
