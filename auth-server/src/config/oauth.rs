//! OAuth 2.0 flow configuration

use confique::Config;

#[derive(Debug, Config, Clone)]
pub struct OAuthConfig {
    /// Authorization code lifetime in seconds (default: 600)
    #[config(env = "AUTH_OAUTH_CODE_TTL", default = 600)]
    pub code_ttl: u64,

    /// Access token lifetime in seconds (default: 900)
    #[config(env = "AUTH_OAUTH_ACCESS_TOKEN_TTL", default = 900)]
    pub access_token_ttl: u64,

    /// Refresh token lifetime in seconds (default: 30 days)
    #[config(env = "AUTH_OAUTH_REFRESH_TOKEN_TTL", default = 2592000)]
    pub refresh_token_ttl: u64,

    /// Issue a new refresh token on every refresh and retire the old one (default: true)
    #[config(env = "AUTH_OAUTH_ROTATE_REFRESH_TOKENS", default = true)]
    pub rotate_refresh_tokens: bool,

    /// JSON file with the registered clients
    #[config(env = "AUTH_OAUTH_CLIENTS_FILE")]
    pub clients_file: Option<String>,

    /// Scopes clients may request, space or comma separated
    #[config(env = "AUTH_OAUTH_SCOPES", default = "openid email profile permissions")]
    pub scopes: String,
}

impl OAuthConfig {
    pub fn supported_scopes(&self) -> Vec<String> {
        self.scopes
            .split([',', ' '])
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
