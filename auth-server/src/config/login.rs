use confique::Config;

/// Login entry points
#[derive(Debug, Config, Clone)]
pub struct LoginConfig {
    /// JSON file seeding the user directory
    #[config(env = "AUTH_LOGIN_USERS_FILE")]
    pub users_file: Option<String>,

    /// JSON file describing federated login providers
    #[config(env = "AUTH_LOGIN_PROVIDERS_FILE")]
    pub providers_file: Option<String>,

    /// One-time password lifetime in seconds (default: 300)
    #[config(env = "AUTH_LOGIN_OTP_TTL", default = 300)]
    pub otp_ttl: u64,

    /// Wrong guesses allowed before a one-time password is discarded (default: 5)
    #[config(env = "AUTH_LOGIN_OTP_MAX_ATTEMPTS", default = 5)]
    pub otp_max_attempts: u32,

    /// Codes an address may request per issue window (default: 5)
    #[config(env = "AUTH_LOGIN_OTP_MAX_ISSUES", default = 5)]
    pub otp_max_issues: u32,

    /// Length of the issue window in seconds (default: 3600)
    #[config(env = "AUTH_LOGIN_OTP_ISSUE_WINDOW", default = 3600)]
    pub otp_issue_window: u64,
}
