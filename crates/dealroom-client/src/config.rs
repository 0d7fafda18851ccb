//! Client configuration loaded from environment variables.
//!
//! Every setting has a default suitable for a local backend, so the client
//! starts with zero configuration during development.

use std::time::Duration;

use dealroom_shared::constants::SIGNED_URL_EXPIRY_SECS;
use dealroom_shared::UserId;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the marketplace backend.
    /// Env: `DEALROOM_API_URL`
    /// Default: `http://localhost:8080`
    pub api_url: String,

    /// Bearer token for the current session.
    /// Env: `DEALROOM_ACCESS_TOKEN`
    pub access_token: Option<String>,

    /// The signed-in user. Required for sending and signing.
    /// Env: `DEALROOM_USER_ID`
    pub user_id: Option<UserId>,

    /// Display name attached to optimistic messages.
    /// Env: `DEALROOM_USER_NAME`
    pub user_name: Option<String>,

    /// Per-request timeout.
    /// Env: `DEALROOM_REQUEST_TIMEOUT_SECS`
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Lifetime requested for signed object URLs.
    /// Env: `DEALROOM_SIGNED_URL_EXPIRY_SECS`
    /// Default: 3600
    pub signed_url_expiry_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            access_token: None,
            user_id: None,
            user_name: None,
            request_timeout: Duration::from_secs(30),
            signed_url_expiry_secs: SIGNED_URL_EXPIRY_SECS,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("DEALROOM_API_URL") {
            if url.starts_with("http://") || url.starts_with("https://") {
                config.api_url = url.trim_end_matches('/').to_string();
            } else {
                tracing::warn!(value = %url, "Invalid DEALROOM_API_URL, using default");
            }
        }

        config.access_token = lookup("DEALROOM_ACCESS_TOKEN").filter(|t| !t.is_empty());
        config.user_id = lookup("DEALROOM_USER_ID")
            .filter(|id| !id.is_empty())
            .map(UserId::from);
        config.user_name = lookup("DEALROOM_USER_NAME").filter(|n| !n.is_empty());

        if let Some(val) = lookup("DEALROOM_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid DEALROOM_REQUEST_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(val) = lookup("DEALROOM_SIGNED_URL_EXPIRY_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.signed_url_expiry_secs = secs,
                _ => tracing::warn!(value = %val, "Invalid DEALROOM_SIGNED_URL_EXPIRY_SECS, using default"),
            }
        }

        config
    }
}
