//! Transport configuration.

use std::time::Duration;

/// Listener and HTTP-level settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    /// 0 means OS-assigned.
    pub port: u16,
    /// `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Upper bound on a whole HTTP exchange, including body upload.
    pub request_timeout: Duration,
    /// How long shutdown waits for in-flight calls.
    pub drain_timeout: Duration,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(30),
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.port, 0);
        assert_eq!(config.cors_origins, vec!["*"]);
        assert!(config.max_body_bytes > accounts_core::models::USER_IMAGE_MAX_SIZE_BYTES * 4 / 3);
    }
}
