//! Configuration module for guardforce.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Base URL of the guard backend (default: "http://localhost:3000/api")
    pub api_base_url: String,
    /// Bearer token sent to the guard backend, if any
    pub api_token: Option<String>,
    /// Path to the SQLite draft database (default: "guardforce.db")
    pub db_path: String,
    /// Zone in which calendar days are resolved (default: Asia/Kolkata)
    pub timezone: chrono_tz::Tz,
    /// Per-request timeout against the backend (default: 30s)
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            api_base_url: "http://localhost:3000/api".to_string(),
            api_token: None,
            db_path: "guardforce.db".to_string(),
            timezone: chrono_tz::Asia::Kolkata,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `GUARDFORCE_HTTP_PORT`: HTTP port (default: 8080)
    /// - `GUARDFORCE_API_BASE_URL`: backend base URL
    /// - `GUARDFORCE_API_TOKEN`: backend bearer token (optional)
    /// - `GUARDFORCE_DB_PATH`: Database file path (default: "guardforce.db")
    /// - `GUARDFORCE_TIMEZONE`: IANA zone name (default: "Asia/Kolkata")
    /// - `GUARDFORCE_REQUEST_TIMEOUT_SECS`: backend timeout (default: 30)
    pub fn load() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parsed(&lookup, "GUARDFORCE_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(url) = lookup("GUARDFORCE_API_BASE_URL").filter(|u| !u.trim().is_empty()) {
            cfg.api_base_url = url;
        }

        cfg.api_token = lookup("GUARDFORCE_API_TOKEN").filter(|t| !t.trim().is_empty());

        if let Some(db_path) = lookup("GUARDFORCE_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(tz) = parsed(&lookup, "GUARDFORCE_TIMEZONE") {
            cfg.timezone = tz;
        }

        if let Some(secs) = parsed::<u64>(&lookup, "GUARDFORCE_REQUEST_TIMEOUT_SECS").filter(|s| *s > 0) {
            cfg.request_timeout = Duration::from_secs(secs);
        }

        cfg
    }
}

/// Parse one variable, keeping the default (with a warning) when invalid.
fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}; using default", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "guardforce.db");
        assert_eq!(cfg.timezone, chrono_tz::Asia::Kolkata);
        assert!(cfg.api_token.is_none());
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("GUARDFORCE_HTTP_PORT", "not-a-port"),
            ("GUARDFORCE_TIMEZONE", "Mars/Olympus"),
            ("GUARDFORCE_REQUEST_TIMEOUT_SECS", "5"),
            ("GUARDFORCE_API_TOKEN", "secret"),
        ]);
        let cfg = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.timezone, chrono_tz::Asia::Kolkata);
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert_eq!(cfg.api_token.as_deref(), Some("secret"));
    }
}
