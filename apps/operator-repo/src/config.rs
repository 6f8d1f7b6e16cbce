use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use thiserror::Error;

const DEFAULT_SERVICE_NAME: &str = "analytics-operator-repo";
const DEFAULT_SERVER_PORT: u16 = 8000;
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_DB_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_DEPENDENCY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PERMISSIONS_URL: &str = "http://permv2.permissions:8080";
const DEFAULT_PERMISSIONS_ADMIN_TOKEN: &str = "internal-admin";

/// Value of `PERMISSIONS_V2_URL` that selects the in-process permissions service.
pub const MOCK_PERMISSIONS_URL: &str = "mock";

#[derive(Clone, Debug)]
pub struct Config {
    pub service_name: String,
    pub version: String,
    pub bind_addr: SocketAddr,
    pub debug: bool,
    pub log_filter: String,
    pub log_json: bool,
    pub db_url: Option<String>,
    pub db_connect_timeout: Duration,
    pub http_timeout: Duration,
    pub dependency_timeout: Duration,
    pub permissions_url: String,
    pub permissions_admin_token: String,
    pub url_prefix: String,
    pub reconcile_on_startup: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid SERVER_PORT: {0}")]
    InvalidServerPort(String),
    #[error("invalid DEBUG: {0}")]
    InvalidDebug(String),
    #[error("invalid LOGGER_JSON: {0}")]
    InvalidLoggerJson(String),
    #[error("invalid DB_CONNECT_TIMEOUT_MS: {0}")]
    InvalidDbConnectTimeout(String),
    #[error("invalid HTTP_TIMEOUT_MS: {0}")]
    InvalidHttpTimeout(String),
    #[error("invalid DEPENDENCY_TIMEOUT_MS: {0}")]
    InvalidDependencyTimeout(String),
    #[error("invalid PERMISSIONS_V2_URL: must not be empty")]
    MissingPermissionsUrl,
    #[error("invalid URL_PREFIX: {0}")]
    InvalidUrlPrefix(String),
    #[error("invalid RECONCILE_ON_STARTUP: {0}")]
    InvalidReconcileOnStartup(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let service_name =
            value("SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());
        let server_port = match value("SERVER_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|error| ConfigError::InvalidServerPort(error.to_string()))?,
            None => DEFAULT_SERVER_PORT,
        };
        let debug = parse_bool(value("DEBUG"), false).map_err(ConfigError::InvalidDebug)?;
        // Debug builds stay on loopback.
        let bind_ip = if debug {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        let log_filter = value("LOGGER_LEVEL").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let log_json =
            parse_bool(value("LOGGER_JSON"), false).map_err(ConfigError::InvalidLoggerJson)?;
        let db_url = value("DATABASE_URL").or_else(|| value("DB_URL"));
        let db_connect_timeout = parse_millis(
            value("DB_CONNECT_TIMEOUT_MS"),
            DEFAULT_DB_CONNECT_TIMEOUT_MS,
        )
        .map_err(ConfigError::InvalidDbConnectTimeout)?;
        let http_timeout = parse_millis(value("HTTP_TIMEOUT_MS"), DEFAULT_HTTP_TIMEOUT_MS)
            .map_err(ConfigError::InvalidHttpTimeout)?;
        let dependency_timeout = parse_millis(
            value("DEPENDENCY_TIMEOUT_MS"),
            DEFAULT_DEPENDENCY_TIMEOUT_MS,
        )
        .map_err(ConfigError::InvalidDependencyTimeout)?;
        let permissions_url = match lookup("PERMISSIONS_V2_URL") {
            Some(raw) if raw.trim().is_empty() => return Err(ConfigError::MissingPermissionsUrl),
            Some(raw) => raw.trim().to_string(),
            None => DEFAULT_PERMISSIONS_URL.to_string(),
        };
        let permissions_admin_token = value("PERMISSIONS_ADMIN_TOKEN")
            .unwrap_or_else(|| DEFAULT_PERMISSIONS_ADMIN_TOKEN.to_string());
        let url_prefix = normalize_url_prefix(value("URL_PREFIX").unwrap_or_default())?;
        let reconcile_on_startup = parse_bool(value("RECONCILE_ON_STARTUP"), true)
            .map_err(ConfigError::InvalidReconcileOnStartup)?;

        Ok(Self {
            service_name,
            version: env!("CARGO_PKG_VERSION").to_string(),
            bind_addr: SocketAddr::new(bind_ip, server_port),
            debug,
            log_filter,
            log_json,
            db_url,
            db_connect_timeout,
            http_timeout,
            dependency_timeout,
            permissions_url,
            permissions_admin_token,
            url_prefix,
            reconcile_on_startup,
        })
    }

    #[must_use]
    pub fn uses_mock_permissions(&self) -> bool {
        self.permissions_url.eq_ignore_ascii_case(MOCK_PERMISSIONS_URL)
    }
}

fn parse_bool(value: Option<String>, default: bool) -> Result<bool, String> {
    match value {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(raw),
        },
    }
}

fn parse_millis(value: Option<String>, default: u64) -> Result<Duration, String> {
    let millis = match value {
        None => default,
        Some(raw) => raw.parse::<u64>().map_err(|error| error.to_string())?,
    };
    if millis == 0 {
        return Err("must be greater than zero".to_string());
    }
    Ok(Duration::from_millis(millis))
}

fn normalize_url_prefix(raw: String) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if trimmed.contains(char::is_whitespace) || trimmed.contains(['?', '#']) {
        return Err(ConfigError::InvalidUrlPrefix(raw));
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{trimmed}"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{Config, ConfigError};

    fn config_from(values: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let values: HashMap<&str, &str> = values.iter().copied().collect();
        Config::from_lookup(|key| values.get(key).map(ToString::to_string))
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = config_from(&[]).expect("default config");
        assert_eq!(config.service_name, "analytics-operator-repo");
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8000");
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.db_url, None);
        assert_eq!(config.http_timeout.as_millis(), 30_000);
        assert_eq!(config.dependency_timeout.as_millis(), 10_000);
        assert_eq!(config.permissions_url, "http://permv2.permissions:8080");
        assert!(!config.uses_mock_permissions());
        assert_eq!(config.url_prefix, "");
        assert!(config.reconcile_on_startup);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("SERVER_PORT", "9100"),
            ("DEBUG", "true"),
            ("LOGGER_LEVEL", "debug"),
            ("DATABASE_URL", "postgres://localhost/operators"),
            ("DEPENDENCY_TIMEOUT_MS", "250"),
            ("PERMISSIONS_V2_URL", "MOCK"),
            ("URL_PREFIX", "analytics/operators/"),
            ("RECONCILE_ON_STARTUP", "false"),
        ])
        .expect("config");

        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9100");
        assert_eq!(config.log_filter, "debug");
        assert_eq!(
            config.db_url.as_deref(),
            Some("postgres://localhost/operators")
        );
        assert_eq!(config.dependency_timeout.as_millis(), 250);
        assert!(config.uses_mock_permissions());
        assert_eq!(config.url_prefix, "/analytics/operators");
        assert!(!config.reconcile_on_startup);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let error = config_from(&[("SERVER_PORT", "eighty")]).expect_err("bad port");
        assert!(error.to_string().starts_with("invalid SERVER_PORT"));

        let error = config_from(&[("HTTP_TIMEOUT_MS", "0")]).expect_err("zero timeout");
        assert!(matches!(error, ConfigError::InvalidHttpTimeout(_)));

        let error = config_from(&[("PERMISSIONS_V2_URL", " ")]).expect_err("blank url");
        assert!(matches!(error, ConfigError::MissingPermissionsUrl));

        let error = config_from(&[("DEBUG", "maybe")]).expect_err("bad bool");
        assert!(matches!(error, ConfigError::InvalidDebug(_)));
    }
}
