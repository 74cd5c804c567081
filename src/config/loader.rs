//! Configuration loading from the environment.

use std::time::Duration;

use crate::config::schema::BridgeConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from process environment variables.
pub fn load_from_env() -> Result<BridgeConfig, ConfigError> {
    let config = from_lookup(|key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Build a config from an arbitrary variable lookup.
///
/// Unparsable values fall back to the default for that option.
pub fn from_lookup<F>(lookup: F) -> BridgeConfig
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = BridgeConfig::default();
    let mut config = defaults.clone();

    config.listen_port = get_parsed(&lookup, "LISTEN_PORT", defaults.listen_port);

    config.broker.endpoint = get_string(&lookup, "BROKER_ENDPOINT", &defaults.broker.endpoint);
    config.broker.credential = lookup("BROKER_CREDENTIAL").filter(|v| !v.is_empty());
    config.broker.db_index = get_parsed(&lookup, "BROKER_DB_INDEX", defaults.broker.db_index);
    config.broker.pool_size = get_parsed(&lookup, "BROKER_POOL_SIZE", defaults.broker.pool_size);

    config.fixed_channel = lookup("FIXED_CHANNEL").filter(|v| !v.is_empty());
    config.respond_immediately_status = lookup("RESPOND_IMMEDIATELY_STATUS")
        .and_then(|v| v.parse::<u16>().ok());
    config.response_timeout =
        get_secs(&lookup, "RESPONSE_TIMEOUT_SECONDS", defaults.response_timeout);

    config.http.read_timeout =
        get_secs(&lookup, "HTTP_READ_TIMEOUT_SECONDS", defaults.http.read_timeout);
    config.http.write_timeout =
        get_secs(&lookup, "HTTP_WRITE_TIMEOUT_SECONDS", defaults.http.write_timeout);
    config.http.idle_timeout =
        get_secs(&lookup, "HTTP_IDLE_TIMEOUT_SECONDS", defaults.http.idle_timeout);
    config.http.max_header_bytes =
        get_parsed(&lookup, "HTTP_MAX_HEADER_BYTES", defaults.http.max_header_bytes);
    config.http.max_request_body_bytes = get_parsed(
        &lookup,
        "MAX_REQUEST_BODY_BYTES",
        defaults.http.max_request_body_bytes,
    );
    config.http.shutdown_timeout = get_secs(
        &lookup,
        "SHUTDOWN_TIMEOUT_SECONDS",
        defaults.http.shutdown_timeout,
    );

    config.audit.max_entries = get_parsed(&lookup, "AUDIT_MAX_ENTRIES", defaults.audit.max_entries);

    config.admin.enabled = get_bool(&lookup, "ADMIN_ENABLED", defaults.admin.enabled);
    config.admin.bind_address =
        get_string(&lookup, "ADMIN_BIND_ADDRESS", &defaults.admin.bind_address);

    config.observability.log_level =
        get_string(&lookup, "LOG_LEVEL", &defaults.observability.log_level);
    config.observability.metrics_enabled = get_bool(
        &lookup,
        "METRICS_ENABLED",
        defaults.observability.metrics_enabled,
    );
    config.observability.metrics_address = get_string(
        &lookup,
        "METRICS_ADDRESS",
        &defaults.observability.metrics_address,
    );

    config
}

fn get_string<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn get_parsed<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn get_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn get_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|value| value.parse::<bool>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_environment_empty() {
        let config = from_lookup(|_| None);
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.broker.endpoint, "localhost:6379");
        assert_eq!(config.broker.pool_size, 10);
        assert_eq!(config.response_timeout, Duration::from_secs(30));
        assert_eq!(config.http.max_request_body_bytes, 10 << 20);
        assert!(config.fixed_channel.is_none());
        assert!(config.respond_immediately_status.is_none());
        assert!(!config.admin.enabled);
    }

    #[test]
    fn overrides_are_applied() {
        let config = from_lookup(lookup_from(&[
            ("LISTEN_PORT", "9000"),
            ("BROKER_ENDPOINT", "broker.internal:6380"),
            ("BROKER_CREDENTIAL", "s3cret"),
            ("BROKER_DB_INDEX", "2"),
            ("FIXED_CHANNEL", "incoming-messages"),
            ("RESPOND_IMMEDIATELY_STATUS", "201"),
            ("RESPONSE_TIMEOUT_SECONDS", "5"),
            ("AUDIT_MAX_ENTRIES", "500"),
            ("ADMIN_ENABLED", "true"),
        ]));

        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.broker.endpoint, "broker.internal:6380");
        assert_eq!(config.broker.credential.as_deref(), Some("s3cret"));
        assert_eq!(config.broker.db_index, 2);
        assert_eq!(config.fixed_channel.as_deref(), Some("incoming-messages"));
        assert_eq!(config.respond_immediately_status, Some(201));
        assert_eq!(config.response_timeout, Duration::from_secs(5));
        assert_eq!(config.audit.max_entries, 500);
        assert!(config.admin.enabled);
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let config = from_lookup(lookup_from(&[
            ("LISTEN_PORT", "not-a-port"),
            ("RESPONSE_TIMEOUT_SECONDS", "soon"),
            ("RESPOND_IMMEDIATELY_STATUS", ""),
        ]));

        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.response_timeout, Duration::from_secs(30));
        assert!(config.respond_immediately_status.is_none());
    }

    #[test]
    fn empty_fixed_channel_is_unset() {
        let config = from_lookup(lookup_from(&[("FIXED_CHANNEL", "")]));
        assert!(config.fixed_channel.is_none());
    }
}
