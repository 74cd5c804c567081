//! Configuration validation logic.

use crate::config::schema::BridgeConfig;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

/// Validate a BridgeConfig for semantic correctness.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(status) = config.respond_immediately_status {
        if !(100..=599).contains(&status) {
            errors.push(ValidationError(format!(
                "respond_immediately_status must be in 100..=599, got {}",
                status
            )));
        }
    }

    if config.response_timeout.is_zero() {
        errors.push(ValidationError(
            "response_timeout_seconds must be positive".to_string(),
        ));
    }

    if config.broker.pool_size == 0 {
        errors.push(ValidationError(
            "broker_pool_size must be positive".to_string(),
        ));
    }

    if config.http.max_request_body_bytes == 0 {
        errors.push(ValidationError(
            "max_request_body_bytes must be positive".to_string(),
        ));
    }

    // The write deadline would undercut the reply wait in sync mode.
    if !config.is_fire_and_forget() && config.http.write_timeout <= config.response_timeout {
        tracing::warn!(
            write_timeout_secs = config.http.write_timeout.as_secs(),
            response_timeout_secs = config.response_timeout.as_secs(),
            "write_timeout does not exceed response_timeout; slow replies may be cut off"
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
