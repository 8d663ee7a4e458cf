use std::collections::HashSet;

use super::{types::Config, ConfigError};

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

fn require_positive(value: u64, field: &str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(invalid(format!("{} must be greater than 0", field)));
    }
    Ok(())
}

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Intervals and timeouts are positive
/// - Scaler has room for at least one worker; agent names are unique and
///   every agent has a program
/// - Lock resource names are unique
/// - Backoff polls at least once before giving up
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    require_positive(config.database.busy_timeout_ms, "database.busy_timeout_ms")?;
    require_positive(config.reconciler.interval_ms, "reconciler.interval_ms")?;
    require_positive(config.scaler.tick_interval_ms, "scaler.tick_interval_ms")?;
    require_positive(config.backoff.poll_interval_ms, "backoff.poll_interval_ms")?;
    require_positive(config.backoff.max_wait_ms, "backoff.max_wait_ms")?;
    require_positive(config.notifier.poll_interval_ms, "notifier.poll_interval_ms")?;
    require_positive(config.locks.short_timeout_secs, "locks.short_timeout_secs")?;
    require_positive(config.locks.long_timeout_secs, "locks.long_timeout_secs")?;

    // Scaler validation
    if config.scaler.max_workers == 0 {
        return Err(invalid("scaler.max_workers must be at least 1"));
    }
    if config.scaler.summary_max_chars == 0 {
        return Err(invalid("scaler.summary_max_chars must be greater than 0"));
    }
    if config.scaler.identity.trim().is_empty() {
        return Err(invalid("scaler.identity cannot be empty"));
    }

    let mut agent_names = HashSet::new();
    for agent in &config.scaler.agents {
        if agent.name.trim().is_empty() {
            return Err(invalid("scaler.agents: name cannot be empty"));
        }
        if !agent_names.insert(agent.name.as_str()) {
            return Err(invalid(format!(
                "scaler.agents: duplicate agent name '{}'",
                agent.name
            )));
        }
        if agent.program.trim().is_empty() {
            return Err(invalid(format!(
                "scaler.agents: agent '{}' has no program",
                agent.name
            )));
        }
        if agent.max_instances == Some(0) {
            return Err(invalid(format!(
                "scaler.agents: agent '{}' max_instances must be at least 1",
                agent.name
            )));
        }
    }

    // Lock validation
    let mut resources = HashSet::new();
    for spec in &config.locks.resources {
        if spec.name.trim().is_empty() {
            return Err(invalid("locks.resources: name cannot be empty"));
        }
        if !resources.insert(spec.name.as_str()) {
            return Err(invalid(format!(
                "locks.resources: duplicate resource '{}'",
                spec.name
            )));
        }
    }

    // Backoff validation
    if config.backoff.poll_interval_ms > config.backoff.max_wait_ms {
        return Err(invalid(
            "backoff.poll_interval_ms cannot exceed backoff.max_wait_ms",
        ));
    }

    Ok(())
}
