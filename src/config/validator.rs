use crate::config::{Config, ServerConfig};
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Validates a server configuration
pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.host.trim().is_empty() {
        return Err(Error::ConfigInvalid("Server host is empty".to_string()));
    }

    if config.ports.is_empty() {
        return Err(Error::ConfigInvalid("Server declares no ports".to_string()));
    }

    let mut seen = HashSet::new();
    for port in &config.ports {
        if port.port == 0 {
            return Err(Error::ConfigInvalid(format!(
                "Server port '{}' has number 0",
                port.name
            )));
        }
        if !seen.insert(port.port) {
            return Err(Error::ConfigInvalid(format!(
                "Server port {} is declared twice",
                port.port
            )));
        }
    }

    // The dev server parses the deploy directory positionally, a relative
    // path would resolve against whatever directory the VM starts in.
    if !config.deploy_directory.is_absolute() {
        return Err(Error::ConfigInvalid(format!(
            "Deploy directory '{}' is not absolute",
            config.deploy_directory.display()
        )));
    }

    if config.auto_reload_seconds == Some(0) {
        return Err(Error::ConfigInvalid(
            "Auto-reload interval must be at least one second".to_string(),
        ));
    }

    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server_config(&config.server)?;

    if config.port_check.attempts == 0 {
        return Err(Error::ConfigInvalid(
            "Port check needs at least one attempt".to_string(),
        ));
    }

    if config.prober.max_attempts == Some(0) {
        return Err(Error::ConfigInvalid(
            "Prober needs at least one attempt when bounded".to_string(),
        ));
    }

    Ok(())
}
