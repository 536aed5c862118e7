//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{ClientConfig, GsCoreConfig, LogOutput, LoggingConfig, ServerConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &GsCoreConfig) -> ConfigResult<()> {
    validate_server_config(&config.server)?;
    validate_client_config(&config.client)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_server_config(server: &ServerConfig) -> ConfigResult<()> {
    if server.host.is_empty() {
        return Err(ConfigError::missing_field("server.host"));
    }
    validate_port(server.port)?;
    validate_path(&server.path)?;
    if server.send_buffer == 0 {
        return Err(ConfigError::validation("server.send_buffer must be greater than 0"));
    }
    Ok(())
}

fn validate_client_config(client: &ClientConfig) -> ConfigResult<()> {
    validate_url(&client.url)?;
    if client.reconnect_delay_secs == 0 {
        return Err(ConfigError::validation(
            "client.reconnect_delay_secs must be greater than 0",
        ));
    }
    if client.open_timeout_secs == 0 {
        return Err(ConfigError::validation(
            "client.open_timeout_secs must be greater than 0",
        ));
    }
    if client.max_frame_size == 0 {
        return Err(ConfigError::validation(
            "client.max_frame_size must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

fn validate_url(url: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field("client.url"));
    }
    let valid_schemes = ["ws://", "wss://"];
    if !valid_schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {valid_schemes:?}"),
        ));
    }
    Ok(())
}

fn validate_port(port: u16) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }
    Ok(())
}

fn validate_path(path: &str) -> ConfigResult<()> {
    if path.is_empty() {
        return Err(ConfigError::missing_field("server.path"));
    }
    if !path.starts_with('/') {
        return Err(ConfigError::validation("server.path must start with '/'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GsCoreConfig::default()).is_ok());
    }

    #[test]
    fn port_zero_rejected() {
        let mut config = GsCoreConfig::default();
        config.server.port = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidPort(0))
        ));
    }

    #[test]
    fn empty_or_relative_path_rejected() {
        let mut config = GsCoreConfig::default();
        config.server.path = String::new();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
        config.server.path = "ws".into();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn client_url_scheme_checked() {
        let mut config = GsCoreConfig::default();
        config.client.url = "http://localhost:8765/ws/Bot".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn file_output_needs_path() {
        let mut config = GsCoreConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());
    }
}
