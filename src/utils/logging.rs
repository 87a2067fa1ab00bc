//! Optional tracing-subscriber setup.
//!
//! The library itself only emits `tracing` events. Applications that do not
//! bring their own subscriber can call [`init_logging`] once at startup.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install a global fmt subscriber built from `config`.
///
/// `RUST_LOG`, when set, overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if !config.log_to_console {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;

    tracing::info!(app = %config.app_name, "Logging initialised");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_console_disabled_installs_nothing() {
        let config = LoggingConfig {
            log_to_console: false,
            ..LoggingConfig::default()
        };
        init_logging(&config).unwrap();
    }

    #[test]
    fn test_second_install_is_config_error() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }
}
