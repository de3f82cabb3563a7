use env_logger::{Builder, Env};
use log::LevelFilter;

use crate::config::{Config, Environment, LogLevel};
use crate::core::{RouterError, RouterResult};

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Level actually applied: production never logs below warn.
pub fn effective_level(level: LogLevel, environment: Environment) -> LevelFilter {
    let configured = LevelFilter::from(level);
    match environment {
        Environment::Production => configured.min(LevelFilter::Warn),
        Environment::Development => configured,
    }
}

/// Install the process logger.
///
/// `RUST_LOG` refines the configured level in development; production keeps
/// the clamp regardless of the environment.
pub fn init_logger(config: &Config) -> RouterResult<()> {
    let level = effective_level(config.log.level, config.router.environment);

    let mut builder = Builder::new();
    builder.filter_level(level);
    if config.router.environment == Environment::Development {
        builder.parse_env(Env::default());
    }
    builder
        .format_timestamp_millis()
        .try_init()
        .map_err(|e| RouterError::Internal(format!("Failed to install logger: {e}")))?;

    log::info!(
        "Logger initialized at {} for {} environment",
        level,
        config.router.environment.as_str()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_clamps_to_warn() {
        assert_eq!(
            effective_level(LogLevel::Debug, Environment::Production),
            LevelFilter::Warn
        );
        assert_eq!(
            effective_level(LogLevel::Error, Environment::Production),
            LevelFilter::Error
        );
        assert_eq!(
            effective_level(LogLevel::Debug, Environment::Development),
            LevelFilter::Debug
        );
    }
}
