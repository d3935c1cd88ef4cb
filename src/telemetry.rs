use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig};

/// Filter directives: `RUST_LOG` when set, the configured level otherwise.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global `tracing` subscriber. Logs go to stderr so that
/// command output on stdout stays clean.
///
/// Calling this twice is harmless: the second call keeps the first
/// subscriber.
pub fn init(config: &LoggingConfig) {
    let registry = tracing_subscriber::registry().with(env_filter(config));
    let installed = match config.format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_applies_without_rust_log() {
        let config = LoggingConfig {
            level: "warn".into(),
            format: LogFormat::Text,
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(env_filter(&config).to_string(), "warn");
        }
    }

    #[test]
    fn init_twice_is_harmless() {
        let config = LoggingConfig::default();
        init(&config);
        init(&LoggingConfig {
            format: LogFormat::Json,
            ..config
        });
    }
}
