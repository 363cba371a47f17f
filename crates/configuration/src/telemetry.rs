use crate::settings::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::ConfigError;

/// Initializes the global tracing subscriber from the logging section of the
/// configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set, which
/// keeps ad-hoc debugging possible without touching the config file.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ConfigError::validation(format!("invalid logging.level: {e}")))?;

    let registry = tracing_subscriber::registry().with(filter);

    match (config.format.as_str(), &config.file) {
        ("json", Some(path)) => {
            let appender = tracing_appender::rolling::never(".", path.clone());
            registry
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_ansi(false).with_writer(appender))
                .try_init()
        }
        ("json", None) => registry.with(fmt::layer().json()).try_init(),
        (_, Some(path)) => {
            let appender = tracing_appender::rolling::never(".", path.clone());
            registry
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(appender))
                .try_init()
        }
        (_, None) => registry.with(fmt::layer()).try_init(),
    }
    .map_err(|e| ConfigError::validation(format!("failed to initialize tracing: {e}")))?;

    Ok(())
}
