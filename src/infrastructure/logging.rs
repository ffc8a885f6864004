use crate::domain::models::Settings;
use crate::infrastructure::error::InfraError;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, Registry};

/// Runtime switch for console output, driven by `consoleLoggingEnabled`.
#[derive(Clone)]
pub struct LoggingHandle {
    handle: reload::Handle<LevelFilter, Registry>,
    enabled_level: LevelFilter,
}

pub fn init_logging(verbose: bool) -> Result<LoggingHandle, InfraError> {
    let enabled_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let (filter, handle) = reload::Layer::new(enabled_level);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|error| InfraError::Logging(error.to_string()))?;

    Ok(LoggingHandle {
        handle,
        enabled_level,
    })
}

impl LoggingHandle {
    pub fn apply(&self, settings: &Settings) -> Result<(), InfraError> {
        let level = console_level(settings, self.enabled_level);
        self.handle
            .modify(|filter| *filter = level)
            .map_err(|error| InfraError::Logging(error.to_string()))
    }
}

pub fn console_level(settings: &Settings, enabled_level: LevelFilter) -> LevelFilter {
    if settings.console_logging_enabled {
        enabled_level
    } else {
        LevelFilter::OFF
    }
}
