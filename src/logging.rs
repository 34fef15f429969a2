/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::RelayConfig;

/// Crate targets the default filter enables
const TARGETS: [&str; 2] = ["sensorlink", "sensorlink_connect"];

/// Install the global subscriber described by `config`
///
/// `RUST_LOG` overrides the configured level. With `log_file` set, events are
/// written to it as JSON lines; otherwise they go to stdout in compact form.
pub fn init_logging(config: &RelayConfig) -> Result<(), LoggingError> {
    let filter = build_filter(effective_level(config))?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.log_file {
        Some(ref path) => {
            let file = open_log_file(path)?;
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_thread_names(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .try_init()
        }
        None => registry.with(fmt::layer().compact().with_target(true)).try_init(),
    };

    installed.map_err(|e| LoggingError(format!("Subscriber already installed: {}", e)))
}

/// Logging setup failure
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct LoggingError(String);

fn effective_level(config: &RelayConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

fn default_directives(level: Level) -> String {
    TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

fn build_filter(level: Level) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))
        .map_err(|e| LoggingError(format!("Failed to create log filter: {}", e)))
}

fn open_log_file(path: &Path) -> Result<File, LoggingError> {
    File::create(path).map_err(|e| {
        LoggingError(format!(
            "Failed to create log file {}: {}",
            path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use tempfile::TempDir;

    #[test]
    fn test_verbose_overrides_log_level() {
        let config = RelayConfig {
            log_level: LogLevel::Error,
            verbose: true,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::DEBUG);
    }

    #[test]
    fn test_configured_level_used() {
        let config = RelayConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::WARN);
    }

    #[test]
    fn test_default_directives_cover_both_crates() {
        assert_eq!(
            default_directives(Level::INFO),
            "sensorlink=info,sensorlink_connect=info"
        );
    }

    #[test]
    fn test_unwritable_log_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config = RelayConfig {
            log_file: Some(dir.path().join("missing").join("relay.log")),
            ..Default::default()
        };

        let err = init_logging(&config).unwrap_err();
        assert!(err.to_string().contains("Failed to create log file"));
    }
}
