//! Tracing bootstrap: ANSI stdout for operators, a rolling file for
//! log shipping.
//!
//! The default filter keeps the engine at the configured level while
//! capping the chatty infrastructure crates at `warn`, so seat-event and
//! purchase logs stay readable under load. `RUST_LOG` overrides everything.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

/// Crates whose info-level output drowns the seat engine's own logs.
const NOISY_DEPS: &[&str] = &["sqlx", "redis", "hyper", "tower", "h2"];

fn default_directives(config: &AppConfig) -> String {
    if !config.enable_tracing {
        return format!("{},cinemax=off", config.log_level);
    }
    let mut directives = config.log_level.clone();
    for dep in NOISY_DEPS {
        directives.push_str(&format!(",{dep}=warn"));
    }
    directives
}

fn rolling_appender(config: &AppConfig) -> RollingFileAppender {
    let rotation = match config.rotation.as_str() {
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    };
    RollingFileAppender::new(rotation, &config.log_dir, &config.log_file)
}

/// Install the global subscriber.
///
/// The returned guard must live for the whole process; dropping it loses
/// buffered file output.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let (file_writer, guard) = tracing_appender::non_blocking(rolling_appender(config));
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        // Shipping mode: one JSON stream, targets kept for structured queries
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(file_writer)
                    .with_ansi(false),
            )
            .init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(file_writer)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_cap_noisy_deps() {
        let mut config = AppConfig::from_env();
        config.log_level = "debug".into();
        config.enable_tracing = true;

        let directives = default_directives(&config);
        assert!(directives.starts_with("debug,"));
        for dep in NOISY_DEPS {
            assert!(
                directives.contains(&format!("{dep}=warn")),
                "missing cap for {dep}"
            );
        }
    }

    #[test]
    fn test_tracing_disabled_silences_the_engine_only() {
        let mut config = AppConfig::from_env();
        config.log_level = "info".into();
        config.enable_tracing = false;

        assert_eq!(default_directives(&config), "info,cinemax=off");
    }
}
