use std::env;
use std::io::IsTerminal;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::config::{Config, LogFormat};

/// Installs the global `tracing` subscriber writing to stderr.
///
/// The configured level caps verbosity, and `RUST_LOG` can restrict it further.
pub fn init_tracing(config: &Config) {
    let (level, env_filter) = parse_rust_log();
    let level = LevelFilter::from(level).min(config.logging.level);

    let format = match resolve_format(config.logging.format) {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .flatten_event(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
            .boxed(),
        LogFormat::Simplified | LogFormat::Auto => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(level))
        .with(env_filter)
        .init();
}

fn resolve_format(format: LogFormat) -> LogFormat {
    match format {
        LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    }
}

/// Reads `RUST_LOG` as either a bare level or a full filter directive.
pub fn parse_rust_log() -> (Level, EnvFilter) {
    // A bare level applies our default directives below. Anything else is used literally.
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<Level>() {
            Ok(level) => level,
            Err(_) => return (Level::TRACE, EnvFilter::new(value)),
        },
        Err(_) => Level::TRACE,
    };

    // Maximum verbosity; the format layer filters this down to `level`.
    let env_filter = EnvFilter::new("INFO,clusterbench=TRACE");

    (level, env_filter)
}
