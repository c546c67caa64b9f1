use gha_core::config::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging as configured: JSON lines when `logging.json` is set,
/// human-readable otherwise.
pub fn init_from_config(service_name: &str, config: &LoggingConfig) {
    if config.json {
        init_logging_json(service_name, &config.level);
    } else {
        init_logging(service_name, &config.level);
    }
}

/// Human-readable output.
///
/// `RUST_LOG` wins over `default_level` (e.g. "info",
/// "gha_agent=debug,warn"). Safe to call more than once; later calls are
/// no-ops.
pub fn init_logging(service_name: &str, default_level: &str) {
    fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (human-readable)");
}

/// JSON lines, one object per event.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    fmt()
        .json()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_current_span(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (json)");
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_a_noop() {
        init_logging("test", "debug");
        init_logging_json("test", "info");
        init_from_config("test", &LoggingConfig::default());
    }

    #[test]
    fn bad_level_falls_back() {
        // Must not panic on a directive EnvFilter cannot parse.
        let _ = filter("not a [valid directive");
    }
}
