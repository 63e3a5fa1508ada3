//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log filter:
//! 1. the `level` argument (if provided)
//! 2. the `RBUILD_LOG` environment variable (e.g. "info", "rbuild=debug")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that command stdout stays task output.

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the default log filter
pub const LOG_ENV: &str = "RBUILD_LOG";

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_logging(level: Option<&str>) -> bool {
    let directives = match level {
        Some(level) => level.to_string(),
        None => std::env::var(LOG_ENV).unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
    };

    fmt()
        .with_env_filter(parse_filter(&directives))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

fn parse_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives.trim()).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_invalid_filter_falls_back() {
        let filter = parse_filter("rbuild=loud");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));

        let filter = parse_filter(" debug ");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_second_init_is_harmless() {
        init_logging(Some("debug"));
        assert!(!init_logging(Some("info")));
    }
}
