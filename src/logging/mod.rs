//! Diagnostic logging setup.
//!
//! Output goes to stderr through `tracing-subscriber`. The filter comes from
//! `RUST_LOG` when set, otherwise from `[logging].filter` in the config file.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Build the filter for a config, letting the environment override it.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(config: &LoggingConfig) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_directive_falls_back() {
        let cfg = LoggingConfig {
            filter: "ircsync=[[[".into(),
            ..LoggingConfig::default()
        };
        // Must not panic on an unparsable directive.
        let _ = env_filter(&cfg);
    }

    #[test]
    fn test_init_twice() {
        let cfg = LoggingConfig::default();
        init(&cfg);
        init(&cfg);
        tracing::debug!("logging initialised");
    }
}
