//! Logging system setup and configuration.
//!
//! The driver's own crates log at the configured level while third-party
//! crates stay at `warn`, unless `RUST_LOG` supplies a full filter.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose events follow the configured level
pub const DRIVER_TARGETS: [&str; 2] = ["frame_core", "lib_frame_driver"];

/// Level applied to every other target
const DEPENDENCY_LEVEL: &str = "warn";

/// Output layer selected for the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// JSON when either the config file or the command line asks for it
    pub fn resolve(config: &LoggingSettings, json_override: bool) -> Self {
        if json_override || config.json_format {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Filter directive for the configured level, e.g.
/// `warn,frame_core=debug,lib_frame_driver=debug`.
///
/// A `warn` or `error` level applies everywhere.
pub fn filter_directive(config: &LoggingSettings) -> String {
    let level = config.level.trim().to_ascii_lowercase();
    if matches!(level.as_str(), "warn" | "error") {
        return level;
    }

    let mut directive = DEPENDENCY_LEVEL.to_string();
    for target in DRIVER_TARGETS {
        directive.push_str(&format!(",{target}={level}"));
    }
    directive
}

/// Builds the filter, preferring a non-empty `env_override` (the value of
/// `RUST_LOG`) over the configured level.
pub fn build_filter(
    config: &LoggingSettings,
    env_override: Option<&str>,
) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    match env_override.map(str::trim).filter(|value| !value.is_empty()) {
        Some(directive) => EnvFilter::try_new(directive),
        None => EnvFilter::try_new(filter_directive(config)),
    }
}

/// Initializes the logging system from the logging settings.
///
/// # Arguments
///
/// * `config` - Logging configuration from the config file
/// * `json_format` - Whether to force JSON output format (CLI override)
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let env_override = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty());
    let filter = build_filter(config, env_override.as_deref())?;
    let format = LogFormat::resolve(config, json_format);

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer()
                .json()
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(true)
                .with_thread_names(true)
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(fmt::layer()
                .with_ansi(true)
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(true)
                .with_thread_names(true)
            )
            .try_init()?,
    }

    match env_override {
        Some(directive) => info!("🔧 Logging initialized from RUST_LOG: {}", directive),
        None => info!("🔧 Logging initialized with level: {} ({:?})", config.level, format),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(level: &str, json_format: bool) -> LoggingSettings {
        LoggingSettings {
            level: level.to_string(),
            json_format,
        }
    }

    #[test]
    fn test_directive_scopes_verbose_levels_to_driver_crates() {
        assert_eq!(
            filter_directive(&settings("debug", false)),
            "warn,frame_core=debug,lib_frame_driver=debug"
        );
        assert_eq!(
            filter_directive(&settings(" TRACE ", false)),
            "warn,frame_core=trace,lib_frame_driver=trace"
        );
    }

    #[test]
    fn test_directive_quiet_levels_apply_everywhere() {
        assert_eq!(filter_directive(&settings("warn", false)), "warn");
        assert_eq!(filter_directive(&settings("error", false)), "error");
    }

    #[test]
    fn test_env_override_wins() {
        let config = settings("info", false);
        let filter = build_filter(&config, Some("frame_core=trace")).unwrap();
        assert_eq!(filter.to_string(), "frame_core=trace");

        let filter = build_filter(&config, Some("  ")).unwrap();
        assert!(filter.to_string().contains("lib_frame_driver=info"));

        assert!(build_filter(&config, None).is_ok());
    }

    #[test]
    fn test_format_resolution() {
        assert_eq!(LogFormat::resolve(&settings("info", false), false), LogFormat::Pretty);
        assert_eq!(LogFormat::resolve(&settings("info", true), false), LogFormat::Json);
        assert_eq!(LogFormat::resolve(&settings("info", false), true), LogFormat::Json);
    }
}
