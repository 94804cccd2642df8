//! Command-line interface handling for the frame driver.
//!
//! Every option overrides the matching setting from the configuration file.

use clap::{value_parser, Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the tick interval in milliseconds
    pub tick_interval_ms: Option<u64>,
    /// Stop after this many ticks instead of waiting for a signal
    pub max_ticks: Option<u64>,
}

impl CliArgs {
    /// Parses the process arguments.
    ///
    /// Exits with clap's usage message on invalid input.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list, program name first.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("frame.toml")),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            tick_interval_ms: matches.get_one::<u64>("tick-interval").copied(),
            max_ticks: matches.get_one::<u64>("ticks").copied(),
        }
    }
}

fn command() -> Command {
    Command::new("Frame Driver")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Drives a frame substrate tick loop with configured modules and hooks")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("frame.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("tick-interval")
                .short('t')
                .long("tick-interval")
                .value_name("MILLIS")
                .help("Milliseconds between ticks")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("ticks")
                .short('n')
                .long("ticks")
                .value_name("COUNT")
                .help("Stop after this many ticks")
                .value_parser(value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["frame-driver"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("frame.toml"));
        assert!(args.log_level.is_none());
        assert!(!args.json_logs);
        assert!(args.tick_interval_ms.is_none());
        assert!(args.max_ticks.is_none());
    }

    #[test]
    fn test_overrides() {
        let args = CliArgs::try_parse_from([
            "frame-driver",
            "--config",
            "custom.toml",
            "-l",
            "debug",
            "--json-logs",
            "--tick-interval",
            "16",
            "--ticks",
            "120",
        ])
        .unwrap();

        assert_eq!(args.config_path, PathBuf::from("custom.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.tick_interval_ms, Some(16));
        assert_eq!(args.max_ticks, Some(120));
    }

    #[test]
    fn test_rejects_non_numeric_ticks() {
        assert!(CliArgs::try_parse_from(["frame-driver", "--ticks", "many"]).is_err());
    }
}
