//! # Frame Driver - Main Entry Point
//!
//! Runs a frame substrate as a standalone process: loads configuration,
//! declares the configured host types and hook bindings, starts the
//! configured modules and ticks them until shutdown.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! frame-driver
//!
//! # Specify custom configuration
//! frame-driver --config production.toml
//!
//! # Run 600 ticks at 60 Hz with debug logging, then exit
//! frame-driver --tick-interval 16 --ticks 600 --log-level debug
//!
//! # JSON logging for production
//! frame-driver --json-logs
//! ```
//!
//! ## Configuration
//!
//! The driver loads configuration from a TOML file (default: `frame.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! The driver shuts down gracefully on SIGINT (Ctrl+C) and SIGTERM (Unix).
//! A second signal exits immediately.

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod modules;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Runs the driver from process arguments.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let mut logging = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default()
        .logging;
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

// Re-export main types for potential library usage
pub use config::{LoggingSettings, RuntimeSettings};
pub use modules::{FrameStatsModule, HeartbeatModule};

#[cfg(test)]
mod tests {
    use super::*;
    use frame_core::TypeKey;
    use tempfile::TempDir;

    fn args(dir: &TempDir, ticks: u64) -> CliArgs {
        CliArgs {
            config_path: dir.path().join("frame.toml"),
            log_level: Some("debug".to_string()),
            json_logs: false,
            tick_interval_ms: Some(1),
            max_ticks: Some(ticks),
        }
    }

    #[tokio::test]
    async fn test_application_runs_to_tick_limit() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(args(&dir, 45)).await.unwrap();
        let substrate = app.substrate().clone();

        assert_eq!(app.config().runtime.tick_interval_ms, 1);
        assert_eq!(app.config().logging.level, "debug");

        let ticks = app.run().await.unwrap();
        assert_eq!(ticks, 45);
        assert!(!substrate.is_running());
        assert!(substrate.scheduler().is_empty());

        // Heartbeat every 20 ticks by default
        let stats = substrate.events().stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.flushed, 2);
    }

    #[tokio::test]
    async fn test_invalid_override_rejected() {
        let dir = TempDir::new().unwrap();
        let mut args = args(&dir, 1);
        args.log_level = Some("loud".to_string());
        assert!(Application::new(args).await.is_err());
    }

    #[tokio::test]
    async fn test_modules_registered_before_startup() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(args(&dir, 1)).await.unwrap();
        let scheduler = app.substrate().scheduler();

        assert!(scheduler.is_empty());
        assert!(scheduler.get_or_create(&TypeKey::new(modules::HEARTBEAT_MODULE)).is_ok());
        assert!(scheduler.contains(&TypeKey::new(modules::HEARTBEAT_MODULE)));
    }
}
