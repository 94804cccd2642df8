//! Main application logic and lifecycle management.
//!
//! The `Application` owns the substrate, drives its tick loop on a tokio
//! interval and shuts it down on a signal or after a fixed number of ticks.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::filter_directive,
    modules::register_builtin_modules,
    signals::{wait_for_shutdown_signal, wait_for_shutdown_signal_silent},
};
use frame_core::{context, hook, HookLibrary, Substrate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Library callback logging every woven call it is bound to
pub const TRACE_CALL: &str = "trace_call";
/// Library callback logging the failure of a woven call
pub const LOG_FAILURE: &str = "log_failure";

/// Callbacks that configured hook bindings can refer to by name
pub fn hook_library() -> HookLibrary {
    let mut library = HookLibrary::new();
    library
        .insert(
            TRACE_CALL,
            hook(|jp| {
                debug!(
                    "🔍 {}::{} ({})",
                    jp.target().type_key(),
                    jp.operation(),
                    jp.phase()
                )
            }),
        )
        .insert(
            LOG_FAILURE,
            hook(|jp| {
                if let Some(failure) = jp.failure() {
                    warn!("⚠️ {}::{} failed: {}", jp.target().type_key(), jp.operation(), failure);
                }
            }),
        );
    library
}

/// Main application struct.
///
/// Holds the validated configuration and the substrate it was built from.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// The substrate driven by this application
    substrate: Arc<Substrate>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Build the substrate and register the built-in modules
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(tick_interval_ms) = args.tick_interval_ms {
            config.runtime.tick_interval_ms = tick_interval_ms;
        }
        if let Some(max_ticks) = args.max_ticks {
            config.runtime.max_ticks = max_ticks;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        Self::display_banner();

        let substrate = Arc::new(Substrate::new(config.to_substrate_config()));
        register_builtin_modules(
            substrate.scheduler(),
            config.runtime.heartbeat_every_ticks,
            config.runtime.stats_interval_ticks,
        )?;

        Ok(Self { config, substrate })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn substrate(&self) -> &Arc<Substrate> {
        &self.substrate
    }

    /// Runs the tick loop until a shutdown signal arrives or the configured
    /// tick limit is reached, then shuts the substrate down.
    ///
    /// Returns the number of ticks completed.
    pub async fn run(self) -> Result<u64, Box<dyn std::error::Error>> {
        info!("🌟 Starting frame driver");
        self.log_configuration_summary();

        if let Some(previous) = context::install(self.substrate.clone()) {
            warn!("⚠️ Replaced a previously installed substrate");
            if previous.is_running() {
                previous.shutdown()?;
            }
        }

        let report = self.substrate.startup(&hook_library())?;
        for rejected in &report.rejected {
            warn!("⚠️ Classification entry rejected: {}", rejected);
        }

        let result = self.tick_loop().await;

        info!("🛑 Stopping after {} tick(s)", self.substrate.ticks());
        self.log_final_statistics();
        self.substrate.shutdown()?;
        context::reset();

        let ticks = result?;
        info!("✅ Frame driver shutdown complete");
        Ok(ticks)
    }

    async fn tick_loop(&self) -> Result<u64, Box<dyn std::error::Error>> {
        let max_ticks = self.config.runtime.max_ticks;
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.runtime.tick_interval_ms));
        let shutdown = wait_for_shutdown_signal();
        tokio::pin!(shutdown);

        info!("✅ Frame driver is now running");
        if max_ticks == 0 {
            info!("🛑 Press Ctrl+C to gracefully shutdown");
        }

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let tick = self.substrate.tick()?;
                    if max_ticks > 0 && tick >= max_ticks {
                        info!("⏱️ Reached tick limit of {}", max_ticks);
                        return Ok(tick);
                    }
                }
                signal = &mut shutdown => {
                    signal?;
                    // A second signal skips the graceful path.
                    tokio::spawn(async {
                        if let Err(e) = wait_for_shutdown_signal_silent().await {
                            error!("❌ Failed to set up forced shutdown signal handler: {e}");
                            return;
                        }
                        warn!("Shutdown signal received again, exiting immediately");
                        std::process::exit(1);
                    });
                    return Ok(self.substrate.ticks());
                }
            }
        }
    }

    fn display_banner() {
        let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
        info!("╔══════════════════════════════════════════╗");
        info!("║             🎞️  FRAME DRIVER              ║");
        info!("║               v{:<26}║", version);
        info!("╚══════════════════════════════════════════╝");
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  ⏱️ Tick interval: {}ms", self.config.runtime.tick_interval_ms);
        if self.config.runtime.max_ticks > 0 {
            info!("  🔢 Tick limit: {}", self.config.runtime.max_ticks);
        }
        info!(
            "  🧩 Prioritized modules: {} ranked, autostart {:?}",
            self.config.modules.priorities.len(),
            self.config.modules.autostart
        );
        info!(
            "  🪝 Woven hooks: {} type(s), {} binding(s)",
            self.config.types.len(),
            self.config.bindings.len()
        );
        info!(
            "  📨 Buffered events: heartbeat every {} tick(s), stats every {} tick(s)",
            self.config.runtime.heartbeat_every_ticks,
            self.config.runtime.stats_interval_ticks
        );
        info!("  📝 Log filter: {}", filter_directive(&self.config.logging));
    }

    fn log_final_statistics(&self) {
        let modules = self.substrate.scheduler().stats();
        let bus = self.substrate.events().stats();
        info!("📊 Final Statistics:");
        info!("  - Ticks: {}", self.substrate.ticks());
        info!(
            "  - Modules: {} live, {} created, {} destroyed",
            modules.modules, modules.created, modules.destroyed
        );
        info!("  - Deferred tasks run: {}", modules.tasks_run);
        info!(
            "  - Events: {} sent, {} fired, {} delivered",
            bus.sent, bus.fired, bus.delivered
        );
    }
}
