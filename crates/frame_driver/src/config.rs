//! Configuration management for the frame driver.
//!
//! This module handles loading, validation, and conversion of driver
//! configuration from TOML files and command-line arguments.

use crate::modules::{BEAT_OPERATION, FRAME_STATS_MODULE, HEARTBEAT_MODULE};
use frame_core::{
    AccessKind, HookBinding, SchedulerConfig, StaticClassification, SubstrateConfig, TypeDeclaration,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Default tick interval for serde deserialization
fn default_tick_interval() -> u64 {
    50 // 20 ticks per second
}

fn default_stats_interval() -> u64 {
    100
}

fn default_heartbeat_every() -> u64 {
    20
}

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tick loop settings
    #[serde(default)]
    pub runtime: RuntimeSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Module priorities and startup set
    #[serde(default)]
    pub modules: SchedulerConfig,
    /// Host types declared before startup
    #[serde(default)]
    pub types: Vec<TypeDeclaration>,
    /// Hooks registered before startup, by callback name
    #[serde(default)]
    pub bindings: Vec<HookBinding>,
}

/// Tick loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Milliseconds between ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Stop after this many ticks (0 runs until a shutdown signal)
    #[serde(default)]
    pub max_ticks: u64,
    /// Ticks between frame statistics reports
    #[serde(default = "default_stats_interval")]
    pub stats_interval_ticks: u64,
    /// Ticks between heartbeat events
    #[serde(default = "default_heartbeat_every")]
    pub heartbeat_every_ticks: u64,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            max_ticks: 0,
            stats_interval_ticks: default_stats_interval(),
            heartbeat_every_ticks: default_heartbeat_every(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let priorities: BTreeMap<String, i32> = [
            (HEARTBEAT_MODULE.to_string(), 0),
            (FRAME_STATS_MODULE.to_string(), 100),
        ]
        .into_iter()
        .collect();

        Self {
            runtime: RuntimeSettings::default(),
            logging: LoggingSettings::default(),
            modules: SchedulerConfig {
                autostart: priorities.keys().cloned().collect(),
                priorities,
                default_priority: None,
            },
            types: vec![TypeDeclaration::new(HEARTBEAT_MODULE)],
            bindings: vec![HookBinding {
                identity: "heartbeat.trace".to_string(),
                target: HEARTBEAT_MODULE.to_string(),
                operation: BEAT_OPERATION.to_string(),
                access: AccessKind::AfterReturning,
                callback: crate::app::TRACE_CALL.to_string(),
            }],
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration to a substrate configuration.
    pub fn to_substrate_config(&self) -> SubstrateConfig {
        SubstrateConfig {
            scheduler: self.modules.clone(),
            classification: StaticClassification {
                types: self.types.clone(),
                bindings: self.bindings.clone(),
            },
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.runtime.tick_interval_ms == 0 {
            return Err("runtime.tick_interval_ms must be greater than 0".to_string());
        }
        if self.runtime.stats_interval_ticks == 0 {
            return Err("runtime.stats_interval_ticks must be greater than 0".to_string());
        }
        if self.runtime.heartbeat_every_ticks == 0 {
            return Err("runtime.heartbeat_every_ticks must be greater than 0".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        self.modules.validate().map_err(|e| e.to_string())?;

        if let Some(declaration) = self.types.iter().find(|declaration| declaration.name.trim().is_empty()) {
            return Err(format!("Type declaration with empty name: {declaration:?}"));
        }
        if let Some(binding) = self.bindings.iter().find(|binding| !binding.access.is_registrable()) {
            return Err(format!(
                "Binding {} uses access kind {}, which cannot be registered",
                binding.identity, binding.access
            ));
        }

        Ok(())
    }
}
