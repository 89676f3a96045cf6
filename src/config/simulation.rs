use serde::Deserialize;
use std::path::Path;

use crate::config::is_valid_secs;
use crate::config::sinks::{DashboardConfig, ServerConfig, StoreConfig};
use crate::weather::schema::PayloadSchema;
use crate::weather::ClimateBaseline;

/// Environment variables consulted after the file is parsed.
pub const ENV_CONTAINER: &str = "AZURE_STORAGE_CONTAINER";
pub const ENV_ACCOUNT_URL: &str = "AZURE_STORAGE_ACCOUNT_URL";
pub const ENV_SAS_TOKEN: &str = "AZURE_STORAGE_SAS_TOKEN";
pub const ENV_STORE_ROOT: &str = "WEATHER_STORE_ROOT";
pub const ENV_DASHBOARD_URL: &str = "DASHBOARD_API_URL";

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: f64,
    #[serde(default = "default_minute_step")]
    pub minute_step: u64,
    #[serde(default)]
    pub start_minute: u64,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub schema: PayloadSchema,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub baseline: ClimateBaseline,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_tick_interval_secs() -> f64 {
    4.0
}
fn default_minute_step() -> u64 {
    5
}
fn default_location() -> String {
    "SkyPlaza".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl SimulationConfig {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        Self::from_toml_str(&content, path)
    }

    pub fn from_toml_str(content: &str, source_path: &Path) -> Result<Self, String> {
        let config: SimulationConfig =
            toml::from_str(content).map_err(|e| format!("{}: {}", source_path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the startup configuration: the file if it exists (defaults
    /// otherwise), then environment overrides, then validation.
    pub fn load(path: &Path) -> Result<Self, String> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(path: &Path, lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let content = if path.exists() {
            std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?
        } else {
            String::new()
        };
        let mut config: SimulationConfig =
            toml::from_str(&content).map_err(|e| format!("{}: {}", path.display(), e))?;
        config.apply_env(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Override connection settings from the environment. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(container) = get(ENV_CONTAINER) {
            self.store.container = container;
        }
        if let Some(root) = get(ENV_STORE_ROOT) {
            self.store.root = root;
        }
        if let Some(url) = get(ENV_ACCOUNT_URL) {
            self.store.account_url = Some(url);
            self.store.backend = "http".to_string();
        }
        if let Some(sas) = get(ENV_SAS_TOKEN) {
            self.store.sas_token = Some(sas);
        }
        if let Some(url) = get(ENV_DASHBOARD_URL) {
            self.dashboard.url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();

        if !is_valid_secs(self.tick_interval_secs) {
            errors.push(format!(
                "tick_interval_secs must be > 0.0 and fit in a duration, got {}. Example: tick_interval_secs = 4.0",
                self.tick_interval_secs
            ));
        }

        if self.minute_step == 0 {
            errors.push(format!(
                "minute_step must be > 0, got {}. Example: minute_step = 5",
                self.minute_step
            ));
        }

        if self.location.trim().is_empty() {
            errors.push("location must not be empty. Example: location = \"SkyPlaza\"".to_string());
        }

        let b = &self.baseline;
        for (name, value) in [
            ("baseline.temperature", b.temperature),
            ("baseline.humidity", b.humidity),
            ("baseline.wind_speed", b.wind_speed),
            ("baseline.pressure", b.pressure),
        ] {
            if !value.is_finite() {
                errors.push(format!("{} must be a finite number, got {}", name, value));
            }
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            errors.push(format!(
                "log_level must be one of {:?}, got '{}'. Example: log_level = \"info\"",
                valid_levels, self.log_level
            ));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            errors.push(format!(
                "log_format must be one of {:?}, got '{}'. Example: log_format = \"json\"",
                valid_formats, self.log_format
            ));
        }

        self.store.validate(&mut errors);
        self.dashboard.validate(&mut errors);
        self.server.validate(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("\n"))
        }
    }
}
