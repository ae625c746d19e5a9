// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of PGE TGE.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use pge_tge_adapters::{DEFAULT_BASE_URL, DEFAULT_USER_AGENT};
use pge_tge_core::{ArithmeticEvaluator, DEFAULT_STATE_PATH, DerivedValueCalculator};
use pge_tge_types::{MetricField, PriceUnit};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const ADDON_OPTIONS_PATH: &str = "/data/options.json";
const MIN_UPDATE_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote price source
    #[serde(default)]
    pub source: SourceConfig,

    /// Exposed sensors and their derived-value expressions
    #[serde(default)]
    pub sensors: SensorsConfig,

    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,

    /// Sent as `User-Agent`; the datahub rejects empty values
    pub user_agent: String,

    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    /// Display unit of the rate sensor
    pub unit: PriceUnit,

    /// Expression applied to each hour's rate, e.g. `{{ fixing1_rate * 1.23 }}`
    #[serde(alias = "state_template_fixing1_rate")]
    pub rate_template: Option<String>,

    #[serde(alias = "state_template_fixing1_volume")]
    pub volume_template: Option<String>,

    /// Volume sensor is disabled unless asked for
    pub publish_volume: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Seconds between due-checks; fetches still happen at most hourly
    pub update_interval_secs: u64,

    /// IANA timezone of the market
    pub timezone: String,

    /// Where the rolling cache is persisted
    pub state_path: PathBuf,

    pub log_level: String,

    pub ha_base_url: Option<String>,
    pub ha_token: Option<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 60,
            timezone: "Europe/Warsaw".to_owned(),
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            log_level: "info".to_owned(),
            ha_base_url: None,
            ha_token: None,
        }
    }
}

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    AddonOptions,
    File(PathBuf),
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddonOptions => write!(f, "HA addon options ({ADDON_OPTIONS_PATH})"),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Defaults => f.write_str("defaults with environment overrides"),
        }
    }
}

impl AppConfig {
    /// Load configuration. An explicit path wins; otherwise HA addon options,
    /// `config.toml`, `config.json`, then defaults with environment overrides.
    ///
    /// Runs before logging is installed, so the source is returned instead
    /// of logged.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, ConfigSource)> {
        if let Some(path) = explicit {
            let config = Self::from_file(path)?;
            config.validate()?;
            return Ok((config, ConfigSource::File(path.to_path_buf())));
        }

        // Try HA addon options first (/data/options.json)
        if let Ok(options_str) = std::fs::read_to_string(ADDON_OPTIONS_PATH) {
            let config: AppConfig =
                serde_json::from_str(&options_str).context("Failed to parse HA addon options")?;
            config.validate()?;
            return Ok((config, ConfigSource::AddonOptions));
        }

        for candidate in ["config.toml", "config.json"] {
            let path = Path::new(candidate);
            if path.exists() {
                let config = Self::from_file(path)?;
                config.validate()?;
                return Ok((config, ConfigSource::File(path.to_path_buf())));
            }
        }

        let config = Self::from_env();
        config.validate()?;
        Ok((config, ConfigSource::Defaults))
    }

    /// Parse a TOML or JSON file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        }
    }

    /// Load from environment variables (development/testing)
    fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(unit) = var("PGE_TGE_UNIT")
            && let Ok(unit) = unit.parse::<PriceUnit>()
        {
            self.sensors.unit = unit;
        }

        if let Some(interval) = var("PGE_TGE_UPDATE_INTERVAL_SECS")
            && let Ok(secs) = interval.parse::<u64>()
        {
            self.system.update_interval_secs = secs;
        }

        if let Some(timezone) = var("PGE_TGE_TIMEZONE") {
            self.system.timezone = timezone;
        }

        if let Some(url) = var("HA_BASE_URL") {
            self.system.ha_base_url = Some(url);
        }
        if let Some(token) = var("HA_TOKEN") {
            self.system.ha_token = Some(token);
        }

        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.user_agent.trim().is_empty() {
            bail!("source.user_agent must not be empty");
        }
        if self.source.timeout_secs == 0 {
            bail!("source.timeout_secs must be greater than 0");
        }
        if self.system.update_interval_secs < MIN_UPDATE_INTERVAL_SECS {
            bail!(
                "system.update_interval_secs must be at least {MIN_UPDATE_INTERVAL_SECS}, got {}",
                self.system.update_interval_secs
            );
        }
        self.timezone()?;
        self.build_calculator()
            .validate()
            .context("Invalid sensor template")?;
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.system
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {e}", self.system.timezone))
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.system.update_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_secs)
    }

    /// Metrics to publish, rate always first
    pub fn metrics(&self) -> Vec<MetricField> {
        let mut metrics = vec![MetricField::Rate];
        if self.sensors.publish_volume {
            metrics.push(MetricField::Volume);
        }
        metrics
    }

    pub fn build_calculator(&self) -> DerivedValueCalculator {
        DerivedValueCalculator::new(
            Arc::new(ArithmeticEvaluator::new()),
            self.sensors.rate_template.clone(),
            self.sensors.volume_template.clone(),
        )
    }
}
