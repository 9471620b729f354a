// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::num::NonZeroU64;

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

pub const DEFAULT_METERS_PER_CHAR: NonZeroU64 = NonZeroU64::new(1000).unwrap();
pub const DEFAULT_SNAPSHOT_PATH: &str = "storyledger.json";

/// Top-level settings, read from `storyledger.toml` and `STORYLEDGER_*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    #[serde(default)]
    pub annotation: AnnotationSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            annotation: AnnotationSettings::default(),
        }
    }
}

fn default_snapshot_path() -> String {
    DEFAULT_SNAPSHOT_PATH.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationSettings {
    /// Exchange rate between distance and text. Zero fails deserialization.
    #[serde(default = "default_meters_per_char")]
    pub meters_per_char: NonZeroU64,
    #[serde(default = "default_color_saturation")]
    pub color_saturation: u8,
    #[serde(default = "default_color_lightness")]
    pub color_lightness: u8,
}

impl Default for AnnotationSettings {
    fn default() -> Self {
        Self {
            meters_per_char: default_meters_per_char(),
            color_saturation: default_color_saturation(),
            color_lightness: default_color_lightness(),
        }
    }
}

fn default_meters_per_char() -> NonZeroU64 {
    DEFAULT_METERS_PER_CHAR
}

fn default_color_saturation() -> u8 {
    100
}

fn default_color_lightness() -> u8 {
    80
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("storyledger.toml").required(false))
            .add_source(config::Environment::with_prefix("STORYLEDGER").separator("__"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.annotation.color_saturation > 100 || self.annotation.color_lightness > 100 {
            return Err(ConfigError::Message(
                "annotation colour percentages must be within 0..=100".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.annotation.meters_per_char.get(), 1000);
        assert_eq!(cfg.annotation.color_saturation, 100);
        assert_eq!(cfg.annotation.color_lightness, 80);
        assert_eq!(cfg.snapshot_path, "storyledger.json");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_documents_fill_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"annotation":{"meters_per_char":250}}"#).unwrap();
        assert_eq!(cfg.annotation.meters_per_char.get(), 250);
        assert_eq!(cfg.annotation.color_lightness, 80);
        assert_eq!(cfg.snapshot_path, DEFAULT_SNAPSHOT_PATH);
    }

    #[test]
    fn zero_exchange_rate_is_rejected() {
        let parsed = serde_json::from_str::<AppConfig>(r#"{"annotation":{"meters_per_char":0}}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn colour_percentages_are_bounded() {
        let mut cfg = AppConfig::default();
        cfg.annotation.color_lightness = 101;
        assert!(cfg.validate().is_err());
    }
}
