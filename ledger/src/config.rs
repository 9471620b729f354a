use std::num::NonZeroU64;

use core_types::{AnnotationSettings, AppConfig, config::DEFAULT_METERS_PER_CHAR};

/// Runtime knobs for the annotation core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    pub meters_per_char: NonZeroU64,
    pub color_saturation: u8,
    pub color_lightness: u8,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            meters_per_char: DEFAULT_METERS_PER_CHAR,
            color_saturation: 100,
            color_lightness: 80,
        }
    }
}

impl From<&AnnotationSettings> for LedgerConfig {
    fn from(settings: &AnnotationSettings) -> Self {
        Self {
            meters_per_char: settings.meters_per_char,
            color_saturation: settings.color_saturation,
            color_lightness: settings.color_lightness,
        }
    }
}

impl From<&AppConfig> for LedgerConfig {
    fn from(config: &AppConfig) -> Self {
        Self::from(&config.annotation)
    }
}
