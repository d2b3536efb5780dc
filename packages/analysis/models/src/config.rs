//! Analysis configuration.
//!
//! One immutable [`AnalysisConfig`] is built at startup (from the embedded
//! default or a user TOML file) and passed by reference to every
//! component. Missing sections and keys fall back to the defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sprawl_oracle_models::{CompositeMethod, DEFAULT_CLOUD_CEILING, Sensor};
use strum_macros::{AsRefStr, Display, EnumString};

/// The default configuration as shipped, embedded at compile time.
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../config/default.toml");

/// Upper bound on `imagery.window_days` and `imagery.fallback_margin_days`.
pub const MAX_WINDOW_DAYS: u32 = 36_500;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML was malformed or had wrongly typed values.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered as TOML.
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value was out of range.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Which value was rejected and why.
        message: String,
    },
}

/// Text encoding of CSV exports.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum CsvEncoding {
    /// Plain UTF-8.
    #[default]
    #[serde(rename = "utf-8")]
    #[strum(serialize = "utf-8")]
    Utf8,
    /// UTF-8 with a leading byte order mark, for spreadsheet tools.
    #[serde(rename = "utf-8-sig")]
    #[strum(serialize = "utf-8-sig")]
    Utf8Sig,
}

/// Which imagery is composited and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageryConfig {
    /// Imagery source.
    pub sensor: Sensor,
    /// How scenes are merged.
    pub composite_method: CompositeMethod,
    /// Scenes at or above this cloud percentage are skipped.
    pub cloud_ceiling: f64,
    /// Mask cloudy pixels with the QA band when the sensor has one.
    pub cloud_mask: bool,
    /// Length of the query window starting at each period endpoint.
    pub window_days: u32,
    /// Days added to both ends of an empty window before giving up.
    pub fallback_margin_days: u32,
}

impl Default for ImageryConfig {
    fn default() -> Self {
        Self {
            sensor: Sensor::Sentinel2,
            composite_method: CompositeMethod::Median,
            cloud_ceiling: DEFAULT_CLOUD_CEILING,
            cloud_mask: true,
            window_days: 1,
            fallback_margin_days: 30,
        }
    }
}

/// Classification and change thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Vegetation index above which a pixel is vegetation.
    pub vegetation: f64,
    /// Built-up index above which a pixel is built-up.
    pub built_up: f64,
    /// Water index above which a pixel is water.
    pub water: f64,
    /// Absolute index difference separating loss/gain from stable.
    pub change: f64,
    /// Delta magnitude that makes a decline or expansion significant
    /// for the conservation priority.
    pub priority_delta: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            vegetation: 0.3,
            built_up: 0.2,
            water: 0.2,
            change: 0.1,
            priority_delta: 0.05,
        }
    }
}

/// Zonal reduction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    /// Sampling resolution in metres.
    pub scale: f64,
    /// Pixel ceiling for area and histogram reductions.
    pub max_pixels: f64,
    /// Pixel ceiling for whole-region index means.
    pub mean_max_pixels: f64,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            scale: 30.0,
            max_pixels: 1e13,
            mean_max_pixels: 1e9,
        }
    }
}

/// True-colour thumbnail rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Longest side in pixels.
    pub dimensions: u32,
    /// Reflectance mapped to black.
    pub min: f64,
    /// Reflectance mapped to white.
    pub max: f64,
    /// Gamma correction.
    pub gamma: f64,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            dimensions: 512,
            min: 0.0,
            max: 3000.0,
            gamma: 1.2,
        }
    }
}

/// Export settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// CSV text encoding.
    pub csv_encoding: CsvEncoding,
}

/// Everything an analysis run is parameterized by.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Imagery selection.
    pub imagery: ImageryConfig,
    /// Classification and change thresholds.
    pub thresholds: ThresholdConfig,
    /// Zonal reduction parameters.
    pub reduction: ReductionConfig,
    /// Thumbnail rendering.
    pub thumbnail: ThumbnailConfig,
    /// Export settings.
    pub export: ExportConfig,
}

impl AnalysisConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is malformed or a value is out
    /// of range.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// This configuration with the imagery sensor replaced by `name`
    /// (`sentinel2`/`s2` or `landsat8`/`l8`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `name` is not a known sensor.
    pub fn with_sensor(mut self, name: &str) -> Result<Self, ConfigError> {
        self.imagery.sensor = name.parse().map_err(|_| ConfigError::Invalid {
            message: format!("unknown sensor '{name}': expected sentinel2/s2 or landsat8/l8"),
        })?;
        Ok(self)
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        let ceiling = self.imagery.cloud_ceiling;
        if !(ceiling > 0.0 && ceiling <= 100.0) {
            return invalid(format!(
                "imagery.cloud_ceiling must be in (0, 100], got {ceiling}"
            ));
        }
        if self.imagery.window_days == 0 {
            return invalid("imagery.window_days must be at least 1".to_string());
        }
        for (name, value) in [
            ("imagery.window_days", self.imagery.window_days),
            ("imagery.fallback_margin_days", self.imagery.fallback_margin_days),
        ] {
            if value > MAX_WINDOW_DAYS {
                return invalid(format!("{name} must be at most {MAX_WINDOW_DAYS}, got {value}"));
            }
        }

        let thresholds = [
            ("thresholds.vegetation", self.thresholds.vegetation),
            ("thresholds.built_up", self.thresholds.built_up),
            ("thresholds.water", self.thresholds.water),
        ];
        for (name, value) in thresholds {
            if !(-1.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be in [-1, 1], got {value}"));
            }
        }
        for (name, value) in [
            ("thresholds.change", self.thresholds.change),
            ("thresholds.priority_delta", self.thresholds.priority_delta),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{name} must be a non-negative number, got {value}"));
            }
        }

        for (name, value) in [
            ("reduction.scale", self.reduction.scale),
            ("reduction.max_pixels", self.reduction.max_pixels),
            ("reduction.mean_max_pixels", self.reduction.mean_max_pixels),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{name} must be positive, got {value}"));
            }
        }

        if self.thumbnail.dimensions == 0 {
            return invalid("thumbnail.dimensions must be at least 1".to_string());
        }
        if self.thumbnail.min >= self.thumbnail.max {
            return invalid(format!(
                "thumbnail.min ({}) must be below thumbnail.max ({})",
                self.thumbnail.min, self.thumbnail.max
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_matches_default() {
        let parsed = AnalysisConfig::from_toml_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(parsed, AnalysisConfig::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let parsed = AnalysisConfig::from_toml_str(
            r#"
            [imagery]
            sensor = "landsat8"

            [thresholds]
            change = 0.15
            "#,
        )
        .unwrap();

        assert_eq!(parsed.imagery.sensor, Sensor::Landsat8);
        assert!((parsed.imagery.cloud_ceiling - 20.0).abs() < f64::EPSILON);
        assert!((parsed.thresholds.change - 0.15).abs() < f64::EPSILON);
        assert!((parsed.thresholds.vegetation - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_unknown_encoding() {
        let err = AnalysisConfig::from_toml_str(
            r#"
            [export]
            csv_encoding = "latin-1"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!("latin-1".parse::<CsvEncoding>().is_err());
        assert_eq!("utf-8-sig".parse::<CsvEncoding>().unwrap(), CsvEncoding::Utf8Sig);
    }

    fn rejected(toml: &str) -> ConfigError {
        AnalysisConfig::from_toml_str(toml).unwrap_err()
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = rejected("[reduction]\nscale = 0.0\n");
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = rejected("[imagery]\ncloud_ceiling = 120.0\n");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn rejects_windows_beyond_the_day_limit() {
        let err = rejected("[imagery]\nwindow_days = 4000000000\n");
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("imagery.window_days"));

        let err = rejected("[imagery]\nfallback_margin_days = 4000000000\n");
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("imagery.fallback_margin_days"));

        let at_limit = format!("[imagery]\nwindow_days = {MAX_WINDOW_DAYS}\n");
        assert!(AnalysisConfig::from_toml_str(&at_limit).is_ok());
    }

    #[test]
    fn sensor_override_accepts_aliases() {
        let config = AnalysisConfig::default().with_sensor("l8").unwrap();
        assert_eq!(config.imagery.sensor, Sensor::Landsat8);

        let err = AnalysisConfig::default().with_sensor("modis").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("unknown sensor 'modis'"));
    }

    #[test]
    fn renders_back_to_toml() {
        let rendered = AnalysisConfig::default().to_toml_string().unwrap();
        let reparsed = AnalysisConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed, AnalysisConfig::default());
    }
}
