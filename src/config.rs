//! TOML configuration with sensible defaults.
//!
//! No config file is required to run: defaults cover a typical device, and
//! the physical dimensions and axis inversion are seeded from the device
//! metadata where available. A config file overrides both.
//!
//! Thresholds for contact detection are given on the raw 8-bit scale of
//! the heatmap (matching what debug tools display); they are divided down
//! where the pipeline consumes the normalized heatmap. Physical values
//! (sizes, distances) are centimeters.

use crate::contacts::detector::DetectorConfig;
use crate::contacts::finder::FinderConfig;
use crate::contacts::neutral::NeutralMode;
use crate::contacts::stability::StabilityConfig;
use crate::contacts::validator::ValidatorConfig;
use crate::parser::Metadata;

use serde::Deserialize;
use thiserror::Error;

use std::path::Path;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mirror contact coordinates on the X axis.
    pub invert_x: bool,

    /// Mirror contact coordinates on the Y axis.
    pub invert_y: bool,

    /// The physical width of the display in centimeters.
    pub width: f64,

    /// The physical height of the display in centimeters.
    pub height: f64,

    pub device: DeviceConfig,
    pub touchscreen: TouchscreenConfig,
    pub contacts: ContactsConfig,
    pub stylus: StylusConfig,
    pub dft: DftConfig,
    pub cone: ConeConfig,
}

/// Feature report IDs of the device. These are stable across the known
/// HID-native IPTS devices but can be overridden per device.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// The feature report that switches between singletouch (0) and
    /// multitouch (1) mode.
    pub mode_report: u8,

    /// The feature report that returns the metadata frame.
    pub metadata_report: u8,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TouchscreenConfig {
    /// Disable the touchscreen entirely.
    pub disable: bool,

    /// Lift all contacts while a palm is on the screen.
    pub disable_on_palm: bool,

    /// Lift all contacts while a stylus is in proximity.
    pub disable_on_stylus: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ContactsConfig {
    /// How the neutral value of the heatmap is determined.
    pub neutral: NeutralMode,

    /// Offset on the calculated neutral value, or the constant neutral
    /// value itself. 8-bit scale.
    pub neutral_value: f64,

    /// Recalculate the neutral value only every n frames.
    pub neutral_backoff: usize,

    /// Cluster search start threshold, 8-bit scale.
    pub activation_threshold: f64,

    /// Cluster search stop threshold, 8-bit scale.
    pub deactivation_threshold: f64,

    /// Bounds for the major axis of a valid contact, in centimeters.
    pub size_min: f64,
    pub size_max: f64,

    /// Bounds for the aspect ratio of a valid contact.
    pub aspect_min: f64,
    pub aspect_max: f64,

    /// Dead-band / instability bounds for per-frame movement, in
    /// centimeters.
    pub position_threshold_min: f64,
    pub position_threshold_max: f64,

    /// Dead-band / instability bounds for per-frame size changes, in
    /// centimeters.
    pub size_threshold_min: f64,
    pub size_threshold_max: f64,

    /// Dead-band / instability bounds for per-frame orientation changes,
    /// in degrees.
    pub orientation_threshold_min: f64,
    pub orientation_threshold_max: f64,

    /// Contacts closer than this to a palm are unstable, in centimeters.
    pub distance_threshold: f64,

    /// Over how many frames a contact must exist to be stable.
    pub temporal_window: usize,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct StylusConfig {
    /// Disable the stylus entirely.
    pub disable: bool,

    /// Disable touch input within this distance of the stylus tip, in
    /// centimeters. 0 disables the check.
    pub tip_distance: f64,
}

/// Tuning for the DFT stylus decoder.
///
/// The screen dimensions and inversion flags are filled in from the
/// top-level config; they are not part of the `[dft]` table.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DftConfig {
    /// Minimum amplitude of an antenna component for interpolation.
    pub position_min_amp: f64,

    /// Minimum row magnitude for position detection.
    pub position_min_mag: f64,

    /// Exponent applied to amplitudes before parabola fitting.
    pub position_exp: f64,

    /// Minimum row magnitude for button detection.
    pub button_min_mag: f64,

    /// Minimum summed magnitude for frequency (pressure) interpolation.
    pub freq_min_mag: f64,

    /// Minimum row magnitude of the secondary signal for tilt.
    pub tilt_min_mag: f64,

    /// Distance between tip and ring transmitter, in centimeters.
    /// 0 disables tilt.
    pub tilt_distance: f64,

    #[serde(skip)]
    pub invert_x: bool,

    #[serde(skip)]
    pub invert_y: bool,

    /// The physical width of the display in centimeters.
    #[serde(skip)]
    pub width: f64,

    /// The physical height of the display in centimeters.
    #[serde(skip)]
    pub height: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ConeConfig {
    /// The half opening angle of the rejection cone, in degrees.
    pub angle: f64,

    /// The reach of the rejection cone, in centimeters.
    pub distance: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            invert_x: false,
            invert_y: false,
            width: 0.0,
            height: 0.0,
            device: DeviceConfig::default(),
            touchscreen: TouchscreenConfig::default(),
            contacts: ContactsConfig::default(),
            stylus: StylusConfig::default(),
            dft: DftConfig::default(),
            cone: ConeConfig::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mode_report: 0x05,
            metadata_report: 0x06,
        }
    }
}

impl Default for TouchscreenConfig {
    fn default() -> Self {
        Self {
            disable: false,
            disable_on_palm: false,
            disable_on_stylus: true,
        }
    }
}

impl Default for ContactsConfig {
    fn default() -> Self {
        Self {
            neutral: NeutralMode::Mode,
            neutral_value: 0.0,
            neutral_backoff: 16,
            activation_threshold: 24.0,
            deactivation_threshold: 20.0,
            size_min: 0.2,
            size_max: 2.0,
            aspect_min: 1.0,
            aspect_max: 2.5,
            position_threshold_min: 0.2,
            position_threshold_max: 2.0,
            size_threshold_min: 0.1,
            size_threshold_max: 0.4,
            orientation_threshold_min: 2.0,
            orientation_threshold_max: 8.0,
            distance_threshold: 1.0,
            temporal_window: 3,
        }
    }
}

impl Default for StylusConfig {
    fn default() -> Self {
        Self {
            disable: false,
            tip_distance: 0.0,
        }
    }
}

impl Default for DftConfig {
    fn default() -> Self {
        Self {
            position_min_amp: 50.0,
            position_min_mag: 2000.0,
            position_exp: -0.7,
            button_min_mag: 1000.0,
            freq_min_mag: 10000.0,
            tilt_min_mag: 10000.0,
            tilt_distance: 0.6,
            invert_x: false,
            invert_y: false,
            width: 0.0,
            height: 0.0,
        }
    }
}

impl Default for ConeConfig {
    fn default() -> Self {
        Self {
            angle: 30.0,
            distance: 5.0,
        }
    }
}

impl Config {
    /// Loads the configuration.
    ///
    /// An explicitly given path must exist and parse; a parse failure is
    /// always fatal. If no path is given, the default location is tried
    /// and silently skipped when missing.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        let display = path.display().to_string();

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config file found at {display}. Using defaults.");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: display,
                    source,
                });
            }
        };

        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: display.clone(),
            source,
        })?;

        log::info!("Loaded config from {display}");
        Ok(config)
    }

    /// Fills device-derived values that the config file did not set.
    ///
    /// Dimensions only apply when the file left them at zero; the
    /// inversion flags combine, since the metadata describes the panel
    /// wiring and the config can only add further mirroring on top.
    pub fn apply_metadata(&mut self, meta: &Metadata) {
        if self.width == 0.0 {
            self.width = meta.width;
        }

        if self.height == 0.0 {
            self.height = meta.height;
        }

        self.invert_x ^= meta.invert_x;
        self.invert_y ^= meta.invert_y;
    }

    /// The physical diagonal of the display in centimeters, if known.
    pub fn physical_diagonal(&self) -> Option<f64> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return None;
        }

        Some(self.width.hypot(self.height))
    }

    /// Assembles the contact pipeline configuration.
    ///
    /// The pipeline runs on normalized data: 8-bit thresholds scale down
    /// by 255, physical limits by the display diagonal, orientation
    /// thresholds by the half turn.
    pub fn contacts_config(&self) -> FinderConfig {
        let c = &self.contacts;
        let diagonal = self.physical_diagonal();

        let detection = DetectorConfig {
            normalize: true,
            neutral_mode: c.neutral,
            neutral_value_offset: c.neutral_value / 255.0,
            neutral_value_backoff: c.neutral_backoff.max(1),
            activation_threshold: c.activation_threshold / 255.0,
            deactivation_threshold: c.deactivation_threshold / 255.0,
        };

        // Without known physical dimensions the physical checks have no
        // frame of reference and stay disabled.
        let validation = ValidatorConfig {
            track_validity: true,
            aspect_limits: Some((c.aspect_min, c.aspect_max)),
            size_limits: diagonal.map(|d| (c.size_min / d, c.size_max / d)),
        };

        let stability = StabilityConfig {
            temporal_window: c.temporal_window.max(2),
            check_temporal_stability: true,
            distance_threshold: diagonal.map(|d| c.distance_threshold / d),
            position_threshold: diagonal
                .map(|d| (c.position_threshold_min / d, c.position_threshold_max / d)),
            size_threshold: diagonal.map(|d| (c.size_threshold_min / d, c.size_threshold_max / d)),
            orientation_threshold: Some((
                c.orientation_threshold_min / 180.0,
                c.orientation_threshold_max / 180.0,
            )),
        };

        FinderConfig {
            detection,
            validation,
            stability,
        }
    }

    /// The DFT decoder configuration with screen geometry filled in.
    pub fn dft_config(&self) -> DftConfig {
        DftConfig {
            invert_x: self.invert_x,
            invert_y: self.invert_y,
            width: self.width,
            height: self.height,
            ..self.dft
        }
    }
}

fn default_config_path() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("IPTSD_CONFIG_FILE") {
        return path.into();
    }

    "/etc/iptsd.toml".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();

        assert_eq!(config.contacts.activation_threshold, 24.0);
        assert_eq!(config.contacts.deactivation_threshold, 20.0);
        assert_eq!(config.cone.angle, 30.0);
        assert!(!config.touchscreen.disable);
        assert!(config.touchscreen.disable_on_stylus);
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            width = 26.0
            height = 17.3

            [contacts]
            neutral = "average"
            activation_threshold = 30.0

            [dft]
            position_min_mag = 2500.0
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.width, 26.0);
        assert_eq!(config.contacts.neutral, NeutralMode::Average);
        assert_eq!(config.contacts.activation_threshold, 30.0);
        assert_eq!(config.dft.position_min_mag, 2500.0);

        // Everything else stays at the defaults.
        assert_eq!(config.contacts.deactivation_threshold, 20.0);
        assert_eq!(config.cone.distance, 5.0);
    }

    #[test]
    fn unknown_neutral_mode_is_rejected() {
        let toml_str = r#"
            [contacts]
            neutral = "median"
        "#;

        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn metadata_fills_unset_dimensions() {
        let meta = Metadata {
            rows: 46,
            columns: 68,
            width: 26.0,
            height: 17.3,
            invert_x: true,
            invert_y: false,
        };

        let mut config = Config::default();
        config.apply_metadata(&meta);

        assert_eq!(config.width, 26.0);
        assert_eq!(config.height, 17.3);
        assert!(config.invert_x);
        assert!(!config.invert_y);

        // A configured width wins over the metadata.
        let mut config = Config {
            width: 30.0,
            ..Config::default()
        };
        config.apply_metadata(&meta);
        assert_eq!(config.width, 30.0);
    }

    #[test]
    fn thresholds_are_normalized() {
        let config = Config {
            width: 3.0,
            height: 4.0,
            ..Config::default()
        };

        let finder = config.contacts_config();

        assert!((finder.detection.activation_threshold - 24.0 / 255.0).abs() < 1e-12);

        let (size_min, size_max) = finder.validation.size_limits.unwrap();
        assert!((size_min - 0.2 / 5.0).abs() < 1e-12);
        assert!((size_max - 2.0 / 5.0).abs() < 1e-12);

        let (o_min, o_max) = finder.stability.orientation_threshold.unwrap();
        assert!((o_min - 2.0 / 180.0).abs() < 1e-12);
        assert!((o_max - 8.0 / 180.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_dimensions_disable_physical_checks() {
        let config = Config::default();
        let finder = config.contacts_config();

        assert!(config.physical_diagonal().is_none());
        assert!(finder.validation.size_limits.is_none());
        assert!(finder.stability.position_threshold.is_none());
    }
}
