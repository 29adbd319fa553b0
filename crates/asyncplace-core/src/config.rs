//! Canvas configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::pixel::BrushSize;

/// Edge length of one cell in unscaled screen pixels.
pub const PIXEL_SIZE: f64 = 10.0;
/// Lowest zoom for normal sessions.
pub const BASE_MIN_SCALE: f64 = 0.5;
/// Lowest zoom when the admin view preference is on.
pub const ADMIN_MIN_SCALE: f64 = 0.05;
/// Highest zoom.
pub const MAX_SCALE: f64 = 10.0;
/// Per-notch wheel zoom multiplier.
pub const ZOOM_FACTOR: f64 = 1.1;
/// Auto-flush cadence while a drawing session is active.
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tunables for a canvas session.
///
/// `admin_mode` only widens the zoom-out bound. It is a local view
/// preference and carries no authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub pixel_size: f64,
    pub base_min_scale: f64,
    pub admin_min_scale: f64,
    pub max_scale: f64,
    pub zoom_factor: f64,
    #[serde(with = "duration_secs")]
    pub flush_interval: Duration,
    /// Pointer drift (screen px) that auto-closes the brush menu.
    pub menu_close_distance: f64,
    #[serde(with = "duration_secs")]
    pub notice_duration: Duration,
    pub admin_mode: bool,
    pub show_grid: bool,
    pub brush_sizes: Vec<BrushSize>,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            pixel_size: PIXEL_SIZE,
            base_min_scale: BASE_MIN_SCALE,
            admin_min_scale: ADMIN_MIN_SCALE,
            max_scale: MAX_SCALE,
            zoom_factor: ZOOM_FACTOR,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            menu_close_distance: 100.0,
            notice_duration: Duration::from_secs(4),
            admin_mode: false,
            show_grid: true,
            brush_sizes: BrushSize::ALL.to_vec(),
        }
    }
}

impl CanvasConfig {
    /// Parse a JSON config. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the tunables describe a usable viewport.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if !(self.pixel_size > 0.0) {
            return invalid("pixel_size must be positive");
        }
        if !(self.base_min_scale > 0.0 && self.admin_min_scale > 0.0) {
            return invalid("min scales must be positive");
        }
        if self.base_min_scale > self.max_scale || self.admin_min_scale > self.max_scale {
            return invalid("min scales must not exceed max_scale");
        }
        if !(self.zoom_factor > 1.0) {
            return invalid("zoom_factor must be greater than 1");
        }
        if self.flush_interval.is_zero() {
            return invalid("flush_interval must be non-zero");
        }
        if self.brush_sizes.is_empty() {
            return invalid("at least one brush size is required");
        }
        Ok(())
    }

    /// Zoom-out bound for the current mode.
    pub fn min_scale(&self) -> f64 {
        if self.admin_mode {
            self.admin_min_scale
        } else {
            self.base_min_scale
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
