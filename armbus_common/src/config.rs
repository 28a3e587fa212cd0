//! TOML configuration loader with validation.
//!
//! Loads [`ArmConfig`]: bus settings, the axis table (the only place axis
//! names are bound to bus ids), named poses, and the default synchronized
//! velocity. Validates: non-empty axis table, name/id uniqueness, id range,
//! positive mechanical ranges and timeouts, pulse-domain bounds, and pose
//! references. Optional fields use `#[serde(default)]` so configs stay
//! forward-compatible.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::consts::{
    DEFAULT_RANGE_DEG, DEFAULT_READ_TIMEOUT, DEFAULT_SYNC_VELOCITY_DEG_S, PULSE_MAX, SERVO_ID_MAX,
};

// ─── Error Type ─────────────────────────────────────────────────────

/// Configuration loading/validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("config I/O error: {0}")]
    Io(String),
    /// TOML parse error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Parameter validation error.
    #[error("config validation: {0}")]
    Validation(String),
}

// ─── Config Types ───────────────────────────────────────────────────

/// Top-level arm configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArmConfig {
    /// Bus transport settings (consumed by the transport collaborator).
    #[serde(default)]
    pub bus: BusConfig,

    /// Axis table: one entry per servo on the bus.
    pub axes: Vec<AxisEntry>,

    /// Shared angular velocity [deg/s] for synchronized moves that give none.
    #[serde(default = "default_sync_velocity")]
    pub default_velocity_deg_s: f64,

    /// Named target sets: pose name → (axis name → pulse target).
    #[serde(default)]
    pub poses: BTreeMap<String, BTreeMap<String, u16>>,
}

/// Serial bus settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Serial device path.
    #[serde(default = "default_device")]
    pub device: String,

    /// Baud rate.
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud: default_baud(),
        }
    }
}

/// One axis of the arm: a servo addressed by bus id.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisEntry {
    /// Display name. The only addressing scheme exposed to callers.
    pub name: String,

    /// Servo bus id (stable hardware address).
    pub id: u8,

    /// Mechanical range [deg] mapped onto the pulse domain.
    #[serde(default = "default_range_deg")]
    pub range_deg: f64,

    /// Soft lower position limit [pulses].
    #[serde(default)]
    pub soft_min: u16,

    /// Soft upper position limit [pulses].
    #[serde(default = "default_soft_max")]
    pub soft_max: u16,

    /// Upper bound on a single guarded bus read [s].
    #[serde(default = "default_read_timeout_s")]
    pub read_timeout_s: f64,
}

impl AxisEntry {
    /// Read timeout as a [`Duration`]. Valid only after `validate()`.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout_s)
    }
}

fn default_device() -> String {
    "/dev/serial0".to_string()
}
fn default_baud() -> u32 {
    1_000_000
}
fn default_range_deg() -> f64 {
    DEFAULT_RANGE_DEG
}
fn default_soft_max() -> u16 {
    PULSE_MAX
}
fn default_read_timeout_s() -> f64 {
    DEFAULT_READ_TIMEOUT.as_secs_f64()
}
fn default_sync_velocity() -> f64 {
    DEFAULT_SYNC_VELOCITY_DEG_S
}

// ─── Validation ─────────────────────────────────────────────────────

impl ArmConfig {
    /// Validate parameter bounds and cross-references.
    pub fn validate(&self) -> Result<(), String> {
        if self.axes.is_empty() {
            return Err("axis table is empty".to_string());
        }
        if !(self.default_velocity_deg_s.is_finite() && self.default_velocity_deg_s > 0.0) {
            return Err(format!(
                "default_velocity_deg_s {} must be positive",
                self.default_velocity_deg_s
            ));
        }

        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for axis in &self.axes {
            if axis.name.is_empty() {
                return Err(format!("axis id {} has an empty name", axis.id));
            }
            if !names.insert(axis.name.as_str()) {
                return Err(format!("duplicate axis name '{}'", axis.name));
            }
            if !ids.insert(axis.id) {
                return Err(format!("duplicate axis id {}", axis.id));
            }
            if axis.id > SERVO_ID_MAX {
                return Err(format!(
                    "axis '{}': id {} out of range [0, {}]",
                    axis.name, axis.id, SERVO_ID_MAX
                ));
            }
            if !(axis.range_deg.is_finite() && axis.range_deg > 0.0) {
                return Err(format!(
                    "axis '{}': range_deg {} must be positive",
                    axis.name, axis.range_deg
                ));
            }
            if axis.soft_min > PULSE_MAX || axis.soft_max > PULSE_MAX {
                return Err(format!(
                    "axis '{}': soft limits [{}, {}] exceed pulse domain [0, {}]",
                    axis.name, axis.soft_min, axis.soft_max, PULSE_MAX
                ));
            }
            if !(axis.read_timeout_s.is_finite() && axis.read_timeout_s > 0.0) {
                return Err(format!(
                    "axis '{}': read_timeout_s {} must be positive",
                    axis.name, axis.read_timeout_s
                ));
            }
        }

        for (pose, targets) in &self.poses {
            for (axis, &pulse) in targets {
                if !names.contains(axis.as_str()) {
                    return Err(format!("pose '{pose}' references unknown axis '{axis}'"));
                }
                if pulse > PULSE_MAX {
                    return Err(format!(
                        "pose '{pose}': target {pulse} for '{axis}' exceeds {PULSE_MAX}"
                    ));
                }
            }
        }

        Ok(())
    }
}

// ─── Loading Functions ──────────────────────────────────────────────

/// Load and validate the arm configuration from a TOML file.
///
/// Missing or unreadable files, malformed TOML, and validation failures
/// all surface as [`ConfigError`] before any hardware is touched.
pub fn load_config(path: &Path) -> Result<ArmConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("failed to read {}: {e}", path.display())))?;
    let config = load_config_from_str(&raw)?;
    debug!(
        "loaded {} axes, {} poses from {}",
        config.axes.len(),
        config.poses.len(),
        path.display()
    );
    Ok(config)
}

/// Load config from a TOML string (for testing).
pub fn load_config_from_str(raw: &str) -> Result<ArmConfig, ConfigError> {
    let config: ArmConfig =
        toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate().map_err(ConfigError::Validation)?;
    Ok(config)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ArmConfig {
        ArmConfig {
            bus: BusConfig::default(),
            axes: vec![
                AxisEntry {
                    name: "base_yaw".to_string(),
                    id: 1,
                    range_deg: 240.0,
                    soft_min: 0,
                    soft_max: 1000,
                    read_timeout_s: 0.8,
                },
                AxisEntry {
                    name: "shoulder".to_string(),
                    id: 2,
                    range_deg: 240.0,
                    soft_min: 100,
                    soft_max: 900,
                    read_timeout_s: 0.8,
                },
            ],
            default_velocity_deg_s: 240.0,
            poses: BTreeMap::new(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn empty_axis_table_rejected() {
        let mut cfg = valid();
        cfg.axes.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut cfg = valid();
        cfg.axes[1].name = "base_yaw".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut cfg = valid();
        cfg.axes[1].id = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn broadcast_id_rejected() {
        let mut cfg = valid();
        cfg.axes[1].id = 254;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn nonpositive_range_rejected() {
        let mut cfg = valid();
        cfg.axes[0].range_deg = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn soft_limits_must_fit_pulse_domain() {
        let mut cfg = valid();
        cfg.axes[0].soft_max = 1200;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn pose_must_reference_known_axes() {
        let mut cfg = valid();
        cfg.poses.insert(
            "rest".to_string(),
            BTreeMap::from([("elbow".to_string(), 500)]),
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn pose_targets_must_fit_pulse_domain() {
        let mut cfg = valid();
        cfg.poses.insert(
            "rest".to_string(),
            BTreeMap::from([("base_yaw".to_string(), 1500)]),
        );
        assert!(cfg.validate().is_err());
    }
}
