//! armbus Common Library
//!
//! Shared leaf crate for the armbus workspace: numeric/unit conversions
//! between the servo pulse domain and mechanical degrees, motion timing
//! constants, and the TOML configuration layer (axis table, poses, bus
//! settings) with validation.
//!
//! # Module Structure
//!
//! - [`consts`] - Pulse domain bounds, duration limits, default timings
//! - [`units`] - Pulse ↔ degree conversion and clamping helpers
//! - [`config`] - Configuration types, validation, and TOML loaders

pub mod config;
pub mod consts;
pub mod units;

pub use config::{load_config, load_config_from_str, ArmConfig, AxisEntry, BusConfig, ConfigError};
pub use units::{Position, Unit};
