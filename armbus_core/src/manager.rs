//! Synchronization manager: the named axis collection and the batched
//! synchronized-move operation.
//!
//! Axes naturally differ in travel time, so per-axis commands with
//! per-axis durations would not arrive together. The manager computes
//! each axis's required duration from distance and velocity, takes the
//! maximum, and issues exactly ONE batched position command carrying
//! every `(id, target)` pair with that shared duration: one bus frame,
//! one arrival time.
//!
//! Names are the only addressing scheme exposed to callers; bus ids stay
//! internal. Membership is fixed after construction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use armbus_common::config::{ArmConfig, ConfigError};
use armbus_common::consts::{MIN_DURATION, PULSE_MAX, SETTLE_MARGIN};
use armbus_common::units::{clamp, clamp_duration, pulses_from_deg, Position, Unit};

use crate::axis::{Axis, BestEffort, MoveSpec, Telemetry};
use crate::bus::{BusError, ServoBus};

// ─── Error Type ─────────────────────────────────────────────────────

/// Error raised by manager operations.
#[derive(Debug, Error)]
pub enum MotionError {
    /// Move request referenced a name outside the axis table. Raised
    /// before any hardware command is sent.
    #[error("unknown axis '{0}'")]
    UnknownAxis(String),

    /// Pose name not present in the configuration.
    #[error("unknown pose '{0}'")]
    UnknownPose(String),

    /// The batched move command itself failed. Fatal to the move; the
    /// axes are left in an ambiguous state.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Shared velocity for a synchronized move.
#[derive(Debug, Clone, Copy)]
enum SyncVelocity {
    /// Uniform wire-domain speed for every axis.
    PulsesPerSec(f64),
    /// Uniform angular speed, converted per axis range.
    DegPerSec(f64),
}

impl SyncVelocity {
    fn pulses_per_sec(self, axis: &Axis) -> f64 {
        match self {
            Self::PulsesPerSec(v) => v,
            Self::DegPerSec(v) => v * f64::from(PULSE_MAX) / axis.range_deg(),
        }
    }
}

// ─── Manager ────────────────────────────────────────────────────────

/// Named collection of axes sharing one bus handle.
pub struct ArmManager {
    axes: HashMap<String, Axis>,
    /// Config order, for stable iteration and reporting.
    order: Vec<String>,
    poses: BTreeMap<String, BTreeMap<String, u16>>,
    default_velocity_deg_s: f64,
    bus: Arc<dyn ServoBus>,
}

impl ArmManager {
    /// Build one axis per config entry around the shared bus handle.
    ///
    /// The config is re-validated so a hand-built [`ArmConfig`] cannot
    /// smuggle duplicate names or out-of-domain limits past the loader.
    pub fn from_config(config: &ArmConfig, bus: Arc<dyn ServoBus>) -> Result<Self, ConfigError> {
        config.validate().map_err(ConfigError::Validation)?;

        let mut axes = HashMap::with_capacity(config.axes.len());
        let mut order = Vec::with_capacity(config.axes.len());
        for entry in &config.axes {
            axes.insert(entry.name.clone(), Axis::new(entry, Arc::clone(&bus)));
            order.push(entry.name.clone());
        }
        info!(axes = order.len(), poses = config.poses.len(), "arm ready");

        Ok(Self {
            axes,
            order,
            poses: config.poses.clone(),
            default_velocity_deg_s: config.default_velocity_deg_s,
            bus,
        })
    }

    /// Axis by name.
    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.get(name)
    }

    /// Mutable axis by name (soft-limit updates).
    pub fn axis_mut(&mut self, name: &str) -> Option<&mut Axis> {
        self.axes.get_mut(name)
    }

    /// Axis names in config order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Configured pose names.
    pub fn pose_names(&self) -> impl Iterator<Item = &str> {
        self.poses.keys().map(String::as_str)
    }

    /// Number of managed axes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when no axes are managed.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    // ── Single-Axis Entry Points ──

    /// Single-axis move addressed by name.
    pub fn move_to(
        &self,
        name: &str,
        target: Position,
        spec: &MoveSpec,
    ) -> Result<(), MotionError> {
        let axis = self
            .axes
            .get(name)
            .ok_or_else(|| MotionError::UnknownAxis(name.to_string()))?;
        axis.move_to(target, spec)?;
        Ok(())
    }

    /// Guarded position read addressed by name.
    ///
    /// `Err` means the name is unknown; `Ok(None)` means the servo did
    /// not answer. Those are different failures.
    pub fn read_position(&self, name: &str, unit: Unit) -> Result<Option<f64>, MotionError> {
        let axis = self
            .axes
            .get(name)
            .ok_or_else(|| MotionError::UnknownAxis(name.to_string()))?;
        Ok(axis.read_position_in(unit))
    }

    // ── Synchronized Motion ──

    /// Move every named axis so all arrive at the same time.
    ///
    /// `targets` is in the pulse domain; `velocity` is a shared speed in
    /// pulses/s; absent or non-positive means the configured default
    /// angular velocity, converted per axis range. When `hold` is false,
    /// torque is released on exactly the requested axes after the wait.
    ///
    /// An empty target set is a no-op. An unknown name aborts the whole
    /// call before any hardware command.
    pub fn synchronized_move(
        &self,
        targets: &BTreeMap<String, u16>,
        velocity: Option<f64>,
        hold: bool,
    ) -> Result<(), MotionError> {
        let velocity = match velocity {
            Some(v) if v > 0.0 => SyncVelocity::PulsesPerSec(v),
            _ => SyncVelocity::DegPerSec(self.default_velocity_deg_s),
        };
        let resolved = self.resolve(targets.iter().map(|(n, &t)| (n.as_str(), t)))?;
        self.run_batch(&resolved, velocity, hold)
    }

    /// Degree-domain variant of [`Self::synchronized_move`].
    ///
    /// Targets convert through each axis's mechanical range before soft
    /// clamping; `velocity` is deg/s shared by all axes.
    pub fn synchronized_move_deg(
        &self,
        targets: &BTreeMap<String, f64>,
        velocity: Option<f64>,
        hold: bool,
    ) -> Result<(), MotionError> {
        let velocity = match velocity {
            Some(v) if v > 0.0 => v,
            _ => self.default_velocity_deg_s,
        };
        let mut pulse_targets = Vec::with_capacity(targets.len());
        for (name, &deg) in targets {
            let axis = self
                .axes
                .get(name)
                .ok_or_else(|| MotionError::UnknownAxis(name.clone()))?;
            pulse_targets.push((name.as_str(), pulses_from_deg(deg, axis.range_deg())));
        }
        let resolved = self.resolve(pulse_targets)?;
        self.run_batch(&resolved, SyncVelocity::DegPerSec(velocity), hold)
    }

    /// Run a configured pose as a synchronized move at the default
    /// velocity.
    pub fn move_to_pose(&self, name: &str, hold: bool) -> Result<(), MotionError> {
        let pose = self
            .poses
            .get(name)
            .ok_or_else(|| MotionError::UnknownPose(name.to_string()))?;
        info!(pose = name, "moving to pose");
        self.synchronized_move(pose, None, hold)
    }

    /// Resolve every name to its axis before touching the bus.
    fn resolve<'a>(
        &self,
        targets: impl IntoIterator<Item = (&'a str, u16)>,
    ) -> Result<Vec<(&Axis, u16)>, MotionError> {
        targets
            .into_iter()
            .map(|(name, target)| {
                self.axes
                    .get(name)
                    .map(|axis| (axis, target))
                    .ok_or_else(|| MotionError::UnknownAxis(name.to_string()))
            })
            .collect()
    }

    /// The synchronized-move body: clamp, time, batch, wait, release.
    fn run_batch(
        &self,
        resolved: &[(&Axis, u16)],
        velocity: SyncVelocity,
        hold: bool,
    ) -> Result<(), MotionError> {
        if resolved.is_empty() {
            return Ok(());
        }

        let mut max_duration = Duration::ZERO;
        let mut pairs = Vec::with_capacity(resolved.len());
        for &(axis, target) in resolved {
            let (soft_min, soft_max) = axis.soft_limits();
            let target = clamp(target, soft_min, soft_max);

            // Guarded read; fall back to the target so an unreadable
            // axis contributes the minimum duration instead of failing
            // the whole move.
            let current = axis.read_position().unwrap_or(target);
            let dist = current.abs_diff(target);
            let duration = if dist > 0 {
                clamp_duration(Duration::from_secs_f64(
                    f64::from(dist) / velocity.pulses_per_sec(axis),
                ))
            } else {
                MIN_DURATION
            };

            max_duration = max_duration.max(duration);
            pairs.push((axis.id(), target));
        }

        info!(axes = pairs.len(), ?max_duration, "synchronized move");
        self.bus.set_position(max_duration, &pairs)?;

        thread::sleep(max_duration + SETTLE_MARGIN);

        if !hold {
            for &(axis, _) in resolved {
                let _ = axis.disable_torque();
            }
        }
        Ok(())
    }

    // ── Aggregate Reads & Reports ──

    /// Guarded position of every managed axis, `None` where unreachable.
    pub fn positions(&self) -> BTreeMap<String, Option<u16>> {
        self.order
            .iter()
            .map(|name| (name.clone(), self.axes[name].read_position()))
            .collect()
    }

    /// Guarded telemetry of every managed axis.
    pub fn telemetry(&self) -> BTreeMap<String, Telemetry> {
        self.order
            .iter()
            .map(|name| (name.clone(), self.axes[name].read_telemetry()))
            .collect()
    }

    /// Report every axis's position through the log, in config order.
    ///
    /// Read failures are reported per axis as unavailable; they never
    /// fail the report.
    pub fn print_positions(&self, unit: Unit) {
        for name in &self.order {
            let axis = &self.axes[name];
            match (unit, axis.read_position_in(unit)) {
                (Unit::Pulses, Some(p)) => info!("{name}: {p:.0} pulses"),
                (Unit::Degrees, Some(d)) => info!("{name}: {d:.1}°"),
                (_, None) => info!("{name}: unavailable"),
            }
        }
    }

    // ── Whole-Arm Commands ──

    /// Halt every managed servo in place with one bus command.
    pub fn stop_all(&self) -> BestEffort {
        let ids: Vec<u8> = self.order.iter().map(|n| self.axes[n].id()).collect();
        match self.bus.stop(&ids) {
            Ok(()) => BestEffort::Applied,
            Err(e) => {
                warn!("stop-all failed: {e}");
                BestEffort::Failed
            }
        }
    }

    /// Best-effort torque enable across every axis.
    pub fn hold_all(&self) {
        for name in &self.order {
            let _ = self.axes[name].enable_torque();
        }
    }

    /// Best-effort torque release across every axis; the whole arm
    /// goes compliant.
    pub fn release_all(&self) {
        for name in &self.order {
            let _ = self.axes[name].disable_torque();
        }
    }
}

impl std::fmt::Debug for ArmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmManager")
            .field("axes", &self.order)
            .field("poses", &self.poses.keys().collect::<Vec<_>>())
            .finish()
    }
}
