//! Axis endpoint: one servo on the shared bus.
//!
//! An [`Axis`] wraps a single bus id with its mechanical range, soft
//! position limits, and read timeout. It converts between the pulse and
//! degree domains, issues timed single-axis moves with velocity- or
//! duration-based timing, and guards every read so an unplugged servo
//! degrades to "unavailable" instead of hanging the caller.
//!
//! Torque toggling is non-critical and best-effort: failures are logged
//! and reported as [`BestEffort::Failed`], never raised. Move and
//! limit-persist commands are the opposite: a failure there leaves the
//! mechanism in an ambiguous state, so it propagates as [`BusError`].

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use armbus_common::config::AxisEntry;
use armbus_common::consts::{
    HOME_MID, LIMIT_WRITE_SETTLE, MIN_DURATION, PULSE_MAX, PULSE_MIN,
    SAFE_DEFAULT_DURATION, SETTLE_MARGIN, TORQUE_SETTLE,
};
use armbus_common::units::{clamp, clamp_duration, deg_from_pulses, Position, Unit};

use crate::bus::{BusError, ServoBus};
use crate::guard::bounded_read;

// ─── Result & Request Types ─────────────────────────────────────────

/// Outcome of a non-critical command.
///
/// Best-effort commands (torque toggles, stop) log their failures and
/// never propagate them; this type makes the swallow explicit instead of
/// hiding it behind a blanket catch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BestEffort {
    /// Command reached the bus.
    Applied,
    /// Command failed; already logged, safe to ignore.
    Failed,
}

impl BestEffort {
    /// Returns true if the command reached the bus.
    #[inline]
    pub const fn applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Timing and torque options for a single-axis move.
///
/// `velocity` is interpreted in the domain of the target position:
/// pulses/s for [`Position::Pulses`], deg/s for [`Position::Degrees`].
/// An explicit `duration` overrides velocity-based timing. `hold` decides
/// whether the joint stays driven after arrival or goes compliant.
#[derive(Debug, Clone, Copy)]
pub struct MoveSpec {
    /// Travel speed in the target's domain; `None` or non-positive
    /// falls back to the safe default duration.
    pub velocity: Option<f64>,
    /// Explicit move duration, clamped to the bus bounds.
    pub duration: Option<Duration>,
    /// Keep torque after arrival (default) or release it.
    pub hold: bool,
}

impl Default for MoveSpec {
    fn default() -> Self {
        Self {
            velocity: None,
            duration: None,
            hold: true,
        }
    }
}

impl MoveSpec {
    /// Set the travel speed (same domain as the target position).
    #[must_use]
    pub const fn with_velocity(mut self, velocity: f64) -> Self {
        self.velocity = Some(velocity);
        self
    }

    /// Set an explicit duration, overriding velocity-based timing.
    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Release torque after the move completes.
    #[must_use]
    pub const fn release(mut self) -> Self {
        self.hold = false;
        self
    }
}

/// Best-effort servo telemetry. Each field is independently `None` when
/// its read failed. Partial telemetry is an expected result, not an
/// error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Telemetry {
    /// Supply voltage [mV].
    pub vin_mv: Option<u16>,
    /// Internal temperature [°C].
    pub temp_c: Option<u8>,
    /// Torque enabled?
    pub torque_on: Option<bool>,
}

// ─── Axis ───────────────────────────────────────────────────────────

/// One servo on the shared bus.
pub struct Axis {
    id: u8,
    name: String,
    range_deg: f64,
    read_timeout: Duration,
    soft_min: u16,
    soft_max: u16,
    bus: Arc<dyn ServoBus>,
}

impl Axis {
    /// Build an axis from its config entry and the shared bus handle.
    pub fn new(entry: &AxisEntry, bus: Arc<dyn ServoBus>) -> Self {
        let mut axis = Self {
            id: entry.id,
            name: entry.name.clone(),
            range_deg: entry.range_deg,
            read_timeout: entry.read_timeout(),
            soft_min: PULSE_MIN,
            soft_max: PULSE_MAX,
            bus,
        };
        axis.set_soft_limits(entry.soft_min, entry.soft_max);
        axis
    }

    /// Bus id (stable hardware address).
    #[inline]
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// Display name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mechanical range [deg].
    #[inline]
    pub const fn range_deg(&self) -> f64 {
        self.range_deg
    }

    /// Current soft limits (pulse domain), `min <= max`.
    #[inline]
    pub const fn soft_limits(&self) -> (u16, u16) {
        (self.soft_min, self.soft_max)
    }

    // ── Torque ──

    /// Enable torque. Best-effort: failure is logged and swallowed.
    pub fn enable_torque(&self) -> BestEffort {
        self.set_torque(true)
    }

    /// Release torque, leaving the joint compliant. Best-effort.
    pub fn disable_torque(&self) -> BestEffort {
        self.set_torque(false)
    }

    fn set_torque(&self, on: bool) -> BestEffort {
        match self.bus.enable_torque(self.id, on) {
            Ok(()) => BestEffort::Applied,
            Err(e) => {
                warn!(axis = %self.name, on, "torque toggle failed: {e}");
                BestEffort::Failed
            }
        }
    }

    /// Halt this servo in place. Best-effort.
    pub fn stop(&self) -> BestEffort {
        match self.bus.stop(&[self.id]) {
            Ok(()) => BestEffort::Applied,
            Err(e) => {
                warn!(axis = %self.name, "stop failed: {e}");
                BestEffort::Failed
            }
        }
    }

    // ── Reads ──

    /// Current position [pulses], or `None` if the servo is unreachable
    /// within the read timeout. Never raises.
    pub fn read_position(&self) -> Option<u16> {
        let bus = Arc::clone(&self.bus);
        let id = self.id;
        bounded_read(move || bus.read_position(id), self.read_timeout)
    }

    /// Current position [deg], or `None` if unreachable.
    pub fn read_position_deg(&self) -> Option<f64> {
        self.read_position()
            .map(|p| deg_from_pulses(p, self.range_deg))
    }

    /// Current position in the requested domain, or `None` if
    /// unreachable.
    pub fn read_position_in(&self, unit: Unit) -> Option<f64> {
        match unit {
            Unit::Pulses => self.read_position().map(f64::from),
            Unit::Degrees => self.read_position_deg(),
        }
    }

    /// Three independent guarded reads; each field is `None` on its own
    /// failure.
    pub fn read_telemetry(&self) -> Telemetry {
        let id = self.id;
        let vin_bus = Arc::clone(&self.bus);
        let temp_bus = Arc::clone(&self.bus);
        let torque_bus = Arc::clone(&self.bus);
        Telemetry {
            vin_mv: bounded_read(move || vin_bus.read_vin(id), self.read_timeout),
            temp_c: bounded_read(move || temp_bus.read_temperature(id), self.read_timeout),
            torque_on: bounded_read(move || torque_bus.read_torque_state(id), self.read_timeout),
        }
    }

    // ── Motion ──

    /// Move to `target`, clamped to the soft limits.
    ///
    /// Enables torque (best-effort), reads the current position through
    /// the guard (falling back to the target itself, which degenerates
    /// the timing to the minimum duration), resolves the move duration
    /// per `spec`, sends one position command, and sleeps out the
    /// duration plus a settle margin. If `spec.hold` is false, torque is
    /// released after the wait.
    ///
    /// # Errors
    ///
    /// Only the position command itself can fail; a failure there leaves
    /// the axis state ambiguous and propagates.
    pub fn move_to(&self, target: Position, spec: &MoveSpec) -> Result<(), BusError> {
        let pulses = clamp(target.to_pulses(self.range_deg), self.soft_min, self.soft_max);

        let _ = self.enable_torque();
        thread::sleep(TORQUE_SETTLE);

        let current = self.read_position().unwrap_or(pulses);
        let duration = match spec.duration {
            Some(d) => clamp_duration(d),
            None => self
                .duration_for(current, pulses, spec.velocity, target.unit())
                .unwrap_or(SAFE_DEFAULT_DURATION),
        };

        debug!(
            axis = %self.name,
            current,
            target = pulses,
            ?duration,
            "single-axis move"
        );
        self.bus.set_position(duration, &[(self.id, pulses)])?;

        thread::sleep(duration + SETTLE_MARGIN);

        if !spec.hold {
            let _ = self.disable_torque();
        }
        Ok(())
    }

    /// Move to the mid position over a fixed duration, holding torque.
    pub fn home(&self, mid: u16, duration: Duration) -> Result<(), BusError> {
        let mid = clamp(mid, PULSE_MIN, PULSE_MAX);
        self.move_to(
            Position::Pulses(mid),
            &MoveSpec::default().with_duration(duration),
        )
    }

    /// Small relative move from the current position, holding torque.
    ///
    /// Falls back to mid-range when the current position is unreadable.
    pub fn nudge(&self, delta: i32, duration: Duration) -> Result<(), BusError> {
        let current = self.read_position().unwrap_or(HOME_MID);
        let target = clamp(
            i32::from(current) + delta,
            i32::from(self.soft_min),
            i32::from(self.soft_max),
        ) as u16;
        self.move_to(
            Position::Pulses(target),
            &MoveSpec::default().with_duration(duration),
        )
    }

    // ── Limits ──

    /// Set the software clamp on commanded positions.
    ///
    /// Both bounds are clamped into the pulse domain; out-of-order
    /// bounds are swapped silently.
    pub fn set_soft_limits(&mut self, min: u16, max: u16) {
        let min = clamp(min, PULSE_MIN, PULSE_MAX);
        let max = clamp(max, PULSE_MIN, PULSE_MAX);
        let (min, max) = if min > max { (max, min) } else { (min, max) };
        self.soft_min = min;
        self.soft_max = max;
    }

    /// Persist position limits into servo memory via the bus.
    ///
    /// Same normalization as [`Self::set_soft_limits`], but this writes
    /// through to the device and survives power cycles; undoing it takes
    /// another write.
    pub fn set_firmware_limits(&self, min: u16, max: u16) -> Result<(), BusError> {
        let min = clamp(min, PULSE_MIN, PULSE_MAX);
        let max = clamp(max, PULSE_MIN, PULSE_MAX);
        let (min, max) = if min > max { (max, min) } else { (min, max) };
        self.bus.set_angle_limit(self.id, min, max)?;
        thread::sleep(LIMIT_WRITE_SETTLE);
        Ok(())
    }

    // ── Timing ──

    /// Duration for a move of `current → target` at `velocity`.
    ///
    /// Zero distance resolves to the minimum duration regardless of
    /// velocity. `None` means no usable velocity was given; the caller
    /// falls back to the safe default.
    fn duration_for(
        &self,
        current: u16,
        target: u16,
        velocity: Option<f64>,
        unit: Unit,
    ) -> Option<Duration> {
        let dist = current.abs_diff(target);
        if dist == 0 {
            return Some(MIN_DURATION);
        }

        let velocity = velocity.filter(|v| *v > 0.0)?;
        let pulses_per_sec = match unit {
            Unit::Pulses => velocity,
            Unit::Degrees => velocity * f64::from(PULSE_MAX) / self.range_deg,
        };

        Some(clamp_duration(Duration::from_secs_f64(
            f64::from(dist) / pulses_per_sec,
        )))
    }
}

impl std::fmt::Debug for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Axis")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("range_deg", &self.range_deg)
            .field("soft_limits", &(self.soft_min, self.soft_max))
            .finish()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{BusCommand, SimBus};
    use armbus_common::consts::MAX_DURATION;

    fn entry(name: &str, id: u8) -> AxisEntry {
        AxisEntry {
            name: name.to_string(),
            id,
            range_deg: 240.0,
            soft_min: 0,
            soft_max: 1000,
            read_timeout_s: 0.2,
        }
    }

    fn axis_on(bus: &Arc<SimBus>) -> Axis {
        Axis::new(&entry("base_yaw", 1), Arc::clone(bus) as Arc<dyn ServoBus>)
    }

    #[test]
    fn soft_limits_normalize() {
        let bus = Arc::new(SimBus::new([1]));
        let mut axis = axis_on(&bus);

        axis.set_soft_limits(900, 100);
        assert_eq!(axis.soft_limits(), (100, 900));

        axis.set_soft_limits(0, 5000);
        assert_eq!(axis.soft_limits(), (0, 1000));
    }

    #[test]
    fn duration_zero_distance_is_minimum() {
        let bus = Arc::new(SimBus::new([1]));
        let axis = axis_on(&bus);
        assert_eq!(
            axis.duration_for(500, 500, Some(300.0), Unit::Pulses),
            Some(MIN_DURATION)
        );
        assert_eq!(
            axis.duration_for(500, 500, None, Unit::Pulses),
            Some(MIN_DURATION)
        );
    }

    #[test]
    fn duration_from_pulse_velocity() {
        let bus = Arc::new(SimBus::new([1]));
        let axis = axis_on(&bus);
        let d = axis
            .duration_for(400, 700, Some(300.0), Unit::Pulses)
            .unwrap();
        assert!((d.as_secs_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn duration_from_degree_velocity_converts_by_range() {
        let bus = Arc::new(SimBus::new([1]));
        let axis = axis_on(&bus);
        // 60 deg/s on a 240° joint is 250 pulses/s; 500 pulses take 2 s.
        let d = axis
            .duration_for(0, 500, Some(60.0), Unit::Degrees)
            .unwrap();
        assert!((d.as_secs_f64() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn duration_clamps_to_bus_bounds() {
        let bus = Arc::new(SimBus::new([1]));
        let axis = axis_on(&bus);
        assert_eq!(
            axis.duration_for(0, 1000, Some(1e6), Unit::Pulses),
            Some(MIN_DURATION)
        );
        assert_eq!(
            axis.duration_for(0, 1000, Some(1e-6), Unit::Pulses),
            Some(MAX_DURATION)
        );
    }

    #[test]
    fn nonpositive_velocity_yields_no_duration() {
        let bus = Arc::new(SimBus::new([1]));
        let axis = axis_on(&bus);
        assert_eq!(axis.duration_for(0, 500, Some(0.0), Unit::Pulses), None);
        assert_eq!(axis.duration_for(0, 500, Some(-10.0), Unit::Pulses), None);
        assert_eq!(axis.duration_for(0, 500, None, Unit::Pulses), None);
    }

    #[test]
    fn move_clamps_target_to_soft_limits() {
        let bus = Arc::new(SimBus::new([1]));
        let mut axis = axis_on(&bus);
        axis.set_soft_limits(100, 900);

        axis.move_to(
            Position::Pulses(950),
            &MoveSpec::default().with_duration(MIN_DURATION),
        )
        .unwrap();

        let sent = bus
            .take_log()
            .into_iter()
            .find_map(|c| match c {
                BusCommand::SetPosition { targets, .. } => Some(targets),
                _ => None,
            })
            .unwrap();
        assert_eq!(sent, vec![(1, 900)]);
    }

    #[test]
    fn explicit_duration_is_clamped() {
        let bus = Arc::new(SimBus::new([1]));
        let axis = axis_on(&bus);

        axis.move_to(
            Position::Pulses(510),
            &MoveSpec::default().with_duration(Duration::from_millis(10)),
        )
        .unwrap();

        let duration = bus
            .take_log()
            .into_iter()
            .find_map(|c| match c {
                BusCommand::SetPosition { duration, .. } => Some(duration),
                _ => None,
            })
            .unwrap();
        assert_eq!(duration, MIN_DURATION);
    }

    #[test]
    fn unreadable_current_degenerates_to_minimum_duration() {
        let bus = Arc::new(SimBus::new([1]));
        bus.set_servo_position(1, 100);
        bus.make_unreachable(1);
        let axis = axis_on(&bus);

        // Velocity timing would give |900-100|/300 ≈ 2.7 s, but the
        // guarded read fails, current falls back to the target, and the
        // move degenerates to the minimum duration.
        axis.move_to(
            Position::Pulses(900),
            &MoveSpec::default().with_velocity(300.0),
        )
        .unwrap();

        let duration = bus
            .take_log()
            .into_iter()
            .find_map(|c| match c {
                BusCommand::SetPosition { duration, .. } => Some(duration),
                _ => None,
            })
            .unwrap();
        assert_eq!(duration, MIN_DURATION);
    }

    #[test]
    fn release_spec_disables_torque_after_move() {
        let bus = Arc::new(SimBus::new([1]));
        let axis = axis_on(&bus);

        axis.move_to(
            Position::Pulses(600),
            &MoveSpec::default().with_duration(MIN_DURATION).release(),
        )
        .unwrap();

        let log = bus.take_log();
        assert!(log.contains(&BusCommand::EnableTorque { id: 1, on: true }));
        assert_eq!(
            log.last(),
            Some(&BusCommand::EnableTorque { id: 1, on: false })
        );
    }

    #[test]
    fn hold_spec_keeps_torque() {
        let bus = Arc::new(SimBus::new([1]));
        let axis = axis_on(&bus);

        axis.move_to(
            Position::Pulses(600),
            &MoveSpec::default().with_duration(MIN_DURATION),
        )
        .unwrap();

        let releases = bus
            .take_log()
            .iter()
            .filter(|c| matches!(c, BusCommand::EnableTorque { on: false, .. }))
            .count();
        assert_eq!(releases, 0);
        assert_eq!(bus.torque_on(1), Some(true));
    }

    #[test]
    fn command_failure_propagates() {
        let bus = Arc::new(SimBus::new([1]));
        bus.fail_commands(true);
        let axis = axis_on(&bus);

        let err = axis
            .move_to(
                Position::Pulses(600),
                &MoveSpec::default().with_duration(MIN_DURATION),
            )
            .unwrap_err();
        assert!(matches!(err, BusError::Io(_)));
    }

    #[test]
    fn home_clamps_mid_and_holds() {
        let bus = Arc::new(SimBus::new([1]));
        bus.set_servo_position(1, 123);
        let axis = axis_on(&bus);

        axis.home(5000, MIN_DURATION).unwrap();
        assert_eq!(bus.position(1), Some(1000));
        assert_eq!(bus.torque_on(1), Some(true));
    }

    #[test]
    fn position_reads_in_both_domains() {
        let bus = Arc::new(SimBus::new([1]));
        let axis = axis_on(&bus);

        assert_eq!(axis.read_position(), Some(500));
        assert_eq!(axis.read_position_deg(), Some(120.0));
        assert_eq!(axis.read_position_in(Unit::Pulses), Some(500.0));

        bus.make_unreachable(1);
        assert_eq!(axis.read_position(), None);
        assert_eq!(axis.read_position_deg(), None);
    }

    #[test]
    fn nudge_applies_delta_within_soft_limits() {
        let bus = Arc::new(SimBus::new([1]));
        bus.set_servo_position(1, 880);
        let mut axis = axis_on(&bus);
        axis.set_soft_limits(100, 900);

        axis.nudge(50, MIN_DURATION).unwrap();
        assert_eq!(bus.position(1), Some(900));
    }

    #[test]
    fn firmware_limits_are_normalized_and_persisted() {
        let bus = Arc::new(SimBus::new([1]));
        let axis = axis_on(&bus);

        axis.set_firmware_limits(800, 200).unwrap();
        assert_eq!(
            bus.take_log(),
            vec![BusCommand::SetAngleLimit {
                id: 1,
                min: 200,
                max: 800
            }]
        );
    }

    #[test]
    fn telemetry_fields_fail_independently() {
        let bus = Arc::new(SimBus::new([1]));
        let axis = axis_on(&bus);

        let t = axis.read_telemetry();
        assert_eq!(t.vin_mv, Some(7500));
        assert_eq!(t.temp_c, Some(32));
        assert_eq!(t.torque_on, Some(false));

        bus.make_unreachable(1);
        let t = axis.read_telemetry();
        assert_eq!(t, Telemetry::default());
    }

    #[test]
    fn torque_toggle_failure_is_best_effort() {
        let bus = Arc::new(SimBus::new([1]));
        bus.fail_commands(true);
        let axis = axis_on(&bus);

        assert_eq!(axis.enable_torque(), BestEffort::Failed);
        assert_eq!(axis.stop(), BestEffort::Failed);
        bus.fail_commands(false);
        assert!(axis.enable_torque().applied());
    }
}
