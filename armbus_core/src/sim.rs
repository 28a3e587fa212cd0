//! Simulation bus driver.
//!
//! In-memory [`ServoBus`] implementation used by the test suite and the
//! `armbus` dry-run harness. Holds per-servo state behind a mutex (the
//! real bus is single-master; the mutex is the serialization boundary
//! here), records every command in arrival order for later inspection,
//! and supports fault injection:
//!
//! - **unreachable** ids fail reads immediately with `NoResponse`
//! - **stalled** ids delay reads past any reasonable timeout, exercising
//!   the guarded-read abandonment path
//! - **command failure** makes every command return an I/O error
//!
//! `set_position` applies targets immediately. Travel time is modeled by
//! the motion layer's own wait, which owns the clock for move completion.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use tracing::trace;

use crate::bus::{BusError, BusResult, ServoBus};

/// Simulated state of one servo.
#[derive(Debug, Clone)]
pub struct SimServo {
    /// Current position [pulses].
    pub position: u16,
    /// Torque enabled?
    pub torque_on: bool,
    /// Supply voltage [mV].
    pub vin_mv: u16,
    /// Internal temperature [°C].
    pub temp_c: u8,
}

impl Default for SimServo {
    fn default() -> Self {
        Self {
            position: 500,
            torque_on: false,
            vin_mv: 7500,
            temp_c: 32,
        }
    }
}

/// One recorded bus command, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCommand {
    SetPosition {
        duration: Duration,
        targets: Vec<(u8, u16)>,
    },
    EnableTorque {
        id: u8,
        on: bool,
    },
    SetAngleLimit {
        id: u8,
        min: u16,
        max: u16,
    },
    Stop {
        ids: Vec<u8>,
    },
}

#[derive(Debug, Default)]
struct SimInner {
    servos: HashMap<u8, SimServo>,
    log: Vec<BusCommand>,
    unreachable: HashSet<u8>,
    stalled: HashMap<u8, Duration>,
    fail_commands: bool,
}

/// In-memory servo bus.
#[derive(Debug, Default)]
pub struct SimBus {
    inner: Mutex<SimInner>,
}

impl SimBus {
    /// Create a bus with the given servo ids, each at mid position.
    pub fn new(ids: impl IntoIterator<Item = u8>) -> Self {
        let servos = ids
            .into_iter()
            .map(|id| (id, SimServo::default()))
            .collect();
        Self {
            inner: Mutex::new(SimInner {
                servos,
                ..SimInner::default()
            }),
        }
    }

    /// Create a bus with explicit starting positions.
    pub fn with_positions(pairs: impl IntoIterator<Item = (u8, u16)>) -> Self {
        let servos = pairs
            .into_iter()
            .map(|(id, position)| {
                (
                    id,
                    SimServo {
                        position,
                        ..SimServo::default()
                    },
                )
            })
            .collect();
        Self {
            inner: Mutex::new(SimInner {
                servos,
                ..SimInner::default()
            }),
        }
    }

    /// Overwrite one servo's position (test setup).
    pub fn set_servo_position(&self, id: u8, position: u16) {
        if let Some(servo) = self.lock().servos.get_mut(&id) {
            servo.position = position;
        }
    }

    /// Current position of one servo, if it exists.
    pub fn position(&self, id: u8) -> Option<u16> {
        self.lock().servos.get(&id).map(|s| s.position)
    }

    /// Torque state of one servo, if it exists.
    pub fn torque_on(&self, id: u8) -> Option<bool> {
        self.lock().servos.get(&id).map(|s| s.torque_on)
    }

    /// Make reads against `id` fail immediately.
    pub fn make_unreachable(&self, id: u8) {
        self.lock().unreachable.insert(id);
    }

    /// Make reads against `id` block for `delay` before answering.
    pub fn stall(&self, id: u8, delay: Duration) {
        self.lock().stalled.insert(id, delay);
    }

    /// Make every subsequent command fail with an I/O error.
    pub fn fail_commands(&self, fail: bool) {
        self.lock().fail_commands = fail;
    }

    /// Drain the recorded command log.
    pub fn take_log(&self) -> Vec<BusCommand> {
        std::mem::take(&mut self.lock().log)
    }

    /// Number of `set_position` commands seen so far.
    pub fn set_position_count(&self) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|c| matches!(c, BusCommand::SetPosition { .. }))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimInner> {
        // Sim state is plain data; a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply fault injection for a read against `id`.
    ///
    /// The stall sleep happens without the lock held so an abandoned
    /// worker cannot wedge the whole bus.
    fn read_gate(&self, id: u8) -> BusResult<()> {
        let (stall, unreachable) = {
            let inner = self.lock();
            (
                inner.stalled.get(&id).copied(),
                inner.unreachable.contains(&id),
            )
        };
        if let Some(delay) = stall {
            trace!(id, ?delay, "sim read stalled");
            thread::sleep(delay);
        }
        if unreachable {
            return Err(BusError::NoResponse(id));
        }
        Ok(())
    }

    fn command_gate(&self) -> BusResult<()> {
        if self.lock().fail_commands {
            return Err(BusError::Io("injected command failure".to_string()));
        }
        Ok(())
    }

    fn read_servo<T>(&self, id: u8, f: impl FnOnce(&SimServo) -> T) -> BusResult<T> {
        self.read_gate(id)?;
        self.lock()
            .servos
            .get(&id)
            .map(f)
            .ok_or(BusError::NoResponse(id))
    }
}

impl ServoBus for SimBus {
    fn set_position(&self, duration: Duration, targets: &[(u8, u16)]) -> BusResult<()> {
        self.command_gate()?;
        let mut inner = self.lock();
        inner.log.push(BusCommand::SetPosition {
            duration,
            targets: targets.to_vec(),
        });
        for &(id, pulse) in targets {
            if let Some(servo) = inner.servos.get_mut(&id) {
                trace!(id, pulse, ?duration, "sim move");
                servo.position = pulse;
            }
        }
        Ok(())
    }

    fn enable_torque(&self, id: u8, on: bool) -> BusResult<()> {
        self.command_gate()?;
        let mut inner = self.lock();
        inner.log.push(BusCommand::EnableTorque { id, on });
        if let Some(servo) = inner.servos.get_mut(&id) {
            servo.torque_on = on;
        }
        Ok(())
    }

    fn read_position(&self, id: u8) -> BusResult<u16> {
        self.read_servo(id, |s| s.position)
    }

    fn read_vin(&self, id: u8) -> BusResult<u16> {
        self.read_servo(id, |s| s.vin_mv)
    }

    fn read_temperature(&self, id: u8) -> BusResult<u8> {
        self.read_servo(id, |s| s.temp_c)
    }

    fn read_torque_state(&self, id: u8) -> BusResult<bool> {
        self.read_servo(id, |s| s.torque_on)
    }

    fn set_angle_limit(&self, id: u8, min: u16, max: u16) -> BusResult<()> {
        self.command_gate()?;
        self.lock()
            .log
            .push(BusCommand::SetAngleLimit { id, min, max });
        Ok(())
    }

    fn stop(&self, ids: &[u8]) -> BusResult<()> {
        self.command_gate()?;
        self.lock().log.push(BusCommand::Stop { ids: ids.to_vec() });
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
