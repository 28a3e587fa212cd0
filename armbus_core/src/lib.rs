//! # armbus Core Library
//!
//! Motion-synchronization and servo-abstraction layer for a multi-axis
//! bus-servo arm on a shared half-duplex serial bus. Given a set of named
//! target positions, it computes a single batched move command that brings
//! every axis to its target at approximately the same time, clamped to
//! per-axis soft limits, with torque either held or released on arrival.
//!
//! ## Architecture Levels
//!
//! 1. **[`bus::ServoBus`]** — capability trait over the physical bus;
//!    real transports live out of tree, [`sim::SimBus`] ships for tests
//!    and dry runs
//! 2. **[`guard`]** — bounded-wait wrapper; every bus read goes through it
//!    because a read against a disconnected servo may never return
//! 3. **[`axis::Axis`]** — one servo: unit conversion, soft limits,
//!    torque, guarded reads, timed single-axis moves
//! 4. **[`manager::ArmManager`]** — named axis collection and the
//!    synchronized batch-move operation
//!
//! ## Timing Model
//!
//! The bus protocol is fire-and-forget: a move command names a duration
//! and the servos execute it open-loop. This layer owns the wait: it
//! sleeps out the commanded duration plus a settle margin, with no
//! hardware acknowledgment of arrival.

pub mod axis;
pub mod bus;
pub mod guard;
pub mod manager;
pub mod sim;

pub use axis::{Axis, BestEffort, MoveSpec, Telemetry};
pub use bus::{BusError, BusResult, ServoBus};
pub use guard::bounded_read;
pub use manager::{ArmManager, MotionError};
pub use sim::SimBus;
