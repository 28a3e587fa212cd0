//! Servo bus capability trait and error types.
//!
//! This module defines:
//! - `ServoBus` trait - Interface the motion layer commands servos through
//! - `BusError` enum - Error types for bus operations
//!
//! The wire protocol behind the trait (framing, checksums, retries) is the
//! transport collaborator's concern and is not implemented here; the
//! in-tree implementation is the simulation driver in [`crate::sim`].

use std::time::Duration;

use thiserror::Error;

/// Error types for bus operations.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Servo did not answer within the transport's own deadline.
    #[error("servo {0} did not respond")]
    NoResponse(u8),

    /// Transport-level I/O failure.
    #[error("bus I/O error: {0}")]
    Io(String),

    /// Reply arrived but could not be interpreted.
    #[error("malformed response from servo {id}: {detail}")]
    BadResponse { id: u8, detail: String },
}

/// Result alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Interface to the shared servo bus.
///
/// # Contract
///
/// The physical bus is a single-master half-duplex serial channel: only
/// one command or read may be in flight at a time. Implementations MUST
/// serialize concurrent calls internally (the motion layer shares one
/// handle across all axes and never assumes the bus is contention-free).
///
/// Reads may block indefinitely against a disconnected or non-responding
/// id; callers wrap every read in [`crate::guard::bounded_read`].
/// Commands (`set_position`, `enable_torque`, `set_angle_limit`, `stop`)
/// are fire-and-forget at the protocol level: success means the command
/// was written to the wire, not that the motion completed.
pub trait ServoBus: Send + Sync {
    /// Command one timed, batched position move.
    ///
    /// Every `(id, pulse)` pair travels in a single bus frame together
    /// with one shared `duration`; that shared duration is what produces
    /// simultaneous arrival across axes.
    fn set_position(&self, duration: Duration, targets: &[(u8, u16)]) -> BusResult<()>;

    /// Enable or release torque on one servo.
    fn enable_torque(&self, id: u8, on: bool) -> BusResult<()>;

    /// Read the current position [pulses].
    fn read_position(&self, id: u8) -> BusResult<u16>;

    /// Read the supply voltage [mV].
    fn read_vin(&self, id: u8) -> BusResult<u16>;

    /// Read the internal temperature [°C].
    fn read_temperature(&self, id: u8) -> BusResult<u8>;

    /// Read whether torque is currently enabled.
    fn read_torque_state(&self, id: u8) -> BusResult<bool>;

    /// Persist position limits into servo memory.
    ///
    /// This writes through to the device and survives power cycles. Not
    /// a software-side clamp.
    fn set_angle_limit(&self, id: u8, min: u16, max: u16) -> BusResult<()>;

    /// Halt the listed servos in place.
    fn stop(&self, ids: &[u8]) -> BusResult<()>;
}
