//! Bounded-wait wrapper for blocking bus reads.
//!
//! A read against a disconnected servo, or a bus busy with another
//! master's traffic, may never return. Every read in the system goes
//! through [`bounded_read`], which runs the operation on a worker thread
//! and gives up after a wall-clock timeout. Timeouts are advisory
//! abandonment, not cancellation: a blocked I/O call cannot be safely
//! preempted, so the worker is detached and its late result discarded.

use std::fmt::Display;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

/// Run a blocking read with an upper bound on wall-clock wait.
///
/// Returns `Some(value)` if `op` completes successfully within `timeout`.
/// Returns `None` (never an error, never a hang) when the operation
/// times out, fails, or panics. The caller always proceeds; unavailable
/// is an expected state on this bus, not a fault.
pub fn bounded_read<T, E, F>(op: F, timeout: Duration) -> Option<T>
where
    T: Send + 'static,
    E: Display + Send + 'static,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let spawned = thread::Builder::new()
        .name("armbus-read".to_string())
        .spawn(move || {
            // Receiver may be gone by the time the read returns.
            let _ = tx.send(op());
        });
    if let Err(e) = spawned {
        warn!("failed to spawn read worker: {e}");
        return None;
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            debug!("guarded read failed: {e}");
            None
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            debug!("guarded read abandoned after {timeout:?}");
            None
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            // Worker died without sending; treat like any other failure.
            debug!("guarded read worker died");
            None
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn fast_read_passes_through() {
        let result = bounded_read(
            || Ok::<_, String>(512u16),
            Duration::from_millis(100),
        );
        assert_eq!(result, Some(512));
    }

    #[test]
    fn failed_read_is_none() {
        let result = bounded_read(
            || Err::<u16, _>("no reply".to_string()),
            Duration::from_millis(100),
        );
        assert_eq!(result, None);
    }

    #[test]
    fn panicking_read_is_none() {
        let result = bounded_read(
            || -> Result<u16, String> { panic!("wire fell out") },
            Duration::from_millis(100),
        );
        assert_eq!(result, None);
    }

    #[test]
    fn slow_read_times_out_promptly() {
        let start = Instant::now();
        let result = bounded_read(
            || {
                thread::sleep(Duration::from_millis(300));
                Ok::<_, String>(512u16)
            },
            Duration::from_millis(30),
        );
        assert_eq!(result, None);
        assert!(
            start.elapsed() < Duration::from_millis(200),
            "caller blocked past the timeout"
        );
    }

    #[test]
    fn abandoned_worker_finishes_in_background() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let result = bounded_read(
            move || {
                thread::sleep(Duration::from_millis(80));
                flag.store(true, Ordering::SeqCst);
                Ok::<_, String>(1u16)
            },
            Duration::from_millis(20),
        );
        assert_eq!(result, None);
        assert!(!finished.load(Ordering::SeqCst));

        // The worker was abandoned, not cancelled; it completes later
        // and its result goes nowhere.
        thread::sleep(Duration::from_millis(150));
        assert!(finished.load(Ordering::SeqCst));
    }
}
