//! Deadlines for blocking teardown.
//!
//! SDK provider shutdowns flush buffered data and may block on the network.
//! [`run_bounded`] runs such a call on a helper thread and waits for it no
//! longer than the caller allows; an expired deadline returns promptly with
//! [`ComponentError::DeadlineExceeded`] while the shutdown finishes in the
//! background.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ComponentError;

/// Point in time after which teardown must stop waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// A deadline that has already passed.
    pub fn expired() -> Self {
        Self { at: Instant::now() }
    }

    /// Time left, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// `Err(DeadlineExceeded)` once the deadline has passed.
    pub fn check(&self) -> Result<(), ComponentError> {
        if self.is_expired() {
            Err(ComponentError::DeadlineExceeded(Duration::ZERO))
        } else {
            Ok(())
        }
    }
}

/// Run `f` on a named helper thread and wait at most `timeout` for its result.
pub(crate) fn run_bounded<T, F>(name: &str, timeout: Duration, f: F) -> Result<T, ComponentError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name(format!("otel-{name}"))
        .spawn(move || {
            // The receiver is gone if the caller already gave up.
            let _ = tx.send(f());
        })
        .map_err(|e| ComponentError::Worker(e.to_string()))?;

    if timeout.is_zero() {
        return Err(ComponentError::DeadlineExceeded(timeout));
    }
    match rx.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(ComponentError::DeadlineExceeded(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(ComponentError::Worker(format!(
            "{name} worker exited without a result"
        ))),
    }
}
