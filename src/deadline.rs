//! Cancellation signal for the operations that may block.
//!
//! Outbound direct exchanges and store calls accept a `Deadline`. An operation checks it before
//! it starts mutating anything, so an elapsed deadline never leaves a half-written nonce or
//! association behind.
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Point in time after which blocking work must not start anymore.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline at all.
    pub fn none() -> Self {
        Deadline(None)
    }

    /// Expires `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now().checked_add(timeout))
    }

    /// Expires at the given instant.
    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    /// Time left, or `None` when unbounded. Saturates at zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|end| end.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has already passed.
    pub fn is_elapsed(&self) -> bool {
        match self.0 {
            Some(end) => Instant::now() >= end,
            None => false,
        }
    }

    /// Fail with `Error::Cancelled` when the deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.is_elapsed() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The earlier of this deadline and one `timeout` from now.
    pub fn bounded_by(&self, timeout: Duration) -> Self {
        let other = Deadline::after(timeout);
        match (self.0, other.0) {
            (Some(a), Some(b)) => Deadline(Some(a.min(b))),
            (Some(a), None) => Deadline(Some(a)),
            (None, b) => Deadline(b),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::none()
    }
}
