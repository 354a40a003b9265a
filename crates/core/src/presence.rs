// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Counterpart composing indicator.
//!
//! This type holds no timers. [`PresenceSignal::set_active`] returns a
//! [`Countdown`] that the owner arms; when it fires the owner calls
//! [`PresenceSignal::expire`] with the countdown's epoch. Each activation
//! bumps the epoch, so a restarted countdown makes every older one stale.

use std::time::{Duration, Instant};

use crate::message::Sender;

/// How long the indicator stays on without a refresh.
pub const DEFAULT_PRESENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Observable presence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Presence {
    pub active: bool,
    pub actor: Option<Sender>,
    pub expires_at: Option<Instant>,
}

/// A countdown the owner must arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub epoch: u64,
    pub duration: Duration,
}

#[derive(Debug)]
pub struct PresenceSignal {
    state: Presence,
    timeout: Duration,
    epoch: u64,
}

impl Default for PresenceSignal {
    fn default() -> Self {
        Self::new(DEFAULT_PRESENCE_TIMEOUT)
    }
}

impl PresenceSignal {
    pub fn new(timeout: Duration) -> Self {
        PresenceSignal {
            state: Presence::default(),
            timeout,
            epoch: 0,
        }
    }

    pub fn state(&self) -> Presence {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    /// Marks `actor` as composing and restarts the countdown.
    ///
    /// Returns `None` if the actor is not the counterpart.
    pub fn set_active(&mut self, actor: Sender, now: Instant) -> Option<Countdown> {
        if actor != Sender::Counterpart {
            return None;
        }
        self.epoch += 1;
        self.state = Presence {
            active: true,
            actor: Some(actor),
            expires_at: Some(now + self.timeout),
        };
        Some(Countdown {
            epoch: self.epoch,
            duration: self.timeout,
        })
    }

    /// Clears the indicator and invalidates any outstanding countdown.
    /// Returns true if it was active.
    pub fn clear(&mut self) -> bool {
        self.epoch += 1;
        let was_active = self.state.active;
        self.state = Presence::default();
        was_active
    }

    /// Called when a countdown fires. Clears only if `epoch` is current.
    pub fn expire(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch || !self.state.active {
            return false;
        }
        self.state = Presence::default();
        true
    }
}

#[cfg(test)]
#[path = "presence_tests.rs"]
mod tests;
