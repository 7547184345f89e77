//! Timer (`spec.md` §4.4).
//!
//! A one-shot timer bound to an attempt; fires `handler()` on expiry and
//! doubles as the deferred-dispatch mechanism that posts a state transition
//! back onto the I/O thread (`Timer::signal`). Backed by
//! [`crate::reactor::Reactor`]'s timer wheel.

use std::time::Duration;

use crate::reactor::{Reactor, Token};

/// Handle to a single timer slot registered with a [`Reactor`].
///
/// `release()` must be called by the owner's destructor (`spec.md` §4.4);
/// `Timer`'s own `Drop` impl does this automatically so a forgotten
/// explicit call can't leak a firing callback.
pub struct Timer {
    reactor: Reactor,
    token: Token,
    released: bool,
}

impl Timer {
    /// Registers `on_fire` with `reactor` under a freshly allocated token.
    /// The timer starts disarmed; call [`Timer::arm`] or [`Timer::signal`].
    pub fn new(reactor: Reactor, on_fire: Box<dyn FnMut()>) -> Timer {
        let token = reactor.create_token();
        reactor.register_timer(token, on_fire);
        Timer {
            reactor,
            token,
            released: false,
        }
    }

    /// Schedules `handler()` after `duration`. Replaces any prior arming.
    pub fn arm(&self, duration: Duration) {
        self.reactor.arm(self.token, duration);
    }

    /// Schedules `handler()` to run on the next reactor turn — unwinds the
    /// current stack first, never runs synchronously.
    pub fn signal(&self) {
        self.reactor.signal(self.token);
    }

    /// Cancels any pending fire. Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            self.reactor.release(self.token);
            self.released = true;
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.release();
    }
}
