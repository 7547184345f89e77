//! Read-only, reference-counted configuration (`spec.md` §6: "Settings
//! contract").
//!
//! Consumed read-only by every other module; the core never mutates a
//! [`Settings`] once constructed, matching the "Shared-resource policy" of
//! `spec.md` §5.

use std::rc::Rc;

/// IPv4/IPv6 address-family policy applied during name resolution
/// (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ipv6Policy {
    /// Resolve IPv4 addresses only.
    Disabled,
    /// Resolve IPv6 addresses only.
    Only,
    /// Resolve both, in resolver order (the default).
    #[default]
    Allow,
}

/// Read-only settings shared across every in-flight attempt on an I/O
/// thread. Construct once, wrap in `Rc`, and clone the `Rc` into each
/// [`crate::attempt::Attempt`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub ipv6: Ipv6Policy,
    /// Whether a successfully connected socket should have `TCP_NODELAY`
    /// (Nagle disabled) applied by `handler()` (`spec.md` §4.6).
    pub tcp_nodelay: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            ipv6: Ipv6Policy::default(),
            tcp_nodelay: false,
        }
    }
}

impl Settings {
    pub fn new(ipv6: Ipv6Policy, tcp_nodelay: bool) -> Rc<Settings> {
        Rc::new(Settings { ipv6, tcp_nodelay })
    }
}
