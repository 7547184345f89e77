//! Name Resolution (`spec.md` §4.5).
//!
//! Synchronously resolves an [`Endpoint`] into an [`AddressList`], filtered
//! by the [`Ipv6Policy`]. Built on `std::net::ToSocketAddrs`, which itself
//! performs a blocking `getaddrinfo`-equivalent lookup — this crate adds no
//! DNS client of its own, matching "Synchronously resolves host+port" in
//! `spec.md` §4.5 exactly.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::endpoint::Endpoint;
use crate::settings::Ipv6Policy;

/// An ordered, owned sequence of resolved addresses plus a moving cursor.
/// Addresses are tried strictly sequentially (`spec.md` §1 Non-goals: no
/// happy-eyeballs / parallel attempts).
#[derive(Debug, Clone)]
pub struct AddressList {
    addrs: Vec<SocketAddr>,
    cursor: usize,
}

impl AddressList {
    fn new(addrs: Vec<SocketAddr>) -> Self {
        AddressList { addrs, cursor: 0 }
    }

    /// Builds an `AddressList` from already-resolved addresses, bypassing
    /// [`resolve`]. Used by callers (and this crate's own tests) that obtain
    /// addresses some other way than synchronous `getaddrinfo`, e.g. a
    /// `Rollover` that hands out pre-resolved hosts.
    pub fn from_resolved(addrs: Vec<SocketAddr>) -> Self {
        AddressList::new(addrs)
    }

    /// The address the cursor currently points at, or `None` if exhausted.
    pub fn current(&self) -> Option<SocketAddr> {
        self.addrs.get(self.cursor).copied()
    }

    /// Advances the cursor by one. A no-op past exhaustion.
    pub fn advance(&mut self) {
        if self.cursor < self.addrs.len() {
            self.cursor += 1;
        }
    }

    /// True once the cursor has moved past the last address.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.addrs.len()
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

fn family_allowed(addr: &SocketAddr, policy: Ipv6Policy) -> bool {
    match policy {
        Ipv6Policy::Disabled => addr.is_ipv4(),
        Ipv6Policy::Only => addr.is_ipv6(),
        Ipv6Policy::Allow => true,
    }
}

/// Resolves `endpoint` into an [`AddressList`], applying the address-family
/// filter table from `spec.md` §4.5:
///
/// | `ipv6`     | family filter    |
/// |------------|------------------|
/// | `Disabled` | IPv4 only        |
/// | `Only`      | IPv6 only        |
/// | `Allow`     | both, resolver order |
///
/// On failure the caller is expected to transition its attempt to `Error`
/// with [`crate::error::ConnectError::UnknownHost`] (`spec.md` §4.5).
pub fn resolve(endpoint: &Endpoint, ipv6: Ipv6Policy) -> io::Result<AddressList> {
    let query = format!("{}:{}", endpoint.host(), endpoint.port());
    let resolved = query.to_socket_addrs()?;
    let filtered: Vec<SocketAddr> = resolved
        .filter(|addr| family_allowed(addr, ipv6))
        .collect();
    Ok(AddressList::new(filtered))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> Vec<SocketAddr> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn cursor_advances_to_exhaustion() {
        let mut list = AddressList::new(addrs(&["127.0.0.1:80", "127.0.0.2:80"]));
        assert_eq!(list.current(), Some(addrs(&["127.0.0.1:80"])[0]));
        list.advance();
        assert!(!list.is_exhausted());
        list.advance();
        assert!(list.is_exhausted());
        assert_eq!(list.current(), None);
        // advancing past exhaustion is a no-op, not a panic
        list.advance();
        assert!(list.is_exhausted());
    }

    #[test]
    fn ipv6_disabled_filters_to_ipv4_only() {
        let all = addrs(&["127.0.0.1:80", "[::1]:80"]);
        let filtered: Vec<_> = all
            .into_iter()
            .filter(|a| family_allowed(a, Ipv6Policy::Disabled))
            .collect();
        assert_eq!(filtered, addrs(&["127.0.0.1:80"]));
    }

    #[test]
    fn ipv6_only_filters_to_ipv6_only() {
        let all = addrs(&["127.0.0.1:80", "[::1]:80"]);
        let filtered: Vec<_> = all
            .into_iter()
            .filter(|a| family_allowed(a, Ipv6Policy::Only))
            .collect();
        assert_eq!(filtered, addrs(&["[::1]:80"]));
    }
}
