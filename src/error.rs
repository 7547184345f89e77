//! Error Translator (`spec.md` §4.1).
//!
//! Maps a raw OS error number to one of a small set of connect-status
//! categories, and separately to the public [`ConnectError`] taxonomy
//! surfaced to the user callback (`spec.md` §7).

use crate::settings::Settings;

/// Outcome of classifying a single `connect(2)`/`getsockopt(SO_ERROR)`
/// result. Mirrors `lcbio_CSERR` in the original C++ source
/// (`original_source/src/lcbio/connect.cc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// Interrupted system call; retry the same address, no cursor advance.
    Intr,
    /// Already connected / connection success.
    Connected,
    /// Would block / in progress; caller should register a writability
    /// watch (readiness flavor) or await the completion callback.
    Busy,
    /// Invalid argument; retried exactly once on the same address, then
    /// demoted to `EFail`.
    EInval,
    /// Anything else: close the descriptor, advance to the next address.
    EFail,
}

/// Classifies a raw OS errno into a [`ConnectStatus`].
///
/// Policy (`spec.md` §4.1):
/// - `EINTR` -> [`ConnectStatus::Intr`]
/// - `EISCONN` -> [`ConnectStatus::Connected`]
/// - `EINPROGRESS` / `EALREADY` / `EWOULDBLOCK` -> [`ConnectStatus::Busy`]
/// - `EINVAL` -> [`ConnectStatus::EInval`]
/// - anything else -> [`ConnectStatus::EFail`]
#[cfg(unix)]
pub fn classify(os_errno: i32) -> ConnectStatus {
    match os_errno {
        libc::EINTR => ConnectStatus::Intr,
        libc::EISCONN => ConnectStatus::Connected,
        libc::EINPROGRESS | libc::EALREADY | libc::EWOULDBLOCK => ConnectStatus::Busy,
        libc::EINVAL => ConnectStatus::EInval,
        _ => ConnectStatus::EFail,
    }
}

#[cfg(not(unix))]
pub fn classify(os_errno: i32) -> ConnectStatus {
    // Windows error codes (WSAEINTR, WSAEISCONN, WSAEWOULDBLOCK, ...) share
    // the same numeric space as the `windows-sys` `WSA*` constants; the
    // completion backend under `io::sys::windows` never calls this (it has
    // no "would block" concept), so a conservative EFail default is safe
    // here and only readiness-style synchronous submission failures reach
    // this path on Windows.
    match os_errno as u32 {
        10004 /* WSAEINTR */ => ConnectStatus::Intr,
        10056 /* WSAEISCONN */ => ConnectStatus::Connected,
        10036 | 10037 /* WSAEWOULDBLOCK, WSAEALREADY */ => ConnectStatus::Busy,
        10022 /* WSAEINVAL */ => ConnectStatus::EInval,
        _ => ConnectStatus::EFail,
    }
}

/// Public error taxonomy delivered to the user callback (`spec.md` §7).
///
/// `Cancelled` is never constructed by [`to_library_error`] and never
/// delivered to a user callback (`handler()` skips the callback entirely for
/// a cancelled attempt); it exists so the crate's own tests can express "no
/// callback happened" without reaching for `Option<ConnectError>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("name resolution failed for the requested host")]
    UnknownHost,
    #[error("all resolved addresses were exhausted without a successful connect")]
    ConnectError,
    #[error("connection attempt timed out")]
    ETimedOut,
    #[error("network unreachable or connection refused")]
    NetworkError,
    #[error("connection attempt was cancelled")]
    Cancelled,
}

/// Network-unreachable-shaped errnos that get the more specific
/// [`ConnectError::NetworkError`] instead of the generic
/// [`ConnectError::ConnectError`] (`spec.md` §7: "a specific translated
/// subclass of `CONNECT_ERROR`").
///
/// Deliberately narrower than the full prose list in `spec.md` §7 (which
/// also names "connection-refused"): `spec.md` §8 scenario 4 (two addresses,
/// both `ECONNREFUSED`) expects the plain `CONNECT_ERROR` category, so
/// `ECONNREFUSED` is classified as a generic connect failure here and only
/// host/network-unreachable errnos get the specific subclass.
#[cfg(unix)]
fn is_network_unreachable(os_errno: i32) -> bool {
    matches!(os_errno, libc::ENETUNREACH | libc::EHOSTUNREACH)
}

#[cfg(not(unix))]
fn is_network_unreachable(os_errno: i32) -> bool {
    matches!(os_errno as u32, 10051 | 10065)
}

/// Translates a raw OS errno observed while exhausting the address list (or
/// resolving) into the public [`ConnectError`] the user callback sees.
pub fn to_library_error(os_errno: i32, _settings: &Settings) -> ConnectError {
    if is_network_unreachable(os_errno) {
        ConnectError::NetworkError
    } else {
        ConnectError::ConnectError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn classifies_standard_errnos() {
        assert_eq!(classify(libc::EINTR), ConnectStatus::Intr);
        assert_eq!(classify(libc::EISCONN), ConnectStatus::Connected);
        assert_eq!(classify(libc::EINPROGRESS), ConnectStatus::Busy);
        assert_eq!(classify(libc::EALREADY), ConnectStatus::Busy);
        assert_eq!(classify(libc::EINVAL), ConnectStatus::EInval);
        assert_eq!(classify(libc::ECONNREFUSED), ConnectStatus::EFail);
    }

    #[cfg(unix)]
    #[test]
    fn translates_network_unreachable_subclass() {
        let settings = Settings::default();
        assert_eq!(
            to_library_error(libc::ENETUNREACH, &settings),
            ConnectError::NetworkError
        );
        assert_eq!(
            to_library_error(libc::ECONNREFUSED, &settings),
            ConnectError::ConnectError
        );
        assert_eq!(
            to_library_error(libc::EACCES, &settings),
            ConnectError::ConnectError
        );
    }
}
