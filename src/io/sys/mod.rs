//! Concrete, OS-backed implementations of the [`super::ReadinessOps`] and
//! [`super::CompletionOps`] traits.
//!
//! Grounded in `tokio-rs-mio`'s own split: a readiness selector built
//! straight on `libc` (`sys/unix/selector/epoll.rs`, `sys/unix/tcp/stream.rs`)
//! and, for platforms without epoll/kqueue, a shell module that reports
//! "unsupported" (`sys/shell`). The completion flavor is Windows-only
//! (IOCP), following the historical shape of mio's own `sys/windows`
//! backend, which is itself a completion-port wrapper underneath mio's
//! readiness-shaped public API.

#[cfg(all(unix, feature = "io-readiness"))]
pub mod unix;
#[cfg(all(windows, feature = "io-completion"))]
pub mod windows;

#[cfg(not(all(unix, feature = "io-readiness")))]
pub mod unix_shell;
#[cfg(not(all(windows, feature = "io-completion")))]
pub mod windows_shell;

#[cfg(all(unix, feature = "io-readiness"))]
pub use self::unix::SysReadiness;
#[cfg(not(all(unix, feature = "io-readiness")))]
pub use self::unix_shell::SysReadiness;

#[cfg(all(windows, feature = "io-completion"))]
pub use self::windows::SysCompletion;
#[cfg(not(all(windows, feature = "io-completion")))]
pub use self::windows_shell::SysCompletion;

use std::net::SocketAddr;

/// Fills in the local/remote [`SocketAddr`] for a connected readiness-model
/// descriptor (`spec.md` §4.3: `load_socknames`). Used by
/// [`crate::socket::SocketHandle::load_socknames`].
#[cfg(all(unix, feature = "io-readiness"))]
pub fn socknames_of(fd: i32) -> (Option<SocketAddr>, Option<SocketAddr>) {
    unix::socknames_of(fd)
}

#[cfg(not(all(unix, feature = "io-readiness")))]
pub fn socknames_of(_fd: i32) -> (Option<SocketAddr>, Option<SocketAddr>) {
    (None, None)
}
