//! Protocol context hooks attached to a [`crate::socket::SocketHandle`]
//! (`spec.md` §4.3).
//!
//! These are out-of-scope collaborators (higher-level read/write pipelining,
//! `spec.md` §1): the core only guarantees that [`SocketHandle::shutdown`]
//! drains them in LIFO order before releasing the descriptor.

/// A protocol-layer hook attached to a socket. The core never calls
/// anything on this trait except `on_shutdown`, and only from
/// [`crate::socket::SocketHandle::shutdown`].
pub trait ProtocolContext {
    /// Unique id used by [`crate::socket::SocketHandle::detach_protocol`].
    fn id(&self) -> u64;

    /// Invoked once, in LIFO attachment order, when the owning socket is
    /// torn down.
    fn on_shutdown(&mut self);
}
