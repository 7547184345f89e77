//! I/O Abstraction (`spec.md` §4.2).
//!
//! Two variants behind one dispatch tag, modeled as a sum type rather than a
//! single virtualized interface — their suspension points differ (REDESIGN
//! FLAG, `spec.md` §9) so collapsing them into one trait would hide that
//! difference instead of expressing it.

pub mod fake;
pub mod sys;

use std::net::SocketAddr;
use std::rc::Rc;

use crate::reactor::Token;

/// Capability a readiness backend gives the attempt to observe a
/// writability callback (`spec.md` §4.2 `watch`). Implemented by
/// `attempt::readiness`'s internal waker adapter; kept as a trait (not a
/// bare function pointer) per the REDESIGN FLAG in `spec.md` §9 ("raw
/// callback-with-void-pointer user data" -> "object implementing a
/// single-method capability").
pub trait ReadinessWaker {
    fn wake(&self, fd: i32, error_event: bool);
}

/// Readiness-flavor I/O table capabilities (`spec.md` §4.2, §6).
///
/// A real implementation lives in [`sys::unix`] (epoll/kqueue via `libc`,
/// gated behind the `io-readiness` feature); [`fake::FakeReadiness`] is a
/// scriptable test double used throughout `tests/scenarios.rs`.
pub trait ReadinessOps {
    /// Creates a non-blocking socket for `addr`'s family. Returns the raw
    /// descriptor.
    fn create_descriptor(&self, addr: SocketAddr) -> std::io::Result<i32>;
    /// Issues a non-blocking `connect(2)`. `Ok(())` means connected
    /// synchronously; an `Err` carries the raw errno via
    /// [`std::io::Error::raw_os_error`], to be run through
    /// [`crate::error::classify`].
    fn connect_nonblocking(&self, fd: i32, addr: SocketAddr) -> std::io::Result<()>;
    /// Registers a writability watch. At most one per descriptor at a time
    /// (`spec.md` §3 invariants).
    fn watch(&self, fd: i32, token: Token, waker: Rc<dyn ReadinessWaker>);
    /// Cancels a previously registered watch. A no-op if none is pending.
    fn cancel_watch(&self, fd: i32);
    /// Destroys the event/watch token pre-created at attempt construction
    /// (`spec.md` §4.6 step 2).
    fn destroy_event(&self, token: Token);
    fn close(&self, fd: i32);
    /// The errno observed after the most recent failed call on this table.
    fn current_errno(&self) -> i32;
}

/// An opaque completion-model descriptor. On Windows this wraps a `SOCKET`
/// bound to an I/O completion port plus the `OVERLAPPED` bookkeeping the
/// backend needs to correlate a completion with its submission
/// (`io::sys::windows`); the fake backend in tests uses a plain integer id.
#[derive(Debug)]
pub struct CompletionDescriptor {
    pub(crate) id: u64,
    pub(crate) local: Option<SocketAddr>,
    pub(crate) remote: Option<SocketAddr>,
}

/// Capability a completion backend gives the attempt to observe the result
/// of a submitted connect (`spec.md` §4.2 `connect_submit`'s
/// `completion_cb`). `status == 0` means success; anything else is a raw
/// errno to classify.
pub trait CompletionWaker {
    fn complete(&self, status: i32);
}

/// Completion-flavor I/O table capabilities (`spec.md` §4.2, §6).
pub trait CompletionOps {
    fn create_descriptor(&self, addr: SocketAddr) -> std::io::Result<CompletionDescriptor>;
    /// Submits a connect. `Ok(())` means the operation was submitted and the
    /// attempt must await `waker`; a synchronous failure is surfaced as
    /// `Err` and must be classified via
    /// [`current_errno`](CompletionOps::current_errno).
    fn connect_submit(
        &self,
        desc: &CompletionDescriptor,
        addr: SocketAddr,
        waker: Rc<dyn CompletionWaker>,
    ) -> std::io::Result<()>;
    fn close(&self, desc: CompletionDescriptor);
    fn current_errno(&self) -> i32;
}

/// The dispatch tag selecting which I/O flavor an [`crate::attempt::Attempt`]
/// drives (`spec.md` §4.2, §9 design note).
#[derive(Clone)]
pub enum IoTable {
    Readiness(Rc<dyn ReadinessOps>),
    Completion(Rc<dyn CompletionOps>),
}

impl IoTable {
    pub fn is_readiness(&self) -> bool {
        matches!(self, IoTable::Readiness(_))
    }

    pub fn is_completion(&self) -> bool {
        matches!(self, IoTable::Completion(_))
    }
}
