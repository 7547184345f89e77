//! Socket Handle (`spec.md` §4.3).
//!
//! Owns exactly one of a readiness-model descriptor or a completion-model
//! descriptor, the endpoint metadata, a back-pointer to the settings, and
//! any attached [`ProtocolContext`]s. Reference-counted via `Rc` so the
//! completion flavor can bridge the window between "submitted" and
//! "completion fires" without introducing a second owner.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::endpoint::Endpoint;
use crate::io::{CompletionDescriptor, IoTable};
use crate::protocol::ProtocolContext;
use crate::settings::Settings;

/// The descriptor a [`SocketHandle`] owns, matching the two I/O flavors in
/// `spec.md` §4.2/§4.3.
pub(crate) enum Descriptor {
    Readiness(Option<i32>),
    Completion(Option<CompletionDescriptor>),
    /// No descriptor allocated yet (before `ensure_descriptor` succeeds).
    None,
}

impl Descriptor {
    pub(crate) fn raw_fd(&self) -> Option<i32> {
        match self {
            Descriptor::Readiness(fd) => *fd,
            _ => None,
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        match self {
            Descriptor::Readiness(fd) => fd.is_some(),
            Descriptor::Completion(cd) => cd.is_some(),
            Descriptor::None => false,
        }
    }
}

pub(crate) struct SocketInner {
    pub(crate) descriptor: Descriptor,
    pub(crate) endpoint: Endpoint,
    pub(crate) settings: Rc<Settings>,
    pub(crate) io: IoTable,
    pub(crate) local_addr: Option<SocketAddr>,
    pub(crate) remote_addr: Option<SocketAddr>,
    protocols: Vec<Box<dyn ProtocolContext>>,
    shutdown_done: bool,
}

/// A reference-counted handle owning a connected (or connecting) socket.
///
/// On success an [`crate::attempt::Attempt`] hands this to the user
/// callback, which becomes responsible for the final drop; on failure the
/// attempt drops its own reference during teardown (`spec.md` §4.3:
/// "Ownership").
#[derive(Clone)]
pub struct SocketHandle {
    inner: Rc<RefCell<SocketInner>>,
    // Not `Send`/`Sync`: a socket never crosses the owning I/O thread
    // (`spec.md` §5, "Scheduling model").
    _not_send_sync: PhantomData<Rc<()>>,
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("SocketHandle")
            .field("endpoint", &inner.endpoint)
            .field("bound", &inner.descriptor.is_bound())
            .finish()
    }
}

impl SocketHandle {
    pub(crate) fn new(endpoint: Endpoint, settings: Rc<Settings>, io: IoTable) -> SocketHandle {
        SocketHandle {
            inner: Rc::new(RefCell::new(SocketInner {
                descriptor: Descriptor::None,
                endpoint,
                settings,
                io,
                local_addr: None,
                remote_addr: None,
                protocols: Vec::new(),
                shutdown_done: false,
            })),
            _not_send_sync: PhantomData,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.inner.borrow().endpoint.clone()
    }

    /// The log-line prefix every event in `spec.md` §6 is required to carry:
    /// `<host:port> (SOCK=<ptr>)`.
    pub(crate) fn log_prefix(&self) -> String {
        format!("<{}> (SOCK={:p}) ", self.endpoint(), Rc::as_ptr(&self.inner))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.borrow().local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.borrow().remote_addr
    }

    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&mut SocketInner) -> R) -> R {
        f(&mut self.inner.borrow_mut())
    }

    /// Attaches a protocol context; drained LIFO by [`SocketHandle::shutdown`].
    pub fn attach_protocol(&self, ctx: Box<dyn ProtocolContext>) {
        self.inner.borrow_mut().protocols.push(ctx);
    }

    /// Detaches (without running `on_shutdown`) the protocol context with
    /// the given id, if attached.
    pub fn detach_protocol(&self, id: u64) -> Option<Box<dyn ProtocolContext>> {
        let mut inner = self.inner.borrow_mut();
        let pos = inner.protocols.iter().position(|p| p.id() == id)?;
        Some(inner.protocols.remove(pos))
    }

    /// Fills in local/remote address strings. Called once after a
    /// successful connect (`spec.md` §4.3).
    pub(crate) fn load_socknames(&self) {
        let mut inner = self.inner.borrow_mut();
        if let Descriptor::Readiness(Some(fd)) = inner.descriptor {
            let (local, remote) = crate::io::sys::socknames_of(fd);
            inner.local_addr = local;
            inner.remote_addr = remote;
        }
        // Completion-model sockets load their addresses from the
        // `CompletionDescriptor` captured at submission time; see
        // `io::sys::windows`.
    }

    /// Detaches protocol contexts (LIFO), closes the descriptor through the
    /// owning I/O flavor, and marks the descriptor field invalid. Idempotent
    /// (`spec.md` §4.3).
    pub fn shutdown(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.shutdown_done {
            return;
        }
        while let Some(mut ctx) = inner.protocols.pop() {
            ctx.on_shutdown();
        }
        match &mut inner.descriptor {
            Descriptor::Readiness(fd @ Some(_)) => {
                if let IoTable::Readiness(ops) = &inner.io {
                    ops.close(fd.unwrap());
                }
                *fd = None;
            }
            Descriptor::Completion(cd @ Some(_)) => {
                if let IoTable::Completion(ops) = &inner.io {
                    ops.close(cd.take().unwrap());
                }
            }
            _ => {}
        }
        inner.shutdown_done = true;
    }
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        // Guards against a leaked/forgotten explicit `shutdown()` call: the
        // descriptor must never outlive the last strong reference
        // (`spec.md` §4.3: "destroyed when reference count reaches zero AND
        // shutdown has been called").
        if !self.shutdown_done {
            while let Some(mut ctx) = self.protocols.pop() {
                ctx.on_shutdown();
            }
            match &mut self.descriptor {
                Descriptor::Readiness(Some(fd)) => {
                    if let IoTable::Readiness(ops) = &self.io {
                        ops.close(*fd);
                    }
                }
                Descriptor::Completion(cd) => {
                    if let (IoTable::Completion(ops), Some(cd)) = (&self.io, cd.take()) {
                        ops.close(cd);
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::fake::FakeReadiness;

    #[test]
    fn shutdown_is_idempotent() {
        let settings = Settings::new(crate::settings::Ipv6Policy::Allow, false);
        let io = IoTable::Readiness(Rc::new(FakeReadiness::new()));
        let handle = SocketHandle::new(
            Endpoint::new("localhost", "80").unwrap(),
            settings,
            io,
        );
        handle.shutdown();
        handle.shutdown();
    }

    #[test]
    fn protocol_contexts_drain_in_lifo_order() {
        struct Recorder(u64, Rc<RefCell<Vec<u64>>>);
        impl ProtocolContext for Recorder {
            fn id(&self) -> u64 {
                self.0
            }
            fn on_shutdown(&mut self) {
                self.1.borrow_mut().push(self.0);
            }
        }

        let order = Rc::new(RefCell::new(Vec::new()));
        let settings = Settings::new(crate::settings::Ipv6Policy::Allow, false);
        let io = IoTable::Readiness(Rc::new(FakeReadiness::new()));
        let handle = SocketHandle::new(Endpoint::new("localhost", "80").unwrap(), settings, io);
        handle.attach_protocol(Box::new(Recorder(1, order.clone())));
        handle.attach_protocol(Box::new(Recorder(2, order.clone())));
        handle.attach_protocol(Box::new(Recorder(3, order.clone())));

        handle.shutdown();

        assert_eq!(*order.borrow(), vec![3, 2, 1]);
    }
}
