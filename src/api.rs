//! External Interfaces (`spec.md` §6).
//!
//! The only module callers outside this crate are expected to use directly;
//! everything else is assembled here from the pieces in [`crate::attempt`],
//! [`crate::io`], [`crate::resolve`] and [`crate::socket`].

use std::rc::Rc;
use std::time::Duration;

use crate::attempt::{
    completion, readiness, Attempt, AttemptHandle, Backend, CompletionBackend, ReadinessBackend,
    UserCallback,
};
use crate::endpoint::Endpoint;
use crate::error::ConnectError;
use crate::hostlist::Rollover;
use crate::io::IoTable;
use crate::reactor::Reactor;
use crate::resolve::{self, AddressList};
use crate::settings::Settings;
use crate::socket::{Descriptor, SocketHandle};

/// Starts an asynchronous connect attempt against `endpoint` (`spec.md` §4.6
/// construction steps). Resolution happens synchronously inline (`spec.md`
/// §4.5); everything after that — including the DNS-failure case — runs
/// through the normal attempt lifecycle, so `callback` is always invoked
/// exactly once and never from within this call.
pub fn connect(
    endpoint: Endpoint,
    settings: Rc<Settings>,
    io: IoTable,
    reactor: Reactor,
    timeout: Duration,
    callback: UserCallback,
) -> AttemptHandle {
    let resolution = resolve::resolve(&endpoint, settings.ipv6);
    connect_resolved(endpoint, resolution, settings, io, reactor, timeout, callback)
}

/// Pulls the next host from `rollover` and starts a connect attempt against
/// it (`spec.md` §1: "the core only consumes a single host endpoint per
/// connect attempt"; `SPEC_FULL.md` §10.2). Returns `None` without touching
/// the reactor if `rollover` is already exhausted.
pub fn connect_from_hostlist(
    rollover: &mut dyn Rollover,
    settings: Rc<Settings>,
    io: IoTable,
    reactor: Reactor,
    timeout: Duration,
    callback: UserCallback,
) -> Option<AttemptHandle> {
    let record = rollover.next()?;
    Some(connect(record.endpoint, settings, io, reactor, timeout, callback))
}

/// Cancels an in-flight attempt (`spec.md` §4.6 `cancel()`, §5 cancellation
/// semantics). A no-op if the attempt has already reached a terminal state.
pub fn connect_cancel(handle: &AttemptHandle) {
    handle.cancel();
}

/// Wraps an already-connected, caller-owned descriptor in a [`SocketHandle`]
/// without dialing (`spec.md` §9 Open Question: "should the library expose
/// a way to wrap an already-connected descriptor... bypassing the dialing
/// state machine entirely?" — resolved here: yes, for the readiness flavor
/// only, since a completion-flavor descriptor has no meaning independent of
/// the `CompletionOps` backend that issued it).
pub fn wrap_fd(
    fd: i32,
    endpoint: Endpoint,
    settings: Rc<Settings>,
    io: IoTable,
) -> Result<SocketHandle, ConnectError> {
    match &io {
        IoTable::Readiness(_) => {
            let socket = SocketHandle::new(endpoint, settings, io);
            socket.with_inner(|inner| inner.descriptor = Descriptor::Readiness(Some(fd)));
            socket.load_socknames();
            Ok(socket)
        }
        IoTable::Completion(_) => Err(ConnectError::ConnectError),
    }
}

/// Tears down a socket outside of a connect attempt's own failure path
/// (`spec.md` §4.3). Idempotent.
pub fn shutdown(socket: &SocketHandle) {
    socket.shutdown();
}

fn connect_resolved(
    endpoint: Endpoint,
    resolution: std::io::Result<AddressList>,
    settings: Rc<Settings>,
    io: IoTable,
    reactor: Reactor,
    timeout: Duration,
    callback: UserCallback,
) -> AttemptHandle {
    let socket = SocketHandle::new(endpoint, settings.clone(), io.clone());
    let log_prefix = socket.log_prefix();
    let endpoint_for_log = socket.endpoint();

    let (addrs, dns_failed) = match resolution {
        Ok(list) if !list.is_empty() => (list, false),
        Ok(empty) => (empty, true),
        Err(_) => (AddressList::from_resolved(Vec::new()), true),
    };

    if dns_failed {
        log::error!("{}Couldn't look up {}", log_prefix, endpoint_for_log);
    }

    let is_readiness = io.is_readiness();
    let backend = match &io {
        IoTable::Readiness(ops) => {
            let event_token = reactor.create_token();
            Backend::Readiness(ReadinessBackend {
                io: ops.clone(),
                event_token,
                watch_active: false,
            })
        }
        IoTable::Completion(ops) => Backend::Completion(CompletionBackend { io: ops.clone() }),
    };

    let attempt = Attempt::new(settings, socket, addrs, backend, timeout, reactor, callback);

    if dns_failed {
        Attempt::notify_error(&attempt, ConnectError::UnknownHost);
    } else if is_readiness {
        readiness::start(&attempt);
    } else {
        completion::start(&attempt);
    }

    AttemptHandle(Rc::downgrade(&attempt))
}
