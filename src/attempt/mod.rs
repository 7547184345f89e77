//! Connect Attempt State Machine (`spec.md` §4.6) — the central object.
//!
//! Grounded line-for-line on `Connstart` in
//! `original_source/src/lcbio/connect.cc`: `state_signal`, `notify_success`,
//! `notify_error`, `cancel` and `handler` below are direct, meaning-
//! preserving transliterations of `Connstart::state_signal`,
//! `Connstart::notify_success`, `Connstart::notify_error`,
//! `Connstart::cancel` and `Connstart::handler`.
//!
//! Ownership: per the REDESIGN FLAG in `spec.md` §9 ("prefer a single-owner
//! model... a slot index in an arena of in-flight attempts"), the single
//! strong owner of an `Attempt` while it is live is the thread-local
//! [`registry`]; every other reference (the public [`AttemptHandle`], the
//! timer's fire callback, the readiness/completion wakers) holds only a
//! `Weak`. `handler()`'s last act is to remove the attempt from the
//! registry, which is what actually frees it — there is no path where a
//! callback can observe an attempt after that point, because every such
//! callback upgrades its `Weak` first.

pub mod completion;
pub mod readiness;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::ConnectError;
use crate::io::{CompletionOps, ReadinessOps};
use crate::reactor::{Reactor, Token};
use crate::resolve::AddressList;
use crate::settings::Settings;
use crate::socket::SocketHandle;
use crate::timer::Timer;

/// `(socket_on_success, result, raw_os_errno)`. `spec.md` §6: "On
/// `library_error == SUCCESS`, `socket_or_null` is a fully-initialized
/// handle transferred to the callback; on any other error it is null and
/// no handle is transferred" — realized as `Result::Ok`/`Err` rather than a
/// nullable pointer plus a separate status code, the idiomatic replacement
/// the REDESIGN FLAG in `spec.md` §9 calls for.
pub type UserCallback = Box<dyn FnOnce(Result<SocketHandle, ConnectError>, i32)>;

/// `spec.md` §3: "State ... Initial: PENDING. Terminals: all three others.
/// Transitions only *from* PENDING; once non-PENDING, further signals are
/// ignored (idempotent)."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Cancelled,
    Connected,
    Error,
}

pub(crate) struct ReadinessBackend {
    pub(crate) io: Rc<dyn ReadinessOps>,
    pub(crate) event_token: Token,
    pub(crate) watch_active: bool,
}

pub(crate) struct CompletionBackend {
    pub(crate) io: Rc<dyn CompletionOps>,
}

pub(crate) enum Backend {
    Readiness(ReadinessBackend),
    Completion(CompletionBackend),
}

/// The connect state machine (`spec.md` §3 "Attempt", §4.6).
pub struct Attempt {
    user_callback: Option<UserCallback>,
    socket: Option<SocketHandle>,
    syserr: i32,
    in_user_handler: bool,
    addrs: AddressList,
    state: State,
    last_error: Option<ConnectError>,
    timer: Timer,
    settings: Rc<Settings>,
    backend: Backend,
    log_prefix: String,
}

/// A handle callers keep to cancel an in-flight attempt. Holds only a
/// `Weak` reference: once the attempt reaches a terminal state and its
/// `handler()` has run, the handle naturally stops doing anything
/// (`spec.md` §5: "the handle must not be used afterward").
#[derive(Clone)]
pub struct AttemptHandle(pub(crate) Weak<RefCell<Attempt>>);

impl AttemptHandle {
    /// `spec.md` §4.6 `cancel()`. A no-op if the attempt has already
    /// reached a terminal state or no longer exists.
    pub fn cancel(&self) {
        if let Some(strong) = self.0.upgrade() {
            Attempt::cancel(&strong);
        }
    }
}

mod registry {
    //! The arena of in-flight attempts (`spec.md` §9 design note). Holds
    //! the single strong `Rc` keeping an [`Attempt`](super::Attempt) alive
    //! while it is pending.
    use super::Attempt;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    thread_local! {
        static SLOTS: RefCell<HashMap<usize, Rc<RefCell<Attempt>>>> = RefCell::new(HashMap::new());
    }

    fn key(this: &Rc<RefCell<Attempt>>) -> usize {
        Rc::as_ptr(this) as usize
    }

    pub(super) fn register(this: Rc<RefCell<Attempt>>) {
        SLOTS.with(|slots| {
            slots.borrow_mut().insert(key(&this), this);
        });
    }

    pub(super) fn unregister(this: &Rc<RefCell<Attempt>>) {
        SLOTS.with(|slots| {
            slots.borrow_mut().remove(&key(this));
        });
    }
}

impl Attempt {
    /// `spec.md` §4.6 construction steps 1-3 (resolving the address list and
    /// dispatching into the flavor-specific driver are the caller's job —
    /// see `api::connect`). Registers the attempt in the [`registry`]
    /// (step "own exactly one socket handle for its lifetime").
    pub(crate) fn new(
        settings: Rc<Settings>,
        socket: SocketHandle,
        addrs: AddressList,
        backend: Backend,
        timeout: std::time::Duration,
        reactor: Reactor,
        user_callback: UserCallback,
    ) -> Rc<RefCell<Attempt>> {
        let log_prefix = socket.log_prefix();

        // `Rc::new_cyclic` gives the timer's fire callback a `Weak` to the
        // attempt before the attempt itself finishes constructing, so the
        // timer never needs to hold (or be handed, after the fact) a strong
        // reference to its own owner.
        let attempt = Rc::new_cyclic(|weak: &Weak<RefCell<Attempt>>| {
            let weak = weak.clone();
            let timer = Timer::new(
                reactor,
                Box::new(move || {
                    if let Some(strong) = weak.upgrade() {
                        Attempt::handler(&strong);
                    }
                }),
            );
            RefCell::new(Attempt {
                user_callback: Some(user_callback),
                socket: Some(socket),
                syserr: 0,
                in_user_handler: false,
                addrs,
                state: State::Pending,
                last_error: None,
                timer,
                settings,
                backend,
                log_prefix,
            })
        });

        log::debug!(
            "{}Starting. Timeout={:?}",
            attempt.borrow().log_prefix,
            timeout
        );
        attempt.borrow().timer.arm(timeout);
        registry::register(attempt.clone());
        attempt
    }

    pub(crate) fn backend_mut(&mut self) -> &mut Backend {
        &mut self.backend
    }

    pub(crate) fn addrs(&self) -> &AddressList {
        &self.addrs
    }

    pub(crate) fn addrs_mut(&mut self) -> &mut AddressList {
        &mut self.addrs
    }

    pub(crate) fn socket(&self) -> &SocketHandle {
        self.socket.as_ref().expect("attempt socket taken before handler() ran")
    }

    pub(crate) fn log_prefix(&self) -> &str {
        &self.log_prefix
    }

    pub(crate) fn set_syserr(&mut self, errno: i32) {
        self.syserr = errno;
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    /// `spec.md` §4.6 `state_signal`: a no-op unless `state == Pending`;
    /// otherwise stores `last_error` (only if not already set by an earlier
    /// signal) and schedules `handler()` via the timer's deferred-dispatch
    /// role.
    fn state_signal(this: &Rc<RefCell<Attempt>>, next: State, err: Option<ConnectError>) {
        let mut a = this.borrow_mut();
        if a.state != State::Pending {
            return;
        }
        if next == State::Connected {
            a.last_error = None;
        } else if a.last_error.is_none() {
            a.last_error = err;
        }
        a.state = next;
        a.timer.signal();
    }

    pub(crate) fn notify_success(this: &Rc<RefCell<Attempt>>) {
        Attempt::state_signal(this, State::Connected, None);
    }

    pub(crate) fn notify_error(this: &Rc<RefCell<Attempt>>, err: ConnectError) {
        Attempt::state_signal(this, State::Error, Some(err));
    }

    /// `spec.md` §4.6 `cancel()` / §5 "Cancellation semantics". Re-entrant
    /// cancel from inside the user callback is a no-op (`in_user_handler`
    /// guard); cancel after a terminal transition has already been
    /// scheduled (but not yet run) is also a no-op, because `handler()` is
    /// only ever allowed to run once per attempt — running it a second time
    /// here would double-invoke the user callback and double-free the
    /// attempt.
    pub(crate) fn cancel(this: &Rc<RefCell<Attempt>>) {
        {
            let a = this.borrow();
            if a.in_user_handler {
                return;
            }
        }
        {
            let mut a = this.borrow_mut();
            if a.state != State::Pending {
                return;
            }
            a.state = State::Cancelled;
        }
        Attempt::handler(this);
    }

    /// `spec.md` §4.6 `handler()` — the sole place that invokes the user
    /// callback, and the sole place that destroys the attempt.
    ///
    /// Split into two borrow scopes around the callback invocation: the
    /// `RefCell` must not be held while the (arbitrary, user-supplied)
    /// callback runs, both because the callback may call
    /// [`AttemptHandle::cancel`] reentrantly (which must see
    /// `in_user_handler == true` without deadlocking/panicking on a double
    /// borrow) and because it may run for an unbounded time.
    pub(crate) fn handler(this: &Rc<RefCell<Attempt>>) {
        let (callback, outcome, syserr, skip_callback) = {
            let mut a = this.borrow_mut();

            // Read the fd into a local *before* taking `&mut a.backend`: both
            // field accesses go through the same `RefMut` smart pointer, so
            // the borrow checker can't see `backend` and `socket` as disjoint
            // once a mutable borrow of the former is live.
            let fd = a
                .socket
                .as_ref()
                .and_then(|s| s.with_inner(|i| i.descriptor.raw_fd()));

            if let Backend::Readiness(rb) = &mut a.backend {
                if rb.watch_active {
                    if let Some(fd) = fd {
                        rb.io.cancel_watch(fd);
                    }
                    rb.watch_active = false;
                }
                rb.io.destroy_event(rb.event_token);
            }

            let skip_callback = a.state == State::Cancelled;

            let outcome: Result<(), ConnectError> = match a.state {
                State::Pending => Err(ConnectError::ETimedOut),
                State::Connected => Ok(()),
                State::Error => Err(match a.last_error {
                    Some(ConnectError::ConnectError) => {
                        crate::error::to_library_error(a.syserr, &a.settings)
                    }
                    Some(other) => other,
                    None => ConnectError::ConnectError,
                }),
                State::Cancelled => Err(ConnectError::Cancelled),
            };

            if !skip_callback {
                if outcome.is_ok() {
                    if let Some(socket) = &a.socket {
                        socket.load_socknames();
                        if a.settings.tcp_nodelay {
                            apply_tcp_nodelay(socket, &a.log_prefix);
                        }
                        log::info!("{}Connected established", a.log_prefix);
                    }
                } else if let Err(e) = &outcome {
                    log::error!(
                        "{}Failed to establish connection: {:?}, os errno={}",
                        a.log_prefix,
                        e,
                        a.syserr
                    );
                }
            }

            let syserr = a.syserr;
            let socket_opt = a.socket.take();
            let result: Result<SocketHandle, ConnectError> = match (&outcome, socket_opt) {
                (Ok(()), Some(sock)) => Ok(sock),
                (Ok(()), None) => Err(ConnectError::ConnectError),
                (Err(e), sock) => {
                    if let Some(sock) = sock {
                        sock.shutdown();
                    }
                    Err(*e)
                }
            };

            a.in_user_handler = true;
            let callback = a.user_callback.take();
            (callback, result, syserr, skip_callback)
        };

        if !skip_callback {
            if let Some(cb) = callback {
                cb(outcome, syserr);
            }
        }

        {
            let mut a = this.borrow_mut();
            a.in_user_handler = false;
            a.timer.release();
        }
        registry::unregister(this);
    }
}

fn apply_tcp_nodelay(socket: &SocketHandle, log_prefix: &str) {
    let applied = socket.with_inner(|inner| match &inner.descriptor {
        crate::socket::Descriptor::Readiness(Some(fd)) => set_tcp_nodelay(*fd),
        _ => true,
    });
    if applied {
        log::debug!("{}Successfully set TCP_NODELAY", log_prefix);
    } else {
        log::info!("{}Couldn't set TCP_NODELAY", log_prefix);
    }
}

#[cfg(unix)]
fn set_tcp_nodelay(fd: i32) -> bool {
    let on: libc::c_int = 1;
    let rv = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    rv == 0
}

#[cfg(not(unix))]
fn set_tcp_nodelay(_fd: i32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::io::fake::FakeReadiness;
    use crate::io::IoTable;
    use crate::resolve::AddressList;
    use crate::settings::{Ipv6Policy, Settings};
    use std::cell::Cell;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn addrs(list: &[&str]) -> AddressList {
        let socks: Vec<SocketAddr> = list.iter().map(|s| s.parse().unwrap()).collect();
        // `resolve::resolve` is the only public constructor, but these
        // tests need specific canned addresses; build through the crate's
        // own parsing path instead of depending on DNS.
        crate::resolve::AddressList::from_resolved(socks)
    }

    fn new_attempt(
        reactor: Reactor,
        fake: Rc<FakeReadiness>,
        addr_list: AddressList,
        timeout: Duration,
        cb: UserCallback,
    ) -> Rc<RefCell<Attempt>> {
        let settings = Settings::new(Ipv6Policy::Allow, false);
        let io = IoTable::Readiness(fake.clone());
        let socket = SocketHandle::new(Endpoint::new("db.example.com", "11210").unwrap(), settings.clone(), io.clone());
        let event_token = reactor.create_token();
        let backend = Backend::Readiness(ReadinessBackend {
            io: fake,
            event_token,
            watch_active: false,
        });
        Attempt::new(settings, socket, addr_list, backend, timeout, reactor, cb)
    }

    #[test]
    fn at_most_once_callback_on_immediate_success() {
        let reactor = Reactor::new();
        let fake = Rc::new(FakeReadiness::new());
        let calls = Rc::new(Cell::new(0));
        let calls2 = calls.clone();
        let attempt = new_attempt(
            reactor.clone(),
            fake.clone(),
            addrs(&["127.0.0.1:80"]),
            Duration::from_secs(1),
            Box::new(move |result, _errno| {
                calls2.set(calls2.get() + 1);
                assert!(result.is_ok());
            }),
        );
        readiness::start(&attempt);
        reactor.turn();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn cancel_suppresses_callback() {
        let reactor = Reactor::new();
        let fake = Rc::new(FakeReadiness::new());
        fake.push_connect(crate::io::fake::ConnectOutcome::Err(libc::EINPROGRESS));
        let calls = Rc::new(Cell::new(0));
        let calls2 = calls.clone();
        let attempt = new_attempt(
            reactor.clone(),
            fake.clone(),
            addrs(&["127.0.0.1:80"]),
            Duration::from_secs(1),
            Box::new(move |_result, _errno| {
                calls2.set(calls2.get() + 1);
            }),
        );
        readiness::start(&attempt);
        Attempt::cancel(&attempt);
        reactor.turn();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn reentrant_cancel_from_inside_callback_is_noop() {
        let reactor = Reactor::new();
        let fake = Rc::new(FakeReadiness::new());
        let calls = Rc::new(Cell::new(0));
        let calls2 = calls.clone();
        let attempt = new_attempt(
            reactor.clone(),
            fake.clone(),
            addrs(&["127.0.0.1:80"]),
            Duration::from_secs(1),
            Box::new(move |_result, _errno| {
                calls2.set(calls2.get() + 1);
            }),
        );
        let handle = AttemptHandle(Rc::downgrade(&attempt));
        readiness::start(&attempt);
        // Simulate: the user callback itself tries to cancel.
        {
            let mut a = attempt.borrow_mut();
            a.in_user_handler = true;
        }
        handle.cancel();
        {
            let mut a = attempt.borrow_mut();
            a.in_user_handler = false;
        }
        reactor.turn();
        assert_eq!(calls.get(), 1);
    }
}
