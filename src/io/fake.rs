//! Scriptable I/O stubs used by this crate's own tests and by
//! `tests/scenarios.rs` (`spec.md` §8: "I/O stub returns ... on first
//! connect").
//!
//! These are the test-only counterparts of [`super::sys::unix`] /
//! [`super::sys::windows`]: they implement the same [`super::ReadinessOps`]
//! / [`super::CompletionOps`] traits so `attempt::readiness` /
//! `attempt::completion` never need to know they're talking to a fake.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::rc::Rc;

use crate::reactor::Token;

use super::{CompletionDescriptor, CompletionOps, CompletionWaker, ReadinessOps, ReadinessWaker};

/// One scripted outcome for a `connect_nonblocking`/`connect_submit` call.
#[derive(Debug, Clone, Copy)]
pub enum ConnectOutcome {
    /// Connects synchronously.
    Ok,
    /// Fails synchronously with this raw errno.
    Err(i32),
}

struct Watch {
    token: Token,
    waker: Rc<dyn ReadinessWaker>,
}

/// A scriptable [`ReadinessOps`] stub.
///
/// Scripted outcomes are consumed FIFO across *all* descriptors, which is
/// sufficient to express every scenario in `spec.md` §8 (each scenario
/// issues `connect()` calls in a known, sequential order). When the script
/// is empty, `connect_nonblocking` defaults to `Ok`.
pub struct FakeReadiness {
    next_fd: Cell<i32>,
    create_failures: RefCell<VecDeque<i32>>,
    connect_script: RefCell<VecDeque<ConnectOutcome>>,
    errno: Cell<i32>,
    watches: RefCell<HashMap<i32, Watch>>,
    closed: RefCell<Vec<i32>>,
    created_for: RefCell<Vec<SocketAddr>>,
}

impl FakeReadiness {
    pub fn new() -> FakeReadiness {
        FakeReadiness {
            next_fd: Cell::new(1),
            create_failures: RefCell::new(VecDeque::new()),
            connect_script: RefCell::new(VecDeque::new()),
            errno: Cell::new(0),
            watches: RefCell::new(HashMap::new()),
            closed: RefCell::new(Vec::new()),
            created_for: RefCell::new(Vec::new()),
        }
    }

    /// Appends one scripted `connect_nonblocking` outcome to the FIFO queue.
    pub fn push_connect(&self, outcome: ConnectOutcome) {
        self.connect_script.borrow_mut().push_back(outcome);
    }

    /// Causes the next `create_descriptor` call to fail with `errno`.
    pub fn fail_next_create(&self, errno: i32) {
        self.create_failures.borrow_mut().push_back(errno);
    }

    /// True if `fd` currently has a live watch registered.
    pub fn is_watching(&self, fd: i32) -> bool {
        self.watches.borrow().contains_key(&fd)
    }

    pub fn closed_fds(&self) -> Vec<i32> {
        self.closed.borrow().clone()
    }

    pub fn addrs_dialed(&self) -> Vec<SocketAddr> {
        self.created_for.borrow().clone()
    }

    /// Simulates the OS reporting writability on `fd`'s watch.
    pub fn fire_writable(&self, fd: i32) {
        if let Some(watch) = self.watches.borrow_mut().remove(&fd) {
            watch.waker.wake(fd, false);
        }
    }

    /// Simulates the OS reporting an error event on `fd`'s watch (e.g.
    /// `SO_ERROR` became non-zero).
    pub fn fire_error_event(&self, fd: i32) {
        if let Some(watch) = self.watches.borrow_mut().remove(&fd) {
            watch.waker.wake(fd, true);
        }
    }
}

impl Default for FakeReadiness {
    fn default() -> Self {
        FakeReadiness::new()
    }
}

impl ReadinessOps for FakeReadiness {
    fn create_descriptor(&self, addr: SocketAddr) -> std::io::Result<i32> {
        if let Some(errno) = self.create_failures.borrow_mut().pop_front() {
            self.errno.set(errno);
            return Err(std::io::Error::from_raw_os_error(errno));
        }
        let fd = self.next_fd.get();
        self.next_fd.set(fd + 1);
        self.created_for.borrow_mut().push(addr);
        Ok(fd)
    }

    fn connect_nonblocking(&self, _fd: i32, _addr: SocketAddr) -> std::io::Result<()> {
        match self.connect_script.borrow_mut().pop_front() {
            None | Some(ConnectOutcome::Ok) => Ok(()),
            Some(ConnectOutcome::Err(errno)) => {
                self.errno.set(errno);
                Err(std::io::Error::from_raw_os_error(errno))
            }
        }
    }

    fn watch(&self, fd: i32, token: Token, waker: Rc<dyn ReadinessWaker>) {
        self.watches.borrow_mut().insert(fd, Watch { token, waker });
    }

    fn cancel_watch(&self, fd: i32) {
        self.watches.borrow_mut().remove(&fd);
    }

    fn destroy_event(&self, _token: Token) {}

    fn close(&self, fd: i32) {
        self.watches.borrow_mut().remove(&fd);
        self.closed.borrow_mut().push(fd);
    }

    fn current_errno(&self) -> i32 {
        self.errno.get()
    }
}

/// A scriptable [`CompletionOps`] stub, mirroring [`FakeReadiness`].
pub struct FakeCompletion {
    next_id: Cell<u64>,
    create_failures: RefCell<VecDeque<i32>>,
    submit_script: RefCell<VecDeque<ConnectOutcome>>,
    errno: Cell<i32>,
    pending: RefCell<HashMap<u64, Rc<dyn CompletionWaker>>>,
    closed: RefCell<Vec<u64>>,
}

impl FakeCompletion {
    pub fn new() -> FakeCompletion {
        FakeCompletion {
            next_id: Cell::new(1),
            create_failures: RefCell::new(VecDeque::new()),
            submit_script: RefCell::new(VecDeque::new()),
            errno: Cell::new(0),
            pending: RefCell::new(HashMap::new()),
            closed: RefCell::new(Vec::new()),
        }
    }

    pub fn push_submit(&self, outcome: ConnectOutcome) {
        self.submit_script.borrow_mut().push_back(outcome);
    }

    pub fn fail_next_create(&self, errno: i32) {
        self.create_failures.borrow_mut().push_back(errno);
    }

    pub fn closed_ids(&self) -> Vec<u64> {
        self.closed.borrow().clone()
    }

    /// Simulates the OS completion callback firing for `id` with `status`
    /// (`0` = success).
    pub fn complete(&self, id: u64, status: i32) {
        if let Some(waker) = self.pending.borrow_mut().remove(&id) {
            waker.complete(status);
        }
    }
}

impl Default for FakeCompletion {
    fn default() -> Self {
        FakeCompletion::new()
    }
}

impl CompletionOps for FakeCompletion {
    fn create_descriptor(&self, _addr: SocketAddr) -> std::io::Result<CompletionDescriptor> {
        if let Some(errno) = self.create_failures.borrow_mut().pop_front() {
            self.errno.set(errno);
            return Err(std::io::Error::from_raw_os_error(errno));
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Ok(CompletionDescriptor {
            id,
            local: None,
            remote: None,
        })
    }

    fn connect_submit(
        &self,
        desc: &CompletionDescriptor,
        _addr: SocketAddr,
        waker: Rc<dyn CompletionWaker>,
    ) -> std::io::Result<()> {
        match self.submit_script.borrow_mut().pop_front() {
            None => {
                // Default: submission succeeds, await the completion.
                self.pending.borrow_mut().insert(desc.id, waker);
                Ok(())
            }
            Some(ConnectOutcome::Ok) => {
                self.pending.borrow_mut().insert(desc.id, waker);
                Ok(())
            }
            Some(ConnectOutcome::Err(errno)) => {
                self.errno.set(errno);
                Err(std::io::Error::from_raw_os_error(errno))
            }
        }
    }

    fn close(&self, desc: CompletionDescriptor) {
        self.pending.borrow_mut().remove(&desc.id);
        self.closed.borrow_mut().push(desc.id);
    }

    fn current_errno(&self) -> i32 {
        self.errno.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_readiness_defaults_to_immediate_success() {
        let fake = FakeReadiness::new();
        let addr: SocketAddr = "127.0.0.1:80".parse().unwrap();
        let fd = fake.create_descriptor(addr).unwrap();
        assert!(fake.connect_nonblocking(fd, addr).is_ok());
    }

    #[test]
    fn fake_readiness_honors_scripted_failures() {
        let fake = FakeReadiness::new();
        let addr: SocketAddr = "127.0.0.1:80".parse().unwrap();
        fake.push_connect(ConnectOutcome::Err(libc_econnrefused()));
        let fd = fake.create_descriptor(addr).unwrap();
        let err = fake.connect_nonblocking(fd, addr).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc_econnrefused()));
    }

    fn libc_econnrefused() -> i32 {
        #[cfg(unix)]
        {
            libc::ECONNREFUSED
        }
        #[cfg(not(unix))]
        {
            10061
        }
    }
}
