//! Completion-flavor driver (`spec.md` §4.2, §4.6).
//!
//! Mirrors `Connstart::C_connect`/`C_conncb` in
//! `original_source/src/lcbio/connect.cc`: submission replaces the
//! readiness model's "issue connect, maybe watch"; the OS delivers a single
//! completion instead of a writability event, so there is no watch/unwatch
//! bookkeeping, but the same address-list walk and one-time `EINVAL` retry
//! apply.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use crate::error::{classify, ConnectError, ConnectStatus};
use crate::io::{CompletionOps, CompletionWaker};
use crate::socket::Descriptor;

use super::{Attempt, Backend, State};

struct Waker {
    attempt: Weak<RefCell<Attempt>>,
}

impl CompletionWaker for Waker {
    fn complete(&self, status: i32) {
        if let Some(strong) = self.attempt.upgrade() {
            on_complete(&strong, status);
        }
    }
}

/// Entry point, called once right after construction (`spec.md` §4.6 step 4).
pub(crate) fn start(this: &Rc<RefCell<Attempt>>) {
    drive(this);
}

fn on_complete(this: &Rc<RefCell<Attempt>>, status: i32) {
    if this.borrow().state != State::Pending {
        return;
    }

    if status == 0 {
        Attempt::notify_success(this);
        return;
    }

    this.borrow_mut().syserr = status;
    match classify(status) {
        ConnectStatus::Connected => Attempt::notify_success(this),
        _ => {
            close_descriptor(this);
            advance_cursor(this);
            drive(this);
        }
    }
}

fn drive(this: &Rc<RefCell<Attempt>>) {
    loop {
        let addr = {
            let a = this.borrow();
            if a.state != State::Pending {
                return;
            }
            match a.addrs.current() {
                Some(addr) => addr,
                None => {
                    drop(a);
                    Attempt::notify_error(this, ConnectError::ConnectError);
                    return;
                }
            }
        };

        if !ensure_descriptor(this, addr) {
            advance_cursor(this);
            continue;
        }

        let mut retried_einval = false;
        loop {
            match submit(this, addr) {
                ConnectStatus::Busy => return,
                ConnectStatus::Connected => {
                    Attempt::notify_success(this);
                    return;
                }
                ConnectStatus::Intr => continue,
                ConnectStatus::EInval if !retried_einval => {
                    retried_einval = true;
                    continue;
                }
                ConnectStatus::EInval | ConnectStatus::EFail => {
                    close_descriptor(this);
                    advance_cursor(this);
                    break;
                }
            }
        }
    }
}

fn completion_io(this: &Rc<RefCell<Attempt>>) -> Rc<dyn CompletionOps> {
    match &this.borrow().backend {
        Backend::Completion(cb) => cb.io.clone(),
        Backend::Readiness(_) => unreachable!("completion driver invoked on a readiness attempt"),
    }
}

fn ensure_descriptor(this: &Rc<RefCell<Attempt>>, addr: SocketAddr) -> bool {
    let bound = this.borrow().socket().with_inner(|i| i.descriptor.is_bound());
    if bound {
        return true;
    }
    let io = completion_io(this);
    match io.create_descriptor(addr) {
        Ok(desc) => {
            let a = this.borrow();
            a.socket()
                .with_inner(|i| i.descriptor = Descriptor::Completion(Some(desc)));
            log::debug!("{}Created new socket", a.socket().log_prefix());
            true
        }
        Err(e) => {
            this.borrow_mut().syserr = e.raw_os_error().unwrap_or_else(|| io.current_errno());
            false
        }
    }
}

/// Submits a connect for the descriptor already bound to `addr`. `Busy`
/// means the OS accepted the submission and [`on_complete`] will fire later;
/// any other status is a synchronous failure.
fn submit(this: &Rc<RefCell<Attempt>>, addr: SocketAddr) -> ConnectStatus {
    let io = completion_io(this);
    let waker: Rc<dyn CompletionWaker> = Rc::new(Waker {
        attempt: Rc::downgrade(this),
    });
    let result = this.borrow().socket().with_inner(|inner| match &inner.descriptor {
        Descriptor::Completion(Some(desc)) => io.connect_submit(desc, addr, waker),
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "no completion descriptor bound",
        )),
    });
    match result {
        Ok(()) => ConnectStatus::Busy,
        Err(e) => {
            let errno = e.raw_os_error().unwrap_or_else(|| io.current_errno());
            this.borrow_mut().syserr = errno;
            classify(errno)
        }
    }
}

fn advance_cursor(this: &Rc<RefCell<Attempt>>) {
    this.borrow_mut().addrs.advance();
}

fn close_descriptor(this: &Rc<RefCell<Attempt>>) {
    let io = completion_io(this);
    let desc = this.borrow().socket().with_inner(|i| match &mut i.descriptor {
        Descriptor::Completion(d) => d.take(),
        _ => None,
    });
    if let Some(desc) = desc {
        io.close(desc);
    }
}
