//! Real `ReadinessOps` backed by a non-blocking `connect(2)` plus an
//! epoll/kqueue writability watch, selected by `cfg` exactly as mio splits
//! `sys/unix/selector/epoll.rs` from `sys/unix/selector/kqueue.rs`.
//!
//! Grounded on `tokio-rs-mio`'s `sys/unix/tcp/stream.rs::connect` (the
//! `EINPROGRESS`-swallowing non-blocking connect) and
//! `sys/unix/selector/epoll.rs` (`register`/`deregister`/`select`).

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use crate::io::{ReadinessOps, ReadinessWaker};
use crate::reactor::Token;

fn sockaddr_of(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // SAFETY: `sockaddr_storage` is a plain-old-data buffer large enough to
    // hold either variant; we write only the bytes of the matching variant
    // and return its true length, matching mio's `sys::unix::net`
    // `from_socket_addr`.
    unsafe {
        let mut storage: libc::sockaddr_storage = std::mem::zeroed();
        let len = match addr {
            SocketAddr::V4(v4) => {
                let raw = &mut storage as *mut _ as *mut libc::sockaddr_in;
                std::ptr::write(raw, socket2_like_v4(v4));
                std::mem::size_of::<libc::sockaddr_in>()
            }
            SocketAddr::V6(v6) => {
                let raw = &mut storage as *mut _ as *mut libc::sockaddr_in6;
                std::ptr::write(raw, socket2_like_v6(v6));
                std::mem::size_of::<libc::sockaddr_in6>()
            }
        };
        (storage, len as libc::socklen_t)
    }
}

fn socket2_like_v4(v4: std::net::SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: v4.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(v4.ip().octets()),
        },
        sin_zero: [0; 8],
        #[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
        sin_len: std::mem::size_of::<libc::sockaddr_in>() as u8,
    }
}

fn socket2_like_v6(v6: std::net::SocketAddrV6) -> libc::sockaddr_in6 {
    libc::sockaddr_in6 {
        sin6_family: libc::AF_INET6 as libc::sa_family_t,
        sin6_port: v6.port().to_be(),
        sin6_flowinfo: v6.flowinfo(),
        sin6_addr: libc::in6_addr {
            s6_addr: v6.ip().octets(),
        },
        sin6_scope_id: v6.scope_id(),
        #[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
        sin6_len: std::mem::size_of::<libc::sockaddr_in6>() as u8,
    }
}

fn new_nonblocking_socket(addr: SocketAddr) -> std::io::Result<RawFd> {
    let domain = if addr.is_ipv4() { libc::AF_INET } else { libc::AF_INET6 };
    let fd = syscall!(socket(domain, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0))?;
    Ok(fd)
}

fn connect_raw(fd: RawFd, addr: SocketAddr) -> std::io::Result<()> {
    let (storage, len) = sockaddr_of(addr);
    let rv = unsafe {
        libc::connect(fd, &storage as *const _ as *const libc::sockaddr, len)
    };
    if rv == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Fills in local/remote addresses from `getsockname`/`getpeername`
/// (`spec.md` §4.3 `load_socknames`).
pub fn socknames_of(fd: RawFd) -> (Option<SocketAddr>, Option<SocketAddr>) {
    let local = sockname(fd, false);
    let remote = sockname(fd, true);
    (local, remote)
}

fn sockname(fd: RawFd, peer: bool) -> Option<SocketAddr> {
    unsafe {
        let mut storage: libc::sockaddr_storage = std::mem::zeroed();
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let rv = if peer {
            libc::getpeername(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
        } else {
            libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
        };
        if rv != 0 {
            return None;
        }
        match storage.ss_family as i32 {
            libc::AF_INET => {
                let sin = *(&storage as *const _ as *const libc::sockaddr_in);
                let ip = std::net::Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
                Some(SocketAddr::new(ip.into(), u16::from_be(sin.sin_port)))
            }
            libc::AF_INET6 => {
                let sin6 = *(&storage as *const _ as *const libc::sockaddr_in6);
                let ip = std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr);
                Some(SocketAddr::new(ip.into(), u16::from_be(sin6.sin6_port)))
            }
            _ => None,
        }
    }
}

struct Watch {
    token: Token,
    waker: Rc<dyn ReadinessWaker>,
}

/// An epoll (Linux) / kqueue (BSD family, macOS) writability selector,
/// exposed through [`ReadinessOps`]. One instance is normally shared (via
/// `Rc`) by every [`crate::attempt::Attempt`] on an I/O thread, matching
/// mio's single `Selector` per `Poll`.
pub struct SysReadiness {
    selector_fd: RawFd,
    watches: RefCell<HashMap<RawFd, Watch>>,
    last_errno: std::cell::Cell<i32>,
}

impl SysReadiness {
    pub fn new() -> std::io::Result<SysReadiness> {
        let selector_fd = new_selector_fd()?;
        Ok(SysReadiness {
            selector_fd,
            watches: RefCell::new(HashMap::new()),
            last_errno: std::cell::Cell::new(0),
        })
    }

    /// Waits for at most `timeout` for a writability or error event, then
    /// dispatches the matching [`ReadinessWaker`]. Callers pump this (and
    /// [`crate::reactor::Reactor::turn`]) in a loop — the "sample driver"
    /// that schedules that loop is out of scope (`spec.md` §1).
    pub fn poll_once(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        poll_selector(self.selector_fd, timeout, |fd, is_error| {
            let watch = self.watches.borrow_mut().remove(&fd);
            if let Some(watch) = watch {
                watch.waker.wake(fd, is_error);
            }
        })
    }
}

impl ReadinessOps for SysReadiness {
    fn create_descriptor(&self, addr: SocketAddr) -> std::io::Result<RawFd> {
        new_nonblocking_socket(addr)
    }

    fn connect_nonblocking(&self, fd: RawFd, addr: SocketAddr) -> std::io::Result<()> {
        match connect_raw(fd, addr) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.last_errno.set(err.raw_os_error().unwrap_or(0));
                Err(err)
            }
        }
    }

    fn watch(&self, fd: RawFd, token: Token, waker: Rc<dyn ReadinessWaker>) {
        register_writable(self.selector_fd, fd);
        self.watches.borrow_mut().insert(fd, Watch { token, waker });
    }

    fn cancel_watch(&self, fd: RawFd) {
        if self.watches.borrow_mut().remove(&fd).is_some() {
            deregister(self.selector_fd, fd);
        }
    }

    fn destroy_event(&self, _token: Token) {}

    fn close(&self, fd: RawFd) {
        self.cancel_watch(fd);
        unsafe {
            libc::close(fd);
        }
    }

    fn current_errno(&self) -> i32 {
        self.last_errno.get()
    }
}

impl Drop for SysReadiness {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.selector_fd);
        }
    }
}

#[cfg(target_os = "linux")]
fn new_selector_fd() -> std::io::Result<RawFd> {
    syscall!(epoll_create1(libc::EPOLL_CLOEXEC))
}

#[cfg(target_os = "linux")]
fn register_writable(selector_fd: RawFd, fd: RawFd) {
    let mut event = libc::epoll_event {
        events: (libc::EPOLLOUT | libc::EPOLLONESHOT) as u32,
        u64: fd as u64,
    };
    unsafe {
        libc::epoll_ctl(selector_fd, libc::EPOLL_CTL_ADD, fd, &mut event);
    }
}

#[cfg(target_os = "linux")]
fn deregister(selector_fd: RawFd, fd: RawFd) {
    unsafe {
        libc::epoll_ctl(selector_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
    }
}

#[cfg(target_os = "linux")]
fn poll_selector(
    selector_fd: RawFd,
    timeout: Option<Duration>,
    mut dispatch: impl FnMut(RawFd, bool),
) -> std::io::Result<()> {
    let timeout_ms = timeout.map(|d| d.as_millis() as i32).unwrap_or(-1);
    let mut events: [libc::epoll_event; 64] = unsafe { std::mem::zeroed() };
    let n = syscall!(epoll_wait(
        selector_fd,
        events.as_mut_ptr(),
        events.len() as i32,
        timeout_ms
    ))?;
    for event in &events[..n as usize] {
        let is_error = event.events & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0;
        dispatch(event.u64 as RawFd, is_error);
    }
    Ok(())
}

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
fn new_selector_fd() -> std::io::Result<RawFd> {
    syscall!(kqueue())
}

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
fn register_writable(selector_fd: RawFd, fd: RawFd) {
    let change = libc::kevent {
        ident: fd as usize,
        filter: libc::EVFILT_WRITE,
        flags: libc::EV_ADD | libc::EV_ONESHOT,
        fflags: 0,
        data: 0,
        udata: std::ptr::null_mut(),
    };
    unsafe {
        libc::kevent(selector_fd, &change, 1, std::ptr::null_mut(), 0, std::ptr::null());
    }
}

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
fn deregister(selector_fd: RawFd, fd: RawFd) {
    let change = libc::kevent {
        ident: fd as usize,
        filter: libc::EVFILT_WRITE,
        flags: libc::EV_DELETE,
        fflags: 0,
        data: 0,
        udata: std::ptr::null_mut(),
    };
    unsafe {
        libc::kevent(selector_fd, &change, 1, std::ptr::null_mut(), 0, std::ptr::null());
    }
}

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
fn poll_selector(
    selector_fd: RawFd,
    timeout: Option<Duration>,
    mut dispatch: impl FnMut(RawFd, bool),
) -> std::io::Result<()> {
    let ts = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map(|t| t as *const libc::timespec)
        .unwrap_or(std::ptr::null());
    let mut events: [libc::kevent; 64] = unsafe { std::mem::zeroed() };
    let n = syscall!(kevent(
        selector_fd,
        std::ptr::null(),
        0,
        events.as_mut_ptr(),
        events.len() as i32,
        ts_ptr
    ))?;
    for event in &events[..n as usize] {
        let is_error = event.flags & libc::EV_ERROR != 0;
        dispatch(event.ident as RawFd, is_error);
    }
    Ok(())
}
