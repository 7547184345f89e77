//! Shell fallback when the `io-readiness` feature is disabled or the target
//! isn't Unix, mirroring mio's `sys::shell`: every operation reports
//! "unsupported" instead of failing to compile.

use std::net::SocketAddr;
use std::rc::Rc;

use crate::io::{ReadinessOps, ReadinessWaker};
use crate::reactor::Token;

pub struct SysReadiness;

impl SysReadiness {
    pub fn new() -> std::io::Result<SysReadiness> {
        Err(unsupported())
    }
}

fn unsupported() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "the readiness I/O backend requires the `io-readiness` feature on a unix target",
    )
}

impl ReadinessOps for SysReadiness {
    fn create_descriptor(&self, _addr: SocketAddr) -> std::io::Result<i32> {
        Err(unsupported())
    }
    fn connect_nonblocking(&self, _fd: i32, _addr: SocketAddr) -> std::io::Result<()> {
        Err(unsupported())
    }
    fn watch(&self, _fd: i32, _token: Token, _waker: Rc<dyn ReadinessWaker>) {}
    fn cancel_watch(&self, _fd: i32) {}
    fn destroy_event(&self, _token: Token) {}
    fn close(&self, _fd: i32) {}
    fn current_errno(&self) -> i32 {
        0
    }
}
