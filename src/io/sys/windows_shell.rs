//! Shell fallback when the `io-completion` feature is disabled or the
//! target isn't Windows — the completion flavor is inherently Windows-only
//! (IOCP), so every non-Windows build gets this stub instead of a
//! readiness-flavor reimplementation, per `spec.md` §9's "two I/O flavors
//! selected by a tag" design note.

use std::net::SocketAddr;
use std::rc::Rc;

use crate::io::{CompletionDescriptor, CompletionOps, CompletionWaker};

pub struct SysCompletion;

impl SysCompletion {
    pub fn new() -> std::io::Result<SysCompletion> {
        Err(unsupported())
    }
}

fn unsupported() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "the completion I/O backend requires the `io-completion` feature on Windows",
    )
}

impl CompletionOps for SysCompletion {
    fn create_descriptor(&self, _addr: SocketAddr) -> std::io::Result<CompletionDescriptor> {
        Err(unsupported())
    }
    fn connect_submit(
        &self,
        _desc: &CompletionDescriptor,
        _addr: SocketAddr,
        _waker: Rc<dyn CompletionWaker>,
    ) -> std::io::Result<()> {
        Err(unsupported())
    }
    fn close(&self, _desc: CompletionDescriptor) {}
    fn current_errno(&self) -> i32 {
        0
    }
}
