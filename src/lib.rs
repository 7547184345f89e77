//! Asynchronous TCP connection establishment core for a distributed
//! key/value client.
//!
//! This crate drives a name-resolved, address-list-iterating, non-blocking
//! TCP connect attempt to completion over one of two pluggable I/O models:
//!
//! - a *readiness* model (edge/level-triggered watch on writability, the
//!   caller issues the syscall once the OS says it would not block), or
//! - a *completion* model (the caller submits the operation, the OS reports
//!   the result later through a callback).
//!
//! The state machine, [`attempt::Attempt`], is identical either way; only the
//! driver loop that feeds it differs. See `SPEC_FULL.md` in the repository
//! root for the full design.
//!
//! Host-list rotation, TLS, DNS caching and happy-eyeballs are explicitly out
//! of scope: addresses returned by [`resolve::resolve`] are tried strictly
//! sequentially, and a single [`Endpoint`] is consumed per attempt.

#[macro_use]
mod macros;

pub mod api;
pub mod attempt;
pub mod endpoint;
pub mod error;
pub mod hostlist;
pub mod io;
pub mod protocol;
pub mod reactor;
pub mod resolve;
pub mod settings;
pub mod socket;
pub mod timer;

pub use api::{connect, connect_cancel, connect_from_hostlist, shutdown, wrap_fd};
pub use attempt::AttemptHandle;
pub use endpoint::Endpoint;
pub use error::ConnectError;
pub use hostlist::{HostRecord, Rollover};
pub use io::IoTable;
pub use reactor::Reactor;
pub use settings::{Ipv6Policy, Settings};
pub use socket::SocketHandle;
