//! Host-list rotation is an external collaborator (`spec.md` §1: "the core
//! only consumes a single host endpoint per connect attempt"). This module
//! captures just enough of its interface for `api::connect_from_hostlist`
//! to consume one endpoint at a time, without knowing the real rotation
//! policy used above this layer (`SPEC_FULL.md` §10.2).

use crate::endpoint::Endpoint;

/// `{host: string <=255, port: string <=5 digits}` (`spec.md` §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub endpoint: Endpoint,
}

impl HostRecord {
    pub fn new(endpoint: Endpoint) -> HostRecord {
        HostRecord { endpoint }
    }
}

/// A host-list rotation policy. Real implementations live above this
/// crate; `connect_from_hostlist` only needs "give me the next host to
/// try", captured as this one-method trait.
pub trait Rollover {
    /// Returns the next host to try starting an attempt against, or `None`
    /// if the list is exhausted.
    fn next(&mut self) -> Option<HostRecord>;
}

/// A `Rollover` over a fixed, in-memory list, useful for tests and for
/// callers that don't need a smarter policy.
pub struct FixedRollover {
    hosts: std::vec::IntoIter<HostRecord>,
}

impl FixedRollover {
    pub fn new(hosts: Vec<HostRecord>) -> FixedRollover {
        FixedRollover {
            hosts: hosts.into_iter(),
        }
    }
}

impl Rollover for FixedRollover {
    fn next(&mut self) -> Option<HostRecord> {
        self.hosts.next()
    }
}
