//! Endpoint identity (`spec.md` §3): a human-level `(host, port)` pair,
//! immutable for the life of an attempt.

use std::fmt;

/// Maximum host length accepted by [`Endpoint::new`] (`spec.md` §6: "Host
/// record: `{host: string <=255, port: string <=5 digits}`").
pub const MAX_HOST_LEN: usize = 255;
/// Maximum port string length (5 ASCII digits covers up to 65535).
pub const MAX_PORT_LEN: usize = 5;

/// A destination, identified by host name/literal and service port, prior to
/// name resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: String,
}

/// Returned by [`Endpoint::new`] when a field exceeds the bounds in
/// `spec.md` §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("host exceeds {MAX_HOST_LEN} characters")]
    HostTooLong,
    #[error("port exceeds {MAX_PORT_LEN} characters")]
    PortTooLong,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Result<Endpoint, EndpointError> {
        let host = host.into();
        let port = port.into();
        if host.len() > MAX_HOST_LEN {
            return Err(EndpointError::HostTooLong);
        }
        if port.len() > MAX_PORT_LEN {
            return Err(EndpointError::PortTooLong);
        }
        Ok(Endpoint { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_host() {
        let host: String = std::iter::repeat('a').take(MAX_HOST_LEN + 1).collect();
        assert_eq!(Endpoint::new(host, "80"), Err(EndpointError::HostTooLong));
    }

    #[test]
    fn rejects_oversized_port() {
        assert_eq!(
            Endpoint::new("localhost", "123456"),
            Err(EndpointError::PortTooLong)
        );
    }

    #[test]
    fn display_matches_host_colon_port() {
        let ep = Endpoint::new("db.example.com", "11210").unwrap();
        assert_eq!(ep.to_string(), "db.example.com:11210");
    }
}
