// Copyright 2020 Joyent, Inc.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// The hostname or IP address of a cluster member. This is a type alias
/// for String; resolution is left to the channel implementation.
pub type HostAddress = String;
/// The port number of a cluster member. This is a type alias for u16.
pub type HostPort = u16;
/// The concatenation of the host address and port with a colon delimiter.
/// This is a type alias for String.
pub type HostName = String;

/// Default cap on concurrently borrowed connections per host.
pub const DEFAULT_MAX_ACTIVE: u32 = 50;
/// Default number of idle connections retained per host; releases beyond
/// this are destroyed rather than pooled.
pub const DEFAULT_MAX_IDLE: u32 = 5;
/// Default time a borrow will wait on a saturated pool.
pub const DEFAULT_BORROW_TIMEOUT_MILLIS: u64 = 10_000;

/// A single server instance in the cluster.
///
/// Identity is the `(address, port)` pair and nothing else: two hosts
/// with the same endpoint compare equal and hash identically even when
/// their tunables differ, which is what lets a `Host` act as a map key
/// across reconfiguration. The tunables ride along so that every layer
/// that holds a host also knows how to pool and talk to it.
#[derive(Clone, Debug)]
pub struct Host {
    name: HostName,
    address: HostAddress,
    port: HostPort,
    max_active: u32,
    max_idle: u32,
    borrow_timeout: Option<Duration>,
    socket_timeout: Option<Duration>,
    framed: bool,
}

impl Host {
    /// Return a new `Host` for the given endpoint with default tunables.
    pub fn new(address: &str, port: HostPort) -> Self {
        Host {
            name: host_name(address, port),
            address: String::from(address),
            port,
            max_active: DEFAULT_MAX_ACTIVE,
            max_idle: DEFAULT_MAX_IDLE,
            borrow_timeout: Some(Duration::from_millis(
                DEFAULT_BORROW_TIMEOUT_MILLIS,
            )),
            socket_timeout: None,
            framed: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> HostPort {
        self.port
    }

    pub fn max_active(&self) -> u32 {
        self.max_active
    }

    pub fn max_idle(&self) -> u32 {
        self.max_idle
    }

    pub fn borrow_timeout(&self) -> Option<Duration> {
        self.borrow_timeout
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        self.socket_timeout
    }

    /// Whether channels to this host should use a framed transport.
    pub fn framed(&self) -> bool {
        self.framed
    }

    pub fn with_max_active(mut self, max_active: u32) -> Self {
        self.max_active = max_active;
        self
    }

    pub fn with_max_idle(mut self, max_idle: u32) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// `None` means a borrow on a saturated pool waits indefinitely.
    pub fn with_borrow_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.borrow_timeout = timeout;
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_framed(mut self, framed: bool) -> Self {
        self.framed = framed;
        self
    }
}

// Concatenate the host address and port with a colon delimiter.
fn host_name(address: &str, port: HostPort) -> HostName {
    [address, ":", &port.to_string()].concat()
}

impl PartialEq for Host {
    fn eq(&self, other: &Host) -> bool {
        self.address == other.address && self.port == other.port
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Host {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.name.fmt(fmt)
    }
}

impl FromStr for Host {
    type Err = Error;

    /// Parse an `"address:port"` string. The split happens on the last
    /// `:` so bracketless IPv6-style inputs keep their address intact.
    fn from_str(s: &str) -> Result<Self, Error> {
        let idx = s
            .rfind(':')
            .ok_or_else(|| Error::InvalidHostSpec(String::from(s)))?;
        let (address, port_str) = (&s[..idx], &s[idx + 1..]);
        if address.is_empty() {
            return Err(Error::InvalidHostSpec(String::from(s)));
        }
        let port = port_str
            .parse::<HostPort>()
            .map_err(|_| Error::InvalidHostSpec(String::from(s)))?;
        Ok(Host::new(address, port))
    }
}
