// Copyright 2020 Joyent, Inc.

use std::time::Duration;

use thiserror::Error;

/// The recoverability class of a failed operation.
///
/// The failover executor consults this classification to decide whether a
/// failed attempt may be retried on another host. `Application` errors are
/// logical errors reported by the server and are never retried; the other
/// three kinds indicate that the host, not the request, is suspect.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The server accepted the request but did not answer in time.
    Timeout,
    /// The server reported that too few replicas were available.
    Unavailable,
    /// The channel itself failed, during setup or mid-request.
    Transport,
    /// The server returned a logical error; retrying will not help.
    Application,
}

impl ErrorKind {
    pub fn is_recoverable(self) -> bool {
        !matches!(self, ErrorKind::Application)
    }
}

/// Classification seam for channel error types.
///
/// Every [`Channel`]: ../channel/trait.Channel.html implementation chooses
/// its own concrete error type; implementing `Classify` for that type is
/// what lets the failover executor tell a dead host apart from a bad
/// request without knowing anything else about the transport.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

#[derive(Debug, Error)]
pub enum Error {
    /// A borrow waited out its deadline on a saturated per-host pool. Not
    /// retried by the executor; surfaced to the caller as-is.
    #[error("no connection for {host} became available within {waited:?}")]
    PoolExhausted { host: String, waited: Duration },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("not enough replicas available: {0}")]
    Unavailable(String),

    #[error("application error: {0}")]
    Application(String),

    #[error("no live hosts available")]
    NoHostsAvailable,

    #[error("invalid host specification '{0}'")]
    InvalidHostSpec(String),

    /// Programmer misuse: releasing to the wrong pool, using a pool after
    /// shutdown, shutting down a clone.
    #[error("{0}")]
    Fatal(String),
}

impl Error {
    /// Wrap a classified channel error into the matching crate error.
    pub fn from_classified<E>(e: E) -> Self
    where
        E: std::error::Error + Classify,
    {
        match e.kind() {
            ErrorKind::Timeout => Error::Timeout(e.to_string()),
            ErrorKind::Unavailable => Error::Unavailable(e.to_string()),
            ErrorKind::Transport => Error::Transport(e.to_string()),
            ErrorKind::Application => Error::Application(e.to_string()),
        }
    }
}

// The crate error is itself usable as a channel error type, which keeps
// test channels and thin wrappers from needing an error type of their own.
impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Unavailable(_) => ErrorKind::Unavailable,
            Error::Transport(_)
            | Error::PoolExhausted { .. }
            | Error::NoHostsAvailable => ErrorKind::Transport,
            Error::Application(_)
            | Error::InvalidHostSpec(_)
            | Error::Fatal(_) => ErrorKind::Application,
        }
    }
}
