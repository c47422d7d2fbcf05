// Copyright 2020 Joyent, Inc.

use crate::error::Classify;

/// The RPC channel underneath a pooled connection.
///
/// The `Channel` trait defines the interface a transport must implement
/// in order to be pooled. A channel need not be a plain TCP socket; it
/// can be any request/response conduit to exactly one host, as long as
/// it can be opened, closed, and asked the one trivial question the
/// health probe relies on.
///
/// Channels are created by a factory function handed to the cluster pool:
/// ```rust.ignore
/// Fn(&Host) -> C + Send + Sync + 'static
/// where C: Channel
/// ```
/// The factory captures whatever application-level configuration the
/// transport needs and reads the per-host tunables (socket timeout,
/// framed flag) off the [`Host`]: ../host/struct.Host.html it is given.
/// The pool then calls [`open`]: #tymethod.open outside of any lock.
pub trait Channel: Send + Sized + 'static {
    /// The error type returned by channel operations. Each implementation
    /// picks its own concrete type; the only requirements are the
    /// standard [Error](https://doc.rust-lang.org/std/error/trait.Error.html)
    /// trait, so failures can be logged, and
    /// [`Classify`]: ../error/trait.Classify.html, so the failover
    /// executor can tell which failures indict the host.
    type Error: std::error::Error + Classify + Send;

    /// Establish the channel. Called once per pooled connection, and once
    /// per health-probe shot.
    fn open(&mut self) -> Result<(), Self::Error>;

    /// Tear the channel down. Must tolerate being called on a channel
    /// that never opened or already closed.
    fn close(&mut self);

    /// The trivial liveness RPC: ask the server for its cluster name.
    /// The health probe treats any `Ok` as proof of life.
    fn cluster_name(&mut self) -> Result<String, Self::Error>;
}
