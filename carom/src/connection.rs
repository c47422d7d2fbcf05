// Copyright 2020 Joyent, Inc.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::channel::Channel;
use crate::error::Error;
use crate::host::Host;

// Serial numbers track connection creation for debug purposes.
static SERIAL: AtomicU64 = AtomicU64::new(0);

/// One pooled RPC channel plus its bookkeeping.
///
/// A connection is always in exactly one of three places: idle inside its
/// per-host pool, borrowed by a caller, or destroyed. It carries only the
/// identity of its host, never a pointer back into a pool, so releasing
/// routes through the cluster's host lookup instead of a reference cycle.
#[derive(Debug)]
pub struct Connection<C: Channel> {
    channel: C,
    host: Host,
    serial: u64,
    epoch: u64,
    closed: bool,
    has_errors: bool,
    released: bool,
}

impl<C: Channel> Connection<C> {
    pub(crate) fn new(channel: C, host: Host, epoch: u64) -> Self {
        Connection {
            channel,
            host,
            serial: SERIAL.fetch_add(1, Ordering::Relaxed) + 1,
            epoch,
            closed: false,
            has_errors: false,
            released: false,
        }
    }

    /// Establish the underlying channel. A connection that cannot open is
    /// a transport failure regardless of how the channel reports it.
    pub(crate) fn open(&mut self) -> Result<(), Error> {
        self.channel
            .open()
            .map_err(|e| Error::Transport(e.to_string()))
    }

    /// The host this connection talks to.
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Creation serial, for diagnostics.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    // The pool invalidation epoch this connection was created under. A
    // connection from an older epoch is destroyed on release.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Access the channel to issue RPCs. Callers that observe a channel
    /// error must [`mark_error`]: #method.mark_error before releasing.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Tear down the channel. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.channel.close();
            self.closed = true;
        }
    }

    pub fn mark_error(&mut self) {
        self.has_errors = true;
    }

    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub fn mark_borrowed(&mut self) {
        self.released = false;
    }

    pub fn mark_released(&mut self) {
        self.released = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn has_errors(&self) -> bool {
        self.has_errors
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// A stale connection must not be reused or pooled again.
    pub fn is_stale(&self) -> bool {
        self.closed || self.has_errors
    }
}

impl<C: Channel> fmt::Display for Connection<C> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Connection<{}-{}>", self.host.name(), self.serial)
    }
}
