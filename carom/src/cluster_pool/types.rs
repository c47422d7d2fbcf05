// Copyright 2020 Joyent, Inc.

use std::fmt;
use std::sync::Arc;

use slog::Logger;

use crate::host::Host;
use crate::monitor::Monitor;

/// The configuration options for a cluster pool. This is required to
/// instantiate a new pool.
pub struct ClusterPoolOptions {
    /// The initial set of hosts to track. All start out live; the health
    /// probe demotes the ones that turn out not to be.
    pub hosts: Vec<Host>,
    /// An optional period, in seconds, for the background health probe.
    /// If not specified the default is 30 seconds.
    pub probe_interval: Option<u64>,
    /// An optional socket timeout, in milliseconds, applied to the
    /// one-shot probe connections. If not specified the default is
    /// 10,000 milliseconds.
    pub probe_timeout: Option<u64>,
    /// An optional quiet period in milliseconds. A probe tick that fires
    /// while the previous pass finished less than this long ago is
    /// skipped, so slow passes do not stack up. If not specified the
    /// default is 10,000 milliseconds.
    pub probe_quiet_period: Option<u64>,
    /// An optional `slog` logger instance. If none is provided then the
    /// logging will fall back to using the
    /// [`slog-stdlog`](https://docs.rs/slog-stdlog) drain which is
    /// essentially the same as using the rust standard
    /// [`log`](https://docs.rs/log) crate.
    pub log: Option<Logger>,
    /// An optional sink for diagnostic counters. If none is provided the
    /// increments are discarded.
    pub monitor: Option<Arc<dyn Monitor>>,
}

impl Default for ClusterPoolOptions {
    fn default() -> Self {
        ClusterPoolOptions {
            hosts: Vec::new(),
            probe_interval: None,
            probe_timeout: None,
            probe_quiet_period: None,
            log: None,
            monitor: None,
        }
    }
}

/// Sum type representing the current state of the cluster pool. Possible
/// states are running, stopping, or stopped.
#[derive(Copy, Clone, Debug)]
pub enum ClusterPoolState {
    /// The pool is running and able to service borrow requests.
    Running,
    /// The pool is disposing of its per-host pools and no longer accepts
    /// borrow requests.
    Stopping,
    /// The pool is stopped.
    Stopped,
}

impl fmt::Display for ClusterPoolState {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClusterPoolState::Running => String::from("running").fmt(fmt),
            ClusterPoolState::Stopping => String::from("stopping").fmt(fmt),
            ClusterPoolState::Stopped => String::from("stopped").fmt(fmt),
        }
    }
}

/// Counters aggregated across every live per-host pool.
#[derive(Clone, Copy, Debug)]
pub struct ClusterPoolStats {
    pub num_pools: usize,
    pub num_active: u32,
    pub num_idle: u32,
    pub num_blocked: u32,
    pub num_exhausted: usize,
}
