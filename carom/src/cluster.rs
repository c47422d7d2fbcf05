// Copyright 2020 Joyent, Inc.

use std::collections::HashSet;
use std::sync::Arc;

use slog::Logger;

use crate::channel::Channel;
use crate::cluster_pool::types::{ClusterPoolOptions, ClusterPoolStats};
use crate::cluster_pool::ClusterPool;
use crate::connection::Connection;
use crate::error::Error;
use crate::failover::{ConsistencyLevel, FailoverExecutor, FailoverPolicy};
use crate::host::Host;
use crate::monitor::Monitor;
use crate::timestamp::{TimestampResolution, DEFAULT_TIMESTAMP_RESOLUTION};

/// The configuration options for a [`Cluster`]: struct.Cluster.html.
pub struct ClusterOptions {
    /// A name for the cluster, used in logging and diagnostics only.
    pub name: String,
    /// The initial set of hosts.
    pub hosts: Vec<Host>,
    /// Probe period in seconds; see
    /// [`ClusterPoolOptions`]: ../cluster_pool/types/struct.ClusterPoolOptions.html.
    pub probe_interval: Option<u64>,
    /// Probe socket timeout in milliseconds.
    pub probe_timeout: Option<u64>,
    /// Probe coalescing quiet period in milliseconds.
    pub probe_quiet_period: Option<u64>,
    /// An optional `slog` logger instance.
    pub log: Option<Logger>,
    /// An optional sink for diagnostic counters.
    pub monitor: Option<Arc<dyn Monitor>>,
    /// Consistency level used when an operation does not name one. The
    /// default is `Quorum`.
    pub default_consistency: Option<ConsistencyLevel>,
    /// Resolution of the ordering tokens handed out by
    /// [`create_timestamp`]: struct.Cluster.html#method.create_timestamp.
    /// The default is microseconds.
    pub timestamp_resolution: Option<TimestampResolution>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        ClusterOptions {
            name: String::from("default"),
            hosts: Vec::new(),
            probe_interval: None,
            probe_timeout: None,
            probe_quiet_period: None,
            log: None,
            monitor: None,
            default_consistency: None,
            timestamp_resolution: None,
        }
    }
}

/// The client-side representation of one server cluster.
///
/// The cluster is the main entry point for applications. It owns the
/// cluster pool, issues ordering timestamps, and runs operations through
/// the failover executor:
/// ```rust,ignore
/// let mut cluster = Cluster::new(options, |host: &Host| TcpChannel::new(host));
/// let ts = cluster.create_timestamp();
/// let names = cluster.execute(
///     |chan, consistency| chan.list_names(consistency),
///     &FailoverPolicy::try_all(),
///     ConsistencyLevel::Quorum,
/// )?;
/// cluster.shutdown()?;
/// ```
///
/// THREAD SAFETY: all methods that do work take `&self`; a cluster can be
/// shared across threads behind an `Arc`, with shutdown reserved to the
/// owner.
pub struct Cluster<C, F>
where
    C: Channel,
    F: Fn(&Host) -> C + Send + Sync + 'static,
{
    name: String,
    pool: ClusterPool<C, F>,
    default_policy: FailoverPolicy,
    default_consistency: ConsistencyLevel,
    timestamp_resolution: TimestampResolution,
}

impl<C, F> Cluster<C, F>
where
    C: Channel,
    F: Fn(&Host) -> C + Send + Sync + 'static,
{
    pub fn new(co: ClusterOptions, create_channel: F) -> Self {
        let default_consistency = co
            .default_consistency
            .unwrap_or(ConsistencyLevel::Quorum);
        let timestamp_resolution = co
            .timestamp_resolution
            .unwrap_or(DEFAULT_TIMESTAMP_RESOLUTION);
        let pool = ClusterPool::new(
            ClusterPoolOptions {
                hosts: co.hosts,
                probe_interval: co.probe_interval,
                probe_timeout: co.probe_timeout,
                probe_quiet_period: co.probe_quiet_period,
                log: co.log,
                monitor: co.monitor,
            },
            create_channel,
        );
        Cluster {
            name: co.name,
            pool,
            default_policy: FailoverPolicy::try_all(),
            default_consistency,
            timestamp_resolution,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The policy used by operations that do not supply their own.
    pub fn set_default_policy(&mut self, policy: FailoverPolicy) {
        self.default_policy = policy;
    }

    pub fn set_timestamp_resolution(
        &mut self,
        resolution: TimestampResolution,
    ) {
        self.timestamp_resolution = resolution;
    }

    pub fn timestamp_resolution(&self) -> TimestampResolution {
        self.timestamp_resolution
    }

    /// Produce one ordering token at the cluster's configured resolution.
    pub fn create_timestamp(&self) -> i64 {
        self.timestamp_resolution.create_timestamp()
    }

    pub fn add_host(&self, host: Host) {
        self.pool.add_host(host);
    }

    pub fn remove_host(&self, host: &Host) -> bool {
        self.pool.remove_host(host)
    }

    pub fn known_hosts(&self) -> HashSet<Host> {
        self.pool.known_hosts()
    }

    pub fn down_hosts(&self) -> HashSet<Host> {
        self.pool.down_hosts()
    }

    /// Run `op` with retries under `policy`, starting at `consistency`.
    pub fn execute<T, O>(
        &self,
        op: O,
        policy: &FailoverPolicy,
        consistency: ConsistencyLevel,
    ) -> Result<T, Error>
    where
        O: FnMut(&mut C, ConsistencyLevel) -> Result<T, C::Error>,
    {
        FailoverExecutor::new(&self.pool, policy)
            .operate(op, consistency)
    }

    /// Run `op` under the cluster's default policy and consistency.
    pub fn execute_default<T, O>(&self, op: O) -> Result<T, Error>
    where
        O: FnMut(&mut C, ConsistencyLevel) -> Result<T, C::Error>,
    {
        self.execute(op, &self.default_policy, self.default_consistency)
    }

    /// Ask the cluster for its name, with failover. Useful both as a
    /// smoke test and for verifying that configuration points at the
    /// cluster one thinks it does.
    pub fn describe_cluster_name(&self) -> Result<String, Error> {
        self.execute_default(|channel, _| channel.cluster_name())
    }

    /// Borrow a connection directly, bypassing the executor. The caller
    /// owes the pool exactly one `release` or `invalidate`.
    pub fn borrow(&self) -> Result<Connection<C>, Error> {
        self.pool.borrow()
    }

    pub fn release(&self, conn: Connection<C>) -> Result<(), Error> {
        self.pool.release(conn)
    }

    pub fn invalidate(&self, conn: Connection<C>) {
        self.pool.invalidate(conn)
    }

    /// Run one health-probe pass immediately.
    pub fn probe_once(&self) {
        self.pool.probe_once()
    }

    pub fn stats(&self) -> ClusterPoolStats {
        self.pool.stats()
    }

    /// Access the underlying cluster pool.
    pub fn pool(&self) -> &ClusterPool<C, F> {
        &self.pool
    }

    /// Stop the probe and dispose of every pooled connection.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        self.pool.shutdown()
    }
}
