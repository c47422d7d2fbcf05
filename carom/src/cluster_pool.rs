// Copyright 2020 Joyent, Inc.

pub mod types;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use slog::{debug, info, o, warn, Drain, Logger};
use timer::Guard;

use crate::channel::Channel;
use crate::cluster_pool::types::{
    ClusterPoolOptions, ClusterPoolState, ClusterPoolStats,
};
use crate::connection::Connection;
use crate::error::Error;
use crate::host::Host;
use crate::host_pool::HostPool;
use crate::monitor::{Counter, Monitor, NullMonitor};

// Default period of the background health probe in seconds.
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;
// Socket timeout applied to one-shot probe connections in milliseconds.
const DEFAULT_PROBE_TIMEOUT_MILLIS: u64 = 10_000;
// A probe tick that fires while the previous pass finished less than this
// many milliseconds ago is skipped, so slow passes do not stack up.
const PROBE_QUIET_PERIOD_MILLIS: u64 = 10_000;

/// A registry and balancer over per-host connection pools.
///
/// Hosts live in one of two disjoint maps, `live` and `down`. Borrows are
/// served from the live side under a least-active policy; a periodic
/// probe moves hosts between the sides as they fail and recover. The
/// registry mutex is only ever held for map manipulation; borrowing,
/// opening, and closing all happen against a snapshot of `Arc`s taken
/// under the lock and used after it is dropped.
pub struct ClusterPool<C, F>
where
    C: Channel,
    F: Fn(&Host) -> C + Send + Sync + 'static,
{
    inner: Arc<Registry<C>>,
    create_channel: Arc<F>,
    probe_timer: Option<timer::Timer>,
    _probe_guard: Option<Guard>,
}

struct Registry<C: Channel> {
    hosts: Mutex<HostMaps<C>>,
    probe: Mutex<ProbeState>,
    probe_timeout: Duration,
    probe_quiet_period: Duration,
    monitor: Arc<dyn Monitor>,
    log: Logger,
}

struct HostMaps<C: Channel> {
    live: HashMap<Host, Arc<HostPool<C>>>,
    down: HashMap<Host, Arc<HostPool<C>>>,
    state: ClusterPoolState,
}

struct ProbeState {
    last_finished: Option<Instant>,
}

impl<C, F> ClusterPool<C, F>
where
    C: Channel,
    F: Fn(&Host) -> C + Send + Sync + 'static,
{
    pub fn new(cpo: ClusterPoolOptions, create_channel: F) -> Self {
        let log = cpo.log.unwrap_or_else(|| {
            Logger::root(slog_stdlog::StdLog.fuse(), o!())
        });
        let monitor = cpo
            .monitor
            .unwrap_or_else(|| Arc::new(NullMonitor));
        let probe_timeout = Duration::from_millis(
            cpo.probe_timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT_MILLIS),
        );
        let probe_quiet_period = Duration::from_millis(
            cpo.probe_quiet_period
                .unwrap_or(PROBE_QUIET_PERIOD_MILLIS),
        );

        let inner = Arc::new(Registry {
            hosts: Mutex::new(HostMaps {
                live: HashMap::new(),
                down: HashMap::new(),
                state: ClusterPoolState::Running,
            }),
            probe: Mutex::new(ProbeState {
                last_finished: None,
            }),
            probe_timeout,
            probe_quiet_period,
            monitor,
            log,
        });
        let create_channel = Arc::new(create_channel);

        let mut pool = ClusterPool {
            inner,
            create_channel,
            probe_timer: None,
            _probe_guard: None,
        };
        for host in cpo.hosts {
            pool.add_host(host);
        }

        let probe_interval = cpo
            .probe_interval
            .unwrap_or(DEFAULT_PROBE_INTERVAL_SECS);
        let probe_timer = timer::Timer::new();
        let registry = pool.inner.clone();
        let factory = pool.create_channel.clone();
        debug!(
            pool.inner.log,
            "starting health probe task, interval {} seconds",
            probe_interval
        );
        let probe_guard = probe_timer.schedule_repeating(
            chrono::Duration::seconds(probe_interval as i64),
            move || run_probe_pass(&registry, factory.as_ref()),
        );
        pool.probe_timer = Some(probe_timer);
        pool._probe_guard = Some(probe_guard);
        pool
    }

    /// Start tracking a host. New hosts enter the live side; the next
    /// probe pass corrects that if they are unreachable. Idempotent.
    pub fn add_host(&self, host: Host) {
        let mut maps = self.inner.hosts.lock().unwrap();
        if maps.live.contains_key(&host) || maps.down.contains_key(&host) {
            return;
        }
        debug!(self.inner.log, "adding host {}", host);
        let pool = Arc::new(HostPool::new(
            host.clone(),
            self.inner
                .log
                .new(o!("host" => String::from(host.name()))),
        ));
        maps.live.insert(host, pool);
    }

    /// Stop tracking a host and destroy its pooled connections. Borrowed
    /// connections are destroyed as their holders return them. Returns
    /// false when the host was not tracked.
    pub fn remove_host(&self, host: &Host) -> bool {
        let pool = {
            let mut maps = self.inner.hosts.lock().unwrap();
            maps.live
                .remove(host)
                .or_else(|| maps.down.remove(host))
        };
        match pool {
            Some(pool) => {
                info!(self.inner.log, "removed host {}", host);
                pool.invalidate_all();
                true
            }
            None => false,
        }
    }

    /// Borrow from the live host with the fewest active connections.
    pub fn borrow(&self) -> Result<Connection<C>, Error> {
        self.borrow_skipping(&HashSet::new())
    }

    /// Borrow under the least-active policy, preferring hosts outside
    /// `skip`. When every live host is in `skip` the full live set is
    /// considered again.
    pub fn borrow_skipping(
        &self,
        skip: &HashSet<Host>,
    ) -> Result<Connection<C>, Error> {
        let pools = self.live_pools()?;
        let preferred = least_active(
            pools
                .iter()
                .filter(|pool| !skip.contains(pool.host())),
        );
        let pool = match preferred {
            Some(pool) => pool,
            None => least_active(pools.iter())
                .ok_or(Error::NoHostsAvailable)?,
        };
        pool.borrow(self.create_channel.as_ref())
    }

    /// Borrow from a specific host, tracking it first if necessary.
    pub fn borrow_from(&self, host: &Host) -> Result<Connection<C>, Error> {
        let pool = {
            let maps = self.inner.hosts.lock().unwrap();
            self.ensure_running(&maps)?;
            maps.live
                .get(host)
                .or_else(|| maps.down.get(host))
                .cloned()
        };
        let pool = match pool {
            Some(pool) => pool,
            None => {
                self.add_host(host.clone());
                self.inner
                    .hosts
                    .lock()
                    .unwrap()
                    .live
                    .get(host)
                    .cloned()
                    .ok_or(Error::NoHostsAvailable)?
            }
        };
        pool.borrow(self.create_channel.as_ref())
    }

    /// Borrow from a random member of `hosts`, falling back to the other
    /// members as individual hosts fail. Only fails once the whole list
    /// has been tried.
    pub fn borrow_any(
        &self,
        hosts: &[Host],
    ) -> Result<Connection<C>, Error> {
        let mut candidates: Vec<Host> = hosts.to_vec();
        let mut rng = rand::thread_rng();
        loop {
            if candidates.is_empty() {
                return Err(Error::NoHostsAvailable);
            }
            let idx = rng.gen_range(0, candidates.len());
            match self.borrow_from(&candidates[idx]) {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    if candidates.len() == 1 {
                        return Err(e);
                    }
                    warn!(
                        self.inner.log,
                        "unable to obtain a connection to {}; trying \
                         another host: {}",
                        candidates[idx],
                        e
                    );
                    self.inner
                        .monitor
                        .increment(Counter::RecoverableLbConnectErrors);
                    candidates.remove(idx);
                }
            }
        }
    }

    /// Return a borrowed connection to its owning pool. A connection
    /// whose host is no longer tracked is destroyed instead.
    pub fn release(&self, mut conn: Connection<C>) -> Result<(), Error> {
        match self.lookup_pool(conn.host()) {
            Some(pool) => pool.release(conn),
            None => {
                debug!(
                    self.inner.log,
                    "destroying {}; its host is no longer tracked", conn
                );
                conn.close();
                Ok(())
            }
        }
    }

    /// Destroy a borrowed connection, freeing its slot in the owning
    /// pool.
    pub fn invalidate(&self, mut conn: Connection<C>) {
        match self.lookup_pool(conn.host()) {
            Some(pool) => pool.invalidate(conn),
            None => conn.close(),
        }
    }

    /// Run one health-probe pass immediately, subject to the same
    /// quiet-period coalescing as the scheduled ticks.
    pub fn probe_once(&self) {
        run_probe_pass(&self.inner, self.create_channel.as_ref());
    }

    /// Every tracked host, live or down.
    pub fn known_hosts(&self) -> HashSet<Host> {
        let maps = self.inner.hosts.lock().unwrap();
        maps.live
            .keys()
            .chain(maps.down.keys())
            .cloned()
            .collect()
    }

    /// The hosts currently out of service.
    pub fn down_hosts(&self) -> HashSet<Host> {
        let maps = self.inner.hosts.lock().unwrap();
        maps.down.keys().cloned().collect()
    }

    /// The hosts currently in service.
    pub fn live_hosts(&self) -> HashSet<Host> {
        let maps = self.inner.hosts.lock().unwrap();
        maps.live.keys().cloned().collect()
    }

    pub fn num_pools(&self) -> usize {
        let maps = self.inner.hosts.lock().unwrap();
        maps.live.len() + maps.down.len()
    }

    pub fn num_active(&self) -> u32 {
        self.snapshot_live()
            .iter()
            .map(|pool| pool.num_active())
            .sum()
    }

    pub fn num_idle(&self) -> u32 {
        self.snapshot_live()
            .iter()
            .map(|pool| pool.num_idle())
            .sum()
    }

    pub fn num_blocked(&self) -> u32 {
        self.snapshot_live()
            .iter()
            .map(|pool| pool.num_blocked())
            .sum()
    }

    /// Names of the live pools with every slot borrowed.
    pub fn exhausted_pool_names(&self) -> Vec<String> {
        self.snapshot_live()
            .iter()
            .filter(|pool| pool.is_exhausted())
            .map(|pool| String::from(pool.host().name()))
            .collect()
    }

    pub fn stats(&self) -> ClusterPoolStats {
        let pools = self.snapshot_live();
        let mut stats = ClusterPoolStats {
            num_pools: self.num_pools(),
            num_active: 0,
            num_idle: 0,
            num_blocked: 0,
            num_exhausted: 0,
        };
        for pool in &pools {
            let s = pool.stats();
            stats.num_active += u32::from(s.active);
            stats.num_idle += u32::from(s.idle);
            stats.num_blocked += u32::from(s.blocked);
            if pool.is_exhausted() {
                stats.num_exhausted += 1;
            }
        }
        stats
    }

    pub fn state(&self) -> String {
        self.inner.hosts.lock().unwrap().state.to_string()
    }

    pub(crate) fn monitor(&self) -> Arc<dyn Monitor> {
        self.inner.monitor.clone()
    }

    pub(crate) fn log(&self) -> &Logger {
        &self.inner.log
    }

    /// Stop the probe and destroy every pooled connection. May only be
    /// called on the original pool instance; clones cannot carry the
    /// probe timer and so cannot stop it.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        if self.probe_timer.is_none() {
            return Err(Error::Fatal(String::from(
                "shutdown called on a clone of the cluster pool, or \
                 called twice",
            )));
        }
        info!(self.inner.log, "shutting down cluster pool");

        let pools: Vec<Arc<HostPool<C>>> = {
            let mut maps = self.inner.hosts.lock().unwrap();
            maps.state = ClusterPoolState::Stopping;
            let maps = &mut *maps;
            maps.live
                .drain()
                .chain(maps.down.drain())
                .map(|(_, pool)| pool)
                .collect()
        };

        // Cancel the probe before tearing pools down so no pass races
        // the disposal.
        self._probe_guard = None;
        self.probe_timer = None;

        for pool in pools {
            pool.invalidate_all();
        }

        self.inner.hosts.lock().unwrap().state =
            ClusterPoolState::Stopped;
        Ok(())
    }

    fn ensure_running(&self, maps: &HostMaps<C>) -> Result<(), Error> {
        match maps.state {
            ClusterPoolState::Running => Ok(()),
            _ => Err(Error::Fatal(String::from(
                "cluster pool is shut down",
            ))),
        }
    }

    fn live_pools(&self) -> Result<Vec<Arc<HostPool<C>>>, Error> {
        let maps = self.inner.hosts.lock().unwrap();
        self.ensure_running(&maps)?;
        Ok(maps.live.values().cloned().collect())
    }

    fn snapshot_live(&self) -> Vec<Arc<HostPool<C>>> {
        let maps = self.inner.hosts.lock().unwrap();
        maps.live.values().cloned().collect()
    }

    fn lookup_pool(&self, host: &Host) -> Option<Arc<HostPool<C>>> {
        let maps = self.inner.hosts.lock().unwrap();
        maps.live
            .get(host)
            .or_else(|| maps.down.get(host))
            .cloned()
    }
}

impl<C, F> Clone for ClusterPool<C, F>
where
    C: Channel,
    F: Fn(&Host) -> C + Send + Sync + 'static,
{
    fn clone(&self) -> ClusterPool<C, F> {
        ClusterPool {
            inner: self.inner.clone(),
            create_channel: self.create_channel.clone(),
            probe_timer: None,
            _probe_guard: None,
        }
    }
}

impl<C, F> Drop for ClusterPool<C, F>
where
    C: Channel,
    F: Fn(&Host) -> C + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Shut the pool down and ignore the result. The returned Result
        // will be an Err if this instance is a clone or was already shut
        // down explicitly; there is no further handling to be done here.
        let _ = self.shutdown();
    }
}

// Pick the pool with the fewest active connections. First-seen wins ties,
// which is deterministic over one snapshot.
fn least_active<'a, C, I>(pools: I) -> Option<&'a Arc<HostPool<C>>>
where
    C: Channel,
    I: Iterator<Item = &'a Arc<HostPool<C>>>,
{
    let mut best: Option<(&'a Arc<HostPool<C>>, u32)> = None;
    for pool in pools {
        let active = pool.num_active();
        match best {
            Some((_, best_active)) if active >= best_active => {}
            _ => best = Some((pool, active)),
        }
    }
    best.map(|(pool, _)| pool)
}

// One full probe pass: try to promote every down host, then demote every
// live host that fails its probe. Probes use one-shot connections opened
// outside of any pool so a sick pool cannot mask a healthy host or vice
// versa. Serialized by the probe mutex; a tick that lands within the
// quiet period of the previous pass is dropped.
fn run_probe_pass<C, F>(registry: &Registry<C>, create_channel: &F)
where
    C: Channel,
    F: Fn(&Host) -> C,
{
    let mut probe = registry.probe.lock().unwrap();
    if let Some(last) = probe.last_finished {
        if last.elapsed() < registry.probe_quiet_period {
            debug!(
                registry.log,
                "skipping probe pass; previous pass finished recently"
            );
            return;
        }
    }

    let (live_hosts, down_hosts) = {
        let maps = registry.hosts.lock().unwrap();
        match maps.state {
            ClusterPoolState::Running => {}
            _ => return,
        }
        (
            maps.live.keys().cloned().collect::<Vec<Host>>(),
            maps.down.keys().cloned().collect::<Vec<Host>>(),
        )
    };

    let mut promotions = Vec::new();
    for host in down_hosts {
        if probe_host(registry, create_channel, &host) {
            warn!(
                registry.log,
                "host {} is no longer down, returning it to service", host
            );
            promotions.push(host);
        } else {
            warn!(
                registry.log,
                "host {} is still down, leaving it out of service", host
            );
        }
    }

    let mut demotions = Vec::new();
    for host in live_hosts {
        if !probe_host(registry, create_channel, &host) {
            warn!(
                registry.log,
                "detected that host {} is down, removing it from service",
                host
            );
            demotions.push(host);
        }
    }

    {
        let mut maps = registry.hosts.lock().unwrap();
        for host in demotions {
            if let Some(pool) = maps.live.remove(&host) {
                maps.down.insert(host, pool);
            }
        }
        for host in promotions {
            if let Some(pool) = maps.down.remove(&host) {
                maps.live.insert(host, pool);
            }
        }
    }

    probe.last_finished = Some(Instant::now());
}

// Liveness check for one host: open a fresh one-shot channel, issue the
// trivial RPC, tear it down. Never borrows from the pool being judged.
fn probe_host<C, F>(
    registry: &Registry<C>,
    create_channel: &F,
    host: &Host,
) -> bool
where
    C: Channel,
    F: Fn(&Host) -> C,
{
    let target = host
        .clone()
        .with_socket_timeout(Some(registry.probe_timeout));
    let mut channel = create_channel(&target);
    let result = channel
        .open()
        .and_then(|()| channel.cluster_name().map(|_| ()));
    channel.close();
    match result {
        Ok(()) => true,
        Err(e) => {
            debug!(registry.log, "probe of {} failed: {}", host, e);
            false
        }
    }
}
