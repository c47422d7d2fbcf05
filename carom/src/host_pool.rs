// Copyright 2020 Joyent, Inc.

pub mod types;

use std::sync::{Condvar, Mutex};
use std::time::Instant;

use slog::{debug, warn, Logger};

use crate::channel::Channel;
use crate::connection::Connection;
use crate::error::Error;
use crate::host::Host;
use crate::host_pool::types::{ConnectionCount, HostPoolStats, PoolData};

/// A bounded pool of reusable connections to exactly one host.
///
/// All bookkeeping is serialized behind a single pool-scoped mutex with a
/// condition variable for threads waiting out a saturated pool. The mutex
/// is never held across channel I/O: opening happens after a slot has
/// been reserved and the lock dropped, and closing happens after the
/// guard is gone, with the counters compensated if the open fails.
#[derive(Debug)]
pub struct HostPool<C: Channel> {
    host: Host,
    data: Mutex<PoolData<C>>,
    cv: Condvar,
    log: Logger,
}

impl<C: Channel> HostPool<C> {
    pub fn new(host: Host, log: Logger) -> Self {
        let max = host.max_active() as usize;
        HostPool {
            host,
            data: Mutex::new(PoolData::new(max)),
            cv: Condvar::new(),
            log,
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Borrow a connection: an idle one if present, a freshly opened one
    /// if there is capacity, and otherwise block until a connection is
    /// released or the host's borrow timeout elapses.
    pub fn borrow<F>(&self, create_channel: &F) -> Result<Connection<C>, Error>
    where
        F: Fn(&Host) -> C,
    {
        let timeout = self.host.borrow_timeout();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut data = self.data.lock().unwrap();
        loop {
            if let Some(mut conn) = data.idle.pop_front() {
                data.active += 1.into();
                conn.mark_borrowed();
                return Ok(conn);
            }

            let in_use =
                u32::from(data.active) + data.idle.len() as u32;
            if in_use < self.host.max_active() {
                // Reserve the slot, then open outside the lock.
                data.active += 1.into();
                let epoch = data.epoch;
                drop(data);

                let mut conn = Connection::new(
                    create_channel(&self.host),
                    self.host.clone(),
                    epoch,
                );
                match conn.open() {
                    Ok(()) => {
                        debug!(
                            self.log,
                            "opened connection {}", conn.serial()
                        );
                        conn.mark_borrowed();
                        return Ok(conn);
                    }
                    Err(e) => {
                        // Give the reserved slot back and let the next
                        // waiter have a go.
                        let mut data = self.data.lock().unwrap();
                        data.active -= 1.into();
                        self.cv.notify_one();
                        return Err(e);
                    }
                }
            }

            // Saturated; wait for a release or an invalidation.
            data.blocked += 1.into();
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        data.blocked -= 1.into();
                        return Err(self.exhausted(timeout));
                    }
                    let (guard, wait) = self
                        .cv
                        .wait_timeout(data, deadline - now)
                        .unwrap();
                    data = guard;
                    data.blocked -= 1.into();
                    if wait.timed_out() {
                        return Err(self.exhausted(timeout));
                    }
                }
                None => {
                    data = self.cv.wait(data).unwrap();
                    data.blocked -= 1.into();
                }
            }
        }
    }

    /// Return a borrowed connection. Stale connections, connections from
    /// a superseded epoch, and overflow beyond the host's idle target are
    /// destroyed instead of pooled. Releasing a connection belonging to a
    /// different host is a programming error.
    pub fn release(&self, mut conn: Connection<C>) -> Result<(), Error> {
        if conn.host() != &self.host {
            return Err(Error::Fatal(format!(
                "{} released to the pool for {}",
                conn, self.host
            )));
        }

        let mut data = self.data.lock().unwrap();
        if data.active > ConnectionCount::from(0) {
            data.active -= 1.into();
        }
        let discard = conn.is_stale()
            || conn.epoch() != data.epoch
            || data.idle.len() as u32 >= self.host.max_idle();
        if discard {
            self.cv.notify_one();
            drop(data);
            debug!(self.log, "destroying connection {}", conn.serial());
            conn.close();
        } else {
            conn.mark_released();
            data.idle.push_back(conn);
            self.cv.notify_one();
        }
        Ok(())
    }

    /// Destroy a borrowed connection unconditionally, freeing its slot.
    pub fn invalidate(&self, mut conn: Connection<C>) {
        if conn.host() != &self.host {
            // Routing is by host identity, so this cannot happen through
            // the cluster; destroy the connection but leave the counters
            // alone.
            warn!(
                self.log,
                "{} invalidated against the pool for {}", conn, self.host
            );
            conn.close();
            return;
        }

        let mut data = self.data.lock().unwrap();
        if data.active > ConnectionCount::from(0) {
            data.active -= 1.into();
        }
        self.cv.notify_one();
        drop(data);
        conn.close();
    }

    /// Destroy every idle connection and schedule every borrowed one for
    /// destruction on release, by superseding the pool's epoch.
    pub fn invalidate_all(&self) {
        let mut data = self.data.lock().unwrap();
        data.epoch += 1;
        let drained: Vec<Connection<C>> = data.idle.drain(..).collect();
        self.cv.notify_all();
        drop(data);
        if !drained.is_empty() {
            debug!(
                self.log,
                "destroying {} idle connections",
                drained.len()
            );
        }
        for mut conn in drained {
            conn.close();
        }
    }

    pub fn num_active(&self) -> u32 {
        u32::from(self.data.lock().unwrap().active)
    }

    pub fn num_idle(&self) -> u32 {
        self.data.lock().unwrap().idle.len() as u32
    }

    pub fn num_blocked(&self) -> u32 {
        u32::from(self.data.lock().unwrap().blocked)
    }

    /// True when every slot is borrowed and nothing is idle; the next
    /// borrow will block.
    pub fn is_exhausted(&self) -> bool {
        let data = self.data.lock().unwrap();
        u32::from(data.active) >= self.host.max_active()
            && data.idle.is_empty()
    }

    pub fn stats(&self) -> HostPoolStats {
        let data = self.data.lock().unwrap();
        HostPoolStats {
            active: data.active,
            idle: ConnectionCount::from(data.idle.len() as u32),
            blocked: data.blocked,
        }
    }

    fn exhausted(&self, timeout: Option<std::time::Duration>) -> Error {
        Error::PoolExhausted {
            host: String::from(self.host.name()),
            waited: timeout.unwrap_or_default(),
        }
    }
}
