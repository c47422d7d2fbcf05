// Copyright 2020 Joyent, Inc.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use slog::{warn, Logger};

use crate::channel::Channel;
use crate::cluster_pool::ClusterPool;
use crate::error::{Classify, Error, ErrorKind};
use crate::host::Host;
use crate::monitor::{Counter, Monitor};

/// How many replicas must acknowledge an operation before the server
/// calls it done. The pool does not interpret these beyond passing them
/// to operations and stepping them down under the degrading policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConsistencyLevel {
    Any,
    One,
    Quorum,
    All,
}

impl ConsistencyLevel {
    // One step down: ALL backs off to QUORUM, everything else to ONE.
    fn degraded(self) -> ConsistencyLevel {
        match self {
            ConsistencyLevel::All => ConsistencyLevel::Quorum,
            _ => ConsistencyLevel::One,
        }
    }
}

/// How long a degraded consistency level stays in force before reverting.
pub const DEFAULT_DEGRADE_RESET_MILLIS: u64 = 10_000;

#[derive(Debug, Default)]
struct DegradeState {
    level: Option<ConsistencyLevel>,
    expires_at: Option<Instant>,
}

/// What the executor should do when a call to a host fails and the host
/// itself is suspect.
///
/// `fail_fast` surfaces the first error untouched. `try_one_next` tries
/// at most one additional host. `try_all` walks every live host once.
/// `degrade_consistency` additionally steps the operation's consistency
/// level down for a short window after Unavailable or transport
/// failures, then reverts.
///
/// The presets are immutable values; the degrade window is the only
/// mutable policy state and it lives behind the policy's own mutex, so a
/// single policy can safely be shared across threads and operations.
#[derive(Debug)]
pub struct FailoverPolicy {
    num_retries: u32,
    sleep_between_hosts: Duration,
    degrade: Option<Mutex<DegradeState>>,
    degrade_window: Duration,
}

impl FailoverPolicy {
    /// A policy with an explicit retry budget and inter-host pause, and
    /// no consistency degrading.
    pub fn new(num_retries: u32, sleep_between_hosts: Duration) -> Self {
        FailoverPolicy {
            num_retries,
            sleep_between_hosts,
            degrade: None,
            degrade_window: Duration::from_millis(0),
        }
    }

    /// On failure, return the error to the caller and don't try anything
    /// smart.
    pub fn fail_fast() -> Self {
        FailoverPolicy::new(0, Duration::from_millis(0))
    }

    /// On failure, try one more host before giving up.
    pub fn try_one_next() -> Self {
        FailoverPolicy::new(1, Duration::from_millis(0))
    }

    /// On failure, try every live host once before giving up.
    pub fn try_all() -> Self {
        FailoverPolicy::new(u32::max_value(), Duration::from_millis(0))
    }

    /// Like `try_all` bounded to five retries, and on Unavailable or
    /// transport failures additionally run the next attempts at a
    /// degraded consistency level for ten seconds.
    pub fn degrade_consistency() -> Self {
        FailoverPolicy::degrade_consistency_with_window(
            Duration::from_millis(DEFAULT_DEGRADE_RESET_MILLIS),
        )
    }

    /// `degrade_consistency` with an explicit window length.
    pub fn degrade_consistency_with_window(window: Duration) -> Self {
        FailoverPolicy {
            num_retries: 5,
            sleep_between_hosts: Duration::from_millis(0),
            degrade: Some(Mutex::new(DegradeState::default())),
            degrade_window: window,
        }
    }

    pub fn num_retries(&self) -> u32 {
        self.num_retries
    }

    pub fn sleep_between_hosts(&self) -> Duration {
        self.sleep_between_hosts
    }

    // An unbounded policy is capped by the live host set instead of the
    // retry counter.
    fn is_unbounded(&self) -> bool {
        self.num_retries == u32::max_value()
    }

    /// The consistency level the next attempt should run at. Returns the
    /// degraded level while a degrade window is open and `current`
    /// otherwise; an expired window is cleared on the way through.
    pub fn check_consistency(
        &self,
        current: ConsistencyLevel,
    ) -> ConsistencyLevel {
        match &self.degrade {
            None => current,
            Some(state) => {
                let mut state = state.lock().unwrap();
                if let Some(expiry) = state.expires_at {
                    if Instant::now() >= expiry {
                        state.expires_at = None;
                        state.level = None;
                    }
                }
                state.level.unwrap_or(current)
            }
        }
    }

    /// Called by the executor after a timed-out attempt.
    pub fn handle_timeout(&self, _attempt: u32) {}

    /// Called by the executor after an Unavailable attempt.
    pub fn handle_unavailable(
        &self,
        current: ConsistencyLevel,
        attempt: u32,
    ) {
        self.open_degrade_window(current, attempt);
    }

    /// Called by the executor after a transport failure.
    pub fn handle_transport_error(
        &self,
        current: ConsistencyLevel,
        attempt: u32,
    ) {
        self.open_degrade_window(current, attempt);
    }

    fn open_degrade_window(
        &self,
        current: ConsistencyLevel,
        _attempt: u32,
    ) {
        if let Some(state) = &self.degrade {
            let mut state = state.lock().unwrap();
            state.level = Some(current.degraded());
            state.expires_at =
                Some(Instant::now() + self.degrade_window);
        }
    }
}

/// Runs one application operation against the cluster with retries.
///
/// The executor borrows a connection, runs the operation, and on a
/// recoverable failure invalidates the connection and moves on to a host
/// it has not yet tried, until the policy's budget is spent. Application
/// errors are surfaced immediately with the connection released intact.
/// Every borrow is paired with exactly one release or invalidate,
/// including on the failure paths.
pub struct FailoverExecutor<'a, C, F>
where
    C: Channel,
    F: Fn(&Host) -> C + Send + Sync + 'static,
{
    pool: &'a ClusterPool<C, F>,
    policy: &'a FailoverPolicy,
    monitor: Arc<dyn Monitor>,
    log: Logger,
}

impl<'a, C, F> FailoverExecutor<'a, C, F>
where
    C: Channel,
    F: Fn(&Host) -> C + Send + Sync + 'static,
{
    pub fn new(
        pool: &'a ClusterPool<C, F>,
        policy: &'a FailoverPolicy,
    ) -> Self {
        FailoverExecutor {
            pool,
            policy,
            monitor: pool.monitor(),
            log: pool.log().clone(),
        }
    }

    /// Execute `op` at the given consistency level under this executor's
    /// policy. The operation may be attempted several times, each time on
    /// a fresh connection; it must be safe to re-issue.
    pub fn operate<T, O>(
        &self,
        mut op: O,
        consistency: ConsistencyLevel,
    ) -> Result<T, Error>
    where
        O: FnMut(&mut C, ConsistencyLevel) -> Result<T, C::Error>,
    {
        let mut tried: HashSet<Host> = HashSet::new();
        let mut attempts: u32 = 0;

        loop {
            // Borrow failures (pool exhaustion, empty cluster) are not
            // part of the retry budget; they surface as-is.
            let mut conn = self.pool.borrow_skipping(&tried)?;
            tried.insert(conn.host().clone());

            let effective = self.policy.check_consistency(consistency);
            match op(conn.channel_mut(), effective) {
                Ok(result) => {
                    if let Err(e) = self.pool.release(conn) {
                        warn!(
                            self.log,
                            "unable to release a connection: {}", e
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    let kind = e.kind();
                    if kind == ErrorKind::Application {
                        // The host did its job; the request was the
                        // problem. Hand the connection back untouched.
                        if let Err(re) = self.pool.release(conn) {
                            warn!(
                                self.log,
                                "unable to release a connection: {}", re
                            );
                        }
                        return Err(Error::from_classified(e));
                    }

                    conn.mark_error();
                    let failed_host = conn.host().clone();
                    self.pool.invalidate(conn);
                    self.record_failure(kind, effective, attempts);
                    attempts += 1;

                    let budget_spent = if self.policy.is_unbounded() {
                        self.pool
                            .live_hosts()
                            .iter()
                            .all(|host| tried.contains(host))
                    } else {
                        attempts > self.policy.num_retries()
                    };
                    warn!(
                        self.log,
                        "operation failed on {}: {}",
                        failed_host,
                        e;
                        "attempt" => attempts,
                        "retrying" => !budget_spent
                    );
                    if budget_spent {
                        return Err(Error::from_classified(e));
                    }

                    let pause = self.policy.sleep_between_hosts();
                    if pause > Duration::from_millis(0) {
                        thread::sleep(pause);
                    }
                }
            }
        }
    }

    fn record_failure(
        &self,
        kind: ErrorKind,
        level: ConsistencyLevel,
        attempt: u32,
    ) {
        match kind {
            ErrorKind::Timeout => {
                self.monitor
                    .increment(Counter::RecoverableTimedOutExceptions);
                self.policy.handle_timeout(attempt);
            }
            ErrorKind::Unavailable => {
                self.monitor.increment(
                    Counter::RecoverableUnavailableExceptions,
                );
                self.policy.handle_unavailable(level, attempt);
            }
            ErrorKind::Transport => {
                self.monitor
                    .increment(Counter::RecoverableTransportExceptions);
                self.policy.handle_transport_error(level, attempt);
            }
            // Application errors never reach here; they return before
            // the failure is recorded.
            ErrorKind::Application => {}
        }
    }
}
