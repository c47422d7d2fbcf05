// Copyright 2020 Joyent, Inc.

use std::sync::atomic::{AtomicU64, Ordering};

/// Diagnostic counters incremented by the failover machinery. Each counter
/// is bumped exactly once per recoverable occurrence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Counter {
    /// A host taken from a caller-supplied list could not produce a
    /// connection and the next list member was tried instead.
    RecoverableLbConnectErrors,
    /// An attempt failed with a timeout and was retried.
    RecoverableTimedOutExceptions,
    /// An attempt failed with a replica shortfall and was retried.
    RecoverableUnavailableExceptions,
    /// An attempt failed with a transport error and was retried.
    RecoverableTransportExceptions,
}

/// Sink for diagnostic counters.
///
/// The pool does not export metrics itself; it hands increments to
/// whatever the application wires in here.
pub trait Monitor: Send + Sync {
    fn increment(&self, counter: Counter);
}

/// Discards every increment. The default when no sink is configured.
#[derive(Debug, Default)]
pub struct NullMonitor;

impl Monitor for NullMonitor {
    fn increment(&self, _counter: Counter) {}
}

/// A sink that simply tallies increments into atomics, readable at any
/// time. Suitable for tests and for polling-style metric exports.
#[derive(Debug, Default)]
pub struct CountingMonitor {
    lb_connect_errors: AtomicU64,
    timed_out: AtomicU64,
    unavailable: AtomicU64,
    transport: AtomicU64,
}

impl CountingMonitor {
    pub fn new() -> Self {
        CountingMonitor::default()
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.cell(counter).load(Ordering::Relaxed)
    }

    fn cell(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::RecoverableLbConnectErrors => &self.lb_connect_errors,
            Counter::RecoverableTimedOutExceptions => &self.timed_out,
            Counter::RecoverableUnavailableExceptions => &self.unavailable,
            Counter::RecoverableTransportExceptions => &self.transport,
        }
    }
}

impl Monitor for CountingMonitor {
    fn increment(&self, counter: Counter) {
        self.cell(counter).fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counting_monitor_tallies_per_counter() {
        let monitor = CountingMonitor::new();
        monitor.increment(Counter::RecoverableTimedOutExceptions);
        monitor.increment(Counter::RecoverableTimedOutExceptions);
        monitor.increment(Counter::RecoverableTransportExceptions);

        assert_eq!(monitor.get(Counter::RecoverableTimedOutExceptions), 2);
        assert_eq!(monitor.get(Counter::RecoverableTransportExceptions), 1);
        assert_eq!(monitor.get(Counter::RecoverableUnavailableExceptions), 0);
        assert_eq!(monitor.get(Counter::RecoverableLbConnectErrors), 0);
    }
}
