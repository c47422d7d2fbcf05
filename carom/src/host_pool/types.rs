// Copyright 2020 Joyent, Inc.

use std::collections::VecDeque;

use derive_more::{Add, AddAssign, Display, From, Into, Sub, SubAssign};

use crate::channel::Channel;
use crate::connection::Connection;

/// A newtype wrapper around u32 used for counts of connections maintained
/// by a per-host pool.
#[derive(
    Add,
    AddAssign,
    Clone,
    Copy,
    Debug,
    Display,
    Eq,
    From,
    Into,
    Ord,
    PartialOrd,
    PartialEq,
    Sub,
    SubAssign,
)]
pub struct ConnectionCount(u32);

/// A point-in-time snapshot of one per-host pool's counters.
#[derive(Clone, Copy, Debug)]
pub struct HostPoolStats {
    /// Connections currently borrowed (or being opened for a borrower).
    pub active: ConnectionCount,
    /// Connections idle in the pool, ready to borrow.
    pub idle: ConnectionCount,
    /// Threads currently suspended waiting on a saturated pool.
    pub blocked: ConnectionCount,
}

// The state a per-host pool serializes behind its mutex: the idle queue,
// the counters, and the invalidation epoch. Connections created under an
// older epoch are destroyed on release rather than pooled.
#[derive(Debug)]
pub(crate) struct PoolData<C: Channel> {
    pub idle: VecDeque<Connection<C>>,
    pub active: ConnectionCount,
    pub blocked: ConnectionCount,
    pub epoch: u64,
}

impl<C: Channel> PoolData<C> {
    pub fn new(max_size: usize) -> Self {
        PoolData {
            idle: VecDeque::with_capacity(max_size),
            active: ConnectionCount::from(0),
            blocked: ConnectionCount::from(0),
            epoch: 0,
        }
    }
}
