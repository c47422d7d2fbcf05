// Copyright 2020 Joyent, Inc.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use slog::{o, Logger};

use carom::channel::Channel;
use carom::error::Error;
use carom::host::Host;
use carom::host_pool::HostPool;

#[derive(Debug)]
struct DummyChannel {
    connected: bool,
}

impl DummyChannel {
    fn new(_host: &Host) -> Self {
        DummyChannel { connected: false }
    }
}

impl Channel for DummyChannel {
    type Error = Error;

    fn open(&mut self) -> Result<(), Error> {
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) {
        self.connected = false;
    }

    fn cluster_name(&mut self) -> Result<String, Error> {
        Ok(String::from("test-cluster"))
    }
}

fn test_log() -> Logger {
    Logger::root(slog::Discard, o!())
}

#[test]
fn borrow_release_accounting() {
    let host = Host::new("127.0.0.1", 55555)
        .with_max_active(3)
        .with_max_idle(3);
    let pool = HostPool::new(host, test_log());

    assert_eq!(pool.num_active(), 0);
    assert_eq!(pool.num_idle(), 0);
    assert!(!pool.is_exhausted());

    let c1 = pool.borrow(&DummyChannel::new).unwrap();
    let c2 = pool.borrow(&DummyChannel::new).unwrap();
    let c3 = pool.borrow(&DummyChannel::new).unwrap();
    assert_eq!(pool.num_active(), 3);
    assert_eq!(pool.num_idle(), 0);
    assert!(pool.is_exhausted());

    // Serials are distinct; each borrow opened a fresh channel.
    assert_ne!(c1.serial(), c2.serial());
    assert_ne!(c2.serial(), c3.serial());

    pool.release(c1).unwrap();
    assert_eq!(pool.num_active(), 2);
    assert_eq!(pool.num_idle(), 1);
    assert!(!pool.is_exhausted());

    pool.release(c2).unwrap();
    pool.release(c3).unwrap();
    assert_eq!(pool.num_active(), 0);
    assert_eq!(pool.num_idle(), 3);

    // A borrow now reuses an idle connection instead of opening.
    let c4 = pool.borrow(&DummyChannel::new).unwrap();
    assert_eq!(pool.num_idle(), 2);
    assert_eq!(pool.num_active(), 1);
    pool.release(c4).unwrap();
}

#[test]
fn exhausted_pool_borrow_times_out() {
    let host = Host::new("127.0.0.1", 55556)
        .with_max_active(2)
        .with_borrow_timeout(Some(Duration::from_millis(300)));
    let pool = Arc::new(HostPool::new(host, test_log()));

    let c1 = pool.borrow(&DummyChannel::new).unwrap();
    let c2 = pool.borrow(&DummyChannel::new).unwrap();
    assert!(pool.is_exhausted());

    let pool_clone = pool.clone();
    let waiter = thread::spawn(move || {
        let started = Instant::now();
        let result = pool_clone.borrow(&DummyChannel::new);
        (result, started.elapsed())
    });

    // The third borrower should show up in the blocked count while it
    // waits.
    let mut saw_blocked = false;
    for _ in 0..250 {
        if pool.num_blocked() == 1 {
            saw_blocked = true;
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }

    let (result, waited) = waiter.join().unwrap();
    assert!(saw_blocked);
    match result {
        Err(Error::PoolExhausted { .. }) => (),
        other => panic!("expected pool exhaustion, got {:?}", other),
    }
    assert!(waited >= Duration::from_millis(300));
    assert_eq!(pool.num_blocked(), 0);

    pool.release(c1).unwrap();
    pool.release(c2).unwrap();
}

#[test]
fn release_wakes_a_waiter() {
    let host = Host::new("127.0.0.1", 55557)
        .with_max_active(1)
        .with_borrow_timeout(Some(Duration::from_secs(5)));
    let pool = Arc::new(HostPool::new(host, test_log()));

    let c1 = pool.borrow(&DummyChannel::new).unwrap();

    let pool_clone = pool.clone();
    let waiter = thread::spawn(move || {
        let conn = pool_clone.borrow(&DummyChannel::new).unwrap();
        pool_clone.release(conn).unwrap();
    });

    // Give the waiter time to block, then free the slot.
    thread::sleep(Duration::from_millis(50));
    pool.release(c1).unwrap();

    waiter.join().unwrap();
    assert_eq!(pool.num_active(), 0);
    assert_eq!(pool.num_blocked(), 0);
}

#[test]
fn stale_connections_are_not_pooled() {
    let host = Host::new("127.0.0.1", 55558).with_max_active(2);
    let pool = HostPool::new(host, test_log());

    let mut conn = pool.borrow(&DummyChannel::new).unwrap();
    conn.mark_error();
    assert!(conn.is_stale());
    pool.release(conn).unwrap();

    assert_eq!(pool.num_active(), 0);
    assert_eq!(pool.num_idle(), 0);
}

#[test]
fn idle_overflow_is_destroyed() {
    let host = Host::new("127.0.0.1", 55559)
        .with_max_active(3)
        .with_max_idle(1);
    let pool = HostPool::new(host, test_log());

    let c1 = pool.borrow(&DummyChannel::new).unwrap();
    let c2 = pool.borrow(&DummyChannel::new).unwrap();
    let c3 = pool.borrow(&DummyChannel::new).unwrap();
    pool.release(c1).unwrap();
    pool.release(c2).unwrap();
    pool.release(c3).unwrap();

    // Only one idle connection is retained past the shrink target.
    assert_eq!(pool.num_idle(), 1);
    assert_eq!(pool.num_active(), 0);
}

#[test]
fn invalidate_frees_a_slot() {
    let host = Host::new("127.0.0.1", 55560).with_max_active(1);
    let pool = HostPool::new(host, test_log());

    let conn = pool.borrow(&DummyChannel::new).unwrap();
    assert!(pool.is_exhausted());
    pool.invalidate(conn);
    assert_eq!(pool.num_active(), 0);
    assert!(!pool.is_exhausted());

    let conn = pool.borrow(&DummyChannel::new).unwrap();
    pool.release(conn).unwrap();
}

#[test]
fn invalidate_all_supersedes_borrowed_connections() {
    let host = Host::new("127.0.0.1", 55561)
        .with_max_active(3)
        .with_max_idle(3);
    let pool = HostPool::new(host, test_log());

    let held = pool.borrow(&DummyChannel::new).unwrap();
    let idle = pool.borrow(&DummyChannel::new).unwrap();
    pool.release(idle).unwrap();
    assert_eq!(pool.num_idle(), 1);

    pool.invalidate_all();
    assert_eq!(pool.num_idle(), 0);
    assert_eq!(pool.num_active(), 1);

    // The borrowed connection is from the superseded epoch; releasing it
    // destroys it rather than pooling it.
    pool.release(held).unwrap();
    assert_eq!(pool.num_idle(), 0);
    assert_eq!(pool.num_active(), 0);
}

#[test]
fn releasing_to_the_wrong_pool_is_fatal() {
    let pool_a =
        HostPool::new(Host::new("127.0.0.1", 55562), test_log());
    let pool_b =
        HostPool::new(Host::new("127.0.0.1", 55563), test_log());

    let conn = pool_a.borrow(&DummyChannel::new).unwrap();
    match pool_b.release(conn) {
        Err(Error::Fatal(_)) => (),
        other => panic!("expected a fatal error, got {:?}", other),
    }
}

#[derive(Debug)]
struct FlakyChannel {
    refuse: Arc<AtomicBool>,
}

impl Channel for FlakyChannel {
    type Error = Error;

    fn open(&mut self) -> Result<(), Error> {
        if self.refuse.load(Ordering::SeqCst) {
            Err(Error::Transport(String::from("connection refused")))
        } else {
            Ok(())
        }
    }

    fn close(&mut self) {}

    fn cluster_name(&mut self) -> Result<String, Error> {
        Ok(String::from("test-cluster"))
    }
}

#[test]
fn failed_open_returns_the_reserved_slot() {
    let host = Host::new("127.0.0.1", 55564).with_max_active(1);
    let pool = HostPool::new(host, test_log());
    let refuse = Arc::new(AtomicBool::new(true));

    let refuse_clone = refuse.clone();
    let create = move |_host: &Host| FlakyChannel {
        refuse: refuse_clone.clone(),
    };

    match pool.borrow(&create) {
        Err(Error::Transport(_)) => (),
        other => panic!("expected a transport error, got {:?}", other),
    }
    // The reserved slot was compensated; the pool is not leaking
    // capacity.
    assert_eq!(pool.num_active(), 0);

    refuse.store(false, Ordering::SeqCst);
    let conn = pool.borrow(&create).unwrap();
    assert_eq!(pool.num_active(), 1);
    pool.release(conn).unwrap();
}
