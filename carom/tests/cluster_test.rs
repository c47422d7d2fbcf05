// Copyright 2020 Joyent, Inc.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use slog::{o, Logger};

use carom::channel::Channel;
use carom::cluster_pool::types::ClusterPoolOptions;
use carom::cluster_pool::ClusterPool;
use carom::error::Error;
use carom::host::Host;
use carom::monitor::{CountingMonitor, Counter, Monitor};

//
// A channel whose reachability is scripted per host: any host whose name
// is in the shared `down` set refuses to open and fails the liveness
// RPC, exactly as an unplugged server would.
//
#[derive(Debug)]
struct ScriptedChannel {
    host_name: String,
    down: Arc<Mutex<HashSet<String>>>,
}

impl ScriptedChannel {
    fn reachable(&self) -> Result<(), Error> {
        if self.down.lock().unwrap().contains(&self.host_name) {
            Err(Error::Transport(format!(
                "{} unreachable",
                self.host_name
            )))
        } else {
            Ok(())
        }
    }
}

impl Channel for ScriptedChannel {
    type Error = Error;

    fn open(&mut self) -> Result<(), Error> {
        self.reachable()
    }

    fn close(&mut self) {}

    fn cluster_name(&mut self) -> Result<String, Error> {
        self.reachable()?;
        Ok(String::from("test-cluster"))
    }
}

struct Fixture {
    pool: ClusterPool<
        ScriptedChannel,
        Box<dyn Fn(&Host) -> ScriptedChannel + Send + Sync>,
    >,
    down: Arc<Mutex<HashSet<String>>>,
    monitor: Arc<CountingMonitor>,
}

fn fixture(hosts: Vec<Host>, quiet_period: Option<u64>) -> Fixture {
    let down: Arc<Mutex<HashSet<String>>> =
        Arc::new(Mutex::new(HashSet::new()));
    let monitor = Arc::new(CountingMonitor::new());
    let down_clone = down.clone();
    let create: Box<dyn Fn(&Host) -> ScriptedChannel + Send + Sync> =
        Box::new(move |host: &Host| ScriptedChannel {
            host_name: String::from(host.name()),
            down: down_clone.clone(),
        });
    let pool = ClusterPool::new(
        ClusterPoolOptions {
            hosts,
            // Keep the scheduled probe far away; tests drive passes
            // explicitly through probe_once.
            probe_interval: Some(3600),
            probe_timeout: Some(100),
            probe_quiet_period: quiet_period,
            log: Some(Logger::root(slog::Discard, o!())),
            monitor: Some(monitor.clone() as Arc<dyn Monitor>),
        },
        create,
    );
    Fixture {
        pool,
        down,
        monitor,
    }
}

fn mark_down(fixture: &Fixture, host: &Host) {
    fixture
        .down
        .lock()
        .unwrap()
        .insert(String::from(host.name()));
}

fn mark_up(fixture: &Fixture, host: &Host) {
    fixture.down.lock().unwrap().remove(host.name());
}

#[test]
fn borrow_prefers_the_least_active_host() {
    let h1 = Host::new("10.0.0.1", 9160).with_max_active(10);
    let h2 = Host::new("10.0.0.2", 9160).with_max_active(10);
    let h3 = Host::new("10.0.0.3", 9160).with_max_active(10);
    let f =
        fixture(vec![h1.clone(), h2.clone(), h3.clone()], Some(0));

    let mut held = Vec::new();
    for _ in 0..3 {
        held.push(f.pool.borrow_from(&h1).unwrap());
    }
    held.push(f.pool.borrow_from(&h2).unwrap());
    for _ in 0..2 {
        held.push(f.pool.borrow_from(&h3).unwrap());
    }

    // Active counts are now 3, 1, 2; the next borrow lands on h2.
    let conn = f.pool.borrow().unwrap();
    assert_eq!(conn.host(), &h2);

    f.pool.release(conn).unwrap();
    for conn in held {
        f.pool.release(conn).unwrap();
    }
}

#[test]
fn borrow_on_an_empty_cluster_fails() {
    let f = fixture(vec![], Some(0));
    match f.pool.borrow() {
        Err(Error::NoHostsAvailable) => (),
        other => panic!("expected no hosts, got {:?}", other),
    }
}

#[test]
fn add_host_is_idempotent() {
    let h1 = Host::new("10.0.0.1", 9160);
    let f = fixture(vec![h1.clone()], Some(0));

    f.pool.add_host(h1.clone());
    f.pool.add_host(Host::new("10.0.0.1", 9160).with_max_active(2));
    assert_eq!(f.pool.num_pools(), 1);

    f.pool.add_host(Host::new("10.0.0.2", 9160));
    assert_eq!(f.pool.num_pools(), 2);
}

#[test]
fn probe_partitions_and_heals_hosts() {
    let h1 = Host::new("10.0.0.1", 9160);
    let h2 = Host::new("10.0.0.2", 9160);
    let f = fixture(vec![h1.clone(), h2.clone()], Some(0));

    // First pass: h2 is unreachable and gets demoted.
    mark_down(&f, &h2);
    f.pool.probe_once();
    assert_eq!(f.pool.down_hosts(), vec![h2.clone()].into_iter().collect());
    assert_eq!(f.pool.live_hosts(), vec![h1.clone()].into_iter().collect());

    // Second pass with the roles swapped: h2 recovers, h1 dies. The
    // pass promotes one and demotes the other.
    mark_up(&f, &h2);
    mark_down(&f, &h1);
    f.pool.probe_once();
    assert_eq!(f.pool.down_hosts(), vec![h1.clone()].into_iter().collect());
    assert_eq!(f.pool.live_hosts(), vec![h2.clone()].into_iter().collect());

    // Known hosts is the union of both sides throughout.
    let known = f.pool.known_hosts();
    assert_eq!(known.len(), 2);
    assert!(known.contains(&h1));
    assert!(known.contains(&h2));

    // A borrow now can only land on the live host.
    let conn = f.pool.borrow().unwrap();
    assert_eq!(conn.host(), &h2);
    f.pool.release(conn).unwrap();
}

#[test]
fn probe_passes_coalesce_within_the_quiet_period() {
    let h1 = Host::new("10.0.0.1", 9160);
    // Default ten second quiet period.
    let f = fixture(vec![h1.clone()], None);

    f.pool.probe_once();
    assert_eq!(f.pool.down_hosts().len(), 0);

    // The host dies, but the next pass lands inside the quiet period
    // and is skipped; the host stays (incorrectly, for now) live.
    mark_down(&f, &h1);
    f.pool.probe_once();
    assert_eq!(f.pool.down_hosts().len(), 0);
    assert_eq!(f.pool.live_hosts().len(), 1);
}

#[test]
fn remove_host_detaches_in_flight_borrowers() {
    let h1 = Host::new("10.0.0.1", 9160);
    let f = fixture(vec![h1.clone()], Some(0));

    let conn = f.pool.borrow_from(&h1).unwrap();
    assert!(f.pool.remove_host(&h1));
    assert!(!f.pool.remove_host(&h1));
    assert_eq!(f.pool.known_hosts().len(), 0);

    // The borrower still gets a clean release; the connection is
    // destroyed rather than pooled into the detached pool.
    f.pool.release(conn).unwrap();
    assert_eq!(f.pool.num_active(), 0);
    assert_eq!(f.pool.num_idle(), 0);
}

#[test]
fn borrow_any_walks_the_list_until_a_host_answers() {
    let good = Host::new("10.0.0.1", 9160);
    let bad1 = Host::new("10.0.0.2", 9160);
    let bad2 = Host::new("10.0.0.3", 9160);
    let f = fixture(vec![], Some(0));
    mark_down(&f, &bad1);
    mark_down(&f, &bad2);

    let conn = f
        .pool
        .borrow_any(&[good.clone(), bad1.clone(), bad2.clone()])
        .unwrap();
    assert_eq!(conn.host(), &good);
    f.pool.release(conn).unwrap();
}

#[test]
fn borrow_any_surfaces_the_last_error() {
    let bad1 = Host::new("10.0.0.2", 9160);
    let bad2 = Host::new("10.0.0.3", 9160);
    let f = fixture(vec![], Some(0));
    mark_down(&f, &bad1);
    mark_down(&f, &bad2);

    match f.pool.borrow_any(&[bad1, bad2]) {
        Err(Error::Transport(_)) => (),
        other => panic!("expected a transport error, got {:?}", other),
    }
    // One host failed over, the other was the end of the list.
    assert_eq!(
        f.monitor.get(Counter::RecoverableLbConnectErrors),
        1
    );
}

#[test]
fn stats_aggregate_across_live_pools() {
    let h1 = Host::new("10.0.0.1", 9160).with_max_active(1);
    let h2 = Host::new("10.0.0.2", 9160).with_max_active(10);
    let f = fixture(vec![h1.clone(), h2.clone()], Some(0));

    let c1 = f.pool.borrow_from(&h1).unwrap();
    let c2 = f.pool.borrow_from(&h2).unwrap();
    let stats = f.pool.stats();
    assert_eq!(stats.num_pools, 2);
    assert_eq!(stats.num_active, 2);
    assert_eq!(stats.num_exhausted, 1);
    assert_eq!(
        f.pool.exhausted_pool_names(),
        vec![String::from(h1.name())]
    );

    f.pool.release(c1).unwrap();
    f.pool.release(c2).unwrap();
    assert_eq!(f.pool.num_active(), 0);
}

#[test]
fn shutdown_stops_service() {
    let h1 = Host::new("10.0.0.1", 9160);
    let mut f = fixture(vec![h1.clone()], Some(0));

    let conn = f.pool.borrow_from(&h1).unwrap();
    f.pool.release(conn).unwrap();
    assert_eq!(f.pool.num_idle(), 1);

    // A clone cannot stop the pool.
    let mut clone = f.pool.clone();
    match clone.shutdown() {
        Err(Error::Fatal(_)) => (),
        other => panic!("expected a fatal error, got {:?}", other),
    }

    f.pool.shutdown().unwrap();
    assert_eq!(f.pool.state(), String::from("stopped"));
    match f.pool.borrow() {
        Err(Error::Fatal(_)) => (),
        other => panic!("expected a fatal error, got {:?}", other),
    }
    match f.pool.shutdown() {
        Err(Error::Fatal(_)) => (),
        other => panic!("expected a fatal error, got {:?}", other),
    }
}
