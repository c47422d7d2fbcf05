// Copyright 2020 Joyent, Inc.

//! Client-side pooling and failover for a multi-node data store
//!
//! Carom manages per-host pools of long-lived RPC channels to the members
//! of a cluster and runs application operations against them with
//! failover. Use of carom requires an implementation of the
//! [`Channel`]: channel/trait.Channel.html trait for the wire protocol in
//! question plus a factory function that creates channels from
//! [`Host`]: host/struct.Host.html descriptors; host selection, retry
//! and consistency degradation, health probing, and ordering timestamps
//! are handled here.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::str::FromStr;
//!
//! use slog::{o, Drain, Logger};
//!
//! use carom::cluster::{Cluster, ClusterOptions};
//! use carom::failover::{ConsistencyLevel, FailoverPolicy};
//! use carom::host::Host;
//! use carom_tcp_channel::TcpChannel;
//!
//! fn main() {
//!     let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
//!     let log = Logger::root(
//!         std::sync::Mutex::new(
//!             slog_term::FullFormat::new(plain).build()
//!         ).fuse(),
//!         o!("build-id" => "0.1.0")
//!     );
//!
//!     let mut cluster = Cluster::new(
//!         ClusterOptions {
//!             name: String::from("production"),
//!             hosts: vec![
//!                 Host::from_str("10.0.0.1:9160").unwrap(),
//!                 Host::from_str("10.0.0.2:9160").unwrap(),
//!                 Host::from_str("10.0.0.3:9160").unwrap(),
//!             ],
//!             log: Some(log),
//!             ..Default::default()
//!         },
//!         TcpChannel::new,
//!     );
//!
//!     // Every write gets a strictly increasing ordering token.
//!     let ts = cluster.create_timestamp();
//!
//!     // Operations run with failover across the live hosts.
//!     let name = cluster.execute(
//!         |channel, _consistency| channel.cluster_name(),
//!         &FailoverPolicy::try_all(),
//!         ConsistencyLevel::Quorum,
//!     );
//!     println!("{} @ {:?}: {:?}", ts, cluster.known_hosts(), name);
//!
//!     cluster.shutdown().unwrap();
//! }
//! ```
//!
//! # Hosts, pools, and the probe
//!
//! Each tracked host gets its own bounded pool of connections, created
//! lazily as borrows demand them. Borrows against the cluster pick the
//! live host with the fewest connections in use. A background probe
//! opens a one-shot channel to every host on a fixed period and moves
//! hosts between the live and down sides accordingly; a host that went
//! down keeps its (empty) pool and gets it back when it recovers.
//!
//! # Failover
//!
//! Operations are closures over a channel and a consistency level, run
//! through the [`failover`]: failover/index.html executor. The policy
//! decides how many additional hosts to try and whether to degrade the
//! consistency level for a while when the cluster looks unhealthy.
//! Application-level errors are never retried; see
//! [`Classify`]: error/trait.Classify.html.

#![allow(missing_docs)]

pub mod channel;
pub mod cluster;
pub mod cluster_pool;
pub mod connection;
pub mod error;
pub mod failover;
pub mod host;
pub mod host_pool;
pub mod monitor;
pub mod timestamp;
