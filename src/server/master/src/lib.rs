// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The master node of a distributed in-memory key-value store.
//!
//! A cluster is a coordinator, many masters, and many backups. Masters own
//! tablets of primary data and serve reads and writes out of a
//! segment-structured in-memory log; backups hold replicas of the log
//! segments so the data survives a master crash; the coordinator places
//! tablets and orchestrates recovery. This crate is the master's runtime
//! core.
//!
//! # Thread model
//!
//! One thread owns the [`MasterService`] and executes requests against it;
//! the request transport hands it fully parsed requests and sends back the
//! typed responses. Between requests the owner thread calls
//! [`MasterService::clean`] to compact the log. The
//! [`BackupFailureMonitor`] runs on its own thread, watching cluster
//! membership and telling the shared [`BackupManager`] about failed
//! backups so it can re-replicate. Appends block at the sync barrier until
//! R backups have acknowledged, so a completed write survives this master's
//! death.
//!
//! # Recovery
//!
//! When a master crashes, the coordinator partitions its tablets and sends
//! each recovery master a `RECOVER` request naming the crashed master, the
//! tablets to take over, and the backups holding its segments. The
//! recovery engine fetches the filtered segments in parallel and replays
//! them under per-key version dominance; the coordinator's
//! `tablets_recovered` acknowledgment is the commit point, after which the
//! tablets are installed and served.

#[macro_use]
extern crate log;

mod backup;
mod monitor;
mod recovery;
mod service;

pub use backup::{BackupManager, ReplicaManager};
pub use monitor::BackupFailureMonitor;
pub use service::MasterService;
