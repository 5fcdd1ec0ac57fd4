// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Cluster membership for the master storage node.
//!
//! The coordinator owns the authoritative view of the cluster; every server
//! keeps a local [`ServerList`] mirror of it. Components that need to react
//! to membership changes register a [`ServerTracker`], which receives every
//! mutation as a FIFO stream of change events. The list also caches one
//! session per live server, opened lazily through the [`Transport`] seam and
//! verified against the expected server id before it is installed.
//!
//! The list and its trackers would form a reference cycle; it is broken by
//! giving each tracker only a weak back-pointer to its parent list.

#[macro_use]
extern crate log;

mod coordinator;
mod error;
mod membership;
mod server_id;
mod server_list;
mod session;
mod tablet;
mod tracker;

pub use coordinator::CoordinatorClient;
pub use error::ClusterError;
pub use membership::{ServerListUpdate, ServerRecord};
pub use server_id::{ServerId, ServerStatus, ServiceMask};
pub use server_list::{ServerDetails, ServerList};
pub use session::{FailSession, Session, Transport, TransportError};
pub use tablet::Tablet;
pub use tracker::{ServerChange, ServerTracker};
