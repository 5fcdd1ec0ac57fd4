// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Configuration for the master storage node. Each component has its own
//! config struct with serde defaults so that a partial TOML file is enough to
//! run, and an aggregate `MasterConfig` composes them.

#[macro_use]
extern crate log;

mod master;
mod recovery;
mod replication;
mod seglog;
mod server;

pub use master::MasterConfig;
pub use recovery::{Recovery, RecoveryConfig};
pub use replication::{Replication, ReplicationConfig};
pub use seglog::{Seglog, SeglogConfig};
pub use server::{Server, ServerConfig};
