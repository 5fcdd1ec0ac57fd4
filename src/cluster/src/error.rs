// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::ServerId;

use thiserror::Error;

/// Errors returned by server list operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("invalid server id ({0})")]
    InvalidServerId(ServerId),
    #[error("server list has entered its destruction phase and will not accept new trackers")]
    ListDestroyed,
}
