// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error statuses a master returns across the RPC boundary. Reject-rule
/// violations and existence errors are ordinary responses the caller
/// recovers from; the rest indicate the request cannot be served right now.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[error("table doesn't exist")]
    TableDoesntExist,
    #[error("object doesn't exist")]
    ObjectDoesntExist,
    #[error("object exists")]
    ObjectExists,
    #[error("wrong version")]
    WrongVersion,
    #[error("unimplemented request")]
    UnimplementedRequest,
    #[error("segment recovery failed")]
    SegmentRecoveryFailed,
    #[error("segment full")]
    SegmentFull,
    #[error("log full")]
    LogFull,
    #[error("backup replication failed")]
    BackupReplicationFailed,
    #[error("server list exception")]
    ServerList,
    #[error("transport exception")]
    Transport,
}
