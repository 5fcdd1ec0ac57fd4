// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::Status;

use serde::{Deserialize, Serialize};

/// Statistics returned by PING.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterStats {
    /// Object payload bytes accepted by writes.
    pub bytes_written: u64,
    /// Total bytes appended to the log, framing and relocations included.
    pub bytes_appended: u64,
    /// Requests executed, successful or not.
    pub requests: u64,
}

/// A master's response. Domain errors are carried as the `Error` variant
/// with a 1:1 status code; when the failed operation had a live target
/// object, its current version rides along so the caller can recover
/// without a second read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Create {
        object_id: u64,
        version: u64,
    },
    Read {
        version: u64,
        data: Vec<u8>,
    },
    Write {
        version: u64,
    },
    /// `version` is the version that was removed, or `None` when the object
    /// did not exist and the reject rules allowed that.
    Remove {
        version: Option<u64>,
    },
    SetTablets,
    Recover,
    Ping {
        stats: MasterStats,
    },
    Error {
        status: Status,
        version: Option<u64>,
    },
}

impl Response {
    /// The status of this response; `None` for successful responses.
    pub fn status(&self) -> Option<Status> {
        match self {
            Response::Error { status, .. } => Some(*status),
            _ => None,
        }
    }
}
