// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::RejectRules;

use cluster::{ServerId, ServiceMask, Tablet};

use serde::{Deserialize, Serialize};

/// One backup's claim to hold a replica of one of a crashed master's
/// segments. The recovery request carries a list of these; entries without
/// a segment id or from servers that are not backups are skipped with a
/// warning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupSource {
    pub service_locator: String,
    pub segment_id: Option<u64>,
    pub services: ServiceMask,
}

/// A fully parsed request to a master.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    /// Store a new object under a freshly allocated object id.
    Create { table_id: u64, data: Vec<u8> },
    /// Read an object's value and version.
    Read {
        table_id: u64,
        object_id: u64,
        reject: RejectRules,
    },
    /// Store or overwrite an object.
    Write {
        table_id: u64,
        object_id: u64,
        data: Vec<u8>,
        reject: RejectRules,
    },
    /// Delete an object.
    Remove {
        table_id: u64,
        object_id: u64,
        reject: RejectRules,
    },
    /// Install the set of tablets this master serves.
    SetTablets { tablets: Vec<Tablet> },
    /// Take over the given tablets from a crashed master by replaying its
    /// segments from backups. Transports acknowledge receipt of this
    /// request before execution starts, so the coordinator is not blocked
    /// behind the replay.
    Recover {
        crashed_master: ServerId,
        tablets: Vec<Tablet>,
        backups: Vec<BackupSource>,
    },
    /// Liveness check; returns server statistics.
    Ping,
}
