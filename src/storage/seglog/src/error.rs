// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Errors returned by the log and its replication seam.

use thiserror::Error;

/// Possible errors returned by log operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LogError {
    /// A single entry is larger than a segment can ever hold, even after
    /// rolling over to a fresh one.
    #[error("entry of {size} bytes exceeds segment capacity")]
    SegmentFull { size: usize },
    /// The log heap is out of segments and the cleaner has nothing left to
    /// reclaim right now.
    #[error("log heap full ({segments} segments)")]
    LogFull { segments: usize },
    /// The sync barrier could not reach the required number of backups.
    #[error("backup replication failed: {0}")]
    ReplicationFailed(ReplicationError),
    /// Undecodable entry bytes, from corruption or a framing bug.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),
}

/// Errors surfaced by a [`crate::Replicator`] at the sync barrier.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplicationError {
    #[error("needed {needed} backups, only {found} available")]
    InsufficientBackups { needed: u32, found: u32 },
    #[error("backup session failed: {0}")]
    SessionFailed(String),
}
