// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The log's durability sink. The log pushes every byte it appends through
//! this trait; an implementation fans the bytes out to R backups and holds
//! the sync barrier. The log itself neither knows nor cares how many
//! replicas exist.

use crate::error::ReplicationError;

pub trait Replicator: Send {
    /// A new segment was opened and will start receiving appends.
    fn open_segment(&mut self, segment_id: u64);

    /// Bytes were appended to a segment at the given offset. The bytes are
    /// not yet durable; `sync` makes them so.
    fn append(&mut self, segment_id: u64, offset: u32, data: &[u8]);

    /// The segment was sealed; no more appends will arrive for it.
    fn close_segment(&mut self, segment_id: u64);

    /// The segment was reclaimed; replicas may discard it.
    fn free_segment(&mut self, segment_id: u64);

    /// Block until every byte appended so far is acknowledged by the
    /// required number of backups.
    fn sync(&mut self) -> Result<(), ReplicationError>;
}

/// A replicator that drops everything. Used when running without backups
/// (tests, single-node experiments).
pub struct NoReplication;

impl Replicator for NoReplication {
    fn open_segment(&mut self, _segment_id: u64) {}

    fn append(&mut self, _segment_id: u64, _offset: u32, _data: &[u8]) {}

    fn close_segment(&mut self, _segment_id: u64) {}

    fn free_segment(&mut self, _segment_id: u64) {}

    fn sync(&mut self) -> Result<(), ReplicationError> {
        Ok(())
    }
}
