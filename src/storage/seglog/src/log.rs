// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The append-only log: an ordered set of segments with a single active
//! tail. Appends are single-writer; the cleaner runs between requests on
//! the same owner thread.

use crate::entry::{EntryRef, EntryType, Object, ENTRY_HEADER_BYTES};
use crate::error::LogError;
use crate::replicate::{NoReplication, Replicator};
use crate::segment::{Segment, FOOTER_RESERVE, HEADER_OVERHEAD};

use std::collections::BTreeMap;

const MB: usize = 1024 * 1024;

/// Configures and constructs a [`Log`].
pub struct LogBuilder {
    log_id: u64,
    heap_size: usize,
    segment_size: usize,
    clean_threshold: f64,
    replicator: Box<dyn Replicator>,
}

impl Default for LogBuilder {
    fn default() -> Self {
        Self {
            log_id: 0,
            heap_size: 64 * MB,
            segment_size: 8 * MB,
            clean_threshold: 0.75,
            replicator: Box::new(NoReplication),
        }
    }
}

impl LogBuilder {
    /// Identity of the owning master, recorded in every segment header.
    pub fn log_id(mut self, log_id: u64) -> Self {
        self.log_id = log_id;
        self
    }

    /// Total bytes of log heap. Divided into fixed-size segments; the count
    /// is fixed for the life of the log.
    pub fn heap_size(mut self, bytes: usize) -> Self {
        self.heap_size = bytes;
        self
    }

    /// Size of each segment. Bounds the largest appendable entry.
    pub fn segment_size(mut self, bytes: usize) -> Self {
        self.segment_size = bytes;
        self
    }

    /// Live fraction below which a sealed segment becomes a cleaner
    /// candidate.
    pub fn clean_threshold(mut self, threshold: f64) -> Self {
        self.clean_threshold = threshold;
        self
    }

    /// Durability sink for appended bytes.
    pub fn replicator(mut self, replicator: Box<dyn Replicator>) -> Self {
        self.replicator = replicator;
        self
    }

    /// Consume the builder and return a `Log` with its first segment open.
    pub fn build(self) -> Log {
        assert!(
            self.segment_size >= 4096,
            "segment size must be at least 4KB"
        );
        let max_segments = (self.heap_size / self.segment_size).max(2);
        let mut log = Log {
            log_id: self.log_id,
            segment_size: self.segment_size,
            max_segments,
            clean_threshold: self.clean_threshold,
            segments: BTreeMap::new(),
            tail_id: 0,
            next_segment_id: 0,
            replicator: self.replicator,
            bytes_appended: 0,
        };
        log.open_segment();
        log
    }
}

/// The segment-structured log. Invariants:
///
/// * segment ids are unique and strictly increasing;
/// * every live [`EntryRef`] handed out targets a segment still present;
/// * `append` never returns a reference into a segment being reclaimed,
///   because reclamation only happens in the cleaner, which runs on the
///   same thread after relocating every live entry.
pub struct Log {
    log_id: u64,
    segment_size: usize,
    pub(crate) max_segments: usize,
    pub(crate) clean_threshold: f64,
    pub(crate) segments: BTreeMap<u64, Segment>,
    pub(crate) tail_id: u64,
    next_segment_id: u64,
    pub(crate) replicator: Box<dyn Replicator>,
    bytes_appended: u64,
}

impl Log {
    /// Returns a new `LogBuilder` used to configure and construct a `Log`.
    pub fn builder() -> LogBuilder {
        LogBuilder::default()
    }

    fn open_segment(&mut self) {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        self.replicator.open_segment(id);
        let segment = Segment::new(id, self.log_id, self.segment_size);
        self.replicator.append(id, 0, segment.raw_from(0));
        debug!("opened segment {}", id);
        self.segments.insert(id, segment);
        self.tail_id = id;
    }

    fn seal_tail(&mut self) {
        let tail_id = self.tail_id;
        let segment = self.segments.get_mut(&tail_id).unwrap();
        let footer_offset = segment.seal();
        let footer = self.segments[&tail_id].raw_from(footer_offset);
        self.replicator.append(tail_id, footer_offset, footer);
        self.replicator.close_segment(tail_id);
        debug!("sealed segment {}", tail_id);
    }

    /// Largest payload a single entry can carry.
    pub fn max_entry_payload(&self) -> usize {
        self.segment_size - HEADER_OVERHEAD - FOOTER_RESERVE - ENTRY_HEADER_BYTES
    }

    /// Append an entry to the tail, rolling over to a fresh segment when the
    /// tail is full. With `sync` set, blocks until every byte appended so
    /// far is acknowledged by the required backups.
    pub fn append(
        &mut self,
        ty: EntryType,
        payload: &[u8],
        sync: bool,
    ) -> Result<EntryRef, LogError> {
        if payload.len() > self.max_entry_payload() {
            return Err(LogError::SegmentFull {
                size: ENTRY_HEADER_BYTES + payload.len(),
            });
        }

        let tail = self.segments.get_mut(&self.tail_id).unwrap();
        let offset = match tail.append(ty, payload) {
            Some(offset) => offset,
            None => {
                // check headroom before sealing, so a full heap leaves the
                // tail writable once the cleaner frees space
                if self.segments.len() >= self.max_segments {
                    return Err(LogError::LogFull {
                        segments: self.segments.len(),
                    });
                }
                self.seal_tail();
                self.open_segment();
                let tail = self.segments.get_mut(&self.tail_id).unwrap();
                tail.append(ty, payload)
                    .expect("entry must fit in a fresh segment")
            }
        };

        let total = (ENTRY_HEADER_BYTES + payload.len()) as u64;
        self.bytes_appended += total;
        let appended = self.segments[&self.tail_id].raw_from(offset);
        self.replicator.append(self.tail_id, offset, appended);

        if sync {
            self.sync()?;
        }
        Ok(EntryRef {
            segment_id: self.tail_id,
            offset,
        })
    }

    /// Block until all unsynced appended bytes are durable on the required
    /// backups.
    pub fn sync(&mut self) -> Result<(), LogError> {
        self.replicator.sync().map_err(LogError::ReplicationFailed)
    }

    /// Mark the entry as dead, decrementing its segment's live-byte count.
    /// The bytes stay readable until the cleaner reclaims the segment.
    pub fn free(&mut self, entry: EntryRef) {
        let Some(segment) = self.segments.get_mut(&entry.segment_id) else {
            debug!("free of entry in reclaimed segment {}", entry.segment_id);
            return;
        };
        if let Some(total) = segment.entry_total_bytes(entry.offset) {
            segment.free(total);
        }
    }

    /// Whether the given segment is still present in the log.
    pub fn is_segment_live(&self, segment_id: u64) -> bool {
        self.segments.contains_key(&segment_id)
    }

    /// The entry behind a reference, if its segment is still live.
    pub fn entry(&self, entry: EntryRef) -> Option<(EntryType, &[u8])> {
        self.segments.get(&entry.segment_id)?.entry(entry.offset)
    }

    /// Decode the object behind a reference. `None` if the segment is gone,
    /// the entry is not an object, or the payload does not decode.
    pub fn read_object(&self, entry: EntryRef) -> Option<Object> {
        match self.entry(entry)? {
            (EntryType::Object, payload) => Object::decode(payload).ok(),
            _ => None,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn bytes_appended(&self) -> u64 {
        self.bytes_appended
    }

    pub fn tail_segment_id(&self) -> u64 {
        self.tail_id
    }
}
