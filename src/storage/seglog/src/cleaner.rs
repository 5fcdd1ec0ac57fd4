// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The cleaner: evacuates the surviving entries of under-utilized sealed
//! segments to the log tail and reclaims the sources.
//!
//! Survival is decided per entry type:
//!
//! * an object survives iff the object map still points exactly at this
//!   entry, and the tablet map still covers its key. Objects from tablets
//!   that moved away are dropped and their map entry removed.
//! * a tombstone survives iff the segment holding the object it nullifies
//!   is still live; once that segment is gone the tombstone has no work
//!   left to do.
//!
//! Relocation frees the source entry as soon as the copy is installed, so
//! an interrupted pass (heap full) leaves the log consistent: the source
//! segment simply stays behind with fewer live bytes.

use crate::entry::{EntryRef, EntryType, Object, Tombstone};
use crate::error::LogError;
use crate::hashtable::ObjectMap;
use crate::log::Log;
use crate::tablet::TabletMap;

/// Counters describing one cleaner pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanStats {
    pub segments_reclaimed: usize,
    pub objects_relocated: usize,
    pub tombstones_relocated: usize,
    pub entries_dropped: usize,
}

enum Action {
    RelocateObject {
        table_id: u64,
        object_id: u64,
        old: EntryRef,
        payload: Vec<u8>,
    },
    RelocateTombstone {
        old: EntryRef,
        payload: Vec<u8>,
    },
    /// Object from a tablet this master no longer owns; drop it and its
    /// index entry.
    DropForeignObject { table_id: u64, object_id: u64 },
}

impl Log {
    /// Run one cleaning pass. Safe to call any number of times; a pass over
    /// a quiescent log preserves the set of live objects exactly.
    pub fn clean(
        &mut self,
        object_map: &mut ObjectMap,
        tablets: &TabletMap,
    ) -> Result<CleanStats, LogError> {
        let mut stats = CleanStats::default();

        let candidates: Vec<u64> = self
            .segments
            .values()
            .filter(|segment| {
                segment.is_sealed()
                    && segment.id() != self.tail_id
                    && segment.live_fraction() < self.clean_threshold
            })
            .map(|segment| segment.id())
            .collect();

        for segment_id in candidates {
            self.clean_segment(segment_id, object_map, tablets, &mut stats)?;
        }
        if stats.segments_reclaimed > 0 {
            info!(
                "cleaner reclaimed {} segments ({} objects, {} tombstones relocated, {} entries dropped)",
                stats.segments_reclaimed,
                stats.objects_relocated,
                stats.tombstones_relocated,
                stats.entries_dropped
            );
        }
        Ok(stats)
    }

    fn clean_segment(
        &mut self,
        segment_id: u64,
        object_map: &mut ObjectMap,
        tablets: &TabletMap,
        stats: &mut CleanStats,
    ) -> Result<(), LogError> {
        // First pass: decide survival with the segment borrowed read-only.
        let mut actions = Vec::new();
        {
            let segment = &self.segments[&segment_id];
            for (ty, offset, payload) in segment.iter() {
                let entry = EntryRef { segment_id, offset };
                match ty {
                    EntryType::Object => {
                        let Some((table_id, object_id)) = Object::peek_key(payload) else {
                            warn!("undecodable object at {:?} dropped", entry);
                            stats.entries_dropped += 1;
                            continue;
                        };
                        if !tablets.covers(table_id, object_id) {
                            actions.push(Action::DropForeignObject { table_id, object_id });
                            continue;
                        }
                        if object_map.lookup(table_id, object_id) == Some(entry) {
                            actions.push(Action::RelocateObject {
                                table_id,
                                object_id,
                                old: entry,
                                payload: payload.to_vec(),
                            });
                        } else {
                            stats.entries_dropped += 1;
                        }
                    }
                    EntryType::Tombstone => {
                        let tomb = Tombstone::decode(payload)?;
                        if self.is_segment_live(tomb.segment_id) {
                            actions.push(Action::RelocateTombstone {
                                old: entry,
                                payload: payload.to_vec(),
                            });
                        } else {
                            stats.entries_dropped += 1;
                        }
                    }
                    EntryType::SegHeader | EntryType::SegFooter => {}
                }
            }
        }

        // Second pass: evacuate the survivors. Relocation appends never
        // sync; durability catches up at the next sync barrier.
        for action in actions {
            match action {
                Action::RelocateObject {
                    table_id,
                    object_id,
                    old,
                    payload,
                } => {
                    let relocated = self.append(EntryType::Object, &payload, false)?;
                    object_map.replace(table_id, object_id, relocated);
                    self.free(old);
                    stats.objects_relocated += 1;
                }
                Action::RelocateTombstone { old, payload } => {
                    let relocated = self.append(EntryType::Tombstone, &payload, false)?;
                    debug_assert_ne!(relocated.segment_id, segment_id);
                    self.free(old);
                    stats.tombstones_relocated += 1;
                }
                Action::DropForeignObject {
                    table_id,
                    object_id,
                } => {
                    object_map.remove(table_id, object_id);
                    stats.entries_dropped += 1;
                }
            }
        }

        self.segments.remove(&segment_id);
        self.replicator.free_segment(segment_id);
        stats.segments_reclaimed += 1;
        Ok(())
    }
}
