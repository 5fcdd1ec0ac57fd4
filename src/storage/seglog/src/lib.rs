// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Segment-structured in-memory storage for a master node.
//!
//! All object data lives in a single append-only [`Log`] made of fixed-size
//! segments. The [`ObjectMap`] indexes the live version of every object by
//! `(table_id, object_id)`, pointing into the log with stable
//! `(segment_id, offset)` references. Durability comes from replicating
//! segment contents to backups through the [`Replicator`] seam; the master
//! itself persists nothing.
//!
//! Over time segments accumulate dead entries as objects are overwritten or
//! deleted. The cleaner evacuates the surviving entries of under-utilized
//! segments to the log tail and reclaims the rest, keeping the heap bounded
//! without ever moving an entry the object map still points at somewhere
//! the map doesn't know about.
//!
//! ```
//! use seglog::{EntryType, Log, NoReplication, Object, ObjectMap};
//!
//! const MB: usize = 1024 * 1024;
//!
//! let mut log = Log::builder()
//!     .heap_size(8 * MB)
//!     .segment_size(MB)
//!     .replicator(Box::new(NoReplication))
//!     .build();
//! let mut map = ObjectMap::with_capacity_bytes(64 * 1024);
//!
//! let object = Object::new(1, 1, 1, b"espresso".to_vec());
//! let entry = log
//!     .append(EntryType::Object, &object.encode(), false)
//!     .expect("append failed");
//! map.replace(1, 1, entry);
//!
//! let stored = log.read_object(map.lookup(1, 1).unwrap()).unwrap();
//! assert_eq!(stored.data, b"espresso");
//! ```

#[macro_use]
extern crate log as logger;

mod cleaner;
mod entry;
mod error;
mod hashtable;
mod log;
mod replicate;
mod segment;
mod tablet;

pub use crate::log::{Log, LogBuilder};
pub use cleaner::CleanStats;
pub use entry::{push_entry, EntryRef, EntryType, Object, Tombstone, ENTRY_HEADER_BYTES};
pub use error::{LogError, ReplicationError};
pub use hashtable::ObjectMap;
pub use replicate::{NoReplication, Replicator};
pub use segment::EntryIter;
pub use tablet::{Table, TabletMap};
