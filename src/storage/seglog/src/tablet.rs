// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The set of tablets this master owns and the per-table allocation state
//! behind them.

use crate::hashtable::ObjectMap;

use cluster::Tablet;

use std::collections::{HashMap, HashSet};

/// Per-table allocator state. One `Table` exists for each distinct table id
/// among the owned tablets, shared by all of that table's tablets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    table_id: u64,
    next_object_id: u64,
    next_version: u64,
}

impl Table {
    pub fn new(table_id: u64) -> Self {
        Self {
            table_id,
            next_object_id: 0,
            next_version: 1,
        }
    }

    pub fn table_id(&self) -> u64 {
        self.table_id
    }

    /// The version the next fresh object would receive.
    pub fn next_version(&self) -> u64 {
        self.next_version
    }

    /// Return an object id not currently present in the object map and
    /// advance the allocation cursor past it.
    pub fn allocate_key(&mut self, map: &ObjectMap) -> u64 {
        loop {
            let id = self.next_object_id;
            self.next_object_id = self.next_object_id.wrapping_add(1);
            if map.lookup(self.table_id, id).is_none() {
                return id;
            }
        }
    }

    /// Return the next version and advance it.
    pub fn allocate_version(&mut self) -> u64 {
        let version = self.next_version;
        self.next_version += 1;
        version
    }

    /// Ensure no future allocation returns a version below `version`.
    pub fn raise_version(&mut self, version: u64) {
        if self.next_version < version {
            self.next_version = version;
        }
    }
}

/// The tablets owned by this master, plus a `Table` per distinct table id.
#[derive(Debug, Default)]
pub struct TabletMap {
    tablets: Vec<Tablet>,
    tables: HashMap<u64, Table>,
}

impl TabletMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the owned tablet set. `Table` state survives for table ids
    /// still present, so version floors raised by earlier removals are not
    /// forgotten; tables whose tablets all moved away are dropped.
    ///
    /// The log and object map must already hold a consistent view of any
    /// newly added tablet before it is installed here.
    pub fn set_tablets(&mut self, tablets: Vec<Tablet>) {
        let keep: HashSet<u64> = tablets.iter().map(|tablet| tablet.table_id).collect();
        self.tables.retain(|table_id, _| keep.contains(table_id));
        for table_id in keep {
            self.tables
                .entry(table_id)
                .or_insert_with(|| Table::new(table_id));
        }

        self.tablets = tablets;
        info!("now serving tablets:");
        for tablet in &self.tablets {
            info!(
                "table: {:>20}, start: {:>20}, end: {:>20}",
                tablet.table_id, tablet.start_object_id, tablet.end_object_id
            );
        }
    }

    pub fn tablets(&self) -> &[Tablet] {
        &self.tablets
    }

    /// Whether some owned tablet covers the key.
    pub fn covers(&self, table_id: u64, object_id: u64) -> bool {
        self.tablets
            .iter()
            .any(|tablet| tablet.covers(table_id, object_id))
    }

    /// The table behind the tablet covering a key, or `None` if this master
    /// does not own the key.
    pub fn table_mut(&mut self, table_id: u64, object_id: u64) -> Option<&mut Table> {
        if !self.covers(table_id, object_id) {
            return None;
        }
        self.tables.get_mut(&table_id)
    }

    /// The table for a table id, if any owned tablet belongs to it.
    /// Key allocation starts here, before an object id exists to resolve a
    /// tablet with.
    pub fn table_for_id(&mut self, table_id: u64) -> Option<&mut Table> {
        if !self.tablets.iter().any(|tablet| tablet.table_id == table_id) {
            return None;
        }
        self.tables.get_mut(&table_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster::ServerId;

    fn tablet(table_id: u64, start: u64, end: u64) -> Tablet {
        Tablet {
            table_id,
            start_object_id: start,
            end_object_id: end,
            server_id: ServerId::new(1, 0),
            service_locator: "mock:host=master".to_string(),
            ctime: 0,
        }
    }

    #[test]
    fn table_lookup_respects_ranges() {
        let mut map = TabletMap::new();
        map.set_tablets(vec![tablet(7, 0, 99), tablet(7, 200, 299)]);

        assert!(map.table_mut(7, 50).is_some());
        assert!(map.table_mut(7, 250).is_some());
        assert!(map.table_mut(7, 150).is_none());
        assert!(map.table_mut(8, 50).is_none());
    }

    #[test]
    fn set_tablets_preserves_table_state() {
        let mut map = TabletMap::new();
        map.set_tablets(vec![tablet(7, 0, 99)]);
        map.table_for_id(7).unwrap().raise_version(41);

        // table 7 stays, table 9 arrives
        map.set_tablets(vec![tablet(7, 0, 99), tablet(9, 0, 99)]);
        assert_eq!(map.table_for_id(7).unwrap().next_version(), 41);
        assert_eq!(map.table_for_id(9).unwrap().next_version(), 1);

        // table 7 leaves; a later return starts fresh
        map.set_tablets(vec![tablet(9, 0, 99)]);
        assert!(map.table_for_id(7).is_none());
        map.set_tablets(vec![tablet(7, 0, 99)]);
        assert_eq!(map.table_for_id(7).unwrap().next_version(), 1);
    }

    #[test]
    fn allocate_key_skips_occupied_ids() {
        let mut map = TabletMap::new();
        map.set_tablets(vec![tablet(7, 0, 99)]);
        let mut object_map = ObjectMap::new(16);
        object_map.replace(7, 0, crate::EntryRef { segment_id: 0, offset: 0 });
        object_map.replace(7, 1, crate::EntryRef { segment_id: 0, offset: 9 });

        let table = map.table_for_id(7).unwrap();
        assert_eq!(table.allocate_key(&object_map), 2);
        assert_eq!(table.allocate_key(&object_map), 3);
    }

    #[test]
    fn version_allocation_is_monotonic() {
        let mut table = Table::new(7);
        assert_eq!(table.allocate_version(), 1);
        assert_eq!(table.allocate_version(), 2);
        table.raise_version(10);
        assert_eq!(table.allocate_version(), 10);
        // raising below the floor is a no-op
        table.raise_version(5);
        assert_eq!(table.allocate_version(), 11);
    }
}
