// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::ServerId;

use serde::{Deserialize, Serialize};

/// A contiguous, inclusive range `[start_object_id, end_object_id]` of one
/// table, owned by exactly one master. Tablet sets travel between the
/// coordinator and masters, so the fields are public and serializable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tablet {
    pub table_id: u64,
    pub start_object_id: u64,
    pub end_object_id: u64,
    pub server_id: ServerId,
    pub service_locator: String,
    pub ctime: u64,
}

impl Tablet {
    /// Whether this tablet covers the given key.
    pub fn covers(&self, table_id: u64, object_id: u64) -> bool {
        self.table_id == table_id
            && self.start_object_id <= object_id
            && object_id <= self.end_object_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn covers_is_inclusive() {
        let t = tablet(7, 10, 20);
        assert!(t.covers(7, 10));
        assert!(t.covers(7, 20));
        assert!(!t.covers(7, 9));
        assert!(!t.covers(7, 21));
        assert!(!t.covers(8, 15));
    }
}
