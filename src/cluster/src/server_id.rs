// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Server identity types shared across the cluster surface.

use serde::{Deserialize, Serialize};

use core::fmt;

/// A cluster-unique server identifier packing an `index` into the server
/// list and a `generation` which distinguishes successive servers that have
/// occupied the same index. Equality requires both halves: a restarted
/// server at the same index is a different server.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId(u64);

impl ServerId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Position of this server in the dense server list.
    pub fn index(&self) -> u32 {
        self.0 as u32
    }

    /// Incremented each time the index is reused for a new server.
    pub fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.index(), self.generation())
    }
}

impl fmt::Debug for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ServerId({})", self)
    }
}

/// Bit-set over the services a server runs.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMask(u8);

impl ServiceMask {
    pub const NONE: ServiceMask = ServiceMask(0);
    pub const MASTER: ServiceMask = ServiceMask(1 << 0);
    pub const BACKUP: ServiceMask = ServiceMask(1 << 1);
    pub const MEMBERSHIP: ServiceMask = ServiceMask(1 << 2);

    pub fn contains(&self, other: ServiceMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for ServiceMask {
    type Output = ServiceMask;

    fn bitor(self, rhs: ServiceMask) -> ServiceMask {
        ServiceMask(self.0 | rhs.0)
    }
}

impl fmt::Display for ServiceMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(ServiceMask::MASTER) {
            names.push("MASTER");
        }
        if self.contains(ServiceMask::BACKUP) {
            names.push("BACKUP");
        }
        if self.contains(ServiceMask::MEMBERSHIP) {
            names.push("MEMBERSHIP");
        }
        if names.is_empty() {
            names.push("NONE");
        }
        write!(f, "{}", names.join("|"))
    }
}

impl fmt::Debug for ServiceMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ServiceMask({})", self)
    }
}

/// Lifecycle of a server list entry. The transitions are linear: a server
/// enters `Up`, may pass through `Crashed`, and ends at `Down` when its slot
/// is cleared.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ServerStatus {
    Up,
    Crashed,
    Down,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServerStatus::Up => write!(f, "UP"),
            ServerStatus::Crashed => write!(f, "CRASHED"),
            ServerStatus::Down => write!(f, "DOWN"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_id_packing() {
        let id = ServerId::new(7, 3);
        assert_eq!(id.index(), 7);
        assert_eq!(id.generation(), 3);
        assert_eq!(id, ServerId::from_raw(id.raw()));
        assert_eq!(id.to_string(), "7.3");
    }

    #[test]
    fn generation_distinguishes_servers() {
        assert_ne!(ServerId::new(2, 0), ServerId::new(2, 1));
    }

    #[test]
    fn service_mask() {
        let services = ServiceMask::MASTER | ServiceMask::MEMBERSHIP;
        assert!(services.contains(ServiceMask::MASTER));
        assert!(!services.contains(ServiceMask::BACKUP));
        assert_eq!(services.to_string(), "MASTER|MEMBERSHIP");
    }
}
