// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Membership messages broadcast by the coordinator. Each broadcast carries
//! a monotonically increasing version; stale broadcasts are dropped.

use crate::{ServerId, ServerList, ServerStatus, ServiceMask};

use serde::{Deserialize, Serialize};

/// One server entry in a membership broadcast.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerRecord {
    pub server_id: ServerId,
    pub service_locator: String,
    pub services: ServiceMask,
    pub expected_read_mbps: u32,
    pub status: ServerStatus,
}

/// A coordinator membership broadcast.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerListUpdate {
    pub version: u64,
    pub records: Vec<ServerRecord>,
}

impl ServerList {
    /// Apply a membership broadcast to the local mirror. Out-of-date
    /// broadcasts are ignored so that reordered deliveries cannot roll the
    /// list backwards.
    pub fn apply_update(&self, update: &ServerListUpdate) {
        if update.version <= self.version() {
            debug!(
                "ignoring membership update version {} (at version {})",
                update.version,
                self.version()
            );
            return;
        }
        for record in &update.records {
            match record.status {
                ServerStatus::Up => self.add(
                    record.server_id,
                    &record.service_locator,
                    record.services,
                    record.expected_read_mbps,
                ),
                ServerStatus::Crashed => self.crashed(record.server_id),
                ServerStatus::Down => self.remove(record.server_id),
            }
        }
        self.set_version(update.version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Session, Transport, TransportError};
    use std::sync::Arc;

    struct NullTransport;

    impl Transport for NullTransport {
        fn open_session(&self, locator: &str) -> Result<Arc<dyn Session>, TransportError> {
            Err(TransportError::Open(locator.to_string()))
        }
    }

    fn record(id: ServerId, status: ServerStatus) -> ServerRecord {
        ServerRecord {
            server_id: id,
            service_locator: "mock:host=x".to_string(),
            services: ServiceMask::BACKUP,
            expected_read_mbps: 100,
            status,
        }
    }

    #[test]
    fn update_applies_and_bumps_version() {
        let list = ServerList::new(Arc::new(NullTransport));
        let id = ServerId::new(1, 0);
        list.apply_update(&ServerListUpdate {
            version: 5,
            records: vec![record(id, ServerStatus::Up)],
        });
        assert!(list.is_up(id));
        assert_eq!(list.version(), 5);
    }

    #[test]
    fn stale_update_is_dropped() {
        let list = ServerList::new(Arc::new(NullTransport));
        let id = ServerId::new(1, 0);
        list.apply_update(&ServerListUpdate {
            version: 5,
            records: vec![record(id, ServerStatus::Up)],
        });
        list.apply_update(&ServerListUpdate {
            version: 4,
            records: vec![record(id, ServerStatus::Down)],
        });
        assert!(list.is_up(id));
        assert_eq!(list.version(), 5);
    }
}
