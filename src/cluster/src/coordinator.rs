// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::{ServerId, ServiceMask, Tablet, TransportError};

/// Outbound calls a master makes to the coordinator.
pub trait CoordinatorClient: Send + Sync {
    /// Join the cluster, announcing the services this server runs and the
    /// locator other servers should use to reach it. Returns the server id
    /// assigned by the coordinator.
    fn enlist_server(
        &self,
        services: ServiceMask,
        locator: &str,
    ) -> Result<ServerId, TransportError>;

    /// Commit point of a recovery: report that this master has replayed the
    /// given tablets and is ready to own them.
    fn tablets_recovered(&self, tablets: &[Tablet]) -> Result<(), TransportError>;
}
