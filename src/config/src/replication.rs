// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

// constants to define default values
const REPLICAS: u32 = 3;

// helper functions
fn replicas() -> u32 {
    REPLICAS
}

// definitions
#[derive(Serialize, Deserialize, Debug)]
pub struct Replication {
    #[serde(default = "replicas")]
    replicas: u32,
}

// implementation
impl Replication {
    /// Number of backup replicas which must acknowledge appended segment data
    /// before a synchronous append returns.
    pub fn replicas(&self) -> u32 {
        self.replicas
    }
}

// trait implementations
impl Default for Replication {
    fn default() -> Self {
        Self {
            replicas: replicas(),
        }
    }
}

// trait definitions
pub trait ReplicationConfig {
    fn replication(&self) -> &Replication;
}
