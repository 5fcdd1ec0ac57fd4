// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

// constants to define default values
const CONCURRENT_FETCHES: usize = 4;

// helper functions
fn concurrent_fetches() -> usize {
    CONCURRENT_FETCHES
}

// definitions
#[derive(Serialize, Deserialize, Debug)]
pub struct Recovery {
    #[serde(default = "concurrent_fetches")]
    concurrent_fetches: usize,
}

// implementation
impl Recovery {
    /// Maximum number of outstanding segment fetches during recovery. A value
    /// of one degrades to a serial recovery.
    pub fn concurrent_fetches(&self) -> usize {
        self.concurrent_fetches.max(1)
    }
}

// trait implementations
impl Default for Recovery {
    fn default() -> Self {
        Self {
            concurrent_fetches: concurrent_fetches(),
        }
    }
}

// trait definitions
pub trait RecoveryConfig {
    fn recovery(&self) -> &Recovery;
}
