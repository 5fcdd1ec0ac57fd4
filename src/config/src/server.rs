// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

// constants to define default values
const LOCATOR: &str = "tcp:host=0.0.0.0,port=12246";

// helper functions
fn locator() -> String {
    LOCATOR.to_string()
}

// definitions
#[derive(Serialize, Deserialize, Debug)]
pub struct Server {
    #[serde(default = "locator")]
    locator: String,
}

// implementation
impl Server {
    /// Service locator other cluster members use to reach this master.
    pub fn locator(&self) -> String {
        self.locator.clone()
    }
}

// trait implementations
impl Default for Server {
    fn default() -> Self {
        Self { locator: locator() }
    }
}

// trait definitions
pub trait ServerConfig {
    fn server(&self) -> &Server;
}
