// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::*;

use serde::{Deserialize, Serialize};

use std::io::Read;

// struct definitions
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct MasterConfig {
    // application modules
    #[serde(default)]
    server: Server,
    #[serde(default)]
    seglog: Seglog,
    #[serde(default)]
    replication: Replication,
    #[serde(default)]
    recovery: Recovery,
}

// implementation
impl MasterConfig {
    pub fn load(file: &str) -> Result<Self, std::io::Error> {
        let mut file = std::fs::File::open(file)?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        match toml::from_str(&content) {
            Ok(t) => Ok(t),
            Err(e) => {
                error!("{}", e);
                Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "Error parsing config",
                ))
            }
        }
    }
}

// trait implementations
impl ServerConfig for MasterConfig {
    fn server(&self) -> &Server {
        &self.server
    }
}

impl SeglogConfig for MasterConfig {
    fn seglog(&self) -> &Seglog {
        &self.seglog
    }
}

impl ReplicationConfig for MasterConfig {
    fn replication(&self) -> &Replication {
        &self.replication
    }
}

impl RecoveryConfig for MasterConfig {
    fn recovery(&self) -> &Recovery {
        &self.recovery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RecoveryConfig, ReplicationConfig, SeglogConfig};

    #[test]
    fn defaults() {
        let config = MasterConfig::default();
        assert_eq!(config.replication().replicas(), 3);
        assert_eq!(config.recovery().concurrent_fetches(), 4);
        assert!(config.seglog().segment_bytes() <= config.seglog().log_bytes());
    }

    #[test]
    fn partial_toml() {
        let config: MasterConfig = toml::from_str(
            r#"
            [replication]
            replicas = 2

            [seglog]
            segment_bytes = 65536
            "#,
        )
        .expect("failed to parse");
        assert_eq!(config.replication().replicas(), 2);
        assert_eq!(config.seglog().segment_bytes(), 65536);
        // unspecified sections fall back to defaults
        assert_eq!(config.recovery().concurrent_fetches(), 4);
    }
}
