// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

const MB: usize = 1024 * 1024;

// default log/segment sizing
const LOG_BYTES: usize = 64 * MB;
const SEGMENT_BYTES: usize = 8 * MB;

// default hash index sizing
const HASHTABLE_BYTES: usize = 4 * MB;

// cleaner trigger: clean segments whose live fraction falls below this
const CLEAN_THRESHOLD: f64 = 0.75;

// helper functions for default values
fn log_bytes() -> usize {
    LOG_BYTES
}

fn segment_bytes() -> usize {
    SEGMENT_BYTES
}

fn hashtable_bytes() -> usize {
    HASHTABLE_BYTES
}

fn clean_threshold() -> f64 {
    CLEAN_THRESHOLD
}

// definitions
#[derive(Serialize, Deserialize, Debug)]
pub struct Seglog {
    #[serde(default = "log_bytes")]
    log_bytes: usize,
    #[serde(default = "segment_bytes")]
    segment_bytes: usize,
    #[serde(default = "hashtable_bytes")]
    hashtable_bytes: usize,
    #[serde(default = "clean_threshold")]
    clean_threshold: f64,
}

// implementation
impl Seglog {
    /// Total bytes of in-memory log heap. Divided into fixed-size segments.
    pub fn log_bytes(&self) -> usize {
        self.log_bytes
    }

    /// Size of each log segment. Not reconfigurable after construction.
    pub fn segment_bytes(&self) -> usize {
        self.segment_bytes
    }

    /// Bytes dedicated to the object map. Determines the bucket count; the
    /// table does not resize.
    pub fn hashtable_bytes(&self) -> usize {
        self.hashtable_bytes
    }

    /// Live-byte fraction below which a sealed segment becomes a cleaner
    /// candidate.
    pub fn clean_threshold(&self) -> f64 {
        self.clean_threshold
    }
}

// trait implementations
impl Default for Seglog {
    fn default() -> Self {
        Self {
            log_bytes: log_bytes(),
            segment_bytes: segment_bytes(),
            hashtable_bytes: hashtable_bytes(),
            clean_threshold: clean_threshold(),
        }
    }
}

// trait definitions
pub trait SeglogConfig {
    fn seglog(&self) -> &Seglog;
}
