// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The transport seam. The RPC system itself lives outside this workspace;
//! these traits are the shape the rest of the code programs against, plus
//! the [`FailSession`] sentinel which stands in for servers that cannot be
//! reached or identified.

use crate::{ServerId, Tablet};

use thiserror::Error;

use std::sync::{Arc, OnceLock};

/// Errors produced by the transport layer. These are retryable from the
/// caller's point of view; none of them indicate corrupted local state.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("couldn't open session: {0}")]
    Open(String),
    #[error("rpc failed: {0}")]
    Call(String),
    #[error("fail session")]
    FailSession,
}

/// Opens sessions to remote servers addressed by service locator strings.
pub trait Transport: Send + Sync {
    fn open_session(&self, locator: &str) -> Result<Arc<dyn Session>, TransportError>;
}

/// An open session to one remote server. Calls block until the response
/// arrives or the transport gives up.
pub trait Session: Send + Sync {
    /// Membership ping: ask the remote end for its server id.
    fn server_id(&self) -> Result<ServerId, TransportError>;

    /// Ask a backup for a crashed master's segment, filtered down to the
    /// given tablet ranges.
    fn get_recovery_data(
        &self,
        crashed_master: ServerId,
        segment_id: u64,
        tablets: &[Tablet],
    ) -> Result<Vec<u8>, TransportError>;

    /// Push segment bytes starting at `offset` to a backup. A successful
    /// return is the backup's acknowledgment that the bytes are durable.
    fn replicate_segment(
        &self,
        master: ServerId,
        segment_id: u64,
        offset: u32,
        data: &[u8],
        closed: bool,
    ) -> Result<(), TransportError>;

    /// Tell a backup it may discard its replica of a segment.
    fn free_segment(&self, master: ServerId, segment_id: u64) -> Result<(), TransportError>;
}

/// A session on which every call fails immediately. Returned instead of an
/// error when a server cannot be contacted or identified, so callers can
/// retry uniformly instead of branching on error types.
pub struct FailSession;

static FAIL_SESSION: OnceLock<Arc<FailSession>> = OnceLock::new();

impl FailSession {
    /// The process-wide singleton instance.
    pub fn get() -> Arc<dyn Session> {
        FAIL_SESSION.get_or_init(|| Arc::new(FailSession)).clone()
    }
}

impl Session for FailSession {
    fn server_id(&self) -> Result<ServerId, TransportError> {
        Err(TransportError::FailSession)
    }

    fn get_recovery_data(
        &self,
        _crashed_master: ServerId,
        _segment_id: u64,
        _tablets: &[Tablet],
    ) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::FailSession)
    }

    fn replicate_segment(
        &self,
        _master: ServerId,
        _segment_id: u64,
        _offset: u32,
        _data: &[u8],
        _closed: bool,
    ) -> Result<(), TransportError> {
        Err(TransportError::FailSession)
    }

    fn free_segment(&self, _master: ServerId, _segment_id: u64) -> Result<(), TransportError> {
        Err(TransportError::FailSession)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_session_fails_every_call() {
        let session = FailSession::get();
        assert!(session.server_id().is_err());
        assert!(session
            .get_recovery_data(ServerId::new(1, 0), 0, &[])
            .is_err());
        assert!(session
            .replicate_segment(ServerId::new(1, 0), 0, 0, b"x", false)
            .is_err());
        assert!(session.free_segment(ServerId::new(1, 0), 0).is_err());
    }
}
