// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Replication of log segments to backups.
//!
//! The log pushes every appended byte through the [`seglog::Replicator`]
//! seam; the [`BackupManager`] buffers the open segments, picks R backup
//! servers for each, and holds the sync barrier: `sync` returns only once
//! every replica has acknowledged every byte. When a backup fails, its
//! replicas are re-created on other backups from the buffered bytes.

use cluster::{ServerId, ServerList, Session, ServiceMask};
use seglog::{ReplicationError, Replicator};

use rand::seq::SliceRandom;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Attempts to find a working replacement backup for one replica slot
/// before a sync gives up.
const REPLACEMENT_RETRIES: usize = 3;

/// Consumer of backup-failure notifications from the failure monitor.
pub trait ReplicaManager: Send + Sync {
    fn handle_backup_failure(&self, id: ServerId);
}

struct Replica {
    server_id: ServerId,
    session: Arc<dyn Session>,
    /// Bytes of the segment this replica has acknowledged.
    acked: usize,
}

struct SegmentReplicas {
    /// Contiguous image of the segment as appended so far. Kept until the
    /// segment is freed so lost replicas can be rebuilt from scratch.
    data: Vec<u8>,
    closed: bool,
    replicas: Vec<Replica>,
}

#[derive(Default)]
struct Inner {
    segments: HashMap<u64, SegmentReplicas>,
}

/// Fans appended segment bytes out to R backups and re-replicates after
/// backup failures. Shared between the log (through [`BackupReplicator`])
/// and the backup-failure monitor, so its state carries its own lock.
pub struct BackupManager {
    master_id: ServerId,
    replicas: u32,
    server_list: Arc<ServerList>,
    inner: Mutex<Inner>,
}

impl BackupManager {
    pub fn new(master_id: ServerId, replicas: u32, server_list: Arc<ServerList>) -> Self {
        Self {
            master_id,
            replicas,
            server_list,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub(crate) fn open_segment(&self, segment_id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.segments.insert(
            segment_id,
            SegmentReplicas {
                data: Vec::new(),
                closed: false,
                replicas: Vec::new(),
            },
        );
    }

    pub(crate) fn append(&self, segment_id: u64, offset: u32, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let Some(segment) = inner.segments.get_mut(&segment_id) else {
            warn!("append for untracked segment {}", segment_id);
            return;
        };
        let offset = offset as usize;
        debug_assert_eq!(offset, segment.data.len());
        if offset != segment.data.len() {
            segment.data.resize(offset, 0);
        }
        segment.data.extend_from_slice(data);
    }

    pub(crate) fn close_segment(&self, segment_id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(segment) = inner.segments.get_mut(&segment_id) {
            segment.closed = true;
        }
    }

    pub(crate) fn free_segment(&self, segment_id: u64) {
        let mut inner = self.inner.lock().unwrap();
        let Some(segment) = inner.segments.remove(&segment_id) else {
            return;
        };
        for replica in segment.replicas {
            if let Err(e) = replica.session.free_segment(self.master_id, segment_id) {
                warn!(
                    "couldn't free segment {} on backup {}: {}",
                    segment_id, replica.server_id, e
                );
            }
        }
    }

    pub(crate) fn sync(&self) -> Result<(), ReplicationError> {
        let mut inner = self.inner.lock().unwrap();
        self.sync_locked(&mut inner)
    }

    fn sync_locked(&self, inner: &mut Inner) -> Result<(), ReplicationError> {
        if self.replicas == 0 {
            return Ok(());
        }
        for (&segment_id, segment) in inner.segments.iter_mut() {
            // top up replica slots lost to failures (or never yet selected)
            while segment.replicas.len() < self.replicas as usize {
                let current: Vec<ServerId> =
                    segment.replicas.iter().map(|r| r.server_id).collect();
                let Some(replica) = self.select_backup(&current) else {
                    return Err(ReplicationError::InsufficientBackups {
                        needed: self.replicas,
                        found: segment.replicas.len() as u32,
                    });
                };
                debug!(
                    "replicating segment {} on backup {}",
                    segment_id, replica.server_id
                );
                segment.replicas.push(replica);
            }

            for slot in 0..segment.replicas.len() {
                let mut attempts = 0;
                loop {
                    let replica = &mut segment.replicas[slot];
                    if replica.acked >= segment.data.len() {
                        break;
                    }
                    let offset = replica.acked;
                    let result = replica.session.replicate_segment(
                        self.master_id,
                        segment_id,
                        offset as u32,
                        &segment.data[offset..],
                        segment.closed,
                    );
                    match result {
                        Ok(()) => {
                            replica.acked = segment.data.len();
                            break;
                        }
                        Err(e) => {
                            let failed = replica.server_id;
                            warn!(
                                "replication of segment {} to backup {} failed: {}",
                                segment_id, failed, e
                            );
                            self.server_list.flush_session(failed);
                            attempts += 1;
                            if attempts > REPLACEMENT_RETRIES {
                                return Err(ReplicationError::SessionFailed(e.to_string()));
                            }
                            let mut exclude: Vec<ServerId> =
                                segment.replicas.iter().map(|r| r.server_id).collect();
                            exclude.push(failed);
                            let Some(replacement) = self.select_backup(&exclude) else {
                                return Err(ReplicationError::InsufficientBackups {
                                    needed: self.replicas,
                                    found: (segment.replicas.len() - 1) as u32,
                                });
                            };
                            segment.replicas[slot] = replacement;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Pick a random up backup not in `exclude`, with a session.
    fn select_backup(&self, exclude: &[ServerId]) -> Option<Replica> {
        let mut candidates = self.server_list.up_servers_with(ServiceMask::BACKUP);
        candidates.retain(|details| {
            details.server_id != self.master_id && !exclude.contains(&details.server_id)
        });
        let choice = candidates.choose(&mut rand::thread_rng())?;
        Some(Replica {
            server_id: choice.server_id,
            session: self.server_list.get_session(choice.server_id),
            acked: 0,
        })
    }
}

impl ReplicaManager for BackupManager {
    /// Drop every replica hosted by the failed server and rebuild them on
    /// other backups right away, best effort. Anything that cannot be
    /// rebuilt now is retried at the next sync barrier.
    fn handle_backup_failure(&self, id: ServerId) {
        let mut inner = self.inner.lock().unwrap();
        let mut lost = 0;
        for (&segment_id, segment) in inner.segments.iter_mut() {
            let before = segment.replicas.len();
            segment.replicas.retain(|replica| replica.server_id != id);
            if segment.replicas.len() < before {
                info!(
                    "lost replica of segment {} on failed backup {}",
                    segment_id, id
                );
                lost += 1;
            }
        }
        if lost > 0 {
            if let Err(e) = self.sync_locked(&mut inner) {
                warn!("re-replication after failure of {} incomplete: {}", id, e);
            }
        }
    }
}

/// Adapter installed into the log: forwards the replicator callbacks to the
/// shared [`BackupManager`].
pub(crate) struct BackupReplicator(Arc<BackupManager>);

impl BackupReplicator {
    pub(crate) fn new(manager: Arc<BackupManager>) -> Self {
        Self(manager)
    }
}

impl Replicator for BackupReplicator {
    fn open_segment(&mut self, segment_id: u64) {
        self.0.open_segment(segment_id);
    }

    fn append(&mut self, segment_id: u64, offset: u32, data: &[u8]) {
        self.0.append(segment_id, offset, data);
    }

    fn close_segment(&mut self, segment_id: u64) {
        self.0.close_segment(segment_id);
    }

    fn free_segment(&mut self, segment_id: u64) {
        self.0.free_segment(segment_id);
    }

    fn sync(&mut self) -> Result<(), ReplicationError> {
        self.0.sync()
    }
}
