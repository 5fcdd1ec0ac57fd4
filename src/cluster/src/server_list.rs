// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The local mirror of cluster membership: a dense slot vector indexed by
//! `ServerId::index`, a version counter tracking coordinator broadcasts, the
//! registered trackers, and a per-server session cache.

use crate::session::{FailSession, Session, Transport};
use crate::tracker::{ServerChange, TrackerShared};
use crate::{ClusterError, ServerId, ServerStatus, ServiceMask};

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Snapshot of one server list entry. Trackers receive these with each
/// change event; the cached session is deliberately not part of the
/// snapshot.
#[derive(Clone, Debug)]
pub struct ServerDetails {
    pub server_id: ServerId,
    pub service_locator: String,
    pub services: ServiceMask,
    pub expected_read_mbps: u32,
    pub status: ServerStatus,
}

struct Slot {
    details: ServerDetails,
    session: Option<Arc<dyn Session>>,
}

struct Inner {
    slots: Vec<Option<Slot>>,
    version: u64,
    trackers: Vec<Arc<TrackerShared>>,
    destroyed: bool,
}

impl Inner {
    fn slot(&self, id: ServerId) -> Option<&Slot> {
        match self.slots.get(id.index() as usize) {
            Some(Some(slot)) if slot.details.server_id == id => Some(slot),
            _ => None,
        }
    }

    fn slot_mut(&mut self, id: ServerId) -> Option<&mut Slot> {
        match self.slots.get_mut(id.index() as usize) {
            Some(Some(slot)) if slot.details.server_id == id => Some(slot),
            _ => None,
        }
    }

    /// Enqueue one event on every registered tracker, preserving per-tracker
    /// FIFO order with respect to list mutations.
    fn enqueue_all(&self, details: &ServerDetails, change: ServerChange) {
        for tracker in &self.trackers {
            tracker.enqueue(details.clone(), change);
        }
    }
}

/// The membership table. All mutation happens under a single lock; sessions
/// are opened outside the lock and installed with a double-checked
/// revalidation of the slot.
pub struct ServerList {
    inner: Mutex<Inner>,
    transport: Arc<dyn Transport>,
    skip_server_id_check: AtomicBool,
}

impl ServerList {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                version: 0,
                trackers: Vec::new(),
                destroyed: false,
            }),
            transport,
            skip_server_id_check: AtomicBool::new(false),
        }
    }

    /// Disable the membership ping that verifies a freshly opened session
    /// actually belongs to the expected server. Test hook.
    pub fn set_skip_server_id_check(&self, skip: bool) {
        self.skip_server_id_check.store(skip, Ordering::Relaxed);
    }

    /// Add a server, or replace the server previously occupying the same
    /// index if the new id carries a higher generation. A replacement always
    /// emits the crash and removal of the old server before the addition of
    /// the new one, so every tracker observes the two lifetimes in order.
    pub fn add(&self, id: ServerId, locator: &str, services: ServiceMask, read_mbps: u32) {
        {
            let inner = &mut *self.inner.lock().unwrap();
            if inner.destroyed {
                return;
            }

            let index = id.index() as usize;
            if inner.slots.len() <= index {
                inner.slots.resize_with(index + 1, || None);
            }

            let replaced = match &mut inner.slots[index] {
                Some(slot) => {
                    let old = slot.details.clone();
                    if old.server_id == id {
                        debug!("duplicate add of server {}, updating details", id);
                        slot.details.service_locator = locator.to_string();
                        slot.details.services = services;
                        slot.details.expected_read_mbps = read_mbps;
                        return;
                    }
                    if old.server_id.generation() >= id.generation() {
                        warn!(
                            "ignoring stale add of server {}, index occupied by {}",
                            id, old.server_id
                        );
                        return;
                    }
                    Some(old)
                }
                None => None,
            };
            if let Some(old) = replaced {
                // The index was reused without an intervening remove; retire
                // the old server first so trackers see its crash strictly
                // before the addition of its replacement.
                if old.status == ServerStatus::Up {
                    let mut crashed = old.clone();
                    crashed.status = ServerStatus::Crashed;
                    inner.enqueue_all(&crashed, ServerChange::Crashed);
                }
                let mut removed = old;
                removed.status = ServerStatus::Down;
                inner.enqueue_all(&removed, ServerChange::Removed);
                inner.slots[index] = None;
            }

            let details = ServerDetails {
                server_id: id,
                service_locator: locator.to_string(),
                services,
                expected_read_mbps: read_mbps,
                status: ServerStatus::Up,
            };
            info!("adding server {} at {} with {}", id, locator, services);
            inner.enqueue_all(&details, ServerChange::Added);
            inner.slots[index] = Some(Slot {
                details,
                session: None,
            });
            inner.version += 1;
        }
        self.fire_tracker_callbacks();
    }

    /// Mark a server as crashed. The slot is retained until `remove`.
    pub fn crashed(&self, id: ServerId) {
        {
            let inner = &mut *self.inner.lock().unwrap();
            if inner.destroyed {
                return;
            }
            let Some(slot) = inner.slot_mut(id) else {
                warn!("crash reported for unknown server {}", id);
                return;
            };
            if slot.details.status != ServerStatus::Up {
                return;
            }
            slot.details.status = ServerStatus::Crashed;
            slot.session = None;
            let details = slot.details.clone();
            info!("server {} marked crashed", id);
            inner.enqueue_all(&details, ServerChange::Crashed);
            inner.version += 1;
        }
        self.fire_tracker_callbacks();
    }

    /// Remove a server and clear its slot, ending its lifecycle with one
    /// `Removed` event whether it was `Up` or already `Crashed`.
    pub fn remove(&self, id: ServerId) {
        {
            let inner = &mut *self.inner.lock().unwrap();
            if inner.destroyed {
                return;
            }
            let Some(slot) = inner.slot_mut(id) else {
                warn!("remove of unknown server {}", id);
                return;
            };
            let mut details = slot.details.clone();
            details.status = ServerStatus::Down;
            info!("removing server {}", id);
            inner.enqueue_all(&details, ServerChange::Removed);
            inner.slots[id.index() as usize] = None;
            inner.version += 1;
        }
        self.fire_tracker_callbacks();
    }

    /// Fire every tracker's event callback. Called after the list lock is
    /// released: callbacks take their owners' locks, and those owners may
    /// re-enter this list from their own threads.
    fn fire_tracker_callbacks(&self) {
        let trackers: Vec<Arc<TrackerShared>> = self.inner.lock().unwrap().trackers.clone();
        for tracker in trackers {
            tracker.fire_callback();
        }
    }

    /// The locator for a server. Unknown ids are an error here, unlike
    /// `get_session`, because callers of this method want the address
    /// itself, not something to retry against.
    pub fn get_locator(&self, id: ServerId) -> Result<String, ClusterError> {
        let inner = self.inner.lock().unwrap();
        inner
            .slot(id)
            .map(|slot| slot.details.service_locator.clone())
            .ok_or(ClusterError::InvalidServerId(id))
    }

    /// Whether the server exists and is `Up`.
    pub fn is_up(&self, id: ServerId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .slot(id)
            .map(|slot| slot.details.status == ServerStatus::Up)
            .unwrap_or(false)
    }

    /// Whether the server exists in the list, crashed or not.
    pub fn contains(&self, id: ServerId) -> bool {
        self.inner.lock().unwrap().slot(id).is_some()
    }

    /// Snapshot of one entry.
    pub fn details(&self, id: ServerId) -> Option<ServerDetails> {
        let inner = self.inner.lock().unwrap();
        inner.slot(id).map(|slot| slot.details.clone())
    }

    /// Snapshots of every `Up` server running all of the given services.
    pub fn up_servers_with(&self, services: ServiceMask) -> Vec<ServerDetails> {
        let inner = self.inner.lock().unwrap();
        inner
            .slots
            .iter()
            .flatten()
            .filter(|slot| {
                slot.details.status == ServerStatus::Up && slot.details.services.contains(services)
            })
            .map(|slot| slot.details.clone())
            .collect()
    }

    /// Version of the most recent membership update applied to this list.
    pub fn version(&self) -> u64 {
        self.inner.lock().unwrap().version
    }

    /// Return a session to the given server, opening one if none is cached.
    /// Returns the fail session if the server is unknown, cannot be reached,
    /// or does not identify as the expected id.
    pub fn get_session(&self, id: ServerId) -> Arc<dyn Session> {
        // Don't hold the lock while opening: session establishment can
        // block, and the server could be removed meanwhile. Two threads may
        // race to open; the double-check below keeps only one session.
        let locator = {
            let inner = self.inner.lock().unwrap();
            let Some(slot) = inner.slot(id) else {
                return FailSession::get();
            };
            if let Some(session) = &slot.session {
                return session.clone();
            }
            slot.details.service_locator.clone()
        };

        let session = match self.transport.open_session(&locator) {
            Ok(session) => session,
            Err(e) => {
                debug!("failed to open session to \"{}\": {}", locator, e);
                return FailSession::get();
            }
        };

        if !self.skip_server_id_check.load(Ordering::Relaxed) {
            match session.server_id() {
                Ok(actual) if actual == id => {}
                Ok(actual) => {
                    debug!(
                        "expected server {} at \"{}\", but actual server id was {}",
                        id, locator, actual
                    );
                    return FailSession::get();
                }
                Err(e) => {
                    debug!("failed to obtain server id from \"{}\": {}", locator, e);
                    return FailSession::get();
                }
            }
        }

        // Install only if the slot is still valid and still empty.
        let mut inner = self.inner.lock().unwrap();
        let Some(slot) = inner.slot_mut(id) else {
            return FailSession::get();
        };
        if slot.session.is_none() {
            slot.session = Some(session);
        }
        slot.session.clone().unwrap_or_else(FailSession::get)
    }

    /// Drop the cached session for a server so the next `get_session` opens
    /// a fresh one.
    pub fn flush_session(&self, id: ServerId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(slot) = inner.slot_mut(id) {
            slot.session = None;
            debug!("flushed session for server {}", id);
        }
    }

    /// Register a tracker and replay the current list state onto it.
    ///
    /// Crashed servers are replayed first, each as a synthetic ADDED of the
    /// up-view followed by the CRASHED event. This guarantees that a freshly
    /// registered tracker observes the same replacement ordering a long-lived
    /// tracker would have: CRASHED(old@index) always precedes ADDED(new@index).
    pub(crate) fn register_tracker(
        &self,
        tracker: &Arc<TrackerShared>,
    ) -> Result<(), ClusterError> {
        {
            let inner = &mut *self.inner.lock().unwrap();
            if inner.destroyed {
                return Err(ClusterError::ListDestroyed);
            }
            inner.trackers.push(tracker.clone());

            for slot in inner.slots.iter().flatten() {
                if slot.details.status != ServerStatus::Crashed {
                    continue;
                }
                let mut up_view = slot.details.clone();
                up_view.status = ServerStatus::Up;
                tracker.enqueue(up_view, ServerChange::Added);
                tracker.enqueue(slot.details.clone(), ServerChange::Crashed);
            }
            for slot in inner.slots.iter().flatten() {
                if slot.details.status != ServerStatus::Up {
                    continue;
                }
                tracker.enqueue(slot.details.clone(), ServerChange::Added);
            }
        }
        tracker.fire_callback();
        Ok(())
    }

    pub(crate) fn unregister_tracker(&self, tracker: &Arc<TrackerShared>) {
        let inner = &mut *self.inner.lock().unwrap();
        if inner.destroyed {
            return;
        }
        inner
            .trackers
            .retain(|registered| !Arc::ptr_eq(registered, tracker));
    }

    pub(crate) fn set_version(&self, version: u64) {
        self.inner.lock().unwrap().version = version;
    }
}

impl Drop for ServerList {
    fn drop(&mut self) {
        // Destruction protocol: under the lock, flag the list as destroyed
        // and detach every tracker. Late registrations fail and unregister
        // becomes a no-op; trackers already hold only weak back-pointers.
        let inner = &mut *self.inner.lock().unwrap();
        inner.destroyed = true;
        inner.trackers.clear();
    }
}

impl fmt::Display for ServerList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        for slot in inner.slots.iter().flatten() {
            writeln!(
                f,
                "server {} at {} with {} is {}",
                slot.details.server_id,
                slot.details.service_locator,
                slot.details.services,
                slot.details.status
            )?;
        }
        Ok(())
    }
}
