// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Per-subscriber queues of membership change events.

use crate::server_list::{ServerDetails, ServerList};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

/// The kind of membership change a tracker event describes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ServerChange {
    Added,
    Crashed,
    Removed,
}

/// Callback fired after events are enqueued on a tracker, used by consumers
/// that sleep between batches.
pub(crate) type EventCallback = Box<dyn Fn() + Send + Sync>;

/// State shared between a [`ServerTracker`] handle and the server list that
/// feeds it.
pub(crate) struct TrackerShared {
    queue: Mutex<VecDeque<(ServerDetails, ServerChange)>>,
    callback: Option<EventCallback>,
}

impl TrackerShared {
    pub(crate) fn new(callback: Option<EventCallback>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            callback,
        }
    }

    pub(crate) fn enqueue(&self, details: ServerDetails, change: ServerChange) {
        self.queue.lock().unwrap().push_back((details, change));
    }

    pub(crate) fn fire_callback(&self) {
        if let Some(callback) = &self.callback {
            callback();
        }
    }
}

/// A FIFO stream of membership changes. Created against a [`ServerList`],
/// which immediately replays its current state onto the new tracker and then
/// forwards every later mutation in order. Dropping the tracker unregisters
/// it; the tracker holds only a weak reference to its parent, so it also
/// tolerates the list being destroyed first.
pub struct ServerTracker {
    shared: Arc<TrackerShared>,
    parent: Weak<ServerList>,
}

impl ServerTracker {
    /// Register a new tracker. `callback`, if given, fires after each batch
    /// of events is enqueued.
    pub fn new(
        list: &Arc<ServerList>,
        callback: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> Result<Self, crate::ClusterError> {
        let shared = Arc::new(TrackerShared::new(callback));
        list.register_tracker(&shared)?;
        Ok(Self {
            shared,
            parent: Arc::downgrade(list),
        })
    }

    /// Whether any events are waiting to be consumed.
    pub fn are_changes(&self) -> bool {
        !self.shared.queue.lock().unwrap().is_empty()
    }

    /// Dequeue the oldest pending event.
    pub fn poll(&self) -> Option<(ServerDetails, ServerChange)> {
        self.shared.queue.lock().unwrap().pop_front()
    }
}

impl Drop for ServerTracker {
    fn drop(&mut self) {
        // The parent may already be gone; its destruction path cleared our
        // registration for us.
        if let Some(list) = self.parent.upgrade() {
            list.unregister_tracker(&self.shared);
        }
    }
}
