// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Background watcher that turns membership changes into replica-manager
//! actions. One thread, one tracker: every crash or removal of a server
//! with the backup service becomes a `handle_backup_failure` call, which
//! drives re-replication of the segments that server held.

use crate::backup::ReplicaManager;

use cluster::{ClusterError, ServerChange, ServerList, ServerTracker, ServiceMask};

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

struct State {
    /// Held by the worker while it consumes events, so a caller that has
    /// seen the tracker drain can take it to rendezvous with the end of
    /// processing.
    running: Mutex<bool>,
    changes: Condvar,
}

struct Shared {
    tracker: ServerTracker,
    replica_manager: Arc<dyn ReplicaManager>,
    state: Arc<State>,
}

impl Shared {
    fn run(&self) {
        loop {
            let mut running = self.state.running.lock().unwrap();
            while *running && !self.tracker.are_changes() {
                running = self.state.changes.wait(running).unwrap();
            }
            if !*running {
                return;
            }
            while let Some((details, change)) = self.tracker.poll() {
                let failed = matches!(change, ServerChange::Crashed | ServerChange::Removed);
                if failed && details.services.contains(ServiceMask::BACKUP) {
                    info!(
                        "notifying replica manager of failure of server {}",
                        details.server_id
                    );
                    self.replica_manager.handle_backup_failure(details.server_id);
                }
            }
        }
    }
}

/// Watches the server list from its own thread and notifies the replica
/// manager of every backup failure. `start` is idempotent; `halt` stops the
/// worker cooperatively and joins it.
pub struct BackupFailureMonitor {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl BackupFailureMonitor {
    pub fn new(
        server_list: &Arc<ServerList>,
        replica_manager: Arc<dyn ReplicaManager>,
    ) -> Result<Self, ClusterError> {
        let state = Arc::new(State {
            running: Mutex::new(false),
            changes: Condvar::new(),
        });
        let callback_state = state.clone();
        let tracker = ServerTracker::new(
            server_list,
            Some(Box::new(move || {
                // taking the mutex pins the worker either before its
                // predicate check or inside the wait, so the notification
                // cannot fall into the gap between the two
                let _running = callback_state.running.lock().unwrap();
                callback_state.changes.notify_one();
            })),
        )?;
        Ok(Self {
            shared: Arc::new(Shared {
                tracker,
                replica_manager,
                state,
            }),
            thread: None,
        })
    }

    /// Start the worker thread. A second call while running is a no-op.
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        *self.shared.state.running.lock().unwrap() = true;
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("backup-failure-monitor".to_string())
            .spawn(move || shared.run())
            .expect("failed to spawn monitor thread");
        self.thread = Some(handle);
        debug!("backup failure monitor started");
    }

    /// Stop the worker and join it. The worker checks the running flag
    /// between event batches, so a halt never interrupts a notification.
    pub fn halt(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        *self.shared.state.running.lock().unwrap() = false;
        self.shared.state.changes.notify_one();
        handle.join().expect("monitor thread panicked");
        debug!("backup failure monitor halted");
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Block until every event enqueued so far has been fully processed.
    /// First waits for the tracker to drain, then takes the consumption
    /// mutex, which the worker holds until the batch is finished.
    pub fn wait_until_idle(&self) {
        while self.tracker_has_changes() {
            thread::yield_now();
        }
        drop(self.shared.state.running.lock().unwrap());
    }

    pub fn tracker_has_changes(&self) -> bool {
        self.shared.tracker.are_changes()
    }
}

impl Drop for BackupFailureMonitor {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster::{ServerId, Session, Transport, TransportError};
    use std::sync::Mutex as StdMutex;

    struct NullTransport;

    impl Transport for NullTransport {
        fn open_session(&self, locator: &str) -> Result<Arc<dyn Session>, TransportError> {
            Err(TransportError::Open(locator.to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingReplicaManager {
        failures: StdMutex<Vec<ServerId>>,
    }

    impl ReplicaManager for RecordingReplicaManager {
        fn handle_backup_failure(&self, id: ServerId) {
            self.failures.lock().unwrap().push(id);
        }
    }

    fn setup() -> (
        Arc<ServerList>,
        Arc<RecordingReplicaManager>,
        BackupFailureMonitor,
    ) {
        let list = Arc::new(ServerList::new(Arc::new(NullTransport)));
        let manager = Arc::new(RecordingReplicaManager::default());
        let monitor =
            BackupFailureMonitor::new(&list, manager.clone()).expect("monitor construction");
        (list, manager, monitor)
    }

    #[test]
    fn notifies_once_per_failed_backup() {
        let (list, manager, mut monitor) = setup();
        monitor.start();

        list.add(
            ServerId::new(2, 0),
            "mock:host=backup1",
            ServiceMask::BACKUP,
            100,
        );
        list.remove(ServerId::new(2, 0));
        // a master failing is not the replica manager's problem
        list.add(
            ServerId::new(3, 0),
            "mock:host=master",
            ServiceMask::MASTER,
            100,
        );
        list.remove(ServerId::new(3, 0));

        monitor.wait_until_idle();
        let failures = manager.failures.lock().unwrap().clone();
        assert_eq!(failures, vec![ServerId::new(2, 0)]);
    }

    #[test]
    fn start_and_halt_lifecycle() {
        let (_list, _manager, mut monitor) = setup();
        monitor.start();
        assert!(monitor.is_running());
        monitor.start(); // duplicate start
        assert!(monitor.is_running());
        monitor.halt();
        assert!(!monitor.is_running());
        monitor.halt(); // duplicate halt
        assert!(!monitor.is_running());
        monitor.start(); // restart after halt
        assert!(monitor.is_running());
    }

    #[test]
    fn events_before_start_are_processed_at_start() {
        let (list, manager, mut monitor) = setup();
        list.add(
            ServerId::new(4, 0),
            "mock:host=backup2",
            ServiceMask::BACKUP,
            100,
        );
        list.crashed(ServerId::new(4, 0));

        monitor.start();
        monitor.wait_until_idle();
        let failures = manager.failures.lock().unwrap().clone();
        assert_eq!(failures, vec![ServerId::new(4, 0)]);
    }
}
