// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Crash recovery: fetch a dead master's filtered segments from backups in
//! parallel and replay them into the local log and object map.
//!
//! Replay obeys version dominance per key. For an incoming object the
//! minimum acceptable version is one past whatever is locally known; for an
//! incoming tombstone it is the live object's version itself, because a
//! tombstone records the deletion of exactly that version. Weakening either
//! comparison lets a stale entry from one segment overwrite a newer entry
//! replayed earlier from another.

use crate::service::{status_for, MasterService, Rejection};

use cluster::{ServerId, ServiceMask, Tablet};
use protocol_master::{BackupSource, Response, Status};
use seglog::{EntryIter, EntryType, Object, Tombstone};

use rand::seq::SliceRandom;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex};
use std::thread;

/// Tombstones met during one recovery, keyed by object. Recovery-local: the
/// whole map is dropped in one shot when the recovery call ends.
pub(crate) type TombstoneMap = HashMap<(u64, u64), Tombstone>;

/// Builds the replay schedule for a recovery: the unique segment ids in
/// random order, and for each segment the randomized list of backups
/// claiming to hold it.
pub(crate) struct SegmentLocatorChooser {
    candidates: HashMap<u64, Vec<String>>,
    schedule: Vec<u64>,
}

impl SegmentLocatorChooser {
    pub(crate) fn new(backups: &[BackupSource]) -> Self {
        let mut candidates: HashMap<u64, Vec<String>> = HashMap::new();
        for source in backups {
            let Some(segment_id) = source.segment_id else {
                warn!(
                    "backup list entry for {} has no segment id, skipped",
                    source.service_locator
                );
                continue;
            };
            if !source.services.contains(ServiceMask::BACKUP) {
                warn!(
                    "backup list entry for {} is not a backup, skipped",
                    source.service_locator
                );
                continue;
            }
            let locators = candidates.entry(segment_id).or_default();
            if !locators.contains(&source.service_locator) {
                locators.push(source.service_locator.clone());
            }
        }

        let mut rng = rand::thread_rng();
        let mut schedule: Vec<u64> = candidates.keys().copied().collect();
        // randomized schedule spreads concurrent fetches across backups
        schedule.shuffle(&mut rng);
        for locators in candidates.values_mut() {
            locators.shuffle(&mut rng);
        }
        Self {
            candidates,
            schedule,
        }
    }

    pub(crate) fn schedule(&self) -> &[u64] {
        &self.schedule
    }

    pub(crate) fn candidates(&self, segment_id: u64) -> &[String] {
        self.candidates
            .get(&segment_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl MasterService {
    /// Take over `tablets` from a crashed master. The commit point is the
    /// `tablets_recovered` call to the coordinator: until it succeeds, no
    /// tablet ownership changes and any failure leaves the request engine
    /// serving exactly what it served before.
    pub(crate) fn recover(
        &mut self,
        crashed_master: ServerId,
        tablets: Vec<Tablet>,
        backups: Vec<BackupSource>,
    ) -> Result<Response, Rejection> {
        info!(
            "recovering master {}: {} tablets, {} backup entries",
            crashed_master,
            tablets.len(),
            backups.len()
        );
        let chooser = SegmentLocatorChooser::new(&backups);

        let mut tombstones = TombstoneMap::new();
        self.replay_from_backups(crashed_master, &tablets, &chooser, &mut tombstones)
            .map_err(Rejection::from)?;
        // Tombstones recorded during replay have served their purpose;
        // release them in one shot.
        drop(tombstones);

        self.log.sync().map_err(|e| Rejection::from(status_for(&e)))?;

        let mut recovered = tablets;
        for tablet in &mut recovered {
            info!(
                "set tablet {} [{}, {}] to locator {}, id {}",
                tablet.table_id,
                tablet.start_object_id,
                tablet.end_object_id,
                self.locator,
                self.server_id
            );
            tablet.server_id = self.server_id;
            tablet.service_locator = self.locator.clone();
        }

        self.coordinator
            .tablets_recovered(&recovered)
            .map_err(|e| {
                error!("couldn't report recovered tablets to coordinator: {}", e);
                Rejection::from(Status::Transport)
            })?;

        // The coordinator agreed; install the tablets and start serving.
        let mut all = self.tablets.tablets().to_vec();
        all.extend(recovered);
        self.tablets.set_tablets(all);
        Ok(Response::Recover)
    }

    /// Fetch every scheduled segment, keeping up to `concurrent_fetches`
    /// requests outstanding, and replay each as it arrives. A segment whose
    /// candidate backups are all exhausted fails the whole recovery.
    fn replay_from_backups(
        &mut self,
        crashed_master: ServerId,
        tablets: &[Tablet],
        chooser: &SegmentLocatorChooser,
        tombstones: &mut TombstoneMap,
    ) -> Result<(), Status> {
        let schedule = chooser.schedule();
        if schedule.is_empty() {
            return Ok(());
        }
        let fetchers = self.concurrent_fetches.min(schedule.len());
        let work = Mutex::new(VecDeque::from(schedule.to_vec()));
        let failed = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<(u64, Option<Vec<u8>>)>();
        let transport = self.transport.clone();

        thread::scope(|scope| {
            for _ in 0..fetchers {
                let tx = tx.clone();
                let work = &work;
                let failed = &failed;
                let transport = transport.clone();
                scope.spawn(move || loop {
                    if failed.load(Ordering::Relaxed) {
                        break;
                    }
                    let Some(segment_id) = work.lock().unwrap().pop_front() else {
                        break;
                    };
                    let mut fetched = None;
                    for locator in chooser.candidates(segment_id) {
                        let session = match transport.open_session(locator) {
                            Ok(session) => session,
                            Err(e) => {
                                debug!(
                                    "couldn't contact {}, trying next backup: {}",
                                    locator, e
                                );
                                continue;
                            }
                        };
                        match session.get_recovery_data(crashed_master, segment_id, tablets) {
                            Ok(bytes) => {
                                fetched = Some(bytes);
                                break;
                            }
                            Err(e) => {
                                debug!(
                                    "recovery data for segment {} failed on {}, \
                                     trying next backup: {}",
                                    segment_id, locator, e
                                );
                            }
                        }
                    }
                    let exhausted = fetched.is_none();
                    if tx.send((segment_id, fetched)).is_err() || exhausted {
                        if exhausted {
                            failed.store(true, Ordering::Relaxed);
                        }
                        break;
                    }
                });
            }
            drop(tx);

            let mut result = Ok(());
            for (segment_id, bytes) in rx.iter() {
                match bytes {
                    Some(bytes) if result.is_ok() => {
                        if let Err(status) = self.recover_segment(segment_id, &bytes, tombstones)
                        {
                            failed.store(true, Ordering::Relaxed);
                            result = Err(status);
                        }
                    }
                    Some(_) => {}
                    None => {
                        error!("no backup could provide segment {}", segment_id);
                        result = Err(Status::SegmentRecoveryFailed);
                    }
                }
            }
            result
        })
    }

    /// Replay one filtered segment into the live log and object map under
    /// version dominance. A prefetch cursor runs one entry ahead of the
    /// replay cursor, warming the object map bucket for the next key.
    pub(crate) fn recover_segment(
        &mut self,
        segment_id: u64,
        buffer: &[u8],
        tombstones: &mut TombstoneMap,
    ) -> Result<(), Status> {
        debug!("recovering segment {} ({} bytes)", segment_id, buffer.len());

        let mut prefetch = EntryIter::new(buffer);
        prefetch.next();

        for (ty, _, payload) in EntryIter::new(buffer) {
            if let Some((next_ty, _, next_payload)) = prefetch.next() {
                match next_ty {
                    EntryType::Object => {
                        if let Some((table_id, object_id)) = Object::peek_key(next_payload) {
                            self.object_map.prefetch(table_id, object_id);
                        }
                    }
                    EntryType::Tombstone => {
                        if let Ok(tomb) = Tombstone::decode(next_payload) {
                            self.object_map.prefetch(tomb.table_id, tomb.object_id);
                        }
                    }
                    _ => {}
                }
            }

            match ty {
                EntryType::Object => {
                    let incoming = Object::decode(payload).map_err(|e| status_for(&e))?;
                    let key = (incoming.table_id, incoming.object_id);
                    let local_entry = self.object_map.lookup(key.0, key.1);
                    let local_version = local_entry.map(|entry| {
                        self.log
                            .read_object(entry)
                            .expect("object map points at dead entry")
                            .version
                    });
                    let local_tomb = tombstones.get(&key).copied();
                    assert!(
                        local_entry.is_none() || local_tomb.is_none(),
                        "object and tombstone both present for ({}, {})",
                        key.0,
                        key.1
                    );

                    let min_successor = if let Some(version) = local_version {
                        version + 1
                    } else if let Some(tomb) = local_tomb {
                        tomb.object_version + 1
                    } else {
                        0
                    };

                    if incoming.version >= min_successor {
                        let new_entry = self
                            .log
                            .append(EntryType::Object, payload, false)
                            .map_err(|e| status_for(&e))?;
                        self.object_map.replace(key.0, key.1, new_entry);
                        tombstones.remove(&key);
                        if let Some(old) = local_entry {
                            self.log.free(old);
                        }
                    }
                }
                EntryType::Tombstone => {
                    let incoming = Tombstone::decode(payload).map_err(|e| status_for(&e))?;
                    let key = (incoming.table_id, incoming.object_id);
                    let local_entry = self.object_map.lookup(key.0, key.1);
                    let local_version = local_entry.map(|entry| {
                        self.log
                            .read_object(entry)
                            .expect("object map points at dead entry")
                            .version
                    });
                    let local_tomb = tombstones.get(&key).copied();
                    assert!(
                        local_entry.is_none() || local_tomb.is_none(),
                        "object and tombstone both present for ({}, {})",
                        key.0,
                        key.1
                    );

                    // A tombstone for version V dominates a live object at
                    // version V: it records that exact version's deletion.
                    let min_successor = if let Some(version) = local_version {
                        version
                    } else if let Some(tomb) = local_tomb {
                        tomb.object_version + 1
                    } else {
                        0
                    };

                    if incoming.object_version >= min_successor {
                        tombstones.insert(key, incoming);
                        if let Some(old) = local_entry {
                            self.object_map.remove(key.0, key.1);
                            self.log.free(old);
                        }
                    }
                }
                EntryType::SegHeader | EntryType::SegFooter => {}
            }
        }
        info!("segment {} replay complete", segment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_util::service;
    use protocol_master::RejectRules;
    use seglog::push_entry;

    fn object_entry(version: u64, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        push_entry(
            &mut buf,
            EntryType::Object,
            &Object::new(1, 1, version, data.to_vec()).encode(),
        );
        buf
    }

    fn tombstone_entry(version: u64, segment_id: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        push_entry(
            &mut buf,
            EntryType::Tombstone,
            &Tombstone {
                table_id: 1,
                object_id: 1,
                object_version: version,
                segment_id,
            }
            .encode(),
        );
        buf
    }

    fn read_version(service: &mut MasterService) -> Option<(u64, Vec<u8>)> {
        let entry = service.object_map.lookup(1, 1)?;
        let object = service.log.read_object(entry)?;
        Some((object.version, object.data))
    }

    /// Replay dominance: any order of segments converges to the same state.
    #[test]
    fn replay_order_does_not_matter() {
        // segments for key (1,1): OBJ v2, TOMB v3 (killing v2's segment),
        // OBJ v5
        let segments = [
            (10u64, object_entry(2, b"old")),
            (11u64, tombstone_entry(3, 10)),
            (12u64, object_entry(5, b"new")),
        ];
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for order in orders {
            let mut master = service();
            let mut tombstones = TombstoneMap::new();
            for &i in &order {
                let (segment_id, ref buffer) = segments[i];
                master
                    .recover_segment(segment_id, buffer, &mut tombstones)
                    .expect("replay failed");
            }
            assert_eq!(
                read_version(&mut master),
                Some((5, b"new".to_vec())),
                "order {:?}",
                order
            );
            assert!(
                !tombstones.contains_key(&(1, 1)),
                "tombstone survived in order {:?}",
                order
            );
        }
    }

    /// The tombstone comparison admits equality: a tombstone at the live
    /// object's exact version deletes it.
    #[test]
    fn tombstone_dominates_equal_version() {
        let mut master = service();
        let mut tombstones = TombstoneMap::new();
        master
            .recover_segment(10, &object_entry(4, b"doomed"), &mut tombstones)
            .unwrap();
        master
            .recover_segment(11, &tombstone_entry(4, 10), &mut tombstones)
            .unwrap();
        assert_eq!(read_version(&mut master), None);
        assert!(tombstones.contains_key(&(1, 1)));
    }

    /// An object needs to be strictly newer than the live object.
    #[test]
    fn object_does_not_dominate_equal_version() {
        let mut master = service();
        let mut tombstones = TombstoneMap::new();
        master
            .recover_segment(10, &object_entry(4, b"first"), &mut tombstones)
            .unwrap();
        master
            .recover_segment(11, &object_entry(4, b"impostor"), &mut tombstones)
            .unwrap();
        assert_eq!(read_version(&mut master), Some((4, b"first".to_vec())));
    }

    /// A stale tombstone must not delete a newer object.
    #[test]
    fn stale_tombstone_is_ignored() {
        let mut master = service();
        let mut tombstones = TombstoneMap::new();
        master
            .recover_segment(10, &object_entry(5, b"alive"), &mut tombstones)
            .unwrap();
        master
            .recover_segment(11, &tombstone_entry(4, 9), &mut tombstones)
            .unwrap();
        assert_eq!(read_version(&mut master), Some((5, b"alive".to_vec())));
        assert!(!tombstones.contains_key(&(1, 1)));
    }

    /// An object dominated by a recorded tombstone is not resurrected.
    #[test]
    fn tombstone_blocks_older_object() {
        let mut master = service();
        let mut tombstones = TombstoneMap::new();
        master
            .recover_segment(10, &tombstone_entry(6, 9), &mut tombstones)
            .unwrap();
        master
            .recover_segment(11, &object_entry(6, b"zombie"), &mut tombstones)
            .unwrap();
        assert_eq!(read_version(&mut master), None);
        // a strictly newer object does win
        master
            .recover_segment(12, &object_entry(7, b"reborn"), &mut tombstones)
            .unwrap();
        assert_eq!(read_version(&mut master), Some((7, b"reborn".to_vec())));
        assert!(!tombstones.contains_key(&(1, 1)));
    }

    #[test]
    fn chooser_skips_malformed_entries() {
        let sources = vec![
            BackupSource {
                service_locator: "mock:host=backup1".to_string(),
                segment_id: Some(3),
                services: ServiceMask::BACKUP,
            },
            BackupSource {
                service_locator: "mock:host=backup2".to_string(),
                segment_id: Some(3),
                services: ServiceMask::BACKUP,
            },
            // duplicate claim collapses
            BackupSource {
                service_locator: "mock:host=backup1".to_string(),
                segment_id: Some(3),
                services: ServiceMask::BACKUP,
            },
            // no segment id
            BackupSource {
                service_locator: "mock:host=backup3".to_string(),
                segment_id: None,
                services: ServiceMask::BACKUP,
            },
            // a master has no business in the backup list
            BackupSource {
                service_locator: "mock:host=master1".to_string(),
                segment_id: Some(4),
                services: ServiceMask::MASTER,
            },
        ];
        let chooser = SegmentLocatorChooser::new(&sources);
        assert_eq!(chooser.schedule(), &[3]);
        assert_eq!(chooser.candidates(3).len(), 2);
        assert!(chooser.candidates(4).is_empty());
    }

    /// After replaying a removal, a later write through the normal request
    /// path picks a version above the tombstone's.
    #[test]
    fn recovered_tombstone_does_not_reset_versions() {
        let mut master = service();
        let mut tombstones = TombstoneMap::new();
        master
            .recover_segment(10, &object_entry(9, b"data"), &mut tombstones)
            .unwrap();
        // raise the table floor the way replayed state would have it
        master
            .tablets
            .table_mut(1, 1)
            .expect("tablet missing")
            .raise_version(10);

        let version = master
            .store_data(1, 1, RejectRules::default(), b"next".to_vec())
            .expect("write failed");
        assert!(version >= 10);
    }
}
