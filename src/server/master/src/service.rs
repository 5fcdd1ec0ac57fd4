// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The request engine: resolves each request against the tablet map, the
//! object map, and the log. Requests execute on the single thread that owns
//! the service; within one key, writes and removals are linearizable and
//! versions only move up.

use crate::backup::{BackupManager, BackupReplicator};

use cluster::{CoordinatorClient, ServerId, ServerList, ServiceMask, Transport, TransportError};
use config::{MasterConfig, RecoveryConfig, ReplicationConfig, SeglogConfig, ServerConfig};
use protocol_master::{Execute, MasterStats, RejectRules, Request, Response, Status};
use seglog::{EntryType, Log, LogError, Object, ObjectMap, TabletMap, Tombstone};

use std::sync::Arc;

/// A request that could not be served, with the status to report and, when
/// the target object exists, its current version.
#[derive(Debug)]
pub(crate) struct Rejection {
    pub(crate) status: Status,
    pub(crate) version: Option<u64>,
}

impl From<Status> for Rejection {
    fn from(status: Status) -> Self {
        Self {
            status,
            version: None,
        }
    }
}

pub(crate) fn status_for(e: &LogError) -> Status {
    match e {
        LogError::SegmentFull { .. } => Status::SegmentFull,
        LogError::LogFull { .. } => Status::LogFull,
        LogError::ReplicationFailed(_) => Status::BackupReplicationFailed,
        LogError::InvalidEntry(_) => Status::SegmentRecoveryFailed,
    }
}

/// The master node's runtime core: one log, one object map, the owned
/// tablets, and the replication manager, driven by typed requests.
pub struct MasterService {
    pub(crate) server_id: ServerId,
    pub(crate) locator: String,
    pub(crate) log: Log,
    pub(crate) object_map: ObjectMap,
    pub(crate) tablets: TabletMap,
    pub(crate) coordinator: Arc<dyn CoordinatorClient>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) backup_manager: Arc<BackupManager>,
    pub(crate) concurrent_fetches: usize,
    pub(crate) stats: MasterStats,
}

impl MasterService {
    /// Construct a master: enlist with the coordinator, then assemble the
    /// log (replicating through the backup manager), the object map, and an
    /// empty tablet map. The master serves nothing until `SET_TABLETS`.
    pub fn new(
        config: &MasterConfig,
        coordinator: Arc<dyn CoordinatorClient>,
        server_list: Arc<ServerList>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, TransportError> {
        let locator = config.server().locator();
        let server_id = coordinator.enlist_server(ServiceMask::MASTER, &locator)?;
        info!("enlisted with coordinator; server id is {}", server_id);

        let backup_manager = Arc::new(BackupManager::new(
            server_id,
            config.replication().replicas(),
            server_list,
        ));
        let log = Log::builder()
            .log_id(server_id.raw())
            .heap_size(config.seglog().log_bytes())
            .segment_size(config.seglog().segment_bytes())
            .clean_threshold(config.seglog().clean_threshold())
            .replicator(Box::new(BackupReplicator::new(backup_manager.clone())))
            .build();
        let object_map = ObjectMap::with_capacity_bytes(config.seglog().hashtable_bytes());

        Ok(Self {
            server_id,
            locator,
            log,
            object_map,
            tablets: TabletMap::new(),
            coordinator,
            transport,
            backup_manager,
            concurrent_fetches: config.recovery().concurrent_fetches(),
            stats: MasterStats::default(),
        })
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// The replication manager, shared so a failure monitor can be wired to
    /// it.
    pub fn backup_manager(&self) -> Arc<BackupManager> {
        self.backup_manager.clone()
    }

    /// Housekeeping hook for the owner thread to call between requests:
    /// runs a cleaner pass over the log.
    pub fn clean(&mut self) {
        match self.log.clean(&mut self.object_map, &self.tablets) {
            Ok(stats) if stats.segments_reclaimed > 0 => {
                debug!("cleaner reclaimed {} segments", stats.segments_reclaimed)
            }
            Ok(_) => {}
            Err(e) => warn!("cleaner pass failed: {}", e),
        }
    }

    fn create(&mut self, table_id: u64, data: Vec<u8>) -> Result<Response, Rejection> {
        let Some(table) = self.tablets.table_for_id(table_id) else {
            return Err(Status::TableDoesntExist.into());
        };
        let object_id = table.allocate_key(&self.object_map);
        // a concurrent create of the same id loses with ObjectExists
        // instead of silently overwriting
        let version = self.store_data(table_id, object_id, RejectRules::reject_exists(), data)?;
        Ok(Response::Create { object_id, version })
    }

    fn read(
        &mut self,
        table_id: u64,
        object_id: u64,
        reject: RejectRules,
    ) -> Result<Response, Rejection> {
        if !self.tablets.covers(table_id, object_id) {
            return Err(Status::TableDoesntExist.into());
        }
        let entry = self
            .object_map
            .lookup(table_id, object_id)
            .ok_or(Status::ObjectDoesntExist)?;
        let object = self
            .log
            .read_object(entry)
            .expect("object map points at dead entry");
        reject.check(Some(object.version)).map_err(|status| Rejection {
            status,
            version: Some(object.version),
        })?;
        Ok(Response::Read {
            version: object.version,
            data: object.data,
        })
    }

    fn remove(
        &mut self,
        table_id: u64,
        object_id: u64,
        reject: RejectRules,
    ) -> Result<Response, Rejection> {
        if !self.tablets.covers(table_id, object_id) {
            return Err(Status::TableDoesntExist.into());
        }
        let Some(entry) = self.object_map.lookup(table_id, object_id) else {
            reject
                .check(None)
                .map_err(|status| Rejection {
                    status,
                    version: None,
                })?;
            return Ok(Response::Remove { version: None });
        };
        let object = self
            .log
            .read_object(entry)
            .expect("object map points at dead entry");
        reject.check(Some(object.version)).map_err(|status| Rejection {
            status,
            version: Some(object.version),
        })?;

        // later writes of this key must exceed the removed version
        self.tablets
            .table_mut(table_id, object_id)
            .expect("covered key must resolve a table")
            .raise_version(object.version + 1);

        let tomb = Tombstone {
            table_id,
            object_id,
            object_version: object.version,
            segment_id: entry.segment_id,
        };
        // free before appending: the append may roll the tail and trigger
        // bookkeeping that must see the old entry as dead
        self.log.free(entry);
        self.log
            .append(EntryType::Tombstone, &tomb.encode(), true)
            .map_err(|e| Rejection::from(status_for(&e)))?;
        self.object_map.remove(table_id, object_id);
        Ok(Response::Remove {
            version: Some(object.version),
        })
    }

    /// Common path of WRITE and CREATE.
    pub(crate) fn store_data(
        &mut self,
        table_id: u64,
        object_id: u64,
        reject: RejectRules,
        data: Vec<u8>,
    ) -> Result<u64, Rejection> {
        if !self.tablets.covers(table_id, object_id) {
            return Err(Status::TableDoesntExist.into());
        }
        let old_entry = self.object_map.lookup(table_id, object_id);
        let old = old_entry.map(|entry| {
            self.log
                .read_object(entry)
                .expect("object map points at dead entry")
        });
        let old_version = old.as_ref().map(|object| object.version);
        reject.check(old_version).map_err(|status| Rejection {
            status,
            version: old_version,
        })?;

        let table = self
            .tablets
            .table_mut(table_id, object_id)
            .expect("covered key must resolve a table");
        let version = match old_version {
            Some(old_version) => (old_version + 1).max(table.next_version()),
            None => table.allocate_version(),
        };
        debug_assert!(old_version.map_or(true, |old| version > old));

        // Overwrite: mark the old entry dead before anything is appended,
        // so a cleaner pass triggered by the appends cannot relocate an
        // entry we are about to supersede; then log a tombstone carrying
        // the old entry's segment.
        if let (Some(old), Some(entry)) = (old, old_entry) {
            let tomb = Tombstone {
                table_id,
                object_id,
                object_version: old.version,
                segment_id: entry.segment_id,
            };
            self.log.free(entry);
            self.log
                .append(EntryType::Tombstone, &tomb.encode(), false)
                .map_err(|e| Rejection::from(status_for(&e)))?;
        }

        let data_len = data.len() as u64;
        let object = Object::new(table_id, object_id, version, data);
        let new_entry = self
            .log
            .append(EntryType::Object, &object.encode(), true)
            .map_err(|e| Rejection::from(status_for(&e)))?;
        self.object_map.replace(table_id, object_id, new_entry);
        self.stats.bytes_written += data_len;
        Ok(version)
    }

    fn set_tablets(&mut self, tablets: Vec<cluster::Tablet>) -> Result<Response, Rejection> {
        self.tablets.set_tablets(tablets);
        Ok(Response::SetTablets)
    }

    fn ping(&mut self) -> Result<Response, Rejection> {
        let stats = MasterStats {
            bytes_written: self.stats.bytes_written,
            bytes_appended: self.log.bytes_appended(),
            requests: self.stats.requests,
        };
        info!("bytes written: {}", stats.bytes_written);
        info!("bytes logged : {}", stats.bytes_appended);
        Ok(Response::Ping { stats })
    }
}

impl Execute<Request, Response> for MasterService {
    fn execute(&mut self, request: Request) -> Response {
        self.stats.requests += 1;
        let result = match request {
            Request::Create { table_id, data } => self.create(table_id, data),
            Request::Read {
                table_id,
                object_id,
                reject,
            } => self.read(table_id, object_id, reject),
            Request::Write {
                table_id,
                object_id,
                data,
                reject,
            } => self
                .store_data(table_id, object_id, reject, data)
                .map(|version| Response::Write { version }),
            Request::Remove {
                table_id,
                object_id,
                reject,
            } => self.remove(table_id, object_id, reject),
            Request::SetTablets { tablets } => self.set_tablets(tablets),
            Request::Recover {
                crashed_master,
                tablets,
                backups,
            } => self.recover(crashed_master, tablets, backups),
            Request::Ping => self.ping(),
        };
        result.unwrap_or_else(|rejection| Response::Error {
            status: rejection.status,
            version: rejection.version,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use cluster::{Session, Tablet};
    use std::sync::Mutex;

    pub(crate) struct MockCoordinator {
        assigned: ServerId,
        pub(crate) recovered: Mutex<Vec<Vec<Tablet>>>,
    }

    impl MockCoordinator {
        pub(crate) fn new(assigned: ServerId) -> Self {
            Self {
                assigned,
                recovered: Mutex::new(Vec::new()),
            }
        }
    }

    impl CoordinatorClient for MockCoordinator {
        fn enlist_server(
            &self,
            _services: ServiceMask,
            _locator: &str,
        ) -> Result<ServerId, TransportError> {
            Ok(self.assigned)
        }

        fn tablets_recovered(&self, tablets: &[Tablet]) -> Result<(), TransportError> {
            self.recovered.lock().unwrap().push(tablets.to_vec());
            Ok(())
        }
    }

    pub(crate) struct NullTransport;

    impl Transport for NullTransport {
        fn open_session(&self, locator: &str) -> Result<Arc<dyn Session>, TransportError> {
            Err(TransportError::Open(locator.to_string()))
        }
    }

    /// A master with no backups (replication disabled), owning all of
    /// table 1.
    pub(crate) fn service() -> MasterService {
        let config: MasterConfig = toml::from_str(
            r#"
            [replication]
            replicas = 0

            [seglog]
            log_bytes = 1048576
            segment_bytes = 8192
            "#,
        )
        .expect("config parse failed");
        let coordinator = Arc::new(MockCoordinator::new(ServerId::new(1, 0)));
        let server_list = Arc::new(ServerList::new(Arc::new(NullTransport)));
        let mut service = MasterService::new(
            &config,
            coordinator,
            server_list,
            Arc::new(NullTransport),
        )
        .expect("service construction failed");
        let tablet = Tablet {
            table_id: 1,
            start_object_id: 0,
            end_object_id: u64::MAX,
            server_id: service.server_id(),
            service_locator: service.locator.clone(),
            ctime: 0,
        };
        service.tablets.set_tablets(vec![tablet]);
        service
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::service;
    use super::*;

    fn read(master: &mut MasterService, table_id: u64, object_id: u64) -> Response {
        master.execute(Request::Read {
            table_id,
            object_id,
            reject: RejectRules::default(),
        })
    }

    #[test]
    fn write_read_round_trip() {
        let mut master = service();

        let response = master.execute(Request::Create {
            table_id: 1,
            data: b"alpha".to_vec(),
        });
        let Response::Create { object_id, version } = response else {
            panic!("unexpected response: {:?}", response);
        };
        assert_eq!(object_id, 0);
        assert_eq!(version, 1);

        assert_eq!(
            read(&mut master, 1, object_id),
            Response::Read {
                version: 1,
                data: b"alpha".to_vec()
            }
        );

        let response = master.execute(Request::Write {
            table_id: 1,
            object_id,
            data: b"beta".to_vec(),
            reject: RejectRules::default(),
        });
        assert_eq!(response, Response::Write { version: 2 });
        assert_eq!(
            read(&mut master, 1, object_id),
            Response::Read {
                version: 2,
                data: b"beta".to_vec()
            }
        );
    }

    #[test]
    fn reject_exists_preserves_live_object() {
        let mut master = service();
        master.execute(Request::Create {
            table_id: 1,
            data: b"alpha".to_vec(),
        });

        let response = master.execute(Request::Write {
            table_id: 1,
            object_id: 0,
            data: b"x".to_vec(),
            reject: RejectRules::reject_exists(),
        });
        assert_eq!(
            response,
            Response::Error {
                status: Status::ObjectExists,
                version: Some(1)
            }
        );
        assert_eq!(
            read(&mut master, 1, 0),
            Response::Read {
                version: 1,
                data: b"alpha".to_vec()
            }
        );
    }

    #[test]
    fn remove_then_read_then_rewrite() {
        let mut master = service();
        master.execute(Request::Create {
            table_id: 1,
            data: b"alpha".to_vec(),
        });

        let response = master.execute(Request::Remove {
            table_id: 1,
            object_id: 0,
            reject: RejectRules::default(),
        });
        assert_eq!(response, Response::Remove { version: Some(1) });

        assert_eq!(
            read(&mut master, 1, 0),
            Response::Error {
                status: Status::ObjectDoesntExist,
                version: None
            }
        );

        let response = master.execute(Request::Write {
            table_id: 1,
            object_id: 0,
            data: b"gamma".to_vec(),
            reject: RejectRules::default(),
        });
        let Response::Write { version } = response else {
            panic!("unexpected response: {:?}", response);
        };
        assert!(version >= 2, "rewrite must exceed the removed version");
    }

    #[test]
    fn remove_of_absent_object() {
        let mut master = service();
        assert_eq!(
            master.execute(Request::Remove {
                table_id: 1,
                object_id: 9,
                reject: RejectRules::default(),
            }),
            Response::Remove { version: None }
        );
        assert_eq!(
            master.execute(Request::Remove {
                table_id: 1,
                object_id: 9,
                reject: RejectRules {
                    doesnt_exist: true,
                    ..RejectRules::default()
                },
            }),
            Response::Error {
                status: Status::ObjectDoesntExist,
                version: None
            }
        );
    }

    #[test]
    fn unknown_table_rejected_everywhere() {
        let mut master = service();
        let status = |response: Response| response.status();

        assert_eq!(
            status(master.execute(Request::Create {
                table_id: 2,
                data: b"x".to_vec()
            })),
            Some(Status::TableDoesntExist)
        );
        assert_eq!(
            status(read(&mut master, 2, 0)),
            Some(Status::TableDoesntExist)
        );
        assert_eq!(
            status(master.execute(Request::Write {
                table_id: 2,
                object_id: 0,
                data: b"x".to_vec(),
                reject: RejectRules::default(),
            })),
            Some(Status::TableDoesntExist)
        );
        assert_eq!(
            status(master.execute(Request::Remove {
                table_id: 2,
                object_id: 0,
                reject: RejectRules::default(),
            })),
            Some(Status::TableDoesntExist)
        );
    }

    #[test]
    fn wrong_version_rejection_carries_live_version() {
        let mut master = service();
        master.execute(Request::Create {
            table_id: 1,
            data: b"alpha".to_vec(),
        });
        master.execute(Request::Write {
            table_id: 1,
            object_id: 0,
            data: b"beta".to_vec(),
            reject: RejectRules::default(),
        });

        let response = master.execute(Request::Write {
            table_id: 1,
            object_id: 0,
            data: b"stale".to_vec(),
            reject: RejectRules {
                version_ne_given: true,
                given_version: 1,
                ..RejectRules::default()
            },
        });
        assert_eq!(
            response,
            Response::Error {
                status: Status::WrongVersion,
                version: Some(2)
            }
        );
    }

    #[test]
    fn versions_are_strictly_increasing_per_key() {
        let mut master = service();
        master.execute(Request::Create {
            table_id: 1,
            data: b"v".to_vec(),
        });

        let mut last = 0;
        for i in 0..10u8 {
            if i % 3 == 2 {
                // a removal reports the version it deleted, which is the
                // last one written; later writes must still move past it
                let response = master.execute(Request::Remove {
                    table_id: 1,
                    object_id: 0,
                    reject: RejectRules::default(),
                });
                assert_eq!(response, Response::Remove { version: Some(last) });
            } else {
                let response = master.execute(Request::Write {
                    table_id: 1,
                    object_id: 0,
                    data: vec![i],
                    reject: RejectRules::default(),
                });
                let Response::Write { version } = response else {
                    panic!("unexpected response: {:?}", response);
                };
                assert!(version > last, "version {} not above {}", version, last);
                last = version;
            }
        }
    }

    #[test]
    fn create_allocates_distinct_ids() {
        let mut master = service();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let Response::Create { object_id, .. } = master.execute(Request::Create {
                table_id: 1,
                data: b"x".to_vec(),
            }) else {
                panic!("create failed");
            };
            ids.push(object_id);
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn ping_reports_counters() {
        let mut master = service();
        master.execute(Request::Create {
            table_id: 1,
            data: b"12345".to_vec(),
        });
        let Response::Ping { stats } = master.execute(Request::Ping) else {
            panic!("ping failed");
        };
        assert_eq!(stats.bytes_written, 5);
        assert!(stats.bytes_appended > 0);
        assert_eq!(stats.requests, 2);
    }

    #[test]
    fn cleaner_keeps_service_consistent() {
        let mut master = service();
        for i in 0..50 {
            master.execute(Request::Write {
                table_id: 1,
                object_id: i % 5,
                data: vec![0xab; 512],
                reject: RejectRules::default(),
            });
        }
        master.clean();
        for i in 0..5 {
            let Response::Read { data, .. } = read(&mut master, 1, i) else {
                panic!("object {} lost by cleaner", i);
            };
            assert_eq!(data, vec![0xab; 512]);
        }
    }
}
