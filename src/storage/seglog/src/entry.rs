// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Log entry types and their in-log encodings. All integers are
//! little-endian with fixed-width headers, so an entry parsed out of a local
//! segment and one parsed out of a recovery buffer fetched from a backup
//! look identical.

use crate::error::LogError;

use crc::{Crc, CRC_32_ISCSI};

pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Bytes of framing before each entry payload: a type byte and a 32-bit
/// payload length.
pub const ENTRY_HEADER_BYTES: usize = 5;

/// Tag of a log entry. Dispatch over entries is a match on this tag.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EntryType {
    /// First entry of every segment: identifies the log and the segment.
    SegHeader,
    /// Last entry of a sealed segment: checksum over the preceding bytes.
    SegFooter,
    /// A stored object.
    Object,
    /// A deletion record for one object version.
    Tombstone,
}

impl EntryType {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            EntryType::SegHeader => 0,
            EntryType::SegFooter => 1,
            EntryType::Object => 2,
            EntryType::Tombstone => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(EntryType::SegHeader),
            1 => Some(EntryType::SegFooter),
            2 => Some(EntryType::Object),
            3 => Some(EntryType::Tombstone),
            _ => None,
        }
    }
}

/// Stable reference to a live entry in the log: the owning segment and the
/// entry's offset within it. Segment arenas never move while live, so a
/// reference stays valid until the entry is freed or the segment reclaimed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EntryRef {
    pub segment_id: u64,
    pub offset: u32,
}

/// Frame one entry (header + payload) onto the end of a byte buffer. The
/// same framing the segments use, shared so tests and backups can build
/// entry streams the replay path will accept.
pub fn push_entry(buf: &mut Vec<u8>, ty: EntryType, payload: &[u8]) {
    buf.push(ty.to_u8());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

/// The in-log representation of a stored value. Immutable once appended;
/// exactly one live log entry owns each object's current location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Object {
    pub table_id: u64,
    pub object_id: u64,
    pub version: u64,
    pub checksum: u32,
    pub data: Vec<u8>,
}

const OBJECT_HEADER_BYTES: usize = 8 + 8 + 8 + 4 + 4;

impl Object {
    /// Build an object, computing the data checksum.
    pub fn new(table_id: u64, object_id: u64, version: u64, data: Vec<u8>) -> Self {
        let checksum = CRC32.checksum(&data);
        Self {
            table_id,
            object_id,
            version,
            checksum,
            data,
        }
    }

    pub fn encoded_len(&self) -> usize {
        OBJECT_HEADER_BYTES + self.data.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.table_id.to_le_bytes());
        buf.extend_from_slice(&self.object_id.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, LogError> {
        if payload.len() < OBJECT_HEADER_BYTES {
            return Err(LogError::InvalidEntry("object payload truncated".to_string()));
        }
        let data_len = read_u32(payload, 28) as usize;
        if payload.len() != OBJECT_HEADER_BYTES + data_len {
            return Err(LogError::InvalidEntry(format!(
                "object data length mismatch: header says {}, payload holds {}",
                data_len,
                payload.len() - OBJECT_HEADER_BYTES
            )));
        }
        Ok(Self {
            table_id: read_u64(payload, 0),
            object_id: read_u64(payload, 8),
            version: read_u64(payload, 16),
            checksum: read_u32(payload, 24),
            data: payload[OBJECT_HEADER_BYTES..].to_vec(),
        })
    }

    /// Read just the key out of an encoded object, without copying the
    /// value. Used where only the key decides what happens to the entry
    /// (cleaning, prefetch).
    pub fn peek_key(payload: &[u8]) -> Option<(u64, u64)> {
        if payload.len() < 16 {
            return None;
        }
        Some((read_u64(payload, 0), read_u64(payload, 8)))
    }

    pub fn verify_checksum(&self) -> bool {
        CRC32.checksum(&self.data) == self.checksum
    }
}

/// A deletion record: object `object_version` of `(table_id, object_id)` is
/// dead, and it lived in segment `segment_id`. The tombstone itself is live
/// only as long as that segment is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tombstone {
    pub table_id: u64,
    pub object_id: u64,
    pub object_version: u64,
    pub segment_id: u64,
}

const TOMBSTONE_BYTES: usize = 8 * 4;

impl Tombstone {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TOMBSTONE_BYTES);
        buf.extend_from_slice(&self.table_id.to_le_bytes());
        buf.extend_from_slice(&self.object_id.to_le_bytes());
        buf.extend_from_slice(&self.object_version.to_le_bytes());
        buf.extend_from_slice(&self.segment_id.to_le_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, LogError> {
        if payload.len() != TOMBSTONE_BYTES {
            return Err(LogError::InvalidEntry(format!(
                "tombstone payload is {} bytes, expected {}",
                payload.len(),
                TOMBSTONE_BYTES
            )));
        }
        Ok(Self {
            table_id: read_u64(payload, 0),
            object_id: read_u64(payload, 8),
            object_version: read_u64(payload, 16),
            segment_id: read_u64(payload, 24),
        })
    }
}

/// Payload of a `SegHeader` entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SegmentHeader {
    pub log_id: u64,
    pub segment_id: u64,
    pub capacity: u32,
}

pub(crate) const SEGMENT_HEADER_BYTES: usize = 8 + 8 + 4;

impl SegmentHeader {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SEGMENT_HEADER_BYTES);
        buf.extend_from_slice(&self.log_id.to_le_bytes());
        buf.extend_from_slice(&self.segment_id.to_le_bytes());
        buf.extend_from_slice(&self.capacity.to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_round_trip() {
        let object = Object::new(7, 42, 3, b"latte".to_vec());
        let decoded = Object::decode(&object.encode()).expect("decode failed");
        assert_eq!(decoded, object);
        assert!(decoded.verify_checksum());
    }

    #[test]
    fn object_detects_corrupt_data() {
        let object = Object::new(7, 42, 3, b"latte".to_vec());
        let mut encoded = object.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        let decoded = Object::decode(&encoded).expect("decode failed");
        assert!(!decoded.verify_checksum());
    }

    #[test]
    fn object_rejects_bad_length() {
        let object = Object::new(7, 42, 3, b"latte".to_vec());
        let mut encoded = object.encode();
        encoded.pop();
        assert!(Object::decode(&encoded).is_err());
    }

    #[test]
    fn tombstone_round_trip() {
        let tomb = Tombstone {
            table_id: 7,
            object_id: 42,
            object_version: 3,
            segment_id: 11,
        };
        assert_eq!(Tombstone::decode(&tomb.encode()).unwrap(), tomb);
    }

    #[test]
    fn entry_type_tags_are_stable() {
        for ty in [
            EntryType::SegHeader,
            EntryType::SegFooter,
            EntryType::Object,
            EntryType::Tombstone,
        ] {
            assert_eq!(EntryType::from_u8(ty.to_u8()), Some(ty));
        }
        assert_eq!(EntryType::from_u8(9), None);
    }
}
