use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, PageId, Rid, Tuple, TxnId, INVALID_LSN};

/// Fixed header preceding every log record:
/// `size:u32, lsn:u64, txn_id:u32, prev_lsn:u64, type:u32`, little-endian.
pub const LOG_HEADER_SIZE: usize = 28;

/// Types of log records written by the tuple-level WAL hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    Begin = 1,
    Commit = 2,
    Abort = 3,
    Insert = 4,
    MarkDelete = 5,
    ApplyDelete = 6,
    RollbackDelete = 7,
    Update = 8,
    NewPage = 9,
}

impl LogRecordType {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Begin),
            2 => Some(Self::Commit),
            3 => Some(Self::Abort),
            4 => Some(Self::Insert),
            5 => Some(Self::MarkDelete),
            6 => Some(Self::ApplyDelete),
            7 => Some(Self::RollbackDelete),
            8 => Some(Self::Update),
            9 => Some(Self::NewPage),
            _ => None,
        }
    }
}

/// Type-specific log record payload
#[derive(Debug, Clone, PartialEq)]
pub enum LogPayload {
    /// BEGIN / COMMIT / ABORT carry no payload
    None,
    /// Inserted tuple and where it landed
    Insert { rid: Rid, tuple: Tuple },
    /// MARKDELETE / APPLYDELETE / ROLLBACKDELETE: the affected tuple image
    Delete { rid: Rid, tuple: Tuple },
    /// Before and after images of an in-place update
    Update {
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    },
    /// A freshly allocated tuple page chained after `prev_page_id`
    NewPage {
        prev_page_id: PageId,
        page_id: PageId,
    },
}

/// One write-ahead log record. The LSN is assigned by the log manager at
/// append time; `prev_lsn` links the record into its transaction's reverse
/// chain for undo.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub size: u32,
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
    pub payload: LogPayload,
}

fn tuple_encoded_len(tuple: &Tuple) -> usize {
    4 + tuple.len()
}

fn payload_encoded_len(payload: &LogPayload) -> usize {
    match payload {
        LogPayload::None => 0,
        LogPayload::Insert { tuple, .. } | LogPayload::Delete { tuple, .. } => {
            8 + tuple_encoded_len(tuple)
        }
        LogPayload::Update {
            old_tuple,
            new_tuple,
            ..
        } => 8 + tuple_encoded_len(old_tuple) + tuple_encoded_len(new_tuple),
        LogPayload::NewPage { .. } => 8,
    }
}

impl LogRecord {
    pub fn new(
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
        payload: LogPayload,
    ) -> Self {
        let size = (LOG_HEADER_SIZE + payload_encoded_len(&payload)) as u32;
        Self {
            size,
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        }
    }

    pub fn new_begin(txn_id: TxnId) -> Self {
        Self::new(txn_id, INVALID_LSN, LogRecordType::Begin, LogPayload::None)
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Commit, LogPayload::None)
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::new(txn_id, prev_lsn, LogRecordType::Abort, LogPayload::None)
    }

    pub fn new_insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Tuple) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::Insert,
            LogPayload::Insert { rid, tuple },
        )
    }

    /// MARKDELETE / APPLYDELETE / ROLLBACKDELETE records share the payload
    /// shape; `record_type` selects which one.
    pub fn new_delete(
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
        rid: Rid,
        tuple: Tuple,
    ) -> Self {
        debug_assert!(matches!(
            record_type,
            LogRecordType::MarkDelete | LogRecordType::ApplyDelete | LogRecordType::RollbackDelete
        ));
        Self::new(
            txn_id,
            prev_lsn,
            record_type,
            LogPayload::Delete { rid, tuple },
        )
    }

    pub fn new_update(
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: Rid,
        old_tuple: Tuple,
        new_tuple: Tuple,
    ) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::Update,
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        )
    }

    pub fn new_page(txn_id: TxnId, prev_lsn: Lsn, prev_page_id: PageId, page_id: PageId) -> Self {
        Self::new(
            txn_id,
            prev_lsn,
            LogRecordType::NewPage,
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            },
        )
    }

    /// The RID a data record applies to, if any
    pub fn rid(&self) -> Option<Rid> {
        match &self.payload {
            LogPayload::Insert { rid, .. }
            | LogPayload::Delete { rid, .. }
            | LogPayload::Update { rid, .. } => Some(*rid),
            _ => None,
        }
    }

    /// Serialize the record into its on-disk form
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size as usize];
        LittleEndian::write_u32(&mut buf[0..4], self.size);
        LittleEndian::write_u64(&mut buf[4..12], self.lsn);
        LittleEndian::write_u32(&mut buf[12..16], self.txn_id);
        LittleEndian::write_u64(&mut buf[16..24], self.prev_lsn);
        LittleEndian::write_u32(&mut buf[24..28], self.record_type as u32);

        let mut pos = LOG_HEADER_SIZE;
        match &self.payload {
            LogPayload::None => {}
            LogPayload::Insert { rid, tuple } | LogPayload::Delete { rid, tuple } => {
                pos = write_rid(&mut buf, pos, rid);
                write_tuple(&mut buf, pos, tuple);
            }
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                pos = write_rid(&mut buf, pos, rid);
                pos = write_tuple(&mut buf, pos, old_tuple);
                write_tuple(&mut buf, pos, new_tuple);
            }
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                LittleEndian::write_u32(&mut buf[pos..pos + 4], *prev_page_id);
                LittleEndian::write_u32(&mut buf[pos + 4..pos + 8], *page_id);
            }
        }
        buf
    }

    /// Deserialize one record from the front of `buf`. Returns `None` when
    /// the bytes do not hold a complete record; during recovery that means
    /// the buffer tail must be refilled, or the log ends in a partial write.
    pub fn deserialize(buf: &[u8]) -> Option<LogRecord> {
        if buf.len() < LOG_HEADER_SIZE {
            return None;
        }
        let size = LittleEndian::read_u32(&buf[0..4]);
        if (size as usize) < LOG_HEADER_SIZE || size as usize > buf.len() {
            return None;
        }
        let lsn = LittleEndian::read_u64(&buf[4..12]);
        let txn_id = LittleEndian::read_u32(&buf[12..16]);
        let prev_lsn = LittleEndian::read_u64(&buf[16..24]);
        let record_type = LogRecordType::from_u32(LittleEndian::read_u32(&buf[24..28]))?;

        let body = &buf[LOG_HEADER_SIZE..size as usize];
        let payload = match record_type {
            LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort => {
                LogPayload::None
            }
            LogRecordType::Insert => {
                let (rid, pos) = read_rid(body)?;
                let (tuple, _) = read_tuple(body, pos)?;
                LogPayload::Insert { rid, tuple }
            }
            LogRecordType::MarkDelete
            | LogRecordType::ApplyDelete
            | LogRecordType::RollbackDelete => {
                let (rid, pos) = read_rid(body)?;
                let (tuple, _) = read_tuple(body, pos)?;
                LogPayload::Delete { rid, tuple }
            }
            LogRecordType::Update => {
                let (rid, pos) = read_rid(body)?;
                let (old_tuple, pos) = read_tuple(body, pos)?;
                let (new_tuple, _) = read_tuple(body, pos)?;
                LogPayload::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            LogRecordType::NewPage => {
                if body.len() < 8 {
                    return None;
                }
                LogPayload::NewPage {
                    prev_page_id: LittleEndian::read_u32(&body[0..4]),
                    page_id: LittleEndian::read_u32(&body[4..8]),
                }
            }
        };

        Some(LogRecord {
            size,
            lsn,
            txn_id,
            prev_lsn,
            record_type,
            payload,
        })
    }
}

fn write_rid(buf: &mut [u8], pos: usize, rid: &Rid) -> usize {
    LittleEndian::write_u32(&mut buf[pos..pos + 4], rid.page_id);
    LittleEndian::write_u32(&mut buf[pos + 4..pos + 8], rid.slot);
    pos + 8
}

fn write_tuple(buf: &mut [u8], pos: usize, tuple: &Tuple) -> usize {
    LittleEndian::write_u32(&mut buf[pos..pos + 4], tuple.len() as u32);
    buf[pos + 4..pos + 4 + tuple.len()].copy_from_slice(tuple.data());
    pos + 4 + tuple.len()
}

fn read_rid(body: &[u8]) -> Option<(Rid, usize)> {
    if body.len() < 8 {
        return None;
    }
    let rid = Rid::new(
        LittleEndian::read_u32(&body[0..4]),
        LittleEndian::read_u32(&body[4..8]),
    );
    Some((rid, 8))
}

fn read_tuple(body: &[u8], pos: usize) -> Option<(Tuple, usize)> {
    if body.len() < pos + 4 {
        return None;
    }
    let len = LittleEndian::read_u32(&body[pos..pos + 4]) as usize;
    if body.len() < pos + 4 + len {
        return None;
    }
    let tuple = Tuple::from_slice(&body[pos + 4..pos + 4 + len]);
    Some((tuple, pos + 4 + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_roundtrip() {
        let mut record = LogRecord::new_begin(7);
        record.lsn = 1;
        let bytes = record.serialize();
        assert_eq!(bytes.len(), LOG_HEADER_SIZE);

        let parsed = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(parsed.record_type, LogRecordType::Begin);
        assert_eq!(parsed.txn_id, 7);
        assert_eq!(parsed.lsn, 1);
        assert_eq!(parsed.prev_lsn, INVALID_LSN);
        assert_eq!(parsed.payload, LogPayload::None);
    }

    #[test]
    fn test_update_roundtrip() {
        let rid = Rid::new(4, 2);
        let mut record = LogRecord::new_update(
            3,
            11,
            rid,
            Tuple::from_slice(b"old"),
            Tuple::from_slice(b"newer"),
        );
        record.lsn = 12;
        let bytes = record.serialize();
        assert_eq!(bytes.len(), record.size as usize);

        let parsed = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(parsed.rid(), Some(rid));
        match parsed.payload {
            LogPayload::Update {
                old_tuple,
                new_tuple,
                ..
            } => {
                assert_eq!(old_tuple.data(), b"old");
                assert_eq!(new_tuple.data(), b"newer");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_new_page_roundtrip() {
        let mut record = LogRecord::new_page(1, 5, 8, 9);
        record.lsn = 6;
        let parsed = LogRecord::deserialize(&record.serialize()).unwrap();
        assert_eq!(
            parsed.payload,
            LogPayload::NewPage {
                prev_page_id: 8,
                page_id: 9
            }
        );
    }

    #[test]
    fn test_truncated_record_is_incomplete() {
        let mut record = LogRecord::new_insert(2, 0, Rid::new(3, 0), Tuple::from_slice(b"abcdef"));
        record.lsn = 9;
        let bytes = record.serialize();

        // Anything short of the full record must parse as incomplete.
        for cut in 0..bytes.len() {
            assert!(LogRecord::deserialize(&bytes[..cut]).is_none());
        }
        assert!(LogRecord::deserialize(&bytes).is_some());
    }

    #[test]
    fn test_back_to_back_records() {
        let mut a = LogRecord::new_begin(1);
        a.lsn = 1;
        let mut b = LogRecord::new_insert(1, 1, Rid::new(2, 0), Tuple::from_slice(b"x"));
        b.lsn = 2;

        let mut stream = a.serialize();
        stream.extend_from_slice(&b.serialize());

        let first = LogRecord::deserialize(&stream).unwrap();
        assert_eq!(first.lsn, 1);
        let second = LogRecord::deserialize(&stream[first.size as usize..]).unwrap();
        assert_eq!(second.lsn, 2);
        assert_eq!(second.record_type, LogRecordType::Insert);
    }
}
