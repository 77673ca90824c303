use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::{Error, Result};

/// CRC-32 with the IEEE polynomial, covering everything before the trailer.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Fixed header: 1-byte type tag + 4-byte key length + 4-byte value length.
pub const HEADER_SIZE: usize = 9;
/// Trailing CRC-32.
pub const TRAILER_SIZE: usize = 4;

pub const MAX_KEY_SIZE: u32 = 10 * 1024 * 1024;
pub const MAX_VALUE_SIZE: u32 = 100 * 1024 * 1024;

/// Width of the big-endian transaction id prefixed to txn-typed record keys.
pub const TXN_ID_SIZE: usize = 4;

/// Marker key bytes stored (after the txn id prefix) in begin/commit records.
const TXN_BEGIN_KEY: &[u8] = b"txn_begin";
const TXN_COMMIT_KEY: &[u8] = b"txn_commit";

const TAG_PUT: u8 = 0;
const TAG_DELETE: u8 = 1;
const TAG_TXN_BEGIN: u8 = 2;
const TAG_TXN_PUT: u8 = 3;
const TAG_TXN_DELETE: u8 = 4;
const TAG_TXN_COMMIT: u8 = 5;

/// Byte-range of a record within a specific segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub file_id: u32,
    pub offset: u32,
    pub length: u32,
}

/// A typed segment record.
///
/// On disk (big-endian):
///
/// ```text
/// +---------+-------------+---------------+-----+-------+-----------+
/// | tag: u8 | key_len: u32| value_len: u32| key | value | crc32: u32|
/// +---------+-------------+---------------+-----+-------+-----------+
/// ```
///
/// Txn-typed records store the 4-byte transaction id as a key prefix; decode
/// splits it back out, so the variants below always carry the user key.
/// `Delete` is a distinct variant, never "put with an empty value".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    TxnBegin { txn_id: u32 },
    TxnPut { txn_id: u32, key: Vec<u8>, value: Vec<u8> },
    TxnDelete { txn_id: u32, key: Vec<u8> },
    TxnCommit { txn_id: u32 },
}

impl Record {
    fn tag(&self) -> u8 {
        match self {
            Record::Put { .. } => TAG_PUT,
            Record::Delete { .. } => TAG_DELETE,
            Record::TxnBegin { .. } => TAG_TXN_BEGIN,
            Record::TxnPut { .. } => TAG_TXN_PUT,
            Record::TxnDelete { .. } => TAG_TXN_DELETE,
            Record::TxnCommit { .. } => TAG_TXN_COMMIT,
        }
    }

    /// The user key, for record types that carry one.
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            Record::Put { key, .. }
            | Record::Delete { key }
            | Record::TxnPut { key, .. }
            | Record::TxnDelete { key, .. } => Some(key),
            Record::TxnBegin { .. } | Record::TxnCommit { .. } => None,
        }
    }

    /// True for tombstone records.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Record::Delete { .. } | Record::TxnDelete { .. })
    }

    /// Key bytes as stored on disk: txn-typed records carry the id prefix.
    fn wire_key(&self) -> Vec<u8> {
        fn prefixed(txn_id: u32, key: &[u8]) -> Vec<u8> {
            let mut buf = Vec::with_capacity(TXN_ID_SIZE + key.len());
            buf.extend_from_slice(&txn_id.to_be_bytes());
            buf.extend_from_slice(key);
            buf
        }
        match self {
            Record::Put { key, .. } | Record::Delete { key } => key.clone(),
            Record::TxnBegin { txn_id } => prefixed(*txn_id, TXN_BEGIN_KEY),
            Record::TxnPut { txn_id, key, .. } | Record::TxnDelete { txn_id, key } => {
                prefixed(*txn_id, key)
            }
            Record::TxnCommit { txn_id } => prefixed(*txn_id, TXN_COMMIT_KEY),
        }
    }

    fn wire_value(&self) -> &[u8] {
        match self {
            Record::Put { value, .. } | Record::TxnPut { value, .. } => value,
            _ => &[],
        }
    }

    /// Serialized size of this record on disk.
    pub fn encoded_len(&self) -> usize {
        let key_len = match self {
            Record::Put { key, .. } | Record::Delete { key } => key.len(),
            Record::TxnBegin { .. } => TXN_ID_SIZE + TXN_BEGIN_KEY.len(),
            Record::TxnPut { key, .. } | Record::TxnDelete { key, .. } => TXN_ID_SIZE + key.len(),
            Record::TxnCommit { .. } => TXN_ID_SIZE + TXN_COMMIT_KEY.len(),
        };
        HEADER_SIZE + key_len + self.wire_value().len() + TRAILER_SIZE
    }

    /// Encodes the record, appending the CRC over all preceding bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let key = self.wire_key();
        let value = self.wire_value();

        if key.len() as u64 > MAX_KEY_SIZE as u64 {
            return Err(Error::InvalidArgument(format!(
                "key length {} exceeds maximum {}",
                key.len(),
                MAX_KEY_SIZE
            )));
        }
        if value.len() as u64 > MAX_VALUE_SIZE as u64 {
            return Err(Error::InvalidArgument(format!(
                "value length {} exceeds maximum {}",
                value.len(),
                MAX_VALUE_SIZE
            )));
        }

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.write_u8(self.tag())?;
        buf.write_u32::<BigEndian>(key.len() as u32)?;
        buf.write_u32::<BigEndian>(value.len() as u32)?;
        buf.extend_from_slice(&key);
        buf.extend_from_slice(value);

        let crc = CRC32.checksum(&buf);
        buf.write_u32::<BigEndian>(crc)?;
        Ok(buf)
    }

    /// Decodes a record from an exact byte slice, verifying size caps and the
    /// CRC trailer. Any failed check is a corruption error.
    pub fn decode(data: &[u8]) -> Result<Record> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "record too short: {} bytes",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        let tag = cursor.read_u8()?;
        let key_len = cursor.read_u32::<BigEndian>()?;
        let value_len = cursor.read_u32::<BigEndian>()?;

        if key_len > MAX_KEY_SIZE || value_len > MAX_VALUE_SIZE {
            return Err(Error::Corruption(format!(
                "implausible record sizes: key_len={key_len}, value_len={value_len}"
            )));
        }

        let payload_end = HEADER_SIZE + key_len as usize + value_len as usize;
        let total = payload_end + TRAILER_SIZE;
        if data.len() < total {
            return Err(Error::Corruption(format!(
                "record data incomplete: need {total} bytes, have {}",
                data.len()
            )));
        }

        let stored_crc = u32::from_be_bytes([
            data[payload_end],
            data[payload_end + 1],
            data[payload_end + 2],
            data[payload_end + 3],
        ]);
        let computed_crc = CRC32.checksum(&data[..payload_end]);
        if stored_crc != computed_crc {
            return Err(Error::Corruption(format!(
                "crc mismatch: stored={stored_crc}, computed={computed_crc}"
            )));
        }

        let key = &data[HEADER_SIZE..HEADER_SIZE + key_len as usize];
        let value = data[HEADER_SIZE + key_len as usize..payload_end].to_vec();

        let split_txn = |key: &[u8]| -> Result<(u32, Vec<u8>)> {
            if key.len() < TXN_ID_SIZE {
                return Err(Error::Corruption(format!(
                    "txn record key too short for id prefix: {} bytes",
                    key.len()
                )));
            }
            let txn_id = u32::from_be_bytes([key[0], key[1], key[2], key[3]]);
            Ok((txn_id, key[TXN_ID_SIZE..].to_vec()))
        };

        match tag {
            TAG_PUT => Ok(Record::Put {
                key: key.to_vec(),
                value,
            }),
            TAG_DELETE => Ok(Record::Delete { key: key.to_vec() }),
            TAG_TXN_BEGIN => {
                let (txn_id, _) = split_txn(key)?;
                Ok(Record::TxnBegin { txn_id })
            }
            TAG_TXN_PUT => {
                let (txn_id, key) = split_txn(key)?;
                Ok(Record::TxnPut { txn_id, key, value })
            }
            TAG_TXN_DELETE => {
                let (txn_id, key) = split_txn(key)?;
                Ok(Record::TxnDelete { txn_id, key })
            }
            TAG_TXN_COMMIT => {
                let (txn_id, _) = split_txn(key)?;
                Ok(Record::TxnCommit { txn_id })
            }
            other => Err(Error::Corruption(format!("invalid record type: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(record: Record) {
        let encoded = record.encode().expect("encode");
        assert_eq!(encoded.len(), record.encoded_len());
        let decoded = Record::decode(&encoded).expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_roundtrip_all_types() {
        roundtrip(Record::Put {
            key: b"key".to_vec(),
            value: b"value".to_vec(),
        });
        roundtrip(Record::Delete {
            key: b"gone".to_vec(),
        });
        roundtrip(Record::TxnBegin { txn_id: 7 });
        roundtrip(Record::TxnPut {
            txn_id: 7,
            key: b"txn-key".to_vec(),
            value: b"txn-value".to_vec(),
        });
        roundtrip(Record::TxnDelete {
            txn_id: 7,
            key: b"txn-gone".to_vec(),
        });
        roundtrip(Record::TxnCommit { txn_id: 7 });
    }

    #[test]
    fn test_empty_value_is_not_a_tombstone() {
        let record = Record::Put {
            key: b"k".to_vec(),
            value: Vec::new(),
        };
        let decoded = Record::decode(&record.encode().unwrap()).unwrap();
        assert!(!decoded.is_tombstone());
        assert_eq!(
            decoded,
            Record::Put {
                key: b"k".to_vec(),
                value: Vec::new()
            }
        );
    }

    #[test]
    fn test_txn_key_carries_id_prefix_on_disk() {
        let record = Record::TxnPut {
            txn_id: 0x01020304,
            key: b"user".to_vec(),
            value: b"v".to_vec(),
        };
        let encoded = record.encode().unwrap();
        // Wire key starts right after the 9-byte header.
        assert_eq!(&encoded[HEADER_SIZE..HEADER_SIZE + 4], &[1, 2, 3, 4]);
        assert_eq!(&encoded[HEADER_SIZE + 4..HEADER_SIZE + 8], b"user");
    }

    #[test]
    fn test_decode_rejects_flipped_byte() {
        let record = Record::Put {
            key: b"key".to_vec(),
            value: b"value".to_vec(),
        };
        let mut encoded = record.encode().unwrap();
        let mid = encoded.len() / 2;
        encoded[mid] ^= 0xff;
        match Record::decode(&encoded) {
            Err(Error::Corruption(_)) => {}
            other => panic!("expected corruption error, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_short_input() {
        assert!(matches!(
            Record::decode(&[0u8; 4]),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_decode_rejects_implausible_sizes() {
        let mut buf = Vec::new();
        buf.push(TAG_PUT);
        buf.extend_from_slice(&(MAX_KEY_SIZE + 1).to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        assert!(matches!(Record::decode(&buf), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let record = Record::Put {
            key: b"key".to_vec(),
            value: b"value".to_vec(),
        };
        let encoded = record.encode().unwrap();
        assert!(matches!(
            Record::decode(&encoded[..encoded.len() - 2]),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let record = Record::Put {
            key: b"key".to_vec(),
            value: b"v".to_vec(),
        };
        let mut encoded = record.encode().unwrap();
        encoded[0] = 9;
        // Fix up the CRC so only the tag is at fault.
        let payload_end = encoded.len() - TRAILER_SIZE;
        let crc = CRC32.checksum(&encoded[..payload_end]);
        encoded[payload_end..].copy_from_slice(&crc.to_be_bytes());
        match Record::decode(&encoded) {
            Err(Error::Corruption(msg)) => assert!(msg.contains("invalid record type")),
            other => panic!("expected corruption error, got {other:?}"),
        }
    }
}
