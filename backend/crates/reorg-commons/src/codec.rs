//! Order-preserving key codec for table data.
//!
//! The store orders keys byte-wise, so every component of a record or index
//! key is encoded such that byte order equals logical order:
//!
//! - integers: 8 bytes big-endian with the sign bit flipped
//! - byte strings: 8-byte groups, each followed by a marker byte
//!   `0xFF - padding`, the last group zero-padded (memcomparable format)
//!
//! Key layout:
//!
//! ```text
//! record: t{physical_id}_r{handle}
//! index:  t{physical_id}_i{index_id}{value...}{handle}
//! ```
//!
//! A handle is either an integer row id or a common (clustered) handle, which
//! is a concatenation of memcomparable-encoded primary key values.

use crate::models::ids::{IndexId, PhysicalTableId};
use serde::{Deserialize, Serialize};
use std::fmt;

const TABLE_PREFIX: u8 = b't';
const RECORD_SEP: &[u8] = b"_r";
const INDEX_SEP: &[u8] = b"_i";

const ENC_GROUP_SIZE: usize = 8;
const ENC_MARKER: u8 = 0xFF;
const ENC_PAD: u8 = 0x00;
const SIGN_MASK: u64 = 0x8000_0000_0000_0000;

/// An encoded key in the table keyspace.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }

    /// Smallest key strictly greater than `self`.
    ///
    /// Turns "last key processed" into an inclusive resume key.
    pub fn next(&self) -> Key {
        let mut buf = Vec::with_capacity(self.0.len() + 1);
        buf.extend_from_slice(&self.0);
        buf.push(0);
        Key(buf)
    }

    /// Smallest key greater than every key that has `self` as a prefix.
    pub fn prefix_next(&self) -> Key {
        let mut buf = self.0.clone();
        for i in (0..buf.len()).rev() {
            if buf[i] == u8::MAX {
                buf[i] = 0;
            } else {
                buf[i] += 1;
                return Key(buf);
            }
        }
        // All bytes were 0xFF: no finite prefix successor, extend instead.
        let mut buf = self.0.clone();
        buf.push(0);
        Key(buf)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Key(bytes)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Row identifier inside one physical table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Handle {
    Int(i64),
    /// Already-encoded clustered primary key.
    Common(Vec<u8>),
}

impl Handle {
    /// Build a common handle from raw primary key column values.
    pub fn common<T: AsRef<[u8]>>(values: &[T]) -> Self {
        let mut buf = Vec::new();
        for v in values {
            buf.extend_from_slice(&encode_bytes(v.as_ref()));
        }
        Handle::Common(buf)
    }

    pub fn encoded(&self) -> Vec<u8> {
        match self {
            Handle::Int(v) => encode_int(*v).to_vec(),
            Handle::Common(bytes) => bytes.clone(),
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Handle::Int(_))
    }
}

/// Encode an `i64` so that byte order equals numeric order.
pub fn encode_int(v: i64) -> [u8; 8] {
    ((v as u64) ^ SIGN_MASK).to_be_bytes()
}

/// Decode an [`encode_int`] value, returning it with the remaining bytes.
pub fn decode_int(bytes: &[u8]) -> Option<(i64, &[u8])> {
    if bytes.len() < 8 {
        return None;
    }
    let (head, rest) = bytes.split_at(8);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(head);
    Some(((u64::from_be_bytes(buf) ^ SIGN_MASK) as i64, rest))
}

/// Memcomparable byte-string encoding.
pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    let groups = data.len() / ENC_GROUP_SIZE + 1;
    let mut out = Vec::with_capacity(groups * (ENC_GROUP_SIZE + 1));
    let mut idx = 0;
    loop {
        let remain = data.len() - idx;
        if remain >= ENC_GROUP_SIZE {
            out.extend_from_slice(&data[idx..idx + ENC_GROUP_SIZE]);
            out.push(ENC_MARKER);
            idx += ENC_GROUP_SIZE;
        } else {
            let pad = ENC_GROUP_SIZE - remain;
            out.extend_from_slice(&data[idx..]);
            out.extend(std::iter::repeat(ENC_PAD).take(pad));
            out.push(ENC_MARKER - pad as u8);
            return out;
        }
    }
}

/// Decode an [`encode_bytes`] value, returning it with the remaining bytes.
pub fn decode_bytes(mut bytes: &[u8]) -> Option<(Vec<u8>, &[u8])> {
    let mut out = Vec::new();
    loop {
        if bytes.len() < ENC_GROUP_SIZE + 1 {
            return None;
        }
        let (group, rest) = bytes.split_at(ENC_GROUP_SIZE + 1);
        bytes = rest;
        let marker = group[ENC_GROUP_SIZE];
        let pad = (ENC_MARKER - marker) as usize;
        if pad > ENC_GROUP_SIZE {
            return None;
        }
        let real = ENC_GROUP_SIZE - pad;
        out.extend_from_slice(&group[..real]);
        if pad != 0 {
            if group[real..ENC_GROUP_SIZE].iter().any(|b| *b != ENC_PAD) {
                return None;
            }
            return Some((out, bytes));
        }
    }
}

fn table_prefix(physical_id: PhysicalTableId) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 8 + 2);
    buf.push(TABLE_PREFIX);
    buf.extend_from_slice(&encode_int(physical_id.as_i64()));
    buf
}

/// `t{physical_id}_r`
pub fn record_prefix(physical_id: PhysicalTableId) -> Key {
    let mut buf = table_prefix(physical_id);
    buf.extend_from_slice(RECORD_SEP);
    Key(buf)
}

/// `t{physical_id}_r{handle}`
pub fn record_key(physical_id: PhysicalTableId, handle: &Handle) -> Key {
    let mut buf = record_prefix(physical_id).into_vec();
    buf.extend_from_slice(&handle.encoded());
    Key(buf)
}

/// Split a record key back into its physical table and handle.
pub fn decode_record_key(key: &[u8], is_common_handle: bool) -> Option<(PhysicalTableId, Handle)> {
    let rest = key.strip_prefix(&[TABLE_PREFIX])?;
    let (pid, rest) = decode_int(rest)?;
    let rest = rest.strip_prefix(RECORD_SEP)?;
    let handle = if is_common_handle {
        Handle::Common(rest.to_vec())
    } else {
        let (v, tail) = decode_int(rest)?;
        if !tail.is_empty() {
            return None;
        }
        Handle::Int(v)
    };
    Some((PhysicalTableId::new(pid), handle))
}

/// `t{physical_id}_i{index_id}`
pub fn index_prefix(physical_id: PhysicalTableId, index_id: IndexId) -> Key {
    let mut buf = table_prefix(physical_id);
    buf.extend_from_slice(INDEX_SEP);
    buf.extend_from_slice(&encode_int(index_id.as_i64()));
    Key(buf)
}

/// Index key holding only the indexed values (unique-index lookups).
pub fn index_values_key<T: AsRef<[u8]>>(
    physical_id: PhysicalTableId,
    index_id: IndexId,
    values: &[T],
) -> Key {
    let mut buf = index_prefix(physical_id, index_id).into_vec();
    for v in values {
        buf.extend_from_slice(&encode_bytes(v.as_ref()));
    }
    Key(buf)
}

/// `t{physical_id}_i{index_id}{values}{handle}`
pub fn index_key<T: AsRef<[u8]>>(
    physical_id: PhysicalTableId,
    index_id: IndexId,
    values: &[T],
    handle: &Handle,
) -> Key {
    let mut buf = index_values_key(physical_id, index_id, values).into_vec();
    buf.extend_from_slice(&handle.encoded());
    Key(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_encoding_preserves_order() {
        let values = [i64::MIN, -100, -1, 0, 1, 100, i64::MAX];
        for pair in values.windows(2) {
            assert!(encode_int(pair[0]) < encode_int(pair[1]), "{:?}", pair);
        }
        assert_eq!(decode_int(&encode_int(-42)).unwrap().0, -42);
    }

    #[test]
    fn test_bytes_encoding_preserves_order_across_group_boundaries() {
        let a = encode_bytes(b"abcdefgh");
        let b = encode_bytes(b"abcdefgh\x00");
        let c = encode_bytes(b"abcdefgi");
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.len(), 18);
        let (decoded, rest) = decode_bytes(&b).unwrap();
        assert_eq!(decoded, b"abcdefgh\x00".to_vec());
        assert!(rest.is_empty());
    }

    #[test]
    fn test_record_keys_sort_by_handle_and_stay_in_prefix() {
        let pid = PhysicalTableId::new(5);
        let prefix = record_prefix(pid);
        let k1 = record_key(pid, &Handle::Int(-3));
        let k2 = record_key(pid, &Handle::Int(7));
        assert!(k1 < k2);
        assert!(k1.starts_with(prefix.as_bytes()));
        assert!(k2 < prefix.prefix_next());
        assert_eq!(decode_record_key(k2.as_bytes(), false), Some((pid, Handle::Int(7))));
    }

    #[test]
    fn test_common_handle_record_key_round_trip() {
        let pid = PhysicalTableId::new(1);
        let handle = Handle::common(&[b"a".as_slice(), b"string".as_slice()]);
        let key = record_key(pid, &handle);
        assert_eq!(decode_record_key(key.as_bytes(), true), Some((pid, handle)));
    }

    #[test]
    fn test_key_next_is_immediate_successor() {
        let k = Key::new(vec![1, 2, 3]);
        assert!(k < k.next());
        assert!(k.next() < Key::new(vec![1, 2, 3, 1]));
        assert_eq!(Key::new(vec![1, 0xFF]).prefix_next(), Key::new(vec![2, 0]));
    }

    #[test]
    fn test_index_keys_are_separate_from_records() {
        let pid = PhysicalTableId::new(9);
        let idx = index_key(pid, IndexId::new(1), &[b"v"], &Handle::Int(1));
        let rec_prefix = record_prefix(pid);
        assert!(!idx.starts_with(rec_prefix.as_bytes()));
        assert!(idx.starts_with(index_prefix(pid, IndexId::new(1)).as_bytes()));
    }
}
