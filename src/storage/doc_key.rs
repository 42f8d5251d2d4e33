// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Document and sub-document keys.
//!
//! A [`DocKey`] names a document; its encoding is the prefix of every stored
//! key belonging to that document. A [`SubDocKey`] extends a DocKey with a
//! path of subkeys and a terminating timestamp, addressing one version of
//! one nested value.
//!
//! Encoded form, big-endian throughout:
//!
//! ```text
//! SubDocKey := DocKey Subkey* [TimestampByte Timestamp64]
//! DocKey    := [HashByte Hash32 PrimitiveValue* GroupEnd] PrimitiveValue* GroupEnd
//! ```
//!
//! The hashed group is present iff the key carries a hash prefix. Subkeys
//! are not group-terminated; their boundary is the timestamp type byte or
//! the end of the key.

use crate::time::Timestamp;

use super::primitive::{decode_key_timestamp, PrimitiveValue};
use super::value_type::{ValueType, MAX_BYTE};
use super::StorageError;

/// The fixed-width hash prefix of a document key.
pub type DocKeyHash = u32;

/// A key locating a document: an optional hash prefix with the components
/// it was computed from, and a group of range components for ordered scans.
///
/// The derived ordering compares hash presence, hash, hashed group, then
/// range group, which equals the byte order of the encoding: the hash type
/// byte sorts after every other type byte, and `GroupEnd` sorts before any
/// component's type byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocKey {
    hash: Option<DocKeyHash>,
    hashed_group: Vec<PrimitiveValue>,
    range_group: Vec<PrimitiveValue>,
}

impl DocKey {
    /// An empty document key with no hash and no components.
    pub fn new() -> Self {
        Self::default()
    }

    /// A document key with only range components.
    pub fn from_range(range_group: Vec<PrimitiveValue>) -> Self {
        DocKey {
            hash: None,
            hashed_group: Vec::new(),
            range_group,
        }
    }

    /// A document key with a hash prefix. The hash is computed by the caller
    /// from `hashed_group`; no particular hash function is assumed here.
    ///
    /// # Panics
    ///
    /// Panics if `hashed_group` is empty: the hash is present exactly when
    /// there are components to compute it from.
    pub fn with_hash(
        hash: DocKeyHash,
        hashed_group: Vec<PrimitiveValue>,
        range_group: Vec<PrimitiveValue>,
    ) -> Self {
        assert!(
            !hashed_group.is_empty(),
            "a hashed document key requires at least one hashed component"
        );
        DocKey {
            hash: Some(hash),
            hashed_group,
            range_group,
        }
    }

    pub fn hash(&self) -> Option<DocKeyHash> {
        self.hash
    }

    pub fn hashed_group(&self) -> &[PrimitiveValue] {
        &self.hashed_group
    }

    pub fn range_group(&self) -> &[PrimitiveValue] {
        &self.range_group
    }

    /// Returns the encoded form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Appends the encoded form to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        self.encode_without_range_group_end_into(buf);
        buf.push(ValueType::GroupEnd.as_byte());
    }

    /// Everything up to, but not including, the range group's terminator.
    /// This is the seek prefix that still matches document keys extending
    /// this one with additional range components.
    fn encode_without_range_group_end_into(&self, buf: &mut Vec<u8>) {
        if let Some(hash) = self.hash {
            buf.push(ValueType::Uint32Hash.as_byte());
            buf.extend_from_slice(&hash.to_be_bytes());
            for component in &self.hashed_group {
                component.encode_into(buf);
            }
            buf.push(ValueType::GroupEnd.as_byte());
        }
        for component in &self.range_group {
            component.encode_into(buf);
        }
    }

    /// Decodes a document key from the front of `input`, returning it with
    /// the unconsumed remainder.
    pub fn decode_from(input: &[u8]) -> Result<(DocKey, &[u8]), StorageError> {
        if input.is_empty() {
            return Err(StorageError::corruption(
                "cannot decode a document key from empty input",
            ));
        }

        let mut rest = input;
        let (hash, hashed_group) = if rest[0] == ValueType::Uint32Hash.as_byte() {
            if rest.len() < 5 {
                return Err(StorageError::corruption(format!(
                    "truncated hash prefix: need 4 bytes, have {}",
                    rest.len() - 1
                )));
            }
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&rest[1..5]);
            rest = &rest[5..];
            let (group, after) = consume_group(rest)?;
            rest = after;
            if group.is_empty() {
                return Err(StorageError::corruption(
                    "hashed document key has no hashed components",
                ));
            }
            (Some(u32::from_be_bytes(raw)), group)
        } else {
            (None, Vec::new())
        };

        let (range_group, rest) = consume_group(rest)?;
        Ok((
            DocKey {
                hash,
                hashed_group,
                range_group,
            },
            rest,
        ))
    }

    /// Decodes a document key and fails if any input bytes remain.
    pub fn fully_decode_from(input: &[u8]) -> Result<DocKey, StorageError> {
        let (doc_key, rest) = Self::decode_from(input)?;
        if !rest.is_empty() {
            return Err(StorageError::corruption(format!(
                "{} extra byte(s) after a fully decoded document key",
                rest.len()
            )));
        }
        Ok(doc_key)
    }
}

impl std::fmt::Display for DocKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DocKey(")?;
        if let Some(hash) = self.hash {
            write!(f, "0x{:x}, ", hash)?;
            fmt_group(f, &self.hashed_group)?;
            write!(f, ", ")?;
        } else {
            write!(f, "[], ")?;
        }
        fmt_group(f, &self.range_group)?;
        write!(f, ")")
    }
}

fn fmt_group(f: &mut std::fmt::Formatter<'_>, group: &[PrimitiveValue]) -> std::fmt::Result {
    write!(f, "[")?;
    for (i, value) in group.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", value)?;
    }
    write!(f, "]")
}

/// Consumes primitive values up to and including a `GroupEnd` terminator.
fn consume_group(mut input: &[u8]) -> Result<(Vec<PrimitiveValue>, &[u8]), StorageError> {
    let mut group = Vec::new();
    loop {
        match input.first() {
            None => {
                return Err(StorageError::corruption(
                    "component group is missing its GroupEnd terminator",
                ))
            }
            Some(&b) if b == ValueType::GroupEnd.as_byte() => return Ok((group, &input[1..])),
            Some(_) => {
                let (value, rest) = PrimitiveValue::decode_from(input)?;
                group.push(value);
                input = rest;
            }
        }
    }
}

/// A key addressing one version of one nested value: a document key, a path
/// of subkeys from outermost to innermost, and an optional timestamp.
///
/// Keys persisted to the store always carry the timestamp; it is optional
/// only while a key is being constructed in memory, and an absent timestamp
/// is simply omitted from the encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubDocKey {
    doc_key: DocKey,
    subkeys: Vec<PrimitiveValue>,
    timestamp: Option<Timestamp>,
}

impl SubDocKey {
    pub fn new(doc_key: DocKey) -> Self {
        SubDocKey {
            doc_key,
            subkeys: Vec::new(),
            timestamp: None,
        }
    }

    pub fn with_subkeys(doc_key: DocKey, subkeys: Vec<PrimitiveValue>) -> Self {
        for subkey in &subkeys {
            assert_subkey_kind(subkey);
        }
        SubDocKey {
            doc_key,
            subkeys,
            timestamp: None,
        }
    }

    pub fn with_timestamp(
        doc_key: DocKey,
        subkeys: Vec<PrimitiveValue>,
        timestamp: Timestamp,
    ) -> Self {
        let mut key = Self::with_subkeys(doc_key, subkeys);
        key.set_timestamp(timestamp);
        key
    }

    pub fn doc_key(&self) -> &DocKey {
        &self.doc_key
    }

    pub fn subkeys(&self) -> &[PrimitiveValue] {
        &self.subkeys
    }

    pub fn num_subkeys(&self) -> usize {
        self.subkeys.len()
    }

    pub fn last_subkey(&self) -> Option<&PrimitiveValue> {
        self.subkeys.last()
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    pub fn has_timestamp(&self) -> bool {
        self.timestamp.is_some()
    }

    /// Appends a subkey one level deeper.
    ///
    /// # Panics
    ///
    /// Panics if a timestamp is already set (the timestamp terminates the
    /// key; nothing may follow it), or if `subkey` is a timestamp value.
    pub fn append_subkey(&mut self, subkey: PrimitiveValue) {
        assert!(
            self.timestamp.is_none(),
            "cannot append a subkey to {}: the key already has a timestamp",
            self
        );
        assert_subkey_kind(&subkey);
        self.subkeys.push(subkey);
    }

    /// Removes the innermost subkey.
    ///
    /// # Panics
    ///
    /// Panics if there are no subkeys.
    pub fn remove_last_subkey(&mut self) {
        assert!(!self.subkeys.is_empty(), "no subkeys to remove");
        self.subkeys.pop();
    }

    /// Sets the timestamp. `ts` must not be the invalid sentinel.
    pub fn set_timestamp(&mut self, ts: Timestamp) {
        assert!(ts.is_valid(), "cannot set an invalid timestamp");
        self.timestamp = Some(ts);
    }

    pub fn remove_timestamp(&mut self) {
        self.timestamp = None;
    }

    /// If the timestamp is the `Timestamp::MAX` placeholder, replaces it
    /// with `ts`. Write batches encode the placeholder until their real
    /// timestamp is established by log ordering.
    pub fn replace_max_timestamp_with(&mut self, ts: Timestamp) {
        if self.timestamp == Some(Timestamp::MAX) {
            self.set_timestamp(ts);
        }
    }

    /// Returns the encoded form, including the timestamp if present.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf, true);
        buf
    }

    /// Returns the encoded form with the timestamp omitted. This is the
    /// longest prefix shared by every version of this subkey path.
    pub fn encode_without_timestamp(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf, false);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>, include_timestamp: bool) {
        self.doc_key.encode_into(buf);
        for subkey in &self.subkeys {
            subkey.encode_into(buf);
        }
        if include_timestamp {
            if let Some(ts) = self.timestamp {
                PrimitiveValue::Timestamp(ts).encode_into(buf);
            }
        }
    }

    /// Decodes a sub-document key from the front of `input`.
    ///
    /// With `require_timestamp`, the key must end with an encoded timestamp;
    /// otherwise subkeys are consumed until the timestamp type byte or the
    /// end of input.
    pub fn decode_from(
        input: &[u8],
        require_timestamp: bool,
    ) -> Result<(SubDocKey, &[u8]), StorageError> {
        let (doc_key, mut rest) = DocKey::decode_from(input)?;
        let mut subkeys = Vec::new();

        loop {
            match rest.first() {
                None => {
                    if require_timestamp {
                        return Err(StorageError::corruption(
                            "sub-document key is missing its timestamp",
                        ));
                    }
                    return Ok((
                        SubDocKey {
                            doc_key,
                            subkeys,
                            timestamp: None,
                        },
                        rest,
                    ));
                }
                Some(&b) if b == ValueType::Timestamp.as_byte() => {
                    let (ts, rest) = decode_key_timestamp(&rest[1..])?;
                    return Ok((
                        SubDocKey {
                            doc_key,
                            subkeys,
                            timestamp: Some(ts),
                        },
                        rest,
                    ));
                }
                Some(_) => {
                    let (subkey, after) = PrimitiveValue::decode_from(rest)?;
                    subkeys.push(subkey);
                    rest = after;
                }
            }
        }
    }

    /// Decodes a sub-document key and fails if any input bytes remain.
    pub fn fully_decode_from(
        input: &[u8],
        require_timestamp: bool,
    ) -> Result<SubDocKey, StorageError> {
        let (key, rest) = Self::decode_from(input, require_timestamp)?;
        if !rest.is_empty() {
            return Err(StorageError::corruption(format!(
                "{} extra byte(s) after a fully decoded sub-document key",
                rest.len()
            )));
        }
        Ok(key)
    }

    /// True iff `prefix` has the same document key and its subkeys are a
    /// prefix of this key's subkeys. Timestamps are ignored.
    pub fn starts_with(&self, prefix: &SubDocKey) -> bool {
        self.doc_key == prefix.doc_key
            && prefix.subkeys.len() <= self.subkeys.len()
            && self.subkeys[..prefix.subkeys.len()] == prefix.subkeys[..]
    }

    /// The number of initial components shared with `other`, counting the
    /// document key as a single component. Timestamps are ignored.
    pub fn num_shared_prefix_components(&self, other: &SubDocKey) -> usize {
        if self.doc_key != other.doc_key {
            return 0;
        }
        let shared_subkeys = self
            .subkeys
            .iter()
            .zip(other.subkeys.iter())
            .take_while(|(a, b)| a == b)
            .count();
        1 + shared_subkeys
    }

    /// The smallest key strictly greater than every sub-document key that
    /// extends this key's subkey path, including this key at any timestamp.
    /// Seeking to the result positions an iterator past the entire sub-tree
    /// rooted at the current subkey path.
    pub fn advance_out_of_sub_doc(&self) -> Vec<u8> {
        let mut buf = self.encode_without_timestamp();
        buf.push(MAX_BYTE);
        buf
    }

    /// Like [`Self::advance_out_of_sub_doc`], but positions past every
    /// sub-document key sharing this key's document-key prefix, including
    /// document keys that extend it with additional range components. With
    /// no range components, this skips past every document with the same
    /// hashed components.
    pub fn advance_out_of_doc_key_prefix(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.doc_key.encode_without_range_group_end_into(&mut buf);
        buf.push(MAX_BYTE);
        buf
    }
}

impl PartialOrd for SubDocKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SubDocKey {
    /// Structural comparison equal to the byte comparison of the encodings.
    ///
    /// When one key's subkeys extend the other's, the outcome depends on the
    /// shorter key's timestamp: the timestamp type byte sorts after every
    /// subkey type byte, while an absent timestamp makes the shorter
    /// encoding a strict prefix of the longer one.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        let result = self.doc_key.cmp(&other.doc_key);
        if result != Ordering::Equal {
            return result;
        }

        let shared = self.subkeys.len().min(other.subkeys.len());
        let result = self.subkeys[..shared].cmp(&other.subkeys[..shared]);
        if result != Ordering::Equal {
            return result;
        }

        match (
            self.subkeys.len() > shared,
            other.subkeys.len() > shared,
        ) {
            (true, false) => {
                // Our extra subkey competes with the other key's terminator.
                if other.timestamp.is_some() {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                if self.timestamp.is_some() {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            _ => match (self.timestamp, other.timestamp) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                // Timestamps encode descending: newer sorts first.
                (Some(a), Some(b)) => b.cmp(&a),
            },
        }
    }
}

impl std::fmt::Display for SubDocKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SubDocKey({}, [", self.doc_key)?;
        for (i, subkey) in self.subkeys.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", subkey)?;
        }
        if let Some(ts) = self.timestamp {
            if !self.subkeys.is_empty() {
                write!(f, "; ")?;
            }
            write!(f, "{}", ts)?;
        }
        write!(f, "])")
    }
}

fn assert_subkey_kind(subkey: &PrimitiveValue) {
    assert!(
        !matches!(subkey, PrimitiveValue::Timestamp(_)),
        "a timestamp cannot be used as a subkey"
    );
}

/// Renders encoded key bytes for diagnostics, trying the sub-document key
/// and document key shapes in turn and falling back to a hex dump.
pub fn best_effort_doc_db_key_to_string(bytes: &[u8]) -> String {
    if let Ok(key) = SubDocKey::fully_decode_from(bytes, true) {
        return key.to_string();
    }
    if let Ok(key) = SubDocKey::fully_decode_from(bytes, false) {
        return key.to_string();
    }
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("0x{}", hex)
}
