// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! DocKey-aware bloom filter policy.
//!
//! Stored keys carry subkeys and timestamps, but point lookups are by
//! document. Computing bloom entries on the DocKey prefix of each key lets
//! those lookups skip files that cannot contain the document, regardless of
//! which sub-document versions the files hold.

use bloomfilter::Bloom;

use super::primitive::skip_primitive;
use super::value_type::ValueType;
use super::StorageError;

/// Default bloom false-positive rate, matching a ~10 bits/key filter.
pub const DEFAULT_BLOOM_FP_RATE: f64 = 0.01;

// Filter layout: num_bits u64 | num_hashes u32 | sip keys 4x u64 | bitmap.
const FILTER_HEADER_LEN: usize = 8 + 4 + 32;

/// Returns the byte length of the DocKey encoding embedded at the front of
/// an encoded SubDocKey, i.e. up to and including the range group's
/// terminator.
pub fn encoded_doc_key_prefix_size(key: &[u8]) -> Result<usize, StorageError> {
    let total = key.len();
    let mut rest = key;

    if rest.first() == Some(&ValueType::Uint32Hash.as_byte()) {
        if rest.len() < 5 {
            return Err(StorageError::corruption("truncated hash prefix"));
        }
        rest = &rest[5..];
        rest = skip_group(rest)?;
    }
    rest = skip_group(rest)?;
    Ok(total - rest.len())
}

/// The DocKey prefix slice of an encoded SubDocKey.
pub fn encoded_doc_key_prefix(key: &[u8]) -> Result<&[u8], StorageError> {
    let size = encoded_doc_key_prefix_size(key)?;
    Ok(&key[..size])
}

fn skip_group(mut input: &[u8]) -> Result<&[u8], StorageError> {
    loop {
        match input.first() {
            None => {
                return Err(StorageError::corruption(
                    "component group is missing its GroupEnd terminator",
                ))
            }
            Some(&b) if b == ValueType::GroupEnd.as_byte() => return Ok(&input[1..]),
            Some(_) => input = skip_primitive(input)?,
        }
    }
}

/// Prefix-extractor hook for the store: maps a stored key to the slice the
/// bloom filter is computed on. Falls back to the whole key when it does
/// not parse as a SubDocKey.
pub fn doc_key_prefix_transform(key: &[u8]) -> &[u8] {
    encoded_doc_key_prefix(key).unwrap_or(key)
}

/// Companion in-domain hook: only well-formed keys participate in prefix
/// bloom construction.
pub fn doc_key_prefix_in_domain(key: &[u8]) -> bool {
    encoded_doc_key_prefix_size(key).is_ok()
}

/// A filter policy that truncates every key to its DocKey prefix before
/// delegating to a standard bloom filter.
#[derive(Debug, Clone, Copy)]
pub struct DocKeyAwareFilterPolicy {
    fp_rate: f64,
}

impl DocKeyAwareFilterPolicy {
    pub fn new(fp_rate: f64) -> Self {
        Self { fp_rate }
    }

    /// Builds a serialized filter over the DocKey prefixes of `keys`.
    pub fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8> {
        let mut bloom: Bloom<[u8]> = Bloom::new_for_fp_rate(keys.len().max(1), self.fp_rate);
        for key in keys {
            bloom.set(doc_key_prefix_transform(key));
        }

        let bitmap = bloom.bitmap();
        let sip_keys = bloom.sip_keys();
        let mut filter = Vec::with_capacity(FILTER_HEADER_LEN + bitmap.len());
        filter.extend_from_slice(&bloom.number_of_bits().to_le_bytes());
        filter.extend_from_slice(&bloom.number_of_hash_functions().to_le_bytes());
        for (k0, k1) in sip_keys {
            filter.extend_from_slice(&k0.to_le_bytes());
            filter.extend_from_slice(&k1.to_le_bytes());
        }
        filter.extend_from_slice(&bitmap);
        filter
    }

    /// True if `key`'s document may be covered by `filter`. A malformed
    /// filter answers true: the filter only ever rules keys out.
    pub fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        let Some(bloom) = Self::restore(filter) else {
            return true;
        };
        bloom.check(doc_key_prefix_transform(key))
    }

    fn restore(filter: &[u8]) -> Option<Bloom<[u8]>> {
        if filter.len() < FILTER_HEADER_LEN {
            return None;
        }
        let num_bits = u64::from_le_bytes(filter[0..8].try_into().ok()?);
        let num_hashes = u32::from_le_bytes(filter[8..12].try_into().ok()?);
        let mut sip_keys = [(0u64, 0u64); 2];
        for (i, pair) in sip_keys.iter_mut().enumerate() {
            let base = 12 + i * 16;
            pair.0 = u64::from_le_bytes(filter[base..base + 8].try_into().ok()?);
            pair.1 = u64::from_le_bytes(filter[base + 8..base + 16].try_into().ok()?);
        }
        if num_bits == 0 || num_hashes == 0 {
            return None;
        }
        Some(Bloom::from_existing(
            &filter[FILTER_HEADER_LEN..],
            num_bits,
            num_hashes,
            sip_keys,
        ))
    }
}

impl Default for DocKeyAwareFilterPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BLOOM_FP_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DocKey, PrimitiveValue, SubDocKey};
    use crate::time::Timestamp;

    fn doc_key(id: i64) -> DocKey {
        DocKey::with_hash(
            id as u32,
            vec![PrimitiveValue::Int64(id)],
            vec![PrimitiveValue::from("row")],
        )
    }

    fn stored_key(id: i64, subkey: &str, ts: u64) -> Vec<u8> {
        SubDocKey::with_timestamp(
            doc_key(id),
            vec![PrimitiveValue::from(subkey)],
            Timestamp::from_raw(ts),
        )
        .encode()
    }

    #[test]
    fn test_prefix_size_equals_doc_key_encoding() {
        let encoded_doc = doc_key(7).encode();
        let full = stored_key(7, "col", 123);

        let size = encoded_doc_key_prefix_size(&full).unwrap();
        assert_eq!(size, encoded_doc.len());
        assert_eq!(&full[..size], encoded_doc.as_slice());
    }

    #[test]
    fn test_prefix_size_without_hash() {
        let doc = DocKey::from_range(vec![PrimitiveValue::from("a"), PrimitiveValue::Int64(1)]);
        let full = SubDocKey::with_timestamp(
            doc.clone(),
            vec![PrimitiveValue::from("x")],
            Timestamp::from_raw(5),
        )
        .encode();
        assert_eq!(
            encoded_doc_key_prefix(&full).unwrap(),
            doc.encode().as_slice()
        );
    }

    #[test]
    fn test_prefix_size_rejects_garbage() {
        assert!(encoded_doc_key_prefix_size(&[]).is_err());
        assert!(encoded_doc_key_prefix_size(&[0x00, 0x01]).is_err());
        // A hash prefix with nothing after it.
        assert!(encoded_doc_key_prefix_size(&[ValueType::Uint32Hash.as_byte(), 1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_transform_falls_back_to_whole_key() {
        let garbage = [0x00u8, 0x01, 0x02];
        assert_eq!(doc_key_prefix_transform(&garbage), &garbage[..]);
        assert!(!doc_key_prefix_in_domain(&garbage));
    }

    #[test]
    fn test_filter_matches_any_version_of_document() {
        let policy = DocKeyAwareFilterPolicy::default();
        let keys: Vec<Vec<u8>> = (0..50).map(|i| stored_key(i, "col", 100)).collect();
        let key_slices: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        let filter = policy.create_filter(&key_slices);

        // Different subkey and timestamp, same document: must match.
        for i in 0..50 {
            let probe = stored_key(i, "other", 999);
            assert!(policy.key_may_match(&probe, &filter));
        }
    }

    #[test]
    fn test_filter_excludes_most_absent_documents() {
        let policy = DocKeyAwareFilterPolicy::default();
        let keys: Vec<Vec<u8>> = (0..100).map(|i| stored_key(i, "col", 100)).collect();
        let key_slices: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        let filter = policy.create_filter(&key_slices);

        let false_positives = (1000..2000)
            .filter(|&i| policy.key_may_match(&stored_key(i, "col", 100), &filter))
            .count();
        // 1% nominal rate; allow generous slack.
        assert!(
            false_positives < 100,
            "false positive count too high: {}",
            false_positives
        );
    }

    #[test]
    fn test_malformed_filter_is_conservative() {
        let policy = DocKeyAwareFilterPolicy::default();
        assert!(policy.key_may_match(&stored_key(1, "col", 1), &[0x01, 0x02]));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::storage::{DocKey, PrimitiveValue, SubDocKey};
    use crate::time::Timestamp;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prefix_law(
            hash in any::<u32>(),
            range_len in 0usize..3,
            subkey_len in 0usize..3,
            ts in 0..u64::MAX,
        ) {
            let doc_key = DocKey::with_hash(
                hash,
                vec![PrimitiveValue::Int64(hash as i64)],
                (0..range_len).map(|i| PrimitiveValue::Int64(i as i64)).collect(),
            );
            let key = SubDocKey::with_timestamp(
                doc_key.clone(),
                (0..subkey_len).map(|i| PrimitiveValue::Int64(i as i64)).collect(),
                Timestamp::from_raw(ts),
            );

            let encoded = key.encode();
            let size = encoded_doc_key_prefix_size(&encoded).unwrap();
            prop_assert_eq!(size, doc_key.encode().len());
            prop_assert_eq!(&encoded[..size], doc_key.encode().as_slice());
        }
    }
}
