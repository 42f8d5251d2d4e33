// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Typed atoms with an order-preserving key encoding.
//!
//! Every value encodes as a leading [`ValueType`] byte followed by a payload
//! whose byte order equals the value's natural order:
//!
//! - signed integers: 8 bytes big-endian with the sign bit flipped, so
//!   negative values sort before positive ones under unsigned compare
//! - doubles: 8 bytes big-endian of the sign-transformed IEEE 754 bits
//!   (flip all bits for negatives, flip the sign bit otherwise)
//! - strings: UTF-8 with every `0x00` escaped as `0x00 0x01` and a
//!   `0x00 0x00` terminator, so no length prefix is needed
//! - timestamps: 8 bytes big-endian of `u64::MAX - raw`, so for a fixed key
//!   prefix a forward scan yields the most recent version first

use crate::time::Timestamp;

use super::value_type::ValueType;
use super::StorageError;

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

/// A tagged atom used as a key component.
///
/// `Timestamp` is the terminating component of a sub-document key; it is not
/// a valid subkey.
#[derive(Debug, Clone)]
pub enum PrimitiveValue {
    Null,
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
    Timestamp(Timestamp),
}

impl PrimitiveValue {
    /// The type byte this value encodes with.
    pub fn value_type(&self) -> ValueType {
        match self {
            PrimitiveValue::Null => ValueType::Null,
            PrimitiveValue::Bool(false) => ValueType::False,
            PrimitiveValue::Bool(true) => ValueType::True,
            PrimitiveValue::Int64(_) => ValueType::Int64,
            PrimitiveValue::Double(_) => ValueType::Double,
            PrimitiveValue::String(_) => ValueType::String,
            PrimitiveValue::Timestamp(_) => ValueType::Timestamp,
        }
    }

    /// Appends the encoded form to `buf`. Encoding is infallible.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.value_type().as_byte());
        match self {
            PrimitiveValue::Null | PrimitiveValue::Bool(_) => {}
            PrimitiveValue::Int64(v) => {
                buf.extend_from_slice(&((*v as u64) ^ SIGN_BIT).to_be_bytes());
            }
            PrimitiveValue::Double(v) => {
                buf.extend_from_slice(&double_to_key_bits(*v).to_be_bytes());
            }
            PrimitiveValue::String(s) => {
                for &b in s.as_bytes() {
                    if b == 0x00 {
                        buf.extend_from_slice(&[0x00, 0x01]);
                    } else {
                        buf.push(b);
                    }
                }
                buf.extend_from_slice(&[0x00, 0x00]);
            }
            PrimitiveValue::Timestamp(ts) => {
                assert!(ts.is_valid(), "cannot encode an invalid timestamp");
                buf.extend_from_slice(&(u64::MAX - ts.raw()).to_be_bytes());
            }
        }
    }

    /// Returns the encoded form.
    pub fn to_key_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes one value from the front of `input`, returning it together
    /// with the unconsumed remainder.
    pub fn decode_from(input: &[u8]) -> Result<(PrimitiveValue, &[u8]), StorageError> {
        let (&type_byte, rest) = input
            .split_first()
            .ok_or_else(|| StorageError::corruption("cannot decode a value from empty input"))?;

        match ValueType::from_byte(type_byte) {
            Some(ValueType::Null) => Ok((PrimitiveValue::Null, rest)),
            Some(ValueType::False) => Ok((PrimitiveValue::Bool(false), rest)),
            Some(ValueType::True) => Ok((PrimitiveValue::Bool(true), rest)),
            Some(ValueType::Int64) => {
                let (raw, rest) = take_u64(rest, "int64 payload")?;
                Ok((PrimitiveValue::Int64((raw ^ SIGN_BIT) as i64), rest))
            }
            Some(ValueType::Double) => {
                let (raw, rest) = take_u64(rest, "double payload")?;
                Ok((PrimitiveValue::Double(double_from_key_bits(raw)), rest))
            }
            Some(ValueType::String) => {
                let (s, rest) = decode_zero_escaped(rest)?;
                Ok((PrimitiveValue::String(s), rest))
            }
            Some(ValueType::Timestamp) => {
                let (ts, rest) = decode_key_timestamp(rest)?;
                Ok((PrimitiveValue::Timestamp(ts), rest))
            }
            Some(vt @ (ValueType::GroupEnd | ValueType::Uint32Hash)) => Err(
                StorageError::corruption(format!("{:?} is not a primitive value", vt)),
            ),
            None => Err(StorageError::corruption(format!(
                "unknown value type byte 0x{:02x}",
                type_byte
            ))),
        }
    }
}

/// Skips one encoded value without materializing it, returning the
/// unconsumed remainder. Used when only component boundaries matter.
pub(crate) fn skip_primitive(input: &[u8]) -> Result<&[u8], StorageError> {
    let (&type_byte, rest) = input
        .split_first()
        .ok_or_else(|| StorageError::corruption("cannot skip a value in empty input"))?;

    match ValueType::from_byte(type_byte) {
        Some(ValueType::Null | ValueType::False | ValueType::True) => Ok(rest),
        Some(ValueType::Int64 | ValueType::Double | ValueType::Timestamp) => {
            if rest.len() < 8 {
                return Err(StorageError::corruption(format!(
                    "truncated fixed-width payload: need 8 bytes, have {}",
                    rest.len()
                )));
            }
            Ok(&rest[8..])
        }
        Some(ValueType::String) => {
            let end = zero_escaped_len(rest)?;
            Ok(&rest[end..])
        }
        Some(vt @ (ValueType::GroupEnd | ValueType::Uint32Hash)) => Err(StorageError::corruption(
            format!("{:?} is not a primitive value", vt),
        )),
        None => Err(StorageError::corruption(format!(
            "unknown value type byte 0x{:02x}",
            type_byte
        ))),
    }
}

/// Decodes the 8-byte descending timestamp payload (the type byte has
/// already been consumed).
pub(crate) fn decode_key_timestamp(input: &[u8]) -> Result<(Timestamp, &[u8]), StorageError> {
    let (raw, rest) = take_u64(input, "timestamp payload")?;
    let ts = Timestamp::from_raw(u64::MAX - raw);
    if !ts.is_valid() {
        return Err(StorageError::corruption(
            "invalid timestamp sentinel in encoded key",
        ));
    }
    Ok((ts, rest))
}

fn take_u64<'a>(input: &'a [u8], what: &str) -> Result<(u64, &'a [u8]), StorageError> {
    if input.len() < 8 {
        return Err(StorageError::corruption(format!(
            "truncated {}: need 8 bytes, have {}",
            what,
            input.len()
        )));
    }
    let (head, rest) = input.split_at(8);
    let mut raw = [0u8; 8];
    raw.copy_from_slice(head);
    Ok((u64::from_be_bytes(raw), rest))
}

/// Returns the number of encoded bytes of a zero-escaped string, including
/// the terminator.
fn zero_escaped_len(input: &[u8]) -> Result<usize, StorageError> {
    let mut i = 0;
    loop {
        match input.get(i) {
            None => return Err(StorageError::corruption("unterminated string in key")),
            Some(0x00) => match input.get(i + 1) {
                Some(0x00) => return Ok(i + 2),
                Some(0x01) => i += 2,
                Some(b) => {
                    return Err(StorageError::corruption(format!(
                        "invalid string escape 0x00 0x{:02x}",
                        b
                    )))
                }
                None => return Err(StorageError::corruption("unterminated string in key")),
            },
            Some(_) => i += 1,
        }
    }
}

fn decode_zero_escaped(input: &[u8]) -> Result<(String, &[u8]), StorageError> {
    let end = zero_escaped_len(input)?;
    let mut out = Vec::with_capacity(end - 2);
    let mut i = 0;
    while i < end - 2 {
        if input[i] == 0x00 {
            // Necessarily the 0x00 0x01 escape; anything else failed above.
            out.push(0x00);
            i += 2;
        } else {
            out.push(input[i]);
            i += 1;
        }
    }
    let s = String::from_utf8(out)
        .map_err(|_| StorageError::corruption("string in key is not valid UTF-8"))?;
    Ok((s, &input[end..]))
}

fn double_to_key_bits(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & SIGN_BIT != 0 {
        !bits
    } else {
        bits ^ SIGN_BIT
    }
}

fn double_from_key_bits(bits: u64) -> f64 {
    if bits & SIGN_BIT != 0 {
        f64::from_bits(bits ^ SIGN_BIT)
    } else {
        f64::from_bits(!bits)
    }
}

impl PartialEq for PrimitiveValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for PrimitiveValue {}

impl PartialOrd for PrimitiveValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrimitiveValue {
    /// Structural comparison equal to the byte comparison of the encodings.
    ///
    /// `f64::total_cmp` is exactly the order of the sign-transformed bits,
    /// and timestamps compare in reverse to match their descending encoding.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use PrimitiveValue::*;
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int64(a), Int64(b)) => a.cmp(b),
            (Double(a), Double(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => b.cmp(a),
            _ => self.value_type().cmp(&other.value_type()),
        }
    }
}

impl std::hash::Hash for PrimitiveValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value_type().as_byte().hash(state);
        match self {
            PrimitiveValue::Null | PrimitiveValue::Bool(_) => {}
            PrimitiveValue::Int64(v) => v.hash(state),
            PrimitiveValue::Double(v) => v.to_bits().hash(state),
            PrimitiveValue::String(s) => s.hash(state),
            PrimitiveValue::Timestamp(ts) => ts.hash(state),
        }
    }
}

impl std::fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimitiveValue::Null => write!(f, "null"),
            PrimitiveValue::Bool(b) => write!(f, "{}", b),
            PrimitiveValue::Int64(v) => write!(f, "{}", v),
            PrimitiveValue::Double(v) => write!(f, "{}", v),
            PrimitiveValue::String(s) => write!(f, "{:?}", s),
            PrimitiveValue::Timestamp(ts) => write!(f, "{}", ts),
        }
    }
}

impl From<&str> for PrimitiveValue {
    fn from(s: &str) -> Self {
        PrimitiveValue::String(s.to_string())
    }
}

impl From<i64> for PrimitiveValue {
    fn from(v: i64) -> Self {
        PrimitiveValue::Int64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: PrimitiveValue) {
        let encoded = value.to_key_bytes();
        let (decoded, rest) = PrimitiveValue::decode_from(&encoded).unwrap();
        assert_eq!(decoded, value);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_roundtrip_all_types() {
        roundtrip(PrimitiveValue::Null);
        roundtrip(PrimitiveValue::Bool(false));
        roundtrip(PrimitiveValue::Bool(true));
        roundtrip(PrimitiveValue::Int64(0));
        roundtrip(PrimitiveValue::Int64(i64::MIN));
        roundtrip(PrimitiveValue::Int64(i64::MAX));
        roundtrip(PrimitiveValue::Double(0.0));
        roundtrip(PrimitiveValue::Double(-0.0));
        roundtrip(PrimitiveValue::Double(f64::NEG_INFINITY));
        roundtrip(PrimitiveValue::Double(123.456));
        roundtrip(PrimitiveValue::String(String::new()));
        roundtrip(PrimitiveValue::String("hello".to_string()));
        roundtrip(PrimitiveValue::String("nul\0inside".to_string()));
        roundtrip(PrimitiveValue::Timestamp(Timestamp::from_raw(12345)));
        roundtrip(PrimitiveValue::Timestamp(Timestamp::MAX));
    }

    #[test]
    fn test_int64_sign_ordering() {
        let neg = PrimitiveValue::Int64(-5).to_key_bytes();
        let zero = PrimitiveValue::Int64(0).to_key_bytes();
        let pos = PrimitiveValue::Int64(5).to_key_bytes();
        assert!(neg < zero);
        assert!(zero < pos);
    }

    #[test]
    fn test_double_sign_ordering() {
        let neg = PrimitiveValue::Double(-2.5).to_key_bytes();
        let neg_small = PrimitiveValue::Double(-0.1).to_key_bytes();
        let zero = PrimitiveValue::Double(0.0).to_key_bytes();
        let pos = PrimitiveValue::Double(3.25).to_key_bytes();
        assert!(neg < neg_small);
        assert!(neg_small < zero);
        assert!(zero < pos);
    }

    #[test]
    fn test_string_escape_encoding() {
        let encoded = PrimitiveValue::String("a\0b".to_string()).to_key_bytes();
        assert_eq!(
            encoded,
            vec![ValueType::String.as_byte(), b'a', 0x00, 0x01, b'b', 0x00, 0x00]
        );
    }

    #[test]
    fn test_string_prefix_sorts_first() {
        let short = PrimitiveValue::from("app").to_key_bytes();
        let long = PrimitiveValue::from("apple").to_key_bytes();
        assert!(short < long);
    }

    #[test]
    fn test_timestamp_descending() {
        let older = PrimitiveValue::Timestamp(Timestamp::from_raw(100)).to_key_bytes();
        let newer = PrimitiveValue::Timestamp(Timestamp::from_raw(200)).to_key_bytes();
        assert!(newer < older, "newer timestamps must sort first");
    }

    #[test]
    fn test_rejects_invalid_escape() {
        // "a" followed by an escaped NUL with a bad second byte.
        let input = [ValueType::String.as_byte(), b'a', 0x00, 0x02];
        let result = PrimitiveValue::decode_from(&input);
        assert!(matches!(result, Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_rejects_unterminated_string() {
        let input = [ValueType::String.as_byte(), b'a', b'b'];
        let result = PrimitiveValue::decode_from(&input);
        assert!(matches!(result, Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_rejects_truncated_int() {
        let input = [ValueType::Int64.as_byte(), 0x00, 0x01];
        let result = PrimitiveValue::decode_from(&input);
        assert!(matches!(result, Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_rejects_unknown_type_byte() {
        let result = PrimitiveValue::decode_from(&[0x00]);
        assert!(matches!(result, Err(StorageError::Corruption(_))));

        let result = PrimitiveValue::decode_from(&[ValueType::GroupEnd.as_byte()]);
        assert!(matches!(result, Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_rejects_empty_input() {
        let result = PrimitiveValue::decode_from(&[]);
        assert!(matches!(result, Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_skip_matches_decode() {
        let mut buf = Vec::new();
        PrimitiveValue::from("sub\0key").encode_into(&mut buf);
        PrimitiveValue::Int64(-1).encode_into(&mut buf);

        let rest = skip_primitive(&buf).unwrap();
        let (_, expected_rest) = PrimitiveValue::decode_from(&buf).unwrap();
        assert_eq!(rest, expected_rest);
    }

    #[test]
    fn test_decode_returns_remainder() {
        let mut buf = PrimitiveValue::Int64(7).to_key_bytes();
        buf.extend_from_slice(b"tail");
        let (value, rest) = PrimitiveValue::decode_from(&buf).unwrap();
        assert_eq!(value, PrimitiveValue::Int64(7));
        assert_eq!(rest, b"tail");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_primitive() -> impl Strategy<Value = PrimitiveValue> {
        prop_oneof![
            Just(PrimitiveValue::Null),
            any::<bool>().prop_map(PrimitiveValue::Bool),
            any::<i64>().prop_map(PrimitiveValue::Int64),
            any::<f64>().prop_map(PrimitiveValue::Double),
            any::<String>().prop_map(PrimitiveValue::String),
            (0..u64::MAX).prop_map(|v| PrimitiveValue::Timestamp(Timestamp::from_raw(v))),
        ]
    }

    proptest! {
        #[test]
        fn roundtrip(value in arb_primitive()) {
            let encoded = value.to_key_bytes();
            let (decoded, rest) = PrimitiveValue::decode_from(&encoded).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert!(rest.is_empty());
        }

        #[test]
        fn ordering_law(a in arb_primitive(), b in arb_primitive()) {
            let byte_order = a.to_key_bytes().cmp(&b.to_key_bytes());
            prop_assert_eq!(a.cmp(&b), byte_order);
        }

        #[test]
        fn skip_consumes_same_bytes(value in arb_primitive(), tail in any::<Vec<u8>>()) {
            let mut buf = value.to_key_bytes();
            buf.extend_from_slice(&tail);
            let after_skip = skip_primitive(&buf).unwrap().len();
            let (_, after_decode) = PrimitiveValue::decode_from(&buf).unwrap();
            prop_assert_eq!(after_skip, after_decode.len());
        }
    }
}
