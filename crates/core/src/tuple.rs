//! Order-preserving tuple encoding.
//!
//! Scalars are encoded into byte strings such that the lexicographic order
//! of the encoded form equals the semantic order of the values. This is the
//! property every index subspace relies on: packing a tuple and appending
//! further bytes preserves prefix order, so range scans by leading fields
//! come straight out of the KV engine.
//!
//! Element layout:
//! - each element starts with a type code byte
//! - byte strings and text escape embedded NUL as `0x00 0xFF` and terminate
//!   with `0x00`
//! - integers use sign-and-magnitude with the byte length folded into the
//!   type code, so shorter magnitudes sort before longer ones
//! - doubles are bit-transformed (sign bit flipped for positives, all bits
//!   flipped for negatives) so negatives sort before positives
//! - nested tuples re-encode their elements with NUL escaped inside

use thiserror::Error;

/// Type codes, ordered. The cross-type ordering of values follows directly
/// from these constants.
mod code {
    pub const NULL: u8 = 0x00;
    pub const BYTES: u8 = 0x01;
    pub const TEXT: u8 = 0x02;
    pub const NESTED: u8 = 0x05;
    /// Integer codes span `INT_ZERO - 8 ..= INT_ZERO + 8`; the offset from
    /// `INT_ZERO` is the signed magnitude length in bytes.
    pub const INT_ZERO: u8 = 0x14;
    pub const DOUBLE: u8 = 0x21;
    pub const FALSE: u8 = 0x26;
    pub const TRUE: u8 = 0x27;

    pub const ESCAPE: u8 = 0xFF;
    pub const TERMINATOR: u8 = 0x00;
}

/// A single element of a key tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Bytes(Vec<u8>),
    Text(String),
    Tuple(Vec<Value>),
}

impl Value {
    /// Whether two values are the same element for indexing purposes.
    ///
    /// Doubles compare by bit pattern so that an index entry written for a
    /// value is always found again for the exact same value (NaN included).
    pub fn same_element(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_element(y))
            }
            _ => self == other,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "0x{}", hex::encode(v)),
            Value::Text(v) => write!(f, "{v:?}"),
            Value::Tuple(vs) => {
                write!(f, "(")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TupleError {
    #[error("unexpected end of encoded tuple")]
    UnexpectedEof,

    #[error("unknown type code: {0:#04x}")]
    UnknownTypeCode(u8),

    #[error("invalid utf-8 in text element")]
    InvalidUtf8,

    #[error("integer magnitude longer than 8 bytes")]
    IntegerOverflow,
}

/// Encode a tuple into its ordered binary form.
pub fn pack(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for value in values {
        encode_element(value, &mut out, false);
    }
    out
}

/// Decode a packed tuple. Total inverse of [`pack`]: every byte is consumed
/// or the call fails.
pub fn unpack(bytes: &[u8]) -> Result<Vec<Value>, TupleError> {
    let mut values = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let (value, next) = decode_element(bytes, pos, false)?;
        values.push(value);
        pos = next;
    }
    Ok(values)
}

fn encode_element(value: &Value, out: &mut Vec<u8>, nested: bool) {
    match value {
        Value::Null => {
            out.push(code::NULL);
            // Inside a nested tuple a bare NUL would read as the tuple
            // terminator, so null gets an escape byte there.
            if nested {
                out.push(code::ESCAPE);
            }
        }
        Value::Bool(false) => out.push(code::FALSE),
        Value::Bool(true) => out.push(code::TRUE),
        Value::Int(v) => encode_int(*v, out),
        Value::Double(v) => {
            out.push(code::DOUBLE);
            out.extend_from_slice(&transform_double(*v).to_be_bytes());
        }
        Value::Bytes(v) => {
            out.push(code::BYTES);
            encode_escaped(v, out);
        }
        Value::Text(v) => {
            out.push(code::TEXT);
            encode_escaped(v.as_bytes(), out);
        }
        Value::Tuple(vs) => {
            out.push(code::NESTED);
            for v in vs {
                encode_element(v, out, true);
            }
            out.push(code::TERMINATOR);
        }
    }
}

fn decode_element(bytes: &[u8], pos: usize, nested: bool) -> Result<(Value, usize), TupleError> {
    let tag = *bytes.get(pos).ok_or(TupleError::UnexpectedEof)?;
    let pos = pos + 1;

    match tag {
        code::NULL => {
            if nested {
                // consume the escape byte
                match bytes.get(pos) {
                    Some(&code::ESCAPE) => Ok((Value::Null, pos + 1)),
                    _ => Err(TupleError::UnexpectedEof),
                }
            } else {
                Ok((Value::Null, pos))
            }
        }
        code::FALSE => Ok((Value::Bool(false), pos)),
        code::TRUE => Ok((Value::Bool(true), pos)),
        code::BYTES => {
            let (raw, next) = decode_escaped(bytes, pos)?;
            Ok((Value::Bytes(raw), next))
        }
        code::TEXT => {
            let (raw, next) = decode_escaped(bytes, pos)?;
            let text = String::from_utf8(raw).map_err(|_| TupleError::InvalidUtf8)?;
            Ok((Value::Text(text), next))
        }
        code::DOUBLE => {
            let end = pos + 8;
            let raw = bytes.get(pos..end).ok_or(TupleError::UnexpectedEof)?;
            let bits = u64::from_be_bytes(raw.try_into().expect("slice is 8 bytes"));
            Ok((Value::Double(untransform_double(bits)), end))
        }
        code::NESTED => {
            let mut values = Vec::new();
            let mut cursor = pos;
            loop {
                match bytes.get(cursor) {
                    None => return Err(TupleError::UnexpectedEof),
                    Some(&code::TERMINATOR) => {
                        // NUL followed by the escape byte is a nested null,
                        // not the end of the tuple.
                        if bytes.get(cursor + 1) == Some(&code::ESCAPE) {
                            values.push(Value::Null);
                            cursor += 2;
                        } else {
                            return Ok((Value::Tuple(values), cursor + 1));
                        }
                    }
                    Some(_) => {
                        let (value, next) = decode_element(bytes, cursor, true)?;
                        values.push(value);
                        cursor = next;
                    }
                }
            }
        }
        tag if int_code(tag) => {
            let width = (tag as i16 - code::INT_ZERO as i16).unsigned_abs() as usize;
            let end = pos + width;
            let raw = bytes.get(pos..end).ok_or(TupleError::UnexpectedEof)?;
            let value = if tag >= code::INT_ZERO {
                decode_positive_int(raw)?
            } else {
                decode_negative_int(raw)?
            };
            Ok((Value::Int(value), end))
        }
        other => Err(TupleError::UnknownTypeCode(other)),
    }
}

fn int_code(tag: u8) -> bool {
    (code::INT_ZERO - 8..=code::INT_ZERO + 8).contains(&tag)
}

/// Sign-and-magnitude integer encoding. Positive magnitudes are plain
/// big-endian; negative magnitudes are one's-complemented so that larger
/// negatives sort earlier, and the byte length is folded into the type code
/// below/above `INT_ZERO`.
fn encode_int(value: i64, out: &mut Vec<u8>) {
    if value == 0 {
        out.push(code::INT_ZERO);
        return;
    }

    let magnitude = value.unsigned_abs();
    let width = ((64 - magnitude.leading_zeros() as usize) + 7) / 8;
    let be = magnitude.to_be_bytes();

    if value > 0 {
        out.push(code::INT_ZERO + width as u8);
        out.extend_from_slice(&be[8 - width..]);
    } else {
        out.push(code::INT_ZERO - width as u8);
        let complement = (!magnitude).to_be_bytes();
        out.extend_from_slice(&complement[8 - width..]);
    }
}

fn decode_positive_int(raw: &[u8]) -> Result<i64, TupleError> {
    let mut magnitude = 0u64;
    for &byte in raw {
        magnitude = (magnitude << 8) | byte as u64;
    }
    if magnitude > i64::MAX as u64 {
        return Err(TupleError::IntegerOverflow);
    }
    Ok(magnitude as i64)
}

fn decode_negative_int(raw: &[u8]) -> Result<i64, TupleError> {
    let mut complement = 0u64;
    for &byte in raw {
        complement = (complement << 8) | byte as u64;
    }
    let width = raw.len();
    let mask = if width == 8 { u64::MAX } else { (1u64 << (width * 8)) - 1 };
    let magnitude = !complement & mask;
    if magnitude > i64::MIN.unsigned_abs() {
        return Err(TupleError::IntegerOverflow);
    }
    // wrapping_neg maps i64::MIN's magnitude back onto itself
    Ok((magnitude as i64).wrapping_neg())
}

/// Map double bits onto an order-preserving unsigned form: flip the sign bit
/// of non-negatives, flip every bit of negatives.
pub fn transform_double(value: f64) -> u64 {
    let bits = value.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits ^ (1 << 63)
    }
}

/// Inverse of [`transform_double`].
pub fn untransform_double(bits: u64) -> f64 {
    let raw = if bits & (1 << 63) != 0 {
        bits ^ (1 << 63)
    } else {
        !bits
    };
    f64::from_bits(raw)
}

fn encode_escaped(raw: &[u8], out: &mut Vec<u8>) {
    for &byte in raw {
        out.push(byte);
        if byte == code::TERMINATOR {
            out.push(code::ESCAPE);
        }
    }
    out.push(code::TERMINATOR);
}

fn decode_escaped(bytes: &[u8], mut pos: usize) -> Result<(Vec<u8>, usize), TupleError> {
    let mut raw = Vec::new();
    loop {
        match bytes.get(pos) {
            None => return Err(TupleError::UnexpectedEof),
            Some(&code::TERMINATOR) => {
                if bytes.get(pos + 1) == Some(&code::ESCAPE) {
                    raw.push(code::TERMINATOR);
                    pos += 2;
                } else {
                    return Ok((raw, pos + 1));
                }
            }
            Some(&byte) => {
                raw.push(byte);
                pos += 1;
            }
        }
    }
}

/// Compare two values by their encoded order.
///
/// This is the total order the key space exhibits: cross-type order follows
/// the type codes, within-type order is semantic.
pub fn order_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    let lhs = pack(std::slice::from_ref(a));
    let rhs = pack(std::slice::from_ref(b));
    lhs.cmp(&rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(values: Vec<Value>) {
        let packed = pack(&values);
        let unpacked = unpack(&packed).unwrap();
        assert_eq!(values.len(), unpacked.len());
        for (a, b) in values.iter().zip(&unpacked) {
            assert!(a.same_element(b), "{a} != {b}");
        }
    }

    #[test]
    fn test_scalar_roundtrips() {
        roundtrip(vec![Value::Null]);
        roundtrip(vec![Value::Bool(false), Value::Bool(true)]);
        roundtrip(vec![Value::Int(0), Value::Int(1), Value::Int(-1)]);
        roundtrip(vec![Value::Int(i64::MAX), Value::Int(i64::MIN)]);
        roundtrip(vec![Value::Double(0.0), Value::Double(-1.5), Value::Double(f64::NAN)]);
        roundtrip(vec![Value::Bytes(vec![0, 1, 0, 255, 0])]);
        roundtrip(vec![Value::Text("hello\u{0}world".into())]);
        roundtrip(vec![Value::Tuple(vec![
            Value::Null,
            Value::Text("inner".into()),
            Value::Tuple(vec![Value::Int(7)]),
        ])]);
    }

    #[test]
    fn test_int_order() {
        let samples = [
            i64::MIN,
            i64::MIN + 1,
            -65536,
            -256,
            -255,
            -2,
            -1,
            0,
            1,
            2,
            255,
            256,
            65535,
            i64::MAX - 1,
            i64::MAX,
        ];
        for window in samples.windows(2) {
            let a = pack(&[Value::Int(window[0])]);
            let b = pack(&[Value::Int(window[1])]);
            assert!(a < b, "{} should sort before {}", window[0], window[1]);
        }
    }

    #[test]
    fn test_double_order() {
        let samples = [
            f64::NEG_INFINITY,
            -1e300,
            -1.5,
            -f64::MIN_POSITIVE,
            -0.0,
            0.0,
            f64::MIN_POSITIVE,
            1.5,
            1e300,
            f64::INFINITY,
        ];
        for window in samples.windows(2) {
            let a = pack(&[Value::Double(window[0])]);
            let b = pack(&[Value::Double(window[1])]);
            assert!(a <= b, "{} should not sort after {}", window[0], window[1]);
        }
    }

    #[test]
    fn test_cross_type_order() {
        let ordered = [
            Value::Null,
            Value::Bytes(vec![1, 2]),
            Value::Text("a".into()),
            Value::Tuple(vec![Value::Int(1)]),
            Value::Int(-5),
            Value::Double(1.0),
            Value::Bool(false),
            Value::Bool(true),
        ];
        for window in ordered.windows(2) {
            assert!(
                pack(&[window[0].clone()]) < pack(&[window[1].clone()]),
                "{} should sort before {}",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn test_prefix_order_preserved() {
        // A packed tuple followed by more bytes must stay inside the range
        // of its prefix.
        let prefix = pack(&[Value::Text("users".into()), Value::Int(42)]);
        let extended = pack(&[
            Value::Text("users".into()),
            Value::Int(42),
            Value::Text("suffix".into()),
        ]);
        assert!(extended.starts_with(&prefix));
    }

    #[test]
    fn test_escaped_nul_does_not_break_order() {
        let a = pack(&[Value::Bytes(vec![0x00])]);
        let b = pack(&[Value::Bytes(vec![0x00, 0x01])]);
        let c = pack(&[Value::Bytes(vec![0x01])]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        assert_eq!(unpack(&[0x03]), Err(TupleError::UnknownTypeCode(0x03)));
        assert_eq!(unpack(&[0x21, 0x00]), Err(TupleError::UnexpectedEof));
        assert_eq!(unpack(&[0x01, 0x61]), Err(TupleError::UnexpectedEof));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>().prop_map(Value::Double),
            proptest::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
            proptest::collection::vec(any::<char>(), 0..8)
                .prop_map(|chars| Value::Text(chars.into_iter().collect())),
        ];
        leaf.prop_recursive(2, 16, 4, |inner| {
            proptest::collection::vec(inner, 0..4).prop_map(Value::Tuple)
        })
    }

    proptest! {
        #[test]
        fn prop_pack_roundtrip(values in proptest::collection::vec(arb_value(), 0..6)) {
            let packed = pack(&values);
            let unpacked = unpack(&packed).unwrap();
            prop_assert_eq!(values.len(), unpacked.len());
            for (a, b) in values.iter().zip(&unpacked) {
                prop_assert!(a.same_element(b));
            }
        }

        #[test]
        fn prop_int_encoding_orders(a in any::<i64>(), b in any::<i64>()) {
            let lhs = pack(&[Value::Int(a)]);
            let rhs = pack(&[Value::Int(b)]);
            prop_assert_eq!(a.cmp(&b), lhs.cmp(&rhs));
        }

        #[test]
        fn prop_double_transform_orders(a in any::<f64>(), b in any::<f64>()) {
            prop_assume!(!a.is_nan() && !b.is_nan());
            let lhs = transform_double(a);
            let rhs = transform_double(b);
            prop_assert_eq!(a.partial_cmp(&b).unwrap(), lhs.cmp(&rhs));
        }
    }
}
