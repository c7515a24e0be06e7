//! Solidity ABI helpers exposed to plugins through the capability bridge.
//!
//! Covers the subset of the contract ABI that game actions use: elementary
//! integer, address, bool and byte types, `string`/`bytes`, and arrays of any
//! of those. Tuples are not supported.

use serde_json::Value;
use sha3::{Digest, Keccak256};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while encoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("malformed signature: {0}")]
    Signature(String),

    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    #[error("expected {expected} values, got {got}")]
    ValueCount { expected: usize, got: usize },

    #[error("invalid value for {ty}: {reason}")]
    InvalidValue { ty: String, reason: String },
}

type Word = [u8; 32];

/// Largest fixed-array dimension accepted in a type name.
pub const MAX_FIXED_ARRAY_LEN: usize = 1 << 16;

/// An ABI parameter type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Uint(usize),
    Int(usize),
    Address,
    Bool,
    FixedBytes(usize),
    Bytes,
    String,
    Array(Box<ParamType>),
    FixedArray(Box<ParamType>, usize),
}

impl ParamType {
    /// Parse a type name such as `uint64`, `bytes24` or `address[]`.
    pub fn parse(name: &str) -> Result<Self, AbiError> {
        let name = name.trim();
        let unsupported = || AbiError::UnsupportedType(name.to_string());

        if let Some(stripped) = name.strip_suffix(']') {
            let open = stripped.rfind('[').ok_or_else(unsupported)?;
            let inner = Box::new(Self::parse(&stripped[..open])?);
            let dim = &stripped[open + 1..];
            if dim.is_empty() {
                return Ok(ParamType::Array(inner));
            }
            let len = dim.parse::<usize>().map_err(|_| unsupported())?;
            if len > MAX_FIXED_ARRAY_LEN {
                return Err(unsupported());
            }
            return Ok(ParamType::FixedArray(inner, len));
        }

        match name {
            "address" => return Ok(ParamType::Address),
            "bool" => return Ok(ParamType::Bool),
            "string" => return Ok(ParamType::String),
            "bytes" => return Ok(ParamType::Bytes),
            "uint" => return Ok(ParamType::Uint(256)),
            "int" => return Ok(ParamType::Int(256)),
            _ => {}
        }

        let sized = |digits: &str| digits.parse::<usize>().map_err(|_| unsupported());
        if let Some(bits) = name.strip_prefix("uint") {
            let bits = sized(bits)?;
            if bits == 0 || bits > 256 || bits % 8 != 0 {
                return Err(unsupported());
            }
            Ok(ParamType::Uint(bits))
        } else if let Some(bits) = name.strip_prefix("int") {
            let bits = sized(bits)?;
            if bits == 0 || bits > 256 || bits % 8 != 0 {
                return Err(unsupported());
            }
            Ok(ParamType::Int(bits))
        } else if let Some(len) = name.strip_prefix("bytes") {
            let len = sized(len)?;
            if len == 0 || len > 32 {
                return Err(unsupported());
            }
            Ok(ParamType::FixedBytes(len))
        } else {
            Err(unsupported())
        }
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            ParamType::Bytes | ParamType::String | ParamType::Array(_) => true,
            ParamType::FixedArray(inner, _) => inner.is_dynamic(),
            _ => false,
        }
    }

    /// Size of this type's slot in a tuple head.
    fn head_size(&self) -> Result<usize, AbiError> {
        match self {
            ParamType::FixedArray(inner, len) if !inner.is_dynamic() => inner
                .head_size()?
                .checked_mul(*len)
                .ok_or_else(|| AbiError::UnsupportedType(self.to_string())),
            _ => Ok(32),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Uint(bits) => write!(f, "uint{bits}"),
            ParamType::Int(bits) => write!(f, "int{bits}"),
            ParamType::Address => f.write_str("address"),
            ParamType::Bool => f.write_str("bool"),
            ParamType::FixedBytes(len) => write!(f, "bytes{len}"),
            ParamType::Bytes => f.write_str("bytes"),
            ParamType::String => f.write_str("string"),
            ParamType::Array(inner) => write!(f, "{inner}[]"),
            ParamType::FixedArray(inner, len) => write!(f, "{inner}[{len}]"),
        }
    }
}

/// A parsed human-readable function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    pub inputs: Vec<ParamType>,
}

impl FunctionSignature {
    /// Parse `function craft(bytes24 id, uint8 qty) external` or `craft(bytes24,uint8)`.
    pub fn parse(signature: &str) -> Result<Self, AbiError> {
        let malformed = || AbiError::Signature(signature.to_string());
        let text = signature.trim();
        let text = text.strip_prefix("function ").unwrap_or(text).trim_start();

        let open = text.find('(').ok_or_else(malformed)?;
        let name = text[..open].trim();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            return Err(malformed());
        }

        let mut depth = 0usize;
        let mut close = None;
        for (offset, c) in text[open..].char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(open + offset);
                        break;
                    }
                }
                _ => {}
            }
        }
        let close = close.ok_or_else(malformed)?;

        let inputs = split_params(&text[open + 1..close])
            .into_iter()
            .map(|param| {
                if param.starts_with('(') || param.starts_with("tuple") {
                    return Err(AbiError::UnsupportedType(param.to_string()));
                }
                let ty = param.split_whitespace().next().ok_or_else(malformed)?;
                ParamType::parse(ty)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.to_string(),
            inputs,
        })
    }

    /// Canonical form used for the selector, e.g. `transfer(address,uint256)`.
    pub fn canonical(&self) -> String {
        let inputs: Vec<String> = self.inputs.iter().map(ToString::to_string).collect();
        format!("{}({})", self.name, inputs.join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        let hash = keccak256(self.canonical().as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }
}

fn split_params(params: &str) -> Vec<&str> {
    if params.trim().is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(params[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(params[start..].trim());
    parts
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// `0x`-prefixed lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode a hex string with an optional `0x` prefix.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}"))
    } else {
        hex::decode(digits)
    }
}

/// Standard ABI encoding of `values` against `types`.
pub fn encode(types: &[ParamType], values: &[Value]) -> Result<Vec<u8>, AbiError> {
    if types.len() != values.len() {
        return Err(AbiError::ValueCount {
            expected: types.len(),
            got: values.len(),
        });
    }
    let mut head_size = 0usize;
    for ty in types {
        head_size = head_size
            .checked_add(ty.head_size()?)
            .ok_or_else(|| AbiError::UnsupportedType(ty.to_string()))?;
    }
    let mut head = Vec::new();
    let mut tail = Vec::new();

    for (ty, value) in types.iter().zip(values) {
        let encoded = encode_value(ty, value)?;
        if ty.is_dynamic() {
            head.extend_from_slice(&word_from_u64((head_size + tail.len()) as u64));
            tail.extend(encoded);
        } else {
            head.extend(encoded);
        }
    }
    head.extend(tail);
    Ok(head)
}

/// Selector followed by the encoded arguments.
pub fn encode_call(signature: &str, args: &[Value]) -> Result<Vec<u8>, AbiError> {
    let signature = FunctionSignature::parse(signature)?;
    let mut out = signature.selector().to_vec();
    out.extend(encode(&signature.inputs, args)?);
    Ok(out)
}

/// Non-standard packed encoding, as produced by `abi.encodePacked`.
pub fn encode_packed(types: &[ParamType], values: &[Value]) -> Result<Vec<u8>, AbiError> {
    if types.len() != values.len() {
        return Err(AbiError::ValueCount {
            expected: types.len(),
            got: values.len(),
        });
    }
    let mut out = Vec::new();
    for (ty, value) in types.iter().zip(values) {
        match ty {
            ParamType::Uint(bits) | ParamType::Int(bits) => {
                let word = encode_value(ty, value)?;
                out.extend_from_slice(&word[32 - bits / 8..]);
            }
            ParamType::Address => out.extend_from_slice(&encode_value(ty, value)?[12..]),
            ParamType::Bool => out.push(encode_value(ty, value)?[31]),
            ParamType::FixedBytes(len) => out.extend_from_slice(&encode_value(ty, value)?[..*len]),
            ParamType::Bytes => out.extend(hex_value(ty, value)?),
            ParamType::String => out.extend_from_slice(string_value(ty, value)?.as_bytes()),
            ParamType::Array(inner) | ParamType::FixedArray(inner, _) => {
                if inner.is_dynamic() {
                    return Err(AbiError::UnsupportedType(format!("packed {ty}")));
                }
                let items = array_value(ty, value)?;
                if let ParamType::FixedArray(_, len) = ty {
                    check_len(ty, *len, items.len())?;
                }
                for item in items {
                    out.extend(encode_value(inner, item)?);
                }
            }
        }
    }
    Ok(out)
}

fn encode_value(ty: &ParamType, value: &Value) -> Result<Vec<u8>, AbiError> {
    match ty {
        ParamType::Uint(bits) => Ok(uint_word(ty, value, *bits)?.to_vec()),
        ParamType::Int(bits) => Ok(int_word(ty, value, *bits)?.to_vec()),
        ParamType::Address => {
            let bytes = hex_value(ty, value)?;
            if bytes.len() != 20 {
                return Err(invalid(ty, "address must be 20 bytes"));
            }
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(&bytes);
            Ok(word.to_vec())
        }
        ParamType::Bool => {
            let flag = value.as_bool().ok_or_else(|| invalid(ty, "expected boolean"))?;
            Ok(word_from_u64(flag as u64).to_vec())
        }
        ParamType::FixedBytes(len) => {
            let bytes = hex_value(ty, value)?;
            check_len(ty, *len, bytes.len())?;
            let mut word = [0u8; 32];
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(word.to_vec())
        }
        ParamType::Bytes => Ok(length_prefixed(&hex_value(ty, value)?)),
        ParamType::String => Ok(length_prefixed(string_value(ty, value)?.as_bytes())),
        ParamType::Array(inner) => {
            let items = array_value(ty, value)?;
            let types = vec![(**inner).clone(); items.len()];
            let mut out = word_from_u64(items.len() as u64).to_vec();
            out.extend(encode(&types, items)?);
            Ok(out)
        }
        ParamType::FixedArray(inner, len) => {
            let items = array_value(ty, value)?;
            check_len(ty, *len, items.len())?;
            let types = vec![(**inner).clone(); items.len()];
            encode(&types, items)
        }
    }
}

fn invalid(ty: &ParamType, reason: impl Into<String>) -> AbiError {
    AbiError::InvalidValue {
        ty: ty.to_string(),
        reason: reason.into(),
    }
}

fn check_len(ty: &ParamType, expected: usize, got: usize) -> Result<(), AbiError> {
    if expected == got {
        Ok(())
    } else {
        Err(invalid(ty, format!("expected length {expected}, got {got}")))
    }
}

fn length_prefixed(bytes: &[u8]) -> Vec<u8> {
    let mut out = word_from_u64(bytes.len() as u64).to_vec();
    out.extend_from_slice(bytes);
    let padding = (32 - bytes.len() % 32) % 32;
    out.extend(std::iter::repeat_n(0u8, padding));
    out
}

fn string_value<'a>(ty: &ParamType, value: &'a Value) -> Result<&'a str, AbiError> {
    value.as_str().ok_or_else(|| invalid(ty, "expected string"))
}

fn hex_value(ty: &ParamType, value: &Value) -> Result<Vec<u8>, AbiError> {
    let text = string_value(ty, value)?;
    parse_hex(text).map_err(|e| invalid(ty, e.to_string()))
}

fn array_value<'a>(ty: &ParamType, value: &'a Value) -> Result<&'a [Value], AbiError> {
    match value {
        Value::Array(items) => Ok(items),
        // Lua cannot tell an empty list from an empty map
        Value::Object(map) if map.is_empty() => Ok(&[]),
        _ => Err(invalid(ty, "expected array")),
    }
}

fn word_from_u64(n: u64) -> Word {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&n.to_be_bytes());
    word
}

fn bit_length(word: &Word) -> usize {
    for (i, byte) in word.iter().enumerate() {
        if *byte != 0 {
            return (32 - i) * 8 - byte.leading_zeros() as usize;
        }
    }
    0
}

/// Two's complement negation in place.
fn negate(word: &mut Word) {
    let mut carry = true;
    for byte in word.iter_mut().rev() {
        let inverted = !*byte;
        let (sum, overflow) = inverted.overflowing_add(carry as u8);
        *byte = sum;
        carry = overflow;
    }
}

fn parse_decimal(ty: &ParamType, digits: &str) -> Result<Word, AbiError> {
    if digits.is_empty() {
        return Err(invalid(ty, "empty number"));
    }
    let mut word = [0u8; 32];
    for c in digits.chars() {
        let digit = c
            .to_digit(10)
            .ok_or_else(|| invalid(ty, format!("invalid digit '{c}'")))?;
        let mut carry = digit;
        for byte in word.iter_mut().rev() {
            let next = (*byte as u32) * 10 + carry;
            *byte = (next & 0xff) as u8;
            carry = next >> 8;
        }
        if carry != 0 {
            return Err(invalid(ty, "value exceeds 256 bits"));
        }
    }
    Ok(word)
}

/// Parse a JSON number or numeric string into `(negative, magnitude)`.
fn magnitude(ty: &ParamType, value: &Value) -> Result<(bool, Word), AbiError> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok((false, word_from_u64(u)))
            } else if let Some(i) = n.as_i64() {
                Ok((true, word_from_u64(i.unsigned_abs())))
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.fract() != 0.0 || f.abs() > 9_007_199_254_740_991.0 {
                    return Err(invalid(ty, format!("{f} is not a safe integer")));
                }
                Ok((f < 0.0, word_from_u64(f.abs() as u64)))
            }
        }
        Value::String(text) => {
            let text = text.trim();
            let (negative, unsigned) = match text.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, text),
            };
            let word = if unsigned.starts_with("0x") || unsigned.starts_with("0X") {
                let bytes = parse_hex(unsigned).map_err(|e| invalid(ty, e.to_string()))?;
                let significant: Vec<u8> = bytes.into_iter().skip_while(|b| *b == 0).collect();
                if significant.len() > 32 {
                    return Err(invalid(ty, "value exceeds 256 bits"));
                }
                let mut word = [0u8; 32];
                word[32 - significant.len()..].copy_from_slice(&significant);
                word
            } else {
                parse_decimal(ty, unsigned)?
            };
            Ok((negative && bit_length(&word) > 0, word))
        }
        _ => Err(invalid(ty, "expected number or numeric string")),
    }
}

fn uint_word(ty: &ParamType, value: &Value, bits: usize) -> Result<Word, AbiError> {
    let (negative, word) = magnitude(ty, value)?;
    if negative {
        return Err(invalid(ty, "negative value for unsigned type"));
    }
    if bit_length(&word) > bits {
        return Err(invalid(ty, "value out of range"));
    }
    Ok(word)
}

fn int_word(ty: &ParamType, value: &Value, bits: usize) -> Result<Word, AbiError> {
    let (negative, mut word) = magnitude(ty, value)?;
    let len = bit_length(&word);
    // -2^(bits-1) is the one magnitude that needs all `bits` bits
    let is_min = negative && len == bits && {
        let mut min = [0u8; 32];
        min[31 - (bits - 1) / 8] = 1 << ((bits - 1) % 8);
        min == word
    };
    if len > bits - 1 && !is_min {
        return Err(invalid(ty, "value out of range"));
    }
    if negative {
        negate(&mut word);
    }
    Ok(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hex_of(bytes: &[u8]) -> String {
        hex::encode(bytes)
    }

    #[test]
    fn test_keccak_empty() {
        assert_eq!(
            hex_of(&keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_selector_from_human_readable_signature() {
        let sig = FunctionSignature::parse("function transfer(address to, uint amount) external")
            .unwrap();
        assert_eq!(sig.canonical(), "transfer(address,uint256)");
        assert_eq!(hex_of(&sig.selector()), "a9059cbb");

        let sig = FunctionSignature::parse("balanceOf(address)").unwrap();
        assert_eq!(hex_of(&sig.selector()), "70a08231");
    }

    #[test]
    fn test_parse_types() {
        assert_eq!(ParamType::parse("bytes24").unwrap(), ParamType::FixedBytes(24));
        assert_eq!(
            ParamType::parse("uint64[3][]").unwrap(),
            ParamType::Array(Box::new(ParamType::FixedArray(
                Box::new(ParamType::Uint(64)),
                3
            )))
        );
        assert!(ParamType::parse("uint7").is_err());
        assert!(ParamType::parse("bytes33").is_err());
        assert!(ParamType::parse("mapping").is_err());
    }

    #[test]
    fn test_tuple_params_rejected() {
        let err = FunctionSignature::parse("f((uint8,bool) pair)").unwrap_err();
        assert!(matches!(err, AbiError::UnsupportedType(_)));
    }

    #[test]
    fn test_encode_call_static_args() {
        let data = encode_call(
            "transfer(address,uint256)",
            &[json!("0x00000000000000000000000000000000000000ff"), json!(1)],
        )
        .unwrap();
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(hex_of(&data[..4]), "a9059cbb");
        assert_eq!(data[4 + 31], 0xff);
        assert_eq!(data[4 + 63], 1);
    }

    #[test]
    fn test_encode_dynamic_string() {
        let data = encode(&[ParamType::Uint(8), ParamType::String], &[json!(7), json!("hello")])
            .unwrap();
        assert_eq!(data.len(), 32 * 4);
        assert_eq!(data[31], 7);
        // offset of the string body: two head slots
        assert_eq!(data[63], 0x40);
        assert_eq!(data[95], 5);
        assert_eq!(&data[96..101], b"hello");
        assert!(data[101..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_encode_dynamic_array_of_uints() {
        let data = encode(
            &[ParamType::Array(Box::new(ParamType::Uint(32)))],
            &[json!([1, 2, 3])],
        )
        .unwrap();
        // offset, length, three items
        assert_eq!(data.len(), 32 * 5);
        assert_eq!(data[31], 0x20);
        assert_eq!(data[63], 3);
        assert_eq!(data[159], 3);
    }

    #[test]
    fn test_empty_object_is_empty_array() {
        let data = encode(&[ParamType::Array(Box::new(ParamType::Bool))], &[json!({})]).unwrap();
        assert_eq!(data.len(), 64);
        assert_eq!(data[63], 0);
    }

    #[test]
    fn test_negative_int_twos_complement() {
        let data = encode(&[ParamType::Int(256)], &[json!(-1)]).unwrap();
        assert!(data.iter().all(|b| *b == 0xff));

        let data = encode(&[ParamType::Int(8)], &[json!("-128")]).unwrap();
        assert_eq!(data[31], 0x80);
        assert!(data[..31].iter().all(|b| *b == 0xff));

        assert!(encode(&[ParamType::Int(8)], &[json!(128)]).is_err());
        assert!(encode(&[ParamType::Int(8)], &[json!(-129)]).is_err());
    }

    #[test]
    fn test_uint_range_and_formats() {
        assert!(encode(&[ParamType::Uint(8)], &[json!(256)]).is_err());
        assert!(encode(&[ParamType::Uint(8)], &[json!(-1)]).is_err());

        let big = "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        let data = encode(&[ParamType::Uint(256)], &[json!(big)]).unwrap();
        assert!(data.iter().all(|b| *b == 0xff));

        let data = encode(&[ParamType::Uint(64)], &[json!("0x0102")]).unwrap();
        assert_eq!(&data[30..], &[1, 2]);

        assert!(encode(&[ParamType::Uint(256)], &[json!(format!("{big}0"))]).is_err());
    }

    #[test]
    fn test_fixed_bytes_exact_length() {
        let id = "0x34cf8a7e000000000000000000000000000000000000002a";
        let data = encode(&[ParamType::FixedBytes(24)], &[json!(id)]).unwrap();
        assert_eq!(hex_of(&data[..24]), &id[2..]);
        assert!(data[24..].iter().all(|b| *b == 0));

        assert!(encode(&[ParamType::FixedBytes(24)], &[json!("0x01")]).is_err());
    }

    #[test]
    fn test_value_count_mismatch() {
        let err = encode(&[ParamType::Bool], &[]).unwrap_err();
        assert_eq!(err, AbiError::ValueCount { expected: 1, got: 0 });
    }

    #[test]
    fn test_encode_packed() {
        let data = encode_packed(
            &[ParamType::Uint(16), ParamType::Bool, ParamType::String],
            &[json!(0x0102), json!(true), json!("ab")],
        )
        .unwrap();
        assert_eq!(data, vec![0x01, 0x02, 0x01, b'a', b'b']);
    }

    #[test]
    fn test_oversized_fixed_array_rejected() {
        for name in ["uint8[100000000000]", "uint8[1152921504606846976]", "bool[65537]"] {
            assert!(
                matches!(ParamType::parse(name), Err(AbiError::UnsupportedType(_))),
                "{name}"
            );
        }
        assert!(encode_call("f(uint8[1152921504606846976])", &[json!({})]).is_err());
        assert_eq!(
            ParamType::parse("bool[65536]").unwrap(),
            ParamType::FixedArray(Box::new(ParamType::Bool), MAX_FIXED_ARRAY_LEN)
        );
    }

    #[test]
    fn test_nested_fixed_array_head_overflow() {
        let ty = ParamType::parse("uint8[65536][65536][65536][65536]").unwrap();
        let err = encode(&[ty], &[json!({})]).unwrap_err();
        assert!(matches!(err, AbiError::UnsupportedType(_)));
    }

    #[test]
    fn test_fixed_array_inline_in_head() {
        let ty = ParamType::parse("uint8[2]").unwrap();
        let data = encode(&[ty, ParamType::Bool], &[json!([1, 2]), json!(true)]).unwrap();
        assert_eq!(data.len(), 96);
        assert_eq!(data[31], 1);
        assert_eq!(data[63], 2);
        assert_eq!(data[95], 1);
    }
}
