//! Script numbers.
//!
//! Numbers are little-endian sign-magnitude byte strings: the high bit of
//! the last byte is the sign. Zero is the empty string. A number is minimally
//! encoded when its last byte carries magnitude bits, or is a bare sign byte
//! needed because the preceding byte's high bit is set.

use crate::virtual_machine::errors::VmError;
use num_bigint::{BigInt, Sign};
use num_traits::{Signed, Zero};

const SIGN_BIT: u8 = 0x80;

/// Encodes `value` minimally.
pub fn encode(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }
    let mut bytes = value.magnitude().to_bytes_le();
    let negative = value.is_negative();
    let top = bytes.last().copied().unwrap_or(0);
    if top & SIGN_BIT != 0 {
        bytes.push(if negative { SIGN_BIT } else { 0 });
    } else if negative && let Some(last) = bytes.last_mut() {
        *last |= SIGN_BIT;
    }
    bytes
}

pub fn encode_i64(value: i64) -> Vec<u8> {
    encode(&BigInt::from(value))
}

/// Returns true if `bytes` is the shortest encoding of its value.
pub fn is_minimally_encoded(bytes: &[u8]) -> bool {
    match bytes {
        [] => true,
        [.., last] if last & !SIGN_BIT != 0 => true,
        [_] => false,
        [.., before, _] => before & SIGN_BIT != 0,
    }
}

/// Decodes a number without length or minimality checks.
pub fn decode_unchecked(bytes: &[u8]) -> BigInt {
    let Some((&last, _)) = bytes.split_last() else {
        return BigInt::zero();
    };
    let mut magnitude = bytes.to_vec();
    let negative = last & SIGN_BIT != 0;
    if let Some(top) = magnitude.last_mut() {
        *top &= !SIGN_BIT;
    }
    let sign = if negative { Sign::Minus } else { Sign::Plus };
    BigInt::from_bytes_le(sign, &magnitude)
}

/// Decodes a stack item as a number of at most `max_length` bytes.
pub fn decode(bytes: &[u8], max_length: usize, require_minimal: bool) -> Result<BigInt, VmError> {
    if bytes.len() > max_length {
        return Err(VmError::ExceededMaximumNumberLength {
            length: bytes.len(),
            limit: max_length,
        });
    }
    if require_minimal && !is_minimally_encoded(bytes) {
        return Err(VmError::NonMinimalNumber);
    }
    Ok(decode_unchecked(bytes))
}

/// Truthiness of a stack item: any non-zero byte, ignoring a trailing sign bit.
pub fn is_truthy(bytes: &[u8]) -> bool {
    match bytes.split_last() {
        None => false,
        Some((&last, rest)) => rest.iter().any(|&b| b != 0) || last & !SIGN_BIT != 0,
    }
}

/// Re-encodes an arbitrary byte string as a minimal number (`OP_BIN2NUM`).
pub fn minimize(bytes: &[u8]) -> Vec<u8> {
    encode(&decode_unchecked(bytes))
}

/// Pads a number to exactly `size` bytes, moving the sign bit to the last byte (`OP_NUM2BIN`).
pub fn pad(value: &BigInt, size: usize) -> Result<Vec<u8>, VmError> {
    if encode(value).len() > size {
        return Err(VmError::InsufficientLength { size });
    }
    let mut bytes = if value.is_zero() {
        Vec::new()
    } else {
        value.magnitude().to_bytes_le()
    };
    bytes.resize(size, 0);
    if value.is_negative()
        && let Some(last) = bytes.last_mut()
    {
        *last |= SIGN_BIT;
    }
    Ok(bytes)
}
