//! Fixed-width little-endian byte codecs and bit-field helpers.
//!
//! These routines back the length prefixes of the hash-to-field encoding and
//! the audit record format.  Every codec is fixed width: decoding never sign
//! extends implicitly, the only sign-extending helper is [`extend`].
//! Offsets are checked by slice indexing, so out-of-range offsets panic just
//! like any other slice access.

use crate::error::{P4pError, P4pResult};

/// Writes `value` as two little-endian bytes at `offset`.
pub fn bytes_from_short(array: &mut [u8], offset: usize, value: i16) {
    array[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Writes `value` as four little-endian bytes at `offset`.
pub fn bytes_from_int(array: &mut [u8], offset: usize, value: i32) {
    array[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Returns the four-byte little-endian encoding of `value`.
pub fn int_to_bytes(value: i32) -> [u8; 4] {
    let mut out = [0u8; 4];
    bytes_from_int(&mut out, 0, value);
    out
}

/// Writes the low `length` bytes of `value` (1, 2 or 4) at `offset`.
pub fn bytes_from_int_len(
    array: &mut [u8],
    offset: usize,
    length: usize,
    value: i32,
) -> P4pResult<()> {
    match length {
        1 => array[offset] = value as u8,
        2 => bytes_from_short(array, offset, value as i16),
        4 => bytes_from_int(array, offset, value),
        other => {
            return Err(P4pError::InvalidParameter(format!(
                "byte length must be 1, 2 or 4, got {other}"
            )))
        }
    }
    Ok(())
}

/// Writes `value` as eight little-endian bytes at `offset`.
pub fn bytes_from_long(array: &mut [u8], offset: usize, value: i64) {
    array[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Reads a little-endian `i16` at `offset`.
pub fn bytes_to_short(array: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([array[offset], array[offset + 1]])
}

/// Reads a little-endian `u16` at `offset`.
pub fn bytes_to_unsigned_short(array: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([array[offset], array[offset + 1]])
}

/// Reads a little-endian `i32` at `offset`.
pub fn bytes_to_int(array: &[u8], offset: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&array[offset..offset + 4]);
    i32::from_le_bytes(raw)
}

/// Reads a `length`-byte little-endian integer (1, 2 or 4) at `offset`.
///
/// One- and two-byte values are zero extended; use [`extend`] on the result
/// when a signed interpretation is wanted.
pub fn bytes_to_int_len(array: &[u8], offset: usize, length: usize) -> P4pResult<i32> {
    match length {
        1 => Ok(i32::from(array[offset])),
        2 => Ok(i32::from(bytes_to_unsigned_short(array, offset))),
        4 => Ok(bytes_to_int(array, offset)),
        other => Err(P4pError::InvalidParameter(format!(
            "byte length must be 1, 2 or 4, got {other}"
        ))),
    }
}

/// Reads a little-endian `i64` at `offset`.
pub fn bytes_to_long(array: &[u8], offset: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&array[offset..offset + 8]);
    i64::from_le_bytes(raw)
}

/// Decodes at most `length` bytes as text, stopping at the first NUL byte.
pub fn bytes_to_string(array: &[u8], offset: usize, length: usize) -> String {
    let window = &array[offset..offset + length];
    let end = window.iter().position(|&b| b == 0).unwrap_or(length);
    String::from_utf8_lossy(&window[..end]).into_owned()
}

/// Masks out the `size`-bit substring of `bits` starting at bit `lowest`.
pub fn extract(bits: i32, lowest: u32, size: u32) -> i32 {
    if size >= 32 {
        bits >> lowest
    } else {
        (bits >> lowest) & ((1u32 << size) - 1) as i32
    }
}

/// 64-bit variant of [`extract`].
pub fn extract_long(bits: i64, lowest: u32, size: u32) -> i64 {
    if size >= 64 {
        bits >> lowest
    } else {
        (bits >> lowest) & ((1u64 << size) - 1) as i64
    }
}

/// Extracts a bit substring like [`extract`] and sign extends it.
///
/// # Panics
///
/// Panics if `size` is zero or `lowest + size` exceeds 32.
pub fn extend(bits: i32, lowest: u32, size: u32) -> i32 {
    assert!(size >= 1 && lowest + size <= 32, "bit field out of range");
    let shift = 32 - size;
    (extract(bits, lowest, size) << shift) >> shift
}

/// Returns `true` when any bit of `flag` is set in `bits`.
pub fn test_flag(flag: i64, bits: i64) -> bool {
    bits & flag != 0
}

/// Upper-case hexadecimal rendering of `value` padded to eight digits.
pub fn to_hex_string(value: i32) -> String {
    to_hex_string_padded(value, 8)
}

/// Upper-case hexadecimal rendering of `value` padded to at least `pad` digits.
pub fn to_hex_string_padded(value: i32, pad: usize) -> String {
    format!("{:0pad$X}", value as u32, pad = pad)
}

/// Divides two non-negative integers rounding the quotient up.
///
/// # Panics
///
/// Panics if `b` is zero.
pub fn div_round_up(a: usize, b: usize) -> usize {
    assert!(b > 0, "divisor must be positive");
    (a + (b - 1)) / b
}
