//! Payload encoding.
//!
//! A payload spec is either a hex literal (`0x` prefix, digits optionally
//! separated by spaces or hyphens) or free text sent as UTF-8.

use crate::error::{CoreError, Result};

/// Check whether `spec` will be decoded as a hex literal.
pub fn is_hex_literal(spec: &str) -> bool {
    spec.len() >= 2 && spec.as_bytes()[..2].eq_ignore_ascii_case(b"0x")
}

/// Encode a payload spec into bytes.
pub fn encode(spec: &str) -> Result<Vec<u8>> {
    if is_hex_literal(spec) {
        decode_hex(&spec[2..])
    } else {
        Ok(spec.as_bytes().to_vec())
    }
}

/// Decode hex digits into bytes, most significant nibble first.
///
/// Spaces and hyphens are ignored. A leading `0x` is stripped if present.
pub fn decode_hex(digits: &str) -> Result<Vec<u8>> {
    let digits = if is_hex_literal(digits) {
        &digits[2..]
    } else {
        digits
    };
    let cleaned: Vec<u8> = digits
        .bytes()
        .filter(|&b| b != b' ' && b != b'-')
        .collect();

    if cleaned.len() % 2 != 0 {
        return Err(CoreError::InvalidEncoding(format!(
            "odd number of hex digits ({})",
            cleaned.len()
        )));
    }

    cleaned
        .chunks_exact(2)
        .map(|pair| match (nibble(pair[0]), nibble(pair[1])) {
            (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
            _ => Err(CoreError::InvalidEncoding(format!(
                "non-hex characters {:?}",
                String::from_utf8_lossy(pair)
            ))),
        })
        .collect()
}

/// Render bytes as canonical uppercase hex, two digits per byte.
pub fn to_hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    push_hex(&mut out, bytes);
    out
}

/// Append the canonical hex tokens of `bytes` to `out`.
pub fn push_hex(out: &mut String, bytes: &[u8]) {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    for &b in bytes {
        out.push(DIGITS[usize::from(b >> 4)] as char);
        out.push(DIGITS[usize::from(b & 0x0F)] as char);
    }
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
