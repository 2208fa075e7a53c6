//! Hex text for digests. Rolls are ASCII, so every digest travels as hex.

use crate::error::{Result, RollError};

const LOWER: &[u8; 16] = b"0123456789abcdef";
const UPPER: &[u8; 16] = b"0123456789ABCDEF";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HexCase {
    Lower,
    #[default]
    Upper,
}

pub fn encode(bytes: &[u8], case: HexCase) -> String {
    let lut = match case {
        HexCase::Lower => LOWER,
        HexCase::Upper => UPPER,
    };
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push(lut[(b >> 4) as usize] as char);
        s.push(lut[(b & 0xF) as usize] as char);
    }
    s
}

pub fn encode_lower(bytes: &[u8]) -> String {
    encode(bytes, HexCase::Lower)
}

pub fn encode_upper(bytes: &[u8]) -> String {
    encode(bytes, HexCase::Upper)
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn decode_even(text: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() / 2);
    for pair in text.chunks_exact(2) {
        match (nibble(pair[0]), nibble(pair[1])) {
            (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
            _ => {
                return Err(RollError::InvalidEncoding(
                    "text must only contain hexadecimal characters and no whitespace".into(),
                ))
            }
        }
    }
    Ok(out)
}

/// Decode hex text (either case). Odd-length input is rejected.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(RollError::InvalidEncoding(format!("odd length {}", text.len())));
    }
    decode_even(text.as_bytes())
}

/// Legacy decode: odd-length input gets a zero nibble prepended, so `"abc"`
/// decodes like `"0abc"`.
pub fn decode_padded(text: &str) -> Result<Vec<u8>> {
    if text.len() % 2 == 0 {
        return decode_even(text.as_bytes());
    }
    let mut padded = Vec::with_capacity(text.len() + 1);
    padded.push(b'0');
    padded.extend_from_slice(text.as_bytes());
    decode_even(&padded)
}

/// Strictly decode a 32-byte digest.
pub fn decode_digest(text: &str) -> Result<[u8; 32]> {
    let bytes = decode(text)?;
    bytes.as_slice().try_into().map_err(|_| {
        RollError::InvalidEncoding(format!("digest must be 32 bytes, got {}", bytes.len()))
    })
}
