use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("register offset {offset} (+{words} words) outside response of {len} words")]
    OutOfRange {
        offset: usize,
        words: usize,
        len: usize,
    },
}

/// Order in which the two halves of a 32-bit value appear in the register buffer.
///
/// Controller firmware revisions disagree on this for fault and energy counters, so
/// it is chosen per register map instead of being guessed by the decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordOrder {
    /// High word at `offset`, low word at `offset + 1`.
    #[default]
    HighFirst,
    /// Low word at `offset`, high word at `offset + 1`.
    LowFirst,
}

fn words(buf: &[u16], offset: usize, count: usize) -> Result<&[u16], DecodeError> {
    offset
        .checked_add(count)
        .and_then(|end| buf.get(offset..end))
        .ok_or(DecodeError::OutOfRange {
            offset,
            words: count,
            len: buf.len(),
        })
}

fn word(buf: &[u16], offset: usize) -> Result<u16, DecodeError> {
    Ok(words(buf, offset, 1)?[0])
}

pub fn read_u16_be(buf: &[u16], offset: usize) -> Result<u16, DecodeError> {
    word(buf, offset)
}

pub fn read_i16_be(buf: &[u16], offset: usize) -> Result<i16, DecodeError> {
    Ok(word(buf, offset)? as i16)
}

pub fn read_u16_le(buf: &[u16], offset: usize) -> Result<u16, DecodeError> {
    Ok(word(buf, offset)?.swap_bytes())
}

pub fn read_i16_le(buf: &[u16], offset: usize) -> Result<i16, DecodeError> {
    Ok(read_u16_le(buf, offset)? as i16)
}

/// High byte of the word at `offset`.
pub fn read_u8_upper(buf: &[u16], offset: usize) -> Result<u8, DecodeError> {
    Ok((word(buf, offset)? >> 8) as u8)
}

/// Low byte of the word at `offset`.
pub fn read_u8_lower(buf: &[u16], offset: usize) -> Result<u8, DecodeError> {
    Ok((word(buf, offset)? & 0xFF) as u8)
}

pub fn read_i8_upper(buf: &[u16], offset: usize) -> Result<i8, DecodeError> {
    Ok(read_u8_upper(buf, offset)? as i8)
}

pub fn read_i8_lower(buf: &[u16], offset: usize) -> Result<i8, DecodeError> {
    Ok(read_u8_lower(buf, offset)? as i8)
}

pub fn read_u32_be(buf: &[u16], offset: usize) -> Result<u32, DecodeError> {
    let pair = words(buf, offset, 2)?;
    Ok((u32::from(pair[0]) << 16) | u32::from(pair[1]))
}

pub fn read_i32_be(buf: &[u16], offset: usize) -> Result<i32, DecodeError> {
    Ok(read_u32_be(buf, offset)? as i32)
}

/// Same two words as [`read_u32_be`], with all four bytes reversed.
pub fn read_u32_le(buf: &[u16], offset: usize) -> Result<u32, DecodeError> {
    Ok(read_u32_be(buf, offset)?.swap_bytes())
}

pub fn read_i32_le(buf: &[u16], offset: usize) -> Result<i32, DecodeError> {
    Ok(read_u32_le(buf, offset)? as i32)
}

/// Combine two words into a 32-bit value using the given word order.
pub fn read_u32(buf: &[u16], offset: usize, order: WordOrder) -> Result<u32, DecodeError> {
    let pair = words(buf, offset, 2)?;
    let (high, low) = match order {
        WordOrder::HighFirst => (pair[0], pair[1]),
        WordOrder::LowFirst => (pair[1], pair[0]),
    };
    Ok((u32::from(high) << 16) | u32::from(low))
}

pub fn read_i32(buf: &[u16], offset: usize, order: WordOrder) -> Result<i32, DecodeError> {
    Ok(read_u32(buf, offset, order)? as i32)
}

/// Two characters per word, upper byte first. Exactly `2 * count` characters are
/// returned; NUL padding is kept (see [`trim_device_string`]).
pub fn read_string(buf: &[u16], offset: usize, count: usize) -> Result<String, DecodeError> {
    let mut out = String::with_capacity(count * 2);
    for value in words(buf, offset, count)? {
        out.push(char::from((value >> 8) as u8));
        out.push(char::from((value & 0xFF) as u8));
    }
    Ok(out)
}

/// Strip NUL and space padding that controllers use to fill fixed-width strings.
pub fn trim_device_string(value: &str) -> &str {
    value.trim_matches(|ch: char| ch == '\0' || ch.is_ascii_whitespace())
}

/// Decode a sign-magnitude byte (bit 7 = sign, bits 0-6 = magnitude).
pub fn sign_magnitude(value: u8) -> i16 {
    let magnitude = i16::from(value & 0x7F);
    if value & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}
