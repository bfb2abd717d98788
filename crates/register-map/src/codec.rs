//! Raw word <-> typed value conversion honoring configured byte/word order.

use thiserror::Error;

use types::{RawValue, Reading};

use crate::{ByteOrder, DataType, Encoding, RegisterDef, WordOrder};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{data_type} needs {expected} register(s), got {got}")]
    WordCount {
        data_type: DataType,
        expected: u16,
        got: usize,
    },
    #[error("{0} is a bit type; decode it from a coil or discrete input")]
    BitType(DataType),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{0} cannot be written through the register path")]
    NotRegisterType(DataType),
    #[error("value {value} out of range for {data_type}")]
    OutOfRange { data_type: DataType, value: f64 },
    #[error("value {0} is not finite")]
    NotFinite(f64),
}

/// Decode register words into a raw typed value.
pub fn decode_words(
    data_type: DataType,
    encoding: Encoding,
    words: &[u16],
) -> Result<RawValue, DecodeError> {
    if data_type.is_bit() {
        return Err(DecodeError::BitType(data_type));
    }
    let expected = data_type.word_count();
    if words.len() != usize::from(expected) {
        return Err(DecodeError::WordCount {
            data_type,
            expected,
            got: words.len(),
        });
    }

    match data_type {
        DataType::Int16 => Ok(RawValue::I16(word_in(words[0], encoding) as i16)),
        DataType::Uint16 => Ok(RawValue::U16(word_in(words[0], encoding))),
        DataType::Int32 => Ok(RawValue::I32(combine(words, encoding) as i32)),
        DataType::Uint32 => Ok(RawValue::U32(combine(words, encoding))),
        DataType::Float32 => Ok(RawValue::F32(f32::from_bits(combine(words, encoding)))),
        DataType::Bool => unreachable!("bit types handled above"),
    }
}

/// Decode a single coil/discrete input bit.
pub fn decode_bit(bit: bool) -> RawValue {
    RawValue::Bool(bit)
}

/// Apply scale/offset and precision rounding; non-finite results become
/// unavailable, matching how the poll loop treats glitched float reads.
pub fn scale_reading(def: &RegisterDef, raw: RawValue) -> Option<Reading> {
    if let RawValue::Bool(bit) = raw {
        return Some(Reading::Bool(bit));
    }

    let mut value = raw.as_f64();
    if let Some(scale) = def.scale {
        value *= scale;
    }
    if let Some(offset) = def.offset {
        value += offset;
    }
    if !value.is_finite() {
        return None;
    }
    if let Some(precision) = def.precision {
        value = round_to(value, precision);
    }
    Some(Reading::Number(value))
}

/// Inverse of the scale/offset transform, applied before encoding a write.
pub fn raw_from_scaled(def: &RegisterDef, value: f64) -> f64 {
    let mut raw = value;
    if let Some(offset) = def.offset {
        raw -= offset;
    }
    if let Some(scale) = def.scale {
        raw /= scale;
    }
    raw
}

/// Encode a raw numeric value into register words for a write.
pub fn encode_words(
    data_type: DataType,
    encoding: Encoding,
    value: f64,
) -> Result<Vec<u16>, EncodeError> {
    if !value.is_finite() {
        return Err(EncodeError::NotFinite(value));
    }

    match data_type {
        DataType::Bool => Err(EncodeError::NotRegisterType(data_type)),
        DataType::Int16 => {
            let raw = checked_int(data_type, value, f64::from(i16::MIN), f64::from(i16::MAX))?;
            Ok(vec![word_out(raw as i16 as u16, encoding)])
        }
        DataType::Uint16 => {
            let raw = checked_int(data_type, value, 0.0, f64::from(u16::MAX))?;
            Ok(vec![word_out(raw as u16, encoding)])
        }
        DataType::Int32 => {
            let raw = checked_int(data_type, value, f64::from(i32::MIN), f64::from(i32::MAX))?;
            Ok(split(raw as i32 as u32, encoding))
        }
        DataType::Uint32 => {
            let raw = checked_int(data_type, value, 0.0, f64::from(u32::MAX))?;
            Ok(split(raw as u32, encoding))
        }
        DataType::Float32 => Ok(split((value as f32).to_bits(), encoding)),
    }
}

fn checked_int(data_type: DataType, value: f64, min: f64, max: f64) -> Result<f64, EncodeError> {
    let rounded = value.round();
    if rounded < min || rounded > max {
        return Err(EncodeError::OutOfRange { data_type, value });
    }
    Ok(rounded)
}

fn round_to(value: f64, precision: u8) -> f64 {
    let factor = 10f64.powi(i32::from(precision));
    (value * factor).round() / factor
}

fn word_in(word: u16, encoding: Encoding) -> u16 {
    match encoding.byte_order {
        ByteOrder::Big => word,
        ByteOrder::Little => word.swap_bytes(),
    }
}

fn word_out(word: u16, encoding: Encoding) -> u16 {
    // Byte swapping is its own inverse.
    word_in(word, encoding)
}

fn combine(words: &[u16], encoding: Encoding) -> u32 {
    let (hi, lo) = match encoding.word_order {
        WordOrder::Big => (words[0], words[1]),
        WordOrder::Little => (words[1], words[0]),
    };
    (u32::from(word_in(hi, encoding)) << 16) | u32::from(word_in(lo, encoding))
}

fn split(value: u32, encoding: Encoding) -> Vec<u16> {
    let hi = word_out((value >> 16) as u16, encoding);
    let lo = word_out(value as u16, encoding);
    match encoding.word_order {
        WordOrder::Big => vec![hi, lo],
        WordOrder::Little => vec![lo, hi],
    }
}
