//! Bit-level accessor over a byte buffer.
//!
//! Every access takes an absolute **bit** offset plus an [`Access`] describing the
//! stored type (width, signedness, endianness, optional bit window, optional BCD).
//! Endianness is a per-call parameter: a single save file routinely mixes big- and
//! little-endian regions.
//!
//! Integer containers are read with `byteorder` and then narrowed:
//!
//! | Type | Width | Alignment |
//! |------|-------|-----------|
//! | `uint8`..`int64`, `uint24`/`int24` | 8..64 bits | byte |
//! | `float32` | 32 bits | byte |
//! | `bit` | 1 bit | any bit (bit 0 = least significant) |
//! | `lowerNibble` / `upperNibble` | 4 bits | byte |
//!
//! Writes never touch bits outside the declared width or window, and every bound is
//! checked before the buffer is mutated.

use crate::error::{Error, Result};
use crate::value::Value;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Byte order for multi-byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Big,
    #[default]
    Little,
}

/// Stored representation of a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    #[default]
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint24,
    Int24,
    Uint32,
    Int32,
    Uint64,
    Int64,
    Float32,
    Bit,
    LowerNibble,
    UpperNibble,
}

impl DataType {
    /// Width of the stored value in bits.
    pub fn bits(self) -> u32 {
        match self {
            DataType::Uint8 | DataType::Int8 => 8,
            DataType::Uint16 | DataType::Int16 => 16,
            DataType::Uint24 | DataType::Int24 => 24,
            DataType::Uint32 | DataType::Int32 | DataType::Float32 => 32,
            DataType::Uint64 | DataType::Int64 => 64,
            DataType::Bit => 1,
            DataType::LowerNibble | DataType::UpperNibble => 4,
        }
    }

    /// Bytes touched by one access.
    pub fn bytes(self) -> usize {
        match self {
            DataType::Bit | DataType::LowerNibble | DataType::UpperNibble => 1,
            other => (other.bits() / 8) as usize,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int24 | DataType::Int32 | DataType::Int64
        )
    }

    /// Whole-byte integer container (window and BCD apply).
    pub fn is_byte_integer(self) -> bool {
        !matches!(
            self,
            DataType::Float32 | DataType::Bit | DataType::LowerNibble | DataType::UpperNibble
        )
    }
}

/// Sub-field inside an integer container: `length` bits starting at bit `start`
/// (bit 0 = least significant bit of the container value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitWindow {
    pub start: u8,
    pub length: u8,
}

/// How a numeric field is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Access {
    pub data_type: DataType,
    pub endian: Endianness,
    pub window: Option<BitWindow>,
    pub bcd: bool,
}

impl Access {
    pub fn new(data_type: DataType, endian: Endianness) -> Self {
        Access { data_type, endian, window: None, bcd: false }
    }

    pub fn with_window(mut self, window: BitWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_bcd(mut self) -> Self {
        self.bcd = true;
        self
    }

    /// Effective value width in bits after the window is applied.
    pub fn value_bits(&self) -> u32 {
        match self.window {
            Some(w) => w.length as u32,
            None => self.data_type.bits(),
        }
    }
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn out_of_range(bit_offset: i64, bits: u32, buffer_len: usize) -> Error {
    Error::AddressOutOfRange { bit_offset, bits, buffer_len }
}

/// Byte span checked against the buffer; returns the start byte.
fn checked_span(data_len: usize, bit_offset: i64, bytes: usize, bits: u32) -> Result<usize> {
    if bit_offset < 0 {
        return Err(out_of_range(bit_offset, bits, data_len));
    }
    let byte = (bit_offset / 8) as usize;
    match byte.checked_add(bytes) {
        Some(end) if end <= data_len => Ok(byte),
        _ => Err(out_of_range(bit_offset, bits, data_len)),
    }
}

fn ensure_aligned(bit_offset: i64, data_type: DataType) -> Result<()> {
    if data_type != DataType::Bit && bit_offset % 8 != 0 {
        return Err(Error::Schema(format!(
            "{:?} access at bit offset {} is not byte-aligned",
            data_type, bit_offset
        )));
    }
    Ok(())
}

/// Read `len` bytes (1..=8) at `pos` as an unsigned integer.
pub fn read_uint(data: &[u8], pos: usize, len: usize, endian: Endianness) -> Result<u64> {
    if len == 0 || len > 8 || pos.checked_add(len).map_or(true, |end| end > data.len()) {
        return Err(out_of_range(pos as i64 * 8, len as u32 * 8, data.len()));
    }
    let buf = &data[pos..pos + len];
    Ok(match endian {
        Endianness::Big => BigEndian::read_uint(buf, len),
        Endianness::Little => LittleEndian::read_uint(buf, len),
    })
}

/// Write `value` as a `len`-byte (1..=8) unsigned integer at `pos`.
pub fn write_uint(data: &mut [u8], pos: usize, len: usize, value: u64, endian: Endianness) -> Result<()> {
    if len == 0 || len > 8 || pos.checked_add(len).map_or(true, |end| end > data.len()) {
        return Err(out_of_range(pos as i64 * 8, len as u32 * 8, data.len()));
    }
    let value = value & mask(len as u32 * 8);
    let buf = &mut data[pos..pos + len];
    match endian {
        Endianness::Big => BigEndian::write_uint(buf, value, len),
        Endianness::Little => LittleEndian::write_uint(buf, value, len),
    }
    Ok(())
}

/// Read the raw (unsigned, unextended) field bits.
pub fn read_bits(data: &[u8], bit_offset: i64, access: &Access) -> Result<u64> {
    let dt = access.data_type;
    let byte = checked_span(data.len(), bit_offset, dt.bytes(), dt.bits())?;
    ensure_aligned(bit_offset, dt)?;
    let raw = match dt {
        DataType::Bit => ((data[byte] >> (bit_offset % 8) as u8) & 1) as u64,
        DataType::LowerNibble => (data[byte] & 0x0f) as u64,
        DataType::UpperNibble => (data[byte] >> 4) as u64,
        _ => read_uint(data, byte, dt.bytes(), access.endian)?,
    };
    Ok(match access.window {
        Some(w) => (raw >> w.start) & mask(w.length as u32),
        None => raw,
    })
}

/// Write raw field bits, preserving every bit outside the field.
pub fn write_bits(data: &mut [u8], bit_offset: i64, access: &Access, raw: u64) -> Result<()> {
    let dt = access.data_type;
    let byte = checked_span(data.len(), bit_offset, dt.bytes(), dt.bits())?;
    ensure_aligned(bit_offset, dt)?;
    let bits = access.value_bits();
    if raw & !mask(bits) != 0 {
        return Err(Error::InvalidWriteValue(format!(
            "raw value {:#x} does not fit in {} bits",
            raw, bits
        )));
    }
    match dt {
        DataType::Bit => {
            let bit = (bit_offset % 8) as u8;
            data[byte] = (data[byte] & !(1 << bit)) | ((raw as u8) << bit);
        }
        DataType::LowerNibble => data[byte] = (data[byte] & 0xf0) | raw as u8,
        DataType::UpperNibble => data[byte] = (data[byte] & 0x0f) | ((raw as u8) << 4),
        _ => {
            let container = match access.window {
                Some(w) => {
                    let current = read_uint(data, byte, dt.bytes(), access.endian)?;
                    let field_mask = mask(w.length as u32) << w.start;
                    (current & !field_mask) | (raw << w.start)
                }
                None => raw,
            };
            write_uint(data, byte, dt.bytes(), container, access.endian)?;
        }
    }
    Ok(())
}

/// Decode `digits` BCD nibbles (most significant first).
pub fn bcd_decode(raw: u64, digits: u32, byte_offset: usize) -> Result<u64> {
    let mut out = 0u64;
    for i in (0..digits).rev() {
        let digit = ((raw >> (i * 4)) & 0xf) as u8;
        if digit > 9 {
            return Err(Error::InvalidBcd { digit, byte_offset });
        }
        out = out * 10 + digit as u64;
    }
    Ok(out)
}

/// Encode `value` into `digits` BCD nibbles; rejects values needing more digits.
pub fn bcd_encode(value: u64, digits: u32) -> Result<u64> {
    let mut rest = value;
    let mut raw = 0u64;
    for i in 0..digits {
        raw |= (rest % 10) << (i * 4);
        rest /= 10;
    }
    if rest != 0 {
        return Err(Error::InvalidWriteValue(format!(
            "{} does not fit in {} BCD digit(s)",
            value, digits
        )));
    }
    Ok(raw)
}

/// Turn raw field bits into a value (sign extension, float, BCD).
pub fn decode_value(raw: u64, access: &Access, byte_offset: usize) -> Result<Value> {
    let bits = access.value_bits();
    if access.data_type == DataType::Float32 {
        return Ok(Value::Float(f32::from_bits(raw as u32) as f64));
    }
    if access.bcd {
        return Ok(Value::UInt(bcd_decode(raw, bits / 4, byte_offset)?));
    }
    if access.data_type.is_signed() && bits > 0 {
        let shift = 64 - bits;
        return Ok(Value::Int(((raw << shift) as i64) >> shift));
    }
    Ok(Value::UInt(raw))
}

/// Turn a value into raw field bits, rejecting anything not representable.
pub fn encode_value(value: &Value, access: &Access) -> Result<u64> {
    let bits = access.value_bits();
    if access.data_type == DataType::Float32 {
        let v = value
            .as_f64()
            .ok_or_else(|| Error::TypeMismatch(format!("float32 field got {}", value.kind())))?;
        return Ok((v as f32).to_bits() as u64);
    }
    if access.bcd {
        let v = value.as_u64().ok_or_else(|| {
            Error::InvalidWriteValue(format!("BCD field needs a non-negative integer, got {:?}", value))
        })?;
        return bcd_encode(v, bits / 4);
    }
    if access.data_type.is_signed() {
        let v = value
            .as_i64()
            .ok_or_else(|| Error::InvalidWriteValue(format!("expected integer, got {:?}", value)))?;
        let (min, max) = if bits >= 64 {
            (i64::MIN, i64::MAX)
        } else {
            (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
        };
        if v < min || v > max {
            return Err(Error::InvalidWriteValue(format!(
                "{} outside signed {}-bit range {}..={}",
                v, bits, min, max
            )));
        }
        return Ok((v as u64) & mask(bits));
    }
    let v = value
        .as_u64()
        .ok_or_else(|| Error::InvalidWriteValue(format!("expected unsigned integer, got {:?}", value)))?;
    if v > mask(bits) {
        return Err(Error::InvalidWriteValue(format!(
            "{} exceeds unsigned {}-bit maximum {}",
            v,
            bits,
            mask(bits)
        )));
    }
    Ok(v)
}

/// Read a typed value at an absolute bit offset.
pub fn read(data: &[u8], bit_offset: i64, access: &Access) -> Result<Value> {
    let raw = read_bits(data, bit_offset, access)?;
    decode_value(raw, access, (bit_offset / 8) as usize)
}

/// Write a typed value at an absolute bit offset.
pub fn write(data: &mut [u8], bit_offset: i64, access: &Access, value: &Value) -> Result<()> {
    let raw = encode_value(value, access)?;
    write_bits(data, bit_offset, access, raw)
}

/// Layout of a fixed-width character string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringAccess {
    /// Number of code units.
    pub length: usize,
    /// Bytes per code unit (1..=4).
    pub char_width: u8,
    pub endian: Endianness,
    pub terminator: Option<u32>,
    pub fallback: Option<char>,
}

/// Bytes and bits covered by a string field.
fn string_span(access: &StringAccess) -> (usize, u32) {
    let bytes = access.length.saturating_mul(access.char_width as usize);
    (bytes, u32::try_from(bytes.saturating_mul(8)).unwrap_or(u32::MAX))
}

/// Code-to-text table for game-specific character sets.
pub type CharTable = BTreeMap<u64, String>;

/// Read a string of `access.length` code units starting at `byte_offset`.
pub fn read_string(
    data: &[u8],
    byte_offset: i64,
    access: &StringAccess,
    table: Option<&CharTable>,
) -> Result<String> {
    let width = access.char_width as usize;
    let (bytes, total_bits) = string_span(access);
    let start = checked_span(data.len(), byte_offset.saturating_mul(8), bytes, total_bits)?;
    let fallback = access.fallback.unwrap_or('?');
    let mut out = String::new();
    for i in 0..access.length {
        let code = read_uint(data, start + i * width, width, access.endian)?;
        if access.terminator.map(u64::from) == Some(code) {
            break;
        }
        match table {
            Some(t) => match t.get(&code) {
                Some(text) => out.push_str(text),
                None => out.push(fallback),
            },
            None => out.push(char::from_u32(code as u32).unwrap_or(fallback)),
        }
    }
    Ok(out)
}

fn encode_char_codes(text: &str, access: &StringAccess, table: Option<&CharTable>) -> Result<Vec<u64>> {
    let mut codes = Vec::new();
    match table {
        Some(t) => {
            let mut labels: Vec<(&str, u64)> = t.iter().map(|(c, s)| (s.as_str(), *c)).collect();
            labels.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
            let fallback_code = access
                .fallback
                .and_then(|f| labels.iter().find(|(s, _)| s.chars().eq(std::iter::once(f))).map(|(_, c)| *c));
            let mut rest = text;
            while let Some(ch) = rest.chars().next() {
                match labels.iter().find(|(s, _)| !s.is_empty() && rest.starts_with(*s)) {
                    Some((s, code)) => {
                        codes.push(*code);
                        rest = &rest[s.len()..];
                    }
                    None => {
                        let code = fallback_code.ok_or_else(|| {
                            Error::InvalidWriteValue(format!("character {:?} not in character table", ch))
                        })?;
                        codes.push(code);
                        rest = &rest[ch.len_utf8()..];
                    }
                }
            }
        }
        None => {
            let limit = mask(access.char_width as u32 * 8);
            for ch in text.chars() {
                let code = ch as u64;
                if code > limit {
                    let replacement = access.fallback.map(|f| f as u64).filter(|c| *c <= limit);
                    codes.push(replacement.ok_or_else(|| {
                        Error::InvalidWriteValue(format!(
                            "character {:?} does not fit in {} byte(s)",
                            ch, access.char_width
                        ))
                    })?);
                } else {
                    codes.push(code);
                }
            }
        }
    }
    Ok(codes)
}

/// Write a string, padding the remaining code units with the terminator (or 0).
pub fn write_string(
    data: &mut [u8],
    byte_offset: i64,
    access: &StringAccess,
    table: Option<&CharTable>,
    text: &str,
) -> Result<()> {
    let width = access.char_width as usize;
    let (bytes, total_bits) = string_span(access);
    let start = checked_span(data.len(), byte_offset.saturating_mul(8), bytes, total_bits)?;
    let codes = encode_char_codes(text, access, table)?;
    if codes.len() > access.length {
        return Err(Error::InvalidWriteValue(format!(
            "string of {} characters exceeds field length {}",
            codes.len(),
            access.length
        )));
    }
    let pad = access.terminator.map(u64::from).unwrap_or(0);
    for i in 0..access.length {
        let code = codes.get(i).copied().unwrap_or(pad);
        write_uint(data, start + i * width, width, code, access.endian)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint24_both_endians() {
        let data = [0x01, 0x02, 0x03];
        let be = read(&data, 0, &Access::new(DataType::Uint24, Endianness::Big)).unwrap();
        let le = read(&data, 0, &Access::new(DataType::Uint24, Endianness::Little)).unwrap();
        assert_eq!(be, Value::UInt(0x010203));
        assert_eq!(le, Value::UInt(0x030201));
    }

    #[test]
    fn window_write_preserves_neighbours() {
        let mut data = [0b1010_1010u8];
        let access = Access::new(DataType::Uint8, Endianness::Little).with_window(BitWindow { start: 2, length: 3 });
        write(&mut data, 0, &access, &Value::UInt(0b111)).unwrap();
        assert_eq!(data[0], 0b1011_1110);
        assert_eq!(read(&data, 0, &access).unwrap(), Value::UInt(0b111));
        assert!(write(&mut data, 0, &access, &Value::UInt(8)).is_err());
        assert_eq!(data[0], 0b1011_1110);
    }

    #[test]
    fn signed_window_sign_extends() {
        let data = [0b0001_1100u8];
        let access = Access::new(DataType::Int8, Endianness::Little).with_window(BitWindow { start: 2, length: 3 });
        assert_eq!(read(&data, 0, &access).unwrap(), Value::Int(-1));
    }

    #[test]
    fn single_bit_and_nibbles() {
        let mut data = [0u8; 2];
        let bit = Access::new(DataType::Bit, Endianness::Little);
        write(&mut data, 8 + 5, &bit, &Value::UInt(1)).unwrap();
        assert_eq!(data, [0, 0x20]);
        let upper = Access::new(DataType::UpperNibble, Endianness::Little);
        let lower = Access::new(DataType::LowerNibble, Endianness::Little);
        write(&mut data, 0, &upper, &Value::UInt(0xa)).unwrap();
        write(&mut data, 0, &lower, &Value::UInt(0x5)).unwrap();
        assert_eq!(data[0], 0xa5);
        assert_eq!(read(&data, 8 + 5, &bit).unwrap(), Value::UInt(1));
    }

    #[test]
    fn bcd_one_byte_bounds() {
        let mut data = [0u8];
        let access = Access::new(DataType::Uint8, Endianness::Little).with_bcd();
        for v in 0..100u64 {
            write(&mut data, 0, &access, &Value::UInt(v)).unwrap();
            assert!(data[0] >> 4 <= 9 && data[0] & 0xf <= 9);
            assert_eq!(read(&data, 0, &access).unwrap(), Value::UInt(v));
        }
        let before = data[0];
        assert!(matches!(write(&mut data, 0, &access, &Value::UInt(100)), Err(Error::InvalidWriteValue(_))));
        assert_eq!(data[0], before);
    }

    #[test]
    fn bcd_rejects_stored_hex_digit() {
        let data = [0x1a];
        let access = Access::new(DataType::Uint8, Endianness::Little).with_bcd();
        assert!(matches!(read(&data, 0, &access), Err(Error::InvalidBcd { digit: 0xa, .. })));
    }

    const ALL_TYPES: [DataType; 14] = [
        DataType::Uint8,
        DataType::Int8,
        DataType::Uint16,
        DataType::Int16,
        DataType::Uint24,
        DataType::Int24,
        DataType::Uint32,
        DataType::Int32,
        DataType::Uint64,
        DataType::Int64,
        DataType::Float32,
        DataType::Bit,
        DataType::LowerNibble,
        DataType::UpperNibble,
    ];

    fn extremes(access: &Access) -> Vec<Value> {
        let bits = access.value_bits();
        if access.data_type == DataType::Float32 {
            return vec![Value::Float(f32::MIN as f64), Value::Float(f32::MAX as f64), Value::Float(1.5)];
        }
        if access.data_type.is_signed() {
            let (min, max) = if bits >= 64 {
                (i64::MIN, i64::MAX)
            } else {
                (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
            };
            return vec![Value::Int(min), Value::Int(max), Value::Int(max / 3), Value::Int(-1)];
        }
        vec![Value::UInt(0), Value::UInt(mask(bits)), Value::UInt(mask(bits) / 3)]
    }

    #[test]
    fn every_type_and_endianness_round_trips() {
        for dt in ALL_TYPES {
            for endian in [Endianness::Big, Endianness::Little] {
                let mut accesses = vec![Access::new(dt, endian)];
                if dt.is_byte_integer() {
                    let bits = dt.bits() as u8;
                    accesses.push(Access::new(dt, endian).with_window(BitWindow { start: bits / 4, length: bits / 2 }));
                }
                let bit_offset = if dt == DataType::Bit { 8 + 3 } else { 8 };
                for access in accesses {
                    for value in extremes(&access) {
                        let mut data = [0xa5u8; 10];
                        write(&mut data, bit_offset, &access, &value).unwrap();
                        assert_eq!(read(&data, bit_offset, &access).unwrap(), value, "{:?} {:?}", access, value);
                        assert_eq!(data[0], 0xa5, "{:?} touched the byte before", access);
                        assert!(data[1 + dt.bytes()..].iter().all(|b| *b == 0xa5), "{:?} touched the bytes after", access);

                        let container = read_uint(&data, 1, dt.bytes(), endian).unwrap();
                        let untouched = !match (dt, access.window) {
                            (_, Some(w)) => mask(w.length as u32) << w.start,
                            (DataType::Bit, None) => 1 << 3,
                            (DataType::LowerNibble, None) => 0x0f,
                            (DataType::UpperNibble, None) => 0xf0,
                            _ => mask(dt.bits()),
                        } & mask(dt.bits());
                        let before = read_uint(&[0xa5u8; 8], 0, dt.bytes(), endian).unwrap();
                        assert_eq!(container & untouched, before & untouched, "{:?} {:?}", access, value);
                    }
                }
            }
        }
    }

    #[test]
    fn out_of_range_is_reported() {
        let data = [0u8; 3];
        let access = Access::new(DataType::Uint32, Endianness::Big);
        assert!(matches!(read(&data, 0, &access), Err(Error::AddressOutOfRange { .. })));
        assert!(matches!(read(&data, -8, &access), Err(Error::AddressOutOfRange { .. })));
    }

    #[test]
    fn string_terminator_and_padding() {
        let mut data = [0xffu8; 6];
        let access = StringAccess {
            length: 6,
            char_width: 1,
            endian: Endianness::Little,
            terminator: Some(0),
            fallback: None,
        };
        write_string(&mut data, 0, &access, None, "HERO").unwrap();
        assert_eq!(&data, b"HERO\0\0");
        assert_eq!(read_string(&data, 0, &access, None).unwrap(), "HERO");
        assert!(write_string(&mut data, 0, &access, None, "TOOLONGNAME").is_err());
    }

    #[test]
    fn string_with_char_table_utf16be() {
        let mut table = CharTable::new();
        table.insert(0x0101, "A".to_string());
        table.insert(0x0102, "B".to_string());
        table.insert(0x0200, "<hero>".to_string());
        let access = StringAccess {
            length: 3,
            char_width: 2,
            endian: Endianness::Big,
            terminator: Some(0xffff),
            fallback: None,
        };
        let mut data = [0u8; 6];
        write_string(&mut data, 0, &access, Some(&table), "B<hero>").unwrap();
        assert_eq!(data, [0x01, 0x02, 0x02, 0x00, 0xff, 0xff]);
        assert_eq!(read_string(&data, 0, &access, Some(&table)).unwrap(), "B<hero>");
    }
}
