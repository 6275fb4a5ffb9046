//! Generic read and write of one resolved leaf.

use crate::codec::{self, Access, DataType, Endianness};
use crate::error::{Error, Result};
use crate::ops;
use crate::schema::{Address, BitflagSet, FlagDef, IntField, Item, Resources};
use crate::value::Value;
use crate::walk::ResolvedItem;
use regex::Regex;

const FLAG_BIT: Access = Access { data_type: DataType::Bit, endian: Endianness::Little, window: None, bcd: false };

fn flag_offset(resolved: &ResolvedItem, flag: &FlagDef) -> i64 {
    resolved.shifts.bit_offset(Address { offset: flag.offset, bit: flag.bit })
}

fn offset_of(resolved: &ResolvedItem) -> Result<i64> {
    resolved
        .bit_offset()
        .ok_or_else(|| Error::TypeMismatch(format!("{} has no address", resolved.label())))
}

/// Read the user-facing value of a leaf.
pub fn read(data: &[u8], resolved: &ResolvedItem, resources: &Resources) -> Result<Value> {
    match &resolved.item {
        Item::Int(f) => {
            let raw = codec::read(data, offset_of(resolved)?, &f.access())?;
            Ok(present_int(f, raw))
        }
        Item::Bool(f) => {
            let raw = codec::read_bits(data, offset_of(resolved)?, &f.access())?;
            Ok(Value::Bool(raw == f.on))
        }
        Item::Bitflags(b) => Ok(Value::Flags(read_flags(data, resolved, b)?)),
        Item::String(s) => {
            let table = s.resource.as_deref().and_then(|r| resources.table(r));
            let at = resolved.shifts.byte_offset(s.offset);
            Ok(Value::Str(codec::read_string(data, at, &s.access(), table)?))
        }
        Item::Checksum(c) => codec::read(data, offset_of(resolved)?, &c.access()),
        other => Err(Error::TypeMismatch(format!("{} holds no value", other.kind_name()))),
    }
}

fn present_int(f: &IntField, raw: Value) -> Value {
    if f.operations.is_empty() {
        return raw;
    }
    let Some(x) = raw.as_f64() else {
        return raw;
    };
    let shown = ops::apply(&f.operations, x);
    if shown.fract() == 0.0 && shown.abs() < i64::MAX as f64 {
        Value::Int(shown as i64)
    } else {
        Value::Float(shown)
    }
}

fn read_flags(data: &[u8], resolved: &ResolvedItem, b: &BitflagSet) -> Result<Vec<bool>> {
    b.flags
        .iter()
        .map(|flag| {
            let at = flag_offset(resolved, flag);
            Ok((codec::read_bits(data, at, &FLAG_BIT)? == 1) != b.reversed)
        })
        .collect()
}

/// Validate against `min`/`max`/`step`, before any mutation.
fn check_bounds(f: &IntField, v: f64) -> Result<()> {
    if f.min.is_some_and(|min| v < min) || f.max.is_some_and(|max| v > max) {
        return Err(Error::InvalidWriteValue(format!(
            "{} outside {}..={}",
            v,
            f.min.map_or_else(|| "-inf".to_string(), |m| m.to_string()),
            f.max.map_or_else(|| "inf".to_string(), |m| m.to_string())
        )));
    }
    if let Some(step) = f.step {
        let steps = (v - f.min.unwrap_or(0.0)) / step;
        if (steps - steps.round()).abs() > 1e-9 {
            return Err(Error::InvalidWriteValue(format!("{} is not a multiple of step {}", v, step)));
        }
    }
    Ok(())
}

/// Map a resource label back to its code.
fn resource_code(f: &IntField, label: &str, resources: &Resources) -> Result<Value> {
    let table = f
        .resource
        .as_deref()
        .and_then(|r| resources.table(r))
        .ok_or_else(|| Error::TypeMismatch(format!("int field got string {:?}", label)))?;
    table
        .iter()
        .find(|(_, l)| l.as_str() == label)
        .map(|(code, _)| Value::UInt(*code))
        .ok_or_else(|| Error::InvalidWriteValue(format!("{:?} is not a known label", label)))
}

fn encode_int(data: &[u8], at: i64, f: &IntField, value: &Value, resources: &Resources) -> Result<Value> {
    let value = match value {
        Value::Str(label) => resource_code(f, label, resources)?,
        Value::Flags(_) => return Err(Error::TypeMismatch("int field got flags".to_string())),
        v => v.clone(),
    };
    let shown = value
        .as_f64()
        .ok_or_else(|| Error::TypeMismatch(format!("int field got {}", value.kind())))?;
    check_bounds(f, shown)?;
    if f.operations.is_empty() {
        return Ok(value);
    }
    let access = f.access();
    let old = if ops::is_partial(&f.operations) {
        codec::read(data, at, &access)?.as_f64().unwrap_or(0.0)
    } else {
        0.0
    };
    let raw = ops::invert(&f.operations, shown, old)?;
    if f.data_type == DataType::Float32 {
        return Ok(Value::Float(raw));
    }
    let raw = raw.round();
    if f.data_type.is_signed() {
        Ok(Value::Int(raw as i64))
    } else if raw < 0.0 {
        Err(Error::InvalidWriteValue(format!("{} maps to negative raw value {}", shown, raw)))
    } else {
        Ok(Value::UInt(raw as u64))
    }
}

/// Write the user-facing value of a leaf. The buffer is untouched on error.
pub fn write(data: &mut [u8], resolved: &ResolvedItem, value: &Value, resources: &Resources) -> Result<()> {
    match &resolved.item {
        Item::Int(f) => {
            let at = offset_of(resolved)?;
            let raw = encode_int(data, at, f, value, resources)?;
            codec::write(data, at, &f.access(), &raw)
        }
        Item::Bool(f) => {
            let on = value
                .as_bool()
                .ok_or_else(|| Error::TypeMismatch(format!("bool field got {}", value.kind())))?;
            codec::write_bits(data, offset_of(resolved)?, &f.access(), if on { f.on } else { f.off })
        }
        Item::Bitflags(b) => {
            let flags = value
                .as_flags()
                .ok_or_else(|| Error::TypeMismatch(format!("bitflags got {}", value.kind())))?;
            if flags.len() != b.flags.len() {
                return Err(Error::InvalidWriteValue(format!(
                    "expected {} flags, got {}",
                    b.flags.len(),
                    flags.len()
                )));
            }
            // Bounds first so a write never stops half way.
            for flag in &b.flags {
                let at = flag_offset(resolved, flag);
                codec::read_bits(data, at, &FLAG_BIT)?;
            }
            for (flag, on) in b.flags.iter().zip(flags) {
                let at = flag_offset(resolved, flag);
                codec::write_bits(data, at, &FLAG_BIT, (*on != b.reversed) as u64)?;
            }
            Ok(())
        }
        Item::String(s) => {
            let text = value
                .as_str()
                .ok_or_else(|| Error::TypeMismatch(format!("string field got {}", value.kind())))?;
            if let Some(pattern) = &s.regex {
                if !Regex::new(pattern)?.is_match(text) {
                    return Err(Error::InvalidWriteValue(format!("{:?} does not match /{}/", text, pattern)));
                }
            }
            let table = s.resource.as_deref().and_then(|r| resources.table(r));
            let at = resolved.shifts.byte_offset(s.offset);
            codec::write_string(data, at, &s.access(), table, text)
        }
        Item::Checksum(_) => Err(Error::InvalidWriteValue(format!(
            "{} is a checksum; it is recomputed, not edited",
            resolved.label()
        ))),
        other => Err(Error::TypeMismatch(format!("{} holds no value", other.kind_name()))),
    }
}

/// Flip one flag of a bitflag set, honouring `reversed`.
pub fn write_flag(data: &mut [u8], resolved: &ResolvedItem, index: usize, on: bool) -> Result<()> {
    let Item::Bitflags(b) = &resolved.item else {
        return Err(Error::TypeMismatch(format!("{} is not a bitflag set", resolved.label())));
    };
    let flag = b
        .flags
        .get(index)
        .ok_or_else(|| Error::InvalidWriteValue(format!("flag index {} out of {}", index, b.flags.len())))?;
    let at = flag_offset(resolved, flag);
    codec::write_bits(data, at, &FLAG_BIT, (on != b.reversed) as u64)
}
