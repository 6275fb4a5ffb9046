//! Load JSON schema documents into the [`Schema`] model and resolve them structurally.

use crate::codec::DataType;
use crate::checksum::ChecksumAlgorithm;
use crate::error::{Error, Result};
use crate::ops::Op;
use crate::schema::{regions_overlap, InstanceMode, Item, Schema};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Parse schema source and reject structurally invalid documents.
pub fn parse(source: &str) -> Result<Schema> {
    let schema: Schema = serde_json::from_str(source)?;
    resolve(&schema)?;
    Ok(schema)
}

/// Read and parse a schema file.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Schema> {
    let source = std::fs::read_to_string(path)?;
    parse(&source)
}

/// Structural checks that serde cannot express.
pub fn resolve(schema: &Schema) -> Result<()> {
    let mut ids = HashMap::new();
    let mut checksum_ids = HashSet::new();
    for item in &schema.items {
        resolve_item(item, &[], &mut ids, &mut checksum_ids, false)?;
    }
    for id in &schema.checksums {
        if !checksum_ids.contains(id.as_str()) {
            return Err(Error::Schema(format!("checksum list names unknown checksum `{}`", id)));
        }
    }
    Ok(())
}

fn describe(item: &Item) -> String {
    match item.id() {
        Some(id) => format!("{} `{}`", item.kind_name(), id),
        None => format!("unnamed {}", item.kind_name()),
    }
}

fn schema_err(item: &Item, msg: impl std::fmt::Display) -> Error {
    Error::Schema(format!("{}: {}", describe(item), msg))
}

fn check_bit(item: &Item, bit: u8) -> Result<()> {
    if bit > 7 {
        return Err(schema_err(item, format_args!("bit index {} out of 0..=7", bit)));
    }
    Ok(())
}

fn check_ops(item: &Item, ops: &[Op]) -> Result<()> {
    for (i, op) in ops.iter().enumerate() {
        match op {
            Op::Component { unit, .. } => {
                if i != 0 {
                    return Err(schema_err(item, "component operation must come first"));
                }
                if *unit == 0 {
                    return Err(schema_err(item, "component unit must be non-zero"));
                }
            }
            Op::Multiply { value } | Op::Divide { value } if *value == 0.0 => {
                return Err(schema_err(item, "multiply/divide by zero cannot be inverted"));
            }
            _ => {}
        }
    }
    Ok(())
}

fn resolve_item<'a>(
    item: &'a Item,
    inherited: &'a [String],
    ids: &mut HashMap<&'a str, Vec<&'a [String]>>,
    checksum_ids: &mut HashSet<&'a str>,
    in_group: bool,
) -> Result<()> {
    // Ids repeat legitimately across instances, and across declarations for disjoint
    // regions; two declarations that can be active together must not share one.
    let regions = item.meta().effective_regions(inherited);
    if let Some(id) = item.id() {
        let seen = ids.entry(id).or_default();
        if seen.iter().any(|other| regions_overlap(other, regions)) {
            return Err(Error::Schema(format!("duplicate item id `{}`", id)));
        }
        seen.push(regions);
    }
    if in_group && !matches!(item, Item::Int(_)) {
        return Err(schema_err(item, "groups may only contain int fields"));
    }
    match item {
        Item::Int(f) => {
            check_bit(item, f.bit)?;
            if f.data_type != DataType::Bit && f.bit != 0 {
                return Err(schema_err(item, "bit index only applies to `bit` fields"));
            }
            if let Some(w) = f.bit_window {
                if !f.data_type.is_byte_integer() {
                    return Err(schema_err(item, "bit window requires an integer container"));
                }
                if w.length == 0 || w.start as u32 + w.length as u32 > f.data_type.bits() {
                    return Err(schema_err(
                        item,
                        format_args!(
                            "bit window {}+{} exceeds {}-bit container",
                            w.start,
                            w.length,
                            f.data_type.bits()
                        ),
                    ));
                }
            }
            if f.bcd {
                let nibble = matches!(f.data_type, DataType::LowerNibble | DataType::UpperNibble);
                if f.data_type.is_signed() || !(f.data_type.is_byte_integer() || nibble) {
                    return Err(schema_err(item, "BCD requires an unsigned integer or nibble"));
                }
                if f.access().value_bits() % 4 != 0 {
                    return Err(schema_err(item, "BCD width must be a whole number of nibbles"));
                }
            }
            if let (Some(min), Some(max)) = (f.min, f.max) {
                if min > max {
                    return Err(schema_err(item, format_args!("min {} above max {}", min, max)));
                }
            }
            if matches!(f.step, Some(s) if s <= 0.0) {
                return Err(schema_err(item, "step must be positive"));
            }
            check_ops(item, &f.operations)?;
        }
        Item::Bool(f) => {
            check_bit(item, f.bit)?;
            if f.data_type != DataType::Bit && f.bit != 0 {
                return Err(schema_err(item, "bit index only applies to `bit` fields"));
            }
        }
        Item::Bitflags(b) => {
            for flag in &b.flags {
                check_bit(item, flag.bit)?;
            }
        }
        Item::String(s) => {
            if s.length == 0 {
                return Err(schema_err(item, "string length must be non-zero"));
            }
            if !(1..=4).contains(&s.char_width) {
                return Err(schema_err(item, format_args!("char width {} out of 1..=4", s.char_width)));
            }
            if let Some(pattern) = &s.regex {
                Regex::new(pattern)?;
            }
        }
        Item::Checksum(c) => {
            if !c.data_type.is_byte_integer() || c.data_type.is_signed() {
                return Err(schema_err(item, "checksum must be an unsigned integer type"));
            }
            if c.control.start > c.control.end {
                return Err(schema_err(item, "control range start after end"));
            }
            if c.algorithm == Some(ChecksumAlgorithm::Crc32c) && c.data_type.bits() != 32 {
                return Err(schema_err(item, "crc32c needs a 32-bit checksum field"));
            }
            if let Some(id) = item.id() {
                checksum_ids.insert(id);
            }
        }
        Item::Container(c) => {
            if c.length == 0 && c.mode != InstanceMode::Hook && c.instances > 1 {
                return Err(schema_err(item, "container stride must be non-zero"));
            }
            if c.mode == InstanceMode::Pointer && c.pointer.is_none() {
                return Err(schema_err(item, "pointer mode requires a `pointer` definition"));
            }
        }
        Item::Group(_) | Item::Section(_) | Item::Tabs(_) | Item::Component(_) => {}
    }
    let group = matches!(item, Item::Group(_));
    if let Some(children) = item.children() {
        for child in children {
            resolve_item(child, regions, ids, checksum_ids, group)?;
        }
    }
    Ok(())
}
