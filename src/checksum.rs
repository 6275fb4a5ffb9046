//! Checksum recomputation.
//!
//! Each checksum leaf is recomputed from its control range, shifted by the same
//! stack as the checksum field itself. A [`Hooks::generate_checksum`] answer always
//! wins; the built-in algorithms are the documented fallback:
//!
//! | Algorithm | Result |
//! |-----------|--------|
//! | `sum` | wrapping sum of words |
//! | `xor` | XOR of words |
//! | `twosComplement` | negated wrapping sum of words |
//! | `crc32c` | CRC-32C (Castagnoli) of the bytes, 32-bit fields only |
//!
//! Words are as wide as the checksum field and read with its endianness. The
//! checksum's own bytes count as zero when they fall inside the control range, so
//! recomputing twice gives identical bytes.

use crate::codec::{self, Endianness};
use crate::error::{Error, Result};
use crate::hooks::{ChecksumOutcome, HookContext, Hooks};
use crate::region::matches;
use crate::schema::{Item, Schema};
use crate::walk::{for_each_leaf, ResolvedItem, ResolvedNode};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChecksumAlgorithm {
    Sum,
    Xor,
    TwosComplement,
    Crc32c,
}

/// What happened to each checksum during one recompute pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumReport {
    pub updated: Vec<String>,
    /// Conditionally absent (skip predicate, hook, or vetoed instance).
    pub absent: Vec<String>,
    /// No algorithm and no hook: the schema is incomplete.
    pub missing: Vec<String>,
    /// Could not be recomputed (e.g. control range outside the buffer), with the reason.
    pub failed: Vec<(String, String)>,
}

impl ChecksumReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.failed.is_empty()
    }
}

fn mask(bytes: usize) -> u64 {
    if bytes >= 8 {
        u64::MAX
    } else {
        (1u64 << (bytes * 8)) - 1
    }
}

fn word(chunk: &[u8], width: usize, endian: Endianness) -> u64 {
    let mut buf = [0u8; 8];
    buf[..chunk.len()].copy_from_slice(chunk);
    match endian {
        Endianness::Big => BigEndian::read_uint(&buf[..width], width),
        Endianness::Little => LittleEndian::read_uint(&buf[..width], width),
    }
}

/// Fold `bytes` with a built-in algorithm into a `width`-byte value.
pub fn compute(algorithm: ChecksumAlgorithm, bytes: &[u8], width: usize, endian: Endianness) -> u64 {
    let m = mask(width);
    let words = bytes.chunks(width).map(|c| word(c, width, endian));
    match algorithm {
        ChecksumAlgorithm::Sum => words.fold(0u64, |acc, w| acc.wrapping_add(w)) & m,
        ChecksumAlgorithm::Xor => words.fold(0u64, |acc, w| acc ^ w) & m,
        ChecksumAlgorithm::TwosComplement => words.fold(0u64, |acc, w| acc.wrapping_add(w)).wrapping_neg() & m,
        ChecksumAlgorithm::Crc32c => crc32c::crc32c(bytes) as u64 & m,
    }
}

/// Copy of the shifted control range with the checksum's own bytes zeroed.
pub fn control_bytes(data: &[u8], resolved: &ResolvedItem) -> Result<Vec<u8>> {
    let Item::Checksum(c) = &resolved.item else {
        return Err(Error::TypeMismatch(format!("{} is not a checksum", resolved.label())));
    };
    let start = resolved.shifts.byte_offset(c.control.start);
    let end = resolved.shifts.byte_offset(c.control.end);
    if start < 0 || end < start || end as usize > data.len() {
        let bits = end.saturating_sub(start).max(0).saturating_mul(8);
        return Err(Error::AddressOutOfRange {
            bit_offset: start.saturating_mul(8),
            bits: u32::try_from(bits).unwrap_or(u32::MAX),
            buffer_len: data.len(),
        });
    }
    let (start, end) = (start as usize, end as usize);
    let mut bytes = data[start..end].to_vec();
    let own = resolved.shifts.byte_offset(c.offset);
    for i in 0..c.data_type.bytes() as i64 {
        let pos = own.saturating_add(i);
        if pos >= start as i64 && pos < end as i64 {
            bytes[pos as usize - start] = 0;
        }
    }
    Ok(bytes)
}

enum Computed {
    Value(u64),
    Absent,
    Missing,
}

fn compute_one(ctx: &HookContext, resolved: &ResolvedItem, hooks: &dyn Hooks) -> Result<Computed> {
    let Item::Checksum(c) = &resolved.item else {
        return Err(Error::TypeMismatch(format!("{} is not a checksum", resolved.label())));
    };
    if let Some(pred) = &c.skip_if {
        let base = resolved.shifts.total();
        if base >= 0 && matches(pred, ctx.data, base as usize) {
            return Ok(Computed::Absent);
        }
    }
    match hooks.generate_checksum(ctx, resolved) {
        Some(ChecksumOutcome::Value(v)) => return Ok(Computed::Value(v)),
        Some(ChecksumOutcome::Absent) => return Ok(Computed::Absent),
        None => {}
    }
    let Some(algorithm) = c.algorithm else {
        return Ok(Computed::Missing);
    };
    let bytes = control_bytes(ctx.data, resolved)?;
    Ok(Computed::Value(compute(algorithm, &bytes, c.data_type.bytes(), c.endian)))
}

fn checksum_leaves<'t>(schema: &Schema, tree: &'t [ResolvedNode]) -> (Vec<&'t ResolvedItem>, Vec<String>) {
    let mut all = Vec::new();
    for_each_leaf(tree, &mut |leaf| {
        if matches!(leaf.item, Item::Checksum(_)) {
            all.push(leaf);
        }
    });
    if schema.checksums.is_empty() {
        return (all, Vec::new());
    }
    // Declared order; an id with no leaf lives only in vetoed instances or other regions.
    let mut ordered = Vec::new();
    let mut absent = Vec::new();
    for id in &schema.checksums {
        let before = ordered.len();
        ordered.extend(all.iter().copied().filter(|l| l.item.id() == Some(id.as_str())));
        if ordered.len() == before {
            absent.push(id.clone());
        }
    }
    (ordered, absent)
}

/// Recompute every checksum of the resolved tree in place.
pub fn recompute_all(
    schema: &Schema,
    tree: &[ResolvedNode],
    data: &mut [u8],
    region: Option<&str>,
    header_shift: usize,
    hooks: &dyn Hooks,
) -> Result<ChecksumReport> {
    let (leaves, absent) = checksum_leaves(schema, tree);
    let mut report = ChecksumReport { absent, ..ChecksumReport::default() };
    for leaf in leaves {
        let label = leaf.label();
        let computed = {
            let ctx = HookContext::new(data, region, header_shift);
            compute_one(&ctx, leaf, hooks)
        };
        let written = computed.and_then(|computed| match computed {
            Computed::Value(v) => {
                let (Item::Checksum(c), Some(at)) = (&leaf.item, leaf.bit_offset()) else {
                    return Ok(None);
                };
                codec::write_bits(data, at, &c.access(), v & mask(c.data_type.bytes()))?;
                Ok(Some(Computed::Value(v)))
            }
            other => Ok(Some(other)),
        });
        let outcome = match written {
            Ok(Some(outcome)) => outcome,
            Ok(None) => continue,
            Err(e) if e.is_field_local() => {
                warn!("checksum {} not recomputed: {}", label, e);
                report.failed.push((label, e.to_string()));
                continue;
            }
            Err(e) => return Err(e),
        };
        match outcome {
            Computed::Value(v) => {
                debug!("checksum {} = {:#x}", label, v);
                report.updated.push(label);
            }
            Computed::Absent => {
                debug!("checksum {} absent", label);
                report.absent.push(label);
            }
            Computed::Missing => {
                warn!("checksum {} has no algorithm and no hook", label);
                report.missing.push(label);
            }
        }
    }
    Ok(report)
}
