//! Region detection: byte-pattern matchers tried in declaration order, at offset 0
//! and then after each known header shift.

use crate::error::{Error, Result};
use crate::schema::{Matcher, Validator};
use log::debug;

/// Outcome of a successful detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub region: String,
    pub header_shift: usize,
}

/// Evaluate `matcher` with every offset taken relative to `base`.
///
/// A pattern that would read past the end of the buffer does not match.
pub fn matches(matcher: &Matcher, data: &[u8], base: usize) -> bool {
    match matcher {
        Matcher::Bytes(pairs) => pairs.iter().all(|(offset, expected)| {
            let Some(start) = base.checked_add(*offset) else {
                return false;
            };
            match start.checked_add(expected.len()) {
                Some(end) if end <= data.len() => data[start..end] == expected[..],
                _ => false,
            }
        }),
        Matcher::And(list) => list.iter().all(|m| matches(m, data, base)),
        Matcher::Or(list) => list.iter().any(|m| matches(m, data, base)),
    }
}

/// All regions matching at `shift`, in declaration order.
pub fn matching_regions(validator: &Validator, data: &[u8], shift: usize) -> Vec<String> {
    validator
        .regions
        .iter()
        .filter(|r| matches(&r.matcher, data, shift))
        .map(|r| r.name.clone())
        .collect()
}

/// First region matching at offset 0, else at each header shift candidate.
pub fn detect(validator: &Validator, data: &[u8]) -> Result<Detection> {
    let candidates = std::iter::once(0).chain(validator.header_shifts.iter().copied());
    for shift in candidates {
        if let Some(r) = validator.regions.iter().find(|r| matches(&r.matcher, data, shift)) {
            debug!("region {} matched at header shift {:#x}", r.name, shift);
            return Ok(Detection { region: r.name.clone(), header_shift: shift });
        }
    }
    Err(Error::FormatNotRecognized)
}
