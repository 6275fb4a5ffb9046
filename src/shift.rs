//! Shift accumulation: declared offset + header shift + enclosing instance shifts.
//!
//! Sums are taken in `i128` and clamped to `i64`, so an absurd offset resolves to an
//! address past any buffer instead of wrapping.

use crate::schema::{Address, Item};

fn clamp(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Ordered byte shifts, outermost first. Entry 0 is the header shift.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShiftStack {
    shifts: Vec<i64>,
}

impl ShiftStack {
    pub fn with_header(header_shift: usize) -> Self {
        ShiftStack { shifts: vec![header_shift as i64] }
    }

    pub fn from_shifts(shifts: Vec<i64>) -> Self {
        ShiftStack { shifts }
    }

    pub fn push(&mut self, shift: i64) {
        self.shifts.push(shift);
    }

    /// Copy with one more shift appended.
    pub fn pushed(&self, shift: i64) -> Self {
        let mut next = self.clone();
        next.push(shift);
        next
    }

    /// Copy with several shifts appended.
    pub fn extended(&self, shifts: &[i64]) -> Self {
        let mut next = self.clone();
        next.shifts.extend_from_slice(shifts);
        next
    }

    pub fn header(&self) -> i64 {
        self.shifts.first().copied().unwrap_or(0)
    }

    pub fn total(&self) -> i64 {
        clamp(self.shifts.iter().map(|&s| s as i128).sum())
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.shifts
    }

    pub fn depth(&self) -> usize {
        self.shifts.len()
    }

    /// Absolute byte offset of `offset` under this stack.
    pub fn byte_offset(&self, offset: usize) -> i64 {
        clamp(offset as i128 + self.total() as i128)
    }

    /// Absolute bit offset of an address under this stack.
    pub fn bit_offset(&self, addr: Address) -> i64 {
        clamp(self.byte_offset(addr.offset) as i128 * 8 + addr.bit as i128)
    }
}

/// Absolute bit offset of a single-location item, or `None` for items without an address.
pub fn resolve(item: &Item, stack: &ShiftStack) -> Option<i64> {
    item.address().map(|addr| stack.bit_offset(addr))
}
