//! Numeric transforms between stored integers and the values shown to the user.
//!
//! A pipeline is applied left-to-right after a read and inverted right-to-left before a
//! write. A pipeline that starts with [`Op::Component`] is a *partial view* of the stored
//! value (e.g. the "seconds" part of a frame counter); writing it substitutes only that
//! component:
//!
//! ```text
//! newRaw = oldRaw - component(oldRaw) * unit + newComponent * unit
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Time units accepted by [`Op::Convert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeUnit {
    Frames30,
    Frames60,
    Milliseconds,
    Centiseconds,
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    fn seconds(self) -> f64 {
        match self {
            TimeUnit::Frames30 => 1.0 / 30.0,
            TimeUnit::Frames60 => 1.0 / 60.0,
            TimeUnit::Milliseconds => 0.001,
            TimeUnit::Centiseconds => 0.01,
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3600.0,
        }
    }
}

/// One primitive transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Op {
    Add { value: f64 },
    Subtract { value: f64 },
    Multiply { value: f64 },
    Divide { value: f64 },
    Round {
        #[serde(default)]
        decimals: u32,
    },
    Convert { from: TimeUnit, to: TimeUnit },
    /// `floor(raw / unit) % count`; must be the first op of a pipeline.
    Component { unit: u64, count: Option<u64> },
}

fn round_to(v: f64, decimals: u32) -> f64 {
    let f = 10f64.powi(decimals as i32);
    (v * f).round() / f
}

fn forward(op: &Op, v: f64) -> f64 {
    match op {
        Op::Add { value } => v + value,
        Op::Subtract { value } => v - value,
        Op::Multiply { value } => v * value,
        Op::Divide { value } => v / value,
        Op::Round { decimals } => round_to(v, *decimals),
        Op::Convert { from, to } => v * from.seconds() / to.seconds(),
        Op::Component { unit, count } => component(v as i64, *unit, *count) as f64,
    }
}

fn inverse(op: &Op, v: f64) -> Result<f64> {
    Ok(match op {
        Op::Add { value } => v - value,
        Op::Subtract { value } => v + value,
        Op::Multiply { value } => v / value,
        Op::Divide { value } => v * value,
        Op::Round { .. } => v,
        Op::Convert { from, to } => v * to.seconds() / from.seconds(),
        Op::Component { .. } => {
            return Err(Error::Schema("component operation must come first".to_string()))
        }
    })
}

/// `floor(raw / unit)`, reduced modulo `count` when declared.
pub fn component(raw: i64, unit: u64, count: Option<u64>) -> i64 {
    let unit = unit.max(1) as i64;
    let q = raw.div_euclid(unit);
    match count {
        Some(c) if c > 0 => q.rem_euclid(c as i64),
        _ => q,
    }
}

/// Stored value → displayed value.
pub fn apply(ops: &[Op], raw: f64) -> f64 {
    ops.iter().fold(raw, |v, op| forward(op, v))
}

/// Displayed value → stored value. `old_raw` is consulted only by partial views.
pub fn invert(ops: &[Op], value: f64, old_raw: f64) -> Result<f64> {
    let (head, rest) = match ops.split_first() {
        Some((Op::Component { unit, count }, rest)) => (Some((*unit, *count)), rest),
        _ => (None, ops),
    };
    let mut v = value;
    for op in rest.iter().rev() {
        v = inverse(op, v)?;
    }
    let Some((unit, count)) = head else {
        return Ok(v);
    };
    let new_component = v.round() as i64;
    if new_component < 0 || count.is_some_and(|c| new_component as u64 >= c) {
        return Err(Error::InvalidWriteValue(format!(
            "component {} outside 0..{}",
            new_component,
            count.map_or_else(|| "∞".to_string(), |c| c.to_string())
        )));
    }
    let old = old_raw.round() as i64;
    let unit_i = unit.max(1) as i64;
    Ok((old - component(old, unit, count) * unit_i + new_component * unit_i) as f64)
}

/// True when the pipeline reads a partial view of the stored value.
pub fn is_partial(ops: &[Op]) -> bool {
    matches!(ops.first(), Some(Op::Component { .. }))
}
