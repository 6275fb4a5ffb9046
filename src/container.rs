//! Container instancing: fixed stride, pointer-indirected, or hook-computed.

use crate::codec::{read_uint, DataType};
use crate::hooks::{HookContext, Hooks};
use crate::region::matches;
use crate::schema::{Container, InstanceMode};
use crate::shift::ShiftStack;
use log::{debug, warn};

/// Hook answer for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceShift {
    /// Shifts appended to the parent stack for this instance.
    Shifts(Vec<i64>),
    /// The instance does not exist in this buffer.
    Veto,
}

/// Instancing result for one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instance {
    Present { index: usize, shifts: ShiftStack, disabled: bool },
    Vetoed { index: usize },
}

impl Instance {
    pub fn index(&self) -> usize {
        match self {
            Instance::Present { index, .. } | Instance::Vetoed { index } => *index,
        }
    }
}

fn stride(container: &Container, index: usize) -> i64 {
    let step = index as i128 * container.length as i128;
    i64::try_from(step).unwrap_or(i64::MAX)
}

/// Structure base for pointer mode, relative to the parent stack.
fn pointer_base(container: &Container, stack: &ShiftStack, data: &[u8]) -> Option<i64> {
    let def = container.pointer.as_ref()?;
    let pos = stack.byte_offset(def.offset);
    if pos < 0 {
        return None;
    }
    let len = match def.data_type {
        DataType::Bit | DataType::LowerNibble | DataType::UpperNibble | DataType::Float32 => return None,
        dt => dt.bytes(),
    };
    let ptr = read_uint(data, pos as usize, len, def.endian).ok()?;
    // Relative to the parent total, so child offsets address the pointed structure.
    let rel = ptr as i128 - def.base as i128 - stack.total() as i128;
    i64::try_from(rel).ok()
}

fn disabled_at(container: &Container, shifts: &ShiftStack, data: &[u8]) -> bool {
    let Some(pred) = &container.disable_if else {
        return false;
    };
    let base = shifts.total();
    base >= 0 && matches(pred, data, base as usize)
}

/// Resolve every instance of `container` under `stack`.
pub fn instantiate(
    container: &Container,
    stack: &ShiftStack,
    ctx: &HookContext,
    hooks: &dyn Hooks,
) -> Vec<Instance> {
    let name = container.meta.id.as_deref().unwrap_or("container");
    let pointer = match container.mode {
        InstanceMode::Pointer => {
            let base = pointer_base(container, stack, ctx.data);
            if base.is_none() {
                warn!("{}: pointer could not be read, vetoing every instance", name);
            }
            Some(base)
        }
        _ => None,
    };
    let mut out = Vec::with_capacity(container.instances);
    for index in 0..container.instances {
        let shifts = match hooks.override_container_shifts(ctx, container, stack, index) {
            Some(InstanceShift::Veto) => {
                debug!("{}[{}]: vetoed by hook", name, index);
                out.push(Instance::Vetoed { index });
                continue;
            }
            Some(InstanceShift::Shifts(list)) => stack.extended(&list),
            None => match (container.mode, pointer) {
                (InstanceMode::Pointer, Some(None)) => {
                    out.push(Instance::Vetoed { index });
                    continue;
                }
                (InstanceMode::Pointer, Some(Some(base))) => {
                    stack.pushed(base.saturating_add(stride(container, index)))
                }
                (InstanceMode::Hook, _) if container.length == 0 => {
                    warn!("{}[{}]: hook-computed container got no hook answer and has no stride, vetoing", name, index);
                    out.push(Instance::Vetoed { index });
                    continue;
                }
                (InstanceMode::Hook, _) => {
                    warn!("{}[{}]: hook-computed container got no hook answer, using fixed stride", name, index);
                    stack.pushed(stride(container, index))
                }
                _ => stack.pushed(stride(container, index)),
            },
        };
        let disabled = disabled_at(container, &shifts, ctx.data);
        out.push(Instance::Present { index, shifts, disabled });
    }
    out
}
