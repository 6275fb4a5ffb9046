//! Per-game override hooks.
//!
//! Every method has a default that defers to the generic engine, so a game
//! implements only the extension points it needs. Dispatch is always "try the
//! hook; if it answers, use that and skip the generic path".
//!
//! Hooks are selected once per session, by schema id, from a [`HookRegistry`].

use crate::container::InstanceShift;
use crate::error::Result;
use crate::schema::{Container, Item};
use crate::shift::ShiftStack;
use crate::value::Value;
use crate::walk::{ItemKey, ResolvedItem};
use std::collections::HashMap;

/// Read-only view of the session handed to hooks.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub data: &'a [u8],
    pub region: Option<&'a str>,
    pub header_shift: usize,
}

impl<'a> HookContext<'a> {
    pub fn new(data: &'a [u8], region: Option<&'a str>, header_shift: usize) -> Self {
        HookContext { data, region, header_shift }
    }
}

/// A derived write requested by [`Hooks::after_set_int`].
#[derive(Debug, Clone, PartialEq)]
pub struct Propagation {
    pub key: ItemKey,
    pub value: Value,
}

/// Answer of [`Hooks::generate_checksum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumOutcome {
    Value(u64),
    /// Checksum does not exist for this buffer (e.g. empty slot).
    Absent,
}

#[allow(unused_variables)]
pub trait Hooks {
    /// Transform the raw buffer before parsing (decompress, de-interleave, unwrap).
    fn before_init_data_view(&mut self, data: Vec<u8>) -> Result<Vec<u8>> {
        Ok(data)
    }

    /// Replace header-shift detection.
    fn init_header_shift(&self, data: &[u8]) -> Option<usize> {
        None
    }

    /// Replace region detection at `shift`.
    fn override_get_regions(&self, data: &[u8], shift: usize) -> Option<Vec<String>> {
        None
    }

    /// Contribute top-level shifts before the tree walk.
    fn init_shifts(&self, ctx: &HookContext, stack: ShiftStack) -> ShiftStack {
        stack
    }

    fn before_items_parsing(&mut self, ctx: &HookContext) {}

    /// Reshape an item once, while the tree is walked.
    fn override_parse_item(&self, ctx: &HookContext, item: Item, instance: Option<usize>) -> Item {
        item
    }

    /// Reshape a resolved item on every render and edit.
    fn override_item(&self, ctx: &HookContext, item: ResolvedItem) -> ResolvedItem {
        item
    }

    /// Replace the shift stack used for one item.
    fn override_item_shifts(&self, ctx: &HookContext, item: &Item, stack: &ShiftStack) -> Option<ShiftStack> {
        None
    }

    /// Shifts (or a veto) for container instance `index`.
    fn override_container_shifts(
        &self,
        ctx: &HookContext,
        container: &Container,
        stack: &ShiftStack,
        index: usize,
    ) -> Option<InstanceShift> {
        None
    }

    /// Replace the read of a field.
    fn override_get_int(&self, ctx: &HookContext, item: &ResolvedItem) -> Option<Value> {
        None
    }

    /// Replace the write of a field. `Ok(true)` means handled.
    fn override_set_int(&self, data: &mut [u8], item: &ResolvedItem, value: &Value) -> Result<bool> {
        Ok(false)
    }

    /// Derived writes to apply after `item` was written.
    fn after_set_int(&self, ctx: &HookContext, item: &ResolvedItem, flag: Option<usize>) -> Vec<Propagation> {
        Vec::new()
    }

    /// Game-specific checksum; `None` falls back to the built-in algorithm.
    fn generate_checksum(&self, ctx: &HookContext, item: &ResolvedItem) -> Option<ChecksumOutcome> {
        None
    }

    /// Transform a copy of the buffer before it leaves the session.
    fn before_saving(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        Ok(data)
    }

    fn on_reset(&mut self) {}

    fn on_init_failed(&mut self) {}

    fn on_ready(&mut self, ctx: &HookContext) {}
}

/// Generic behaviour everywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl Hooks for DefaultHooks {}

pub type HookFactory = fn() -> Box<dyn Hooks>;

/// Game id → hook factory.
#[derive(Default)]
pub struct HookRegistry {
    factories: HashMap<String, HookFactory>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, game: impl Into<String>, factory: HookFactory) -> &mut Self {
        self.factories.insert(game.into(), factory);
        self
    }

    pub fn contains(&self, game: &str) -> bool {
        self.factories.contains_key(game)
    }

    /// Hooks for `game`, or [`DefaultHooks`] when none are registered.
    pub fn create(&self, game: &str) -> Box<dyn Hooks> {
        match self.factories.get(game) {
            Some(factory) => factory(),
            None => Box::new(DefaultHooks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shifted;

    impl Hooks for Shifted {
        fn init_header_shift(&self, _data: &[u8]) -> Option<usize> {
            Some(16)
        }
    }

    #[test]
    fn registry_falls_back_to_defaults() {
        let mut registry = HookRegistry::new();
        registry.register("shifted", || Box::new(Shifted));
        assert!(registry.contains("shifted"));
        assert_eq!(registry.create("shifted").init_header_shift(&[]), Some(16));
        assert_eq!(registry.create("other").init_header_shift(&[]), None);
    }
}
