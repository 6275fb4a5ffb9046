//! Schema walk producing the resolved tree.
//!
//! The walk runs once per load, after region detection. It drops items that do not
//! apply to the detected region, lets hooks reshape items ([`Hooks::override_parse_item`])
//! and their shift stacks ([`Hooks::override_item_shifts`]), instantiates containers
//! and records for every leaf the shift stack it will be addressed with.
//!
//! | Schema node | Resolved node |
//! |-------------|---------------|
//! | int, bool, bitflags, string, checksum | [`ResolvedNode::Leaf`] |
//! | section, tabs, group, component | [`ResolvedNode::Branch`] |
//! | container | [`ResolvedNode::Container`], one [`ResolvedInstance`] per index |
//!
//! No buffer value is read here except container pointers and `disableIf`
//! predicates; field reads happen at render time so a bad field never aborts the walk.
//!
//! ## Example
//!
//! ```ignore
//! let ctx = HookContext::new(&data, Some("usa"), 0);
//! let tree = walk(&schema, &ctx, &DefaultHooks, ShiftStack::with_header(0));
//! let hp = find(&tree, &ItemKey::new("hp"));
//! ```

use crate::container::{instantiate, Instance};
use crate::hooks::{HookContext, Hooks};
use crate::schema::{Item, ItemMeta, Schema};
use crate::shift::ShiftStack;
use std::fmt;

/// Address of one item in the resolved tree: id plus container instance path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub id: String,
    /// Instance indices of enclosing containers, outermost first.
    pub instances: Vec<usize>,
}

impl ItemKey {
    pub fn new(id: impl Into<String>) -> Self {
        ItemKey { id: id.into(), instances: Vec::new() }
    }

    pub fn at(id: impl Into<String>, instances: &[usize]) -> Self {
        ItemKey { id: id.into(), instances: instances.to_vec() }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        for i in &self.instances {
            write!(f, "[{}]", i)?;
        }
        Ok(())
    }
}

/// A leaf item bound to its shift stack and instance path.
#[derive(Debug, Clone)]
pub struct ResolvedItem {
    pub item: Item,
    pub shifts: ShiftStack,
    pub instances: Vec<usize>,
    pub hidden: bool,
    pub disabled: bool,
}

impl ResolvedItem {
    pub fn key(&self) -> Option<ItemKey> {
        self.item.id().map(|id| ItemKey::at(id, &self.instances))
    }

    /// Innermost container instance.
    pub fn instance(&self) -> Option<usize> {
        self.instances.last().copied()
    }

    pub fn bit_offset(&self) -> Option<i64> {
        self.item.address().map(|a| self.shifts.bit_offset(a))
    }

    pub fn label(&self) -> String {
        match self.key() {
            Some(k) => k.to_string(),
            None => self.item.meta().name.clone().unwrap_or_else(|| self.item.kind_name().to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Present,
    /// Visible but read-only.
    Disabled,
    /// Does not exist; no children.
    Vetoed,
}

#[derive(Debug, Clone)]
pub struct ResolvedInstance {
    pub index: usize,
    pub state: InstanceState,
    pub children: Vec<ResolvedNode>,
}

#[derive(Debug, Clone)]
pub enum ResolvedNode {
    Leaf(ResolvedItem),
    Branch {
        kind: &'static str,
        meta: ItemMeta,
        hidden: bool,
        children: Vec<ResolvedNode>,
    },
    Container {
        meta: ItemMeta,
        hidden: bool,
        instances: Vec<ResolvedInstance>,
    },
}

/// Walks a schema against one buffer.
pub struct TreeWalker<'a> {
    ctx: &'a HookContext<'a>,
    hooks: &'a dyn Hooks,
}

impl<'a> TreeWalker<'a> {
    pub fn new(ctx: &'a HookContext<'a>, hooks: &'a dyn Hooks) -> Self {
        TreeWalker { ctx, hooks }
    }

    fn active(&self, meta: &ItemMeta) -> bool {
        meta.regions.is_empty() || self.ctx.region.is_some_and(|r| meta.regions.iter().any(|x| x == r))
    }

    pub fn walk_items(
        &self,
        items: &[Item],
        stack: &ShiftStack,
        instances: &[usize],
        hidden: bool,
        disabled: bool,
    ) -> Vec<ResolvedNode> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if !self.active(item.meta()) {
                continue;
            }
            let instance = instances.last().copied();
            let item = self.hooks.override_parse_item(self.ctx, item.clone(), instance);
            let hidden = hidden || item.meta().hidden.get(instance);
            let disabled = disabled || item.meta().disabled.get(instance);
            let stack = self
                .hooks
                .override_item_shifts(self.ctx, &item, stack)
                .unwrap_or_else(|| stack.clone());
            out.push(self.walk_item(item, stack, instances, hidden, disabled));
        }
        out
    }

    fn walk_item(
        &self,
        item: Item,
        stack: ShiftStack,
        instances: &[usize],
        hidden: bool,
        disabled: bool,
    ) -> ResolvedNode {
        if let Item::Container(c) = &item {
            let mut resolved = Vec::with_capacity(c.instances);
            for inst in instantiate(c, &stack, self.ctx, self.hooks) {
                let index = inst.index();
                let mut path = instances.to_vec();
                path.push(index);
                resolved.push(match inst {
                    Instance::Vetoed { .. } => {
                        ResolvedInstance { index, state: InstanceState::Vetoed, children: Vec::new() }
                    }
                    Instance::Present { shifts, disabled: read_only, .. } => ResolvedInstance {
                        index,
                        state: if read_only { InstanceState::Disabled } else { InstanceState::Present },
                        children: self.walk_items(&c.items, &shifts, &path, hidden, disabled || read_only),
                    },
                });
            }
            return ResolvedNode::Container { meta: c.meta.clone(), hidden, instances: resolved };
        }
        if item.is_leaf() {
            return ResolvedNode::Leaf(ResolvedItem {
                item,
                shifts: stack,
                instances: instances.to_vec(),
                hidden,
                disabled,
            });
        }
        let children = match item.children() {
            Some(items) => self.walk_items(items, &stack, instances, hidden, disabled),
            None => Vec::new(),
        };
        ResolvedNode::Branch { kind: item.kind_name(), meta: item.meta().clone(), hidden, children }
    }
}

/// Resolve the whole schema under the initial stack.
pub fn walk(schema: &Schema, ctx: &HookContext, hooks: &dyn Hooks, stack: ShiftStack) -> Vec<ResolvedNode> {
    TreeWalker::new(ctx, hooks).walk_items(&schema.items, &stack, &[], false, false)
}

/// Visit every leaf in tree order, skipping vetoed instances.
pub fn for_each_leaf<'t>(nodes: &'t [ResolvedNode], f: &mut dyn FnMut(&'t ResolvedItem)) {
    for node in nodes {
        match node {
            ResolvedNode::Leaf(item) => f(item),
            ResolvedNode::Branch { children, .. } => for_each_leaf(children, f),
            ResolvedNode::Container { instances, .. } => {
                for inst in instances {
                    for_each_leaf(&inst.children, f);
                }
            }
        }
    }
}

pub fn leaves(nodes: &[ResolvedNode]) -> Vec<&ResolvedItem> {
    let mut out = Vec::new();
    for_each_leaf(nodes, &mut |leaf| out.push(leaf));
    out
}

/// Leaf with this key, if present (vetoed instances have none).
pub fn find<'t>(nodes: &'t [ResolvedNode], key: &ItemKey) -> Option<&'t ResolvedItem> {
    for node in nodes {
        let hit = match node {
            ResolvedNode::Leaf(item) => {
                let same = item.item.id() == Some(key.id.as_str()) && item.instances == key.instances;
                same.then_some(item)
            }
            ResolvedNode::Branch { children, .. } => find(children, key),
            ResolvedNode::Container { instances, .. } => {
                instances.iter().find_map(|inst| find(&inst.children, key))
            }
        };
        if hit.is_some() {
            return hit;
        }
    }
    None
}

/// State of instance `index` of the first container with this id, in tree order.
pub fn instance_state(nodes: &[ResolvedNode], container_id: &str, index: usize) -> Option<InstanceState> {
    nodes.iter().find_map(|node| match node {
        ResolvedNode::Container { meta, instances, .. } => {
            if meta.id.as_deref() == Some(container_id) {
                return instances.iter().find(|i| i.index == index).map(|i| i.state);
            }
            instances.iter().find_map(|inst| instance_state(&inst.children, container_id, index))
        }
        ResolvedNode::Branch { children, .. } => instance_state(children, container_id, index),
        ResolvedNode::Leaf(_) => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::DefaultHooks;
    use crate::parser::parse;

    #[test]
    fn region_filter_and_hidden_inheritance() {
        let schema = parse(
            r#"{ "items": [
                { "type": "int", "id": "jp_only", "offset": 0, "regions": ["japan"] },
                { "type": "section", "hidden": true, "items": [ { "type": "int", "id": "inner", "offset": 1 } ] }
            ] }"#,
        )
        .unwrap();
        let data = [0u8; 4];
        let ctx = HookContext::new(&data, Some("usa"), 0);
        let tree = walk(&schema, &ctx, &DefaultHooks, ShiftStack::with_header(0));
        assert!(find(&tree, &ItemKey::new("jp_only")).is_none());
        let inner = find(&tree, &ItemKey::new("inner")).unwrap();
        assert!(inner.hidden);
        assert_eq!(inner.bit_offset(), Some(8));
    }

    #[test]
    fn per_instance_disabled_flags() {
        let schema = parse(
            r#"{ "items": [ { "type": "container", "id": "slots", "instances": 2, "length": 2,
                "items": [ { "type": "int", "id": "v", "offset": 0, "disabled": [true, false] } ] } ] }"#,
        )
        .unwrap();
        let data = [0u8; 4];
        let ctx = HookContext::new(&data, None, 0);
        let tree = walk(&schema, &ctx, &DefaultHooks, ShiftStack::with_header(0));
        assert!(find(&tree, &ItemKey::at("v", &[0])).unwrap().disabled);
        let second = find(&tree, &ItemKey::at("v", &[1])).unwrap();
        assert!(!second.disabled);
        assert_eq!(second.bit_offset(), Some(16));
        assert_eq!(instance_state(&tree, "slots", 1), Some(InstanceState::Present));
        assert_eq!(ItemKey::at("v", &[1]).to_string(), "v[1]");
    }
}
