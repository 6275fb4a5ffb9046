//! Editing session: owns the buffer, the detected region, the resolved tree and the
//! hook set, with an explicit load / reset lifecycle.
//!
//! Load order is fixed: buffer transform, header shift and region detection,
//! top-level shifts, then the tree walk. Edits are transactional: every write of one
//! edit, propagations included, either lands or the buffer is restored.

use crate::checksum::{self, ChecksumReport};
use crate::error::{Error, Result};
use crate::field;
use crate::hooks::{DefaultHooks, HookContext, HookRegistry, Hooks};
use crate::region;
use crate::schema::Schema;
use crate::shift::ShiftStack;
use crate::value::Value;
use crate::walk::{self, ItemKey, ResolvedItem, ResolvedNode};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Session tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Longest chain of derived writes one edit may trigger.
    pub max_propagation_depth: usize,
    pub recompute_checksums_on_edit: bool,
    /// Fail an edit when a checksum has neither an algorithm nor a hook.
    pub strict_checksums: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            max_propagation_depth: 8,
            recompute_checksums_on_edit: true,
            strict_checksums: false,
        }
    }
}

/// Outcome of one successful edit.
#[derive(Debug, Clone, Default)]
pub struct EditReport {
    /// Keys written, the user edit first, then propagations in order.
    pub written: Vec<ItemKey>,
    pub checksums: Option<ChecksumReport>,
}

/// One leaf as rendered; read errors stay local to the field.
#[derive(Debug)]
pub struct RenderedField {
    pub item: ResolvedItem,
    pub value: Result<Value>,
}

struct Loaded {
    data: Vec<u8>,
    region: String,
    header_shift: usize,
    tree: Vec<ResolvedNode>,
}

impl Loaded {
    fn ctx(&self) -> HookContext<'_> {
        HookContext::new(&self.data, Some(self.region.as_str()), self.header_shift)
    }
}

pub struct EditingSession {
    schema: Schema,
    hooks: Box<dyn Hooks>,
    options: SessionOptions,
    state: Option<Loaded>,
}

impl EditingSession {
    /// Session with generic behaviour only.
    pub fn new(schema: Schema) -> Self {
        Self::with_hooks(schema, Box::new(DefaultHooks))
    }

    pub fn with_hooks(schema: Schema, hooks: Box<dyn Hooks>) -> Self {
        EditingSession { schema, hooks, options: SessionOptions::default(), state: None }
    }

    /// Hooks selected by `schema.id`.
    pub fn with_registry(schema: Schema, registry: &HookRegistry) -> Self {
        let hooks = registry.create(&schema.id);
        Self::with_hooks(schema, hooks)
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_some()
    }

    pub fn region(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.region.as_str())
    }

    pub fn header_shift(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.header_shift)
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.state.as_ref().map(|s| s.data.as_slice())
    }

    pub fn tree(&self) -> Option<&[ResolvedNode]> {
        self.state.as_ref().map(|s| s.tree.as_slice())
    }

    fn loaded(&self) -> Result<&Loaded> {
        self.state.as_ref().ok_or(Error::NotLoaded)
    }

    /// Replace the buffer. Any previous state is dropped first; on failure the
    /// session is left empty and `on_init_failed` runs.
    pub fn load(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.state = None;
        match self.try_load(bytes) {
            Ok(loaded) => {
                info!(
                    "loaded {} bytes as region {} (header shift {:#x})",
                    loaded.data.len(),
                    loaded.region,
                    loaded.header_shift
                );
                self.state = Some(loaded);
                Ok(())
            }
            Err(e) => {
                warn!("load failed: {}", e);
                self.hooks.on_init_failed();
                Err(e)
            }
        }
    }

    fn detect(&self, data: &[u8]) -> Result<(String, usize)> {
        let validator = &self.schema.validator;
        if let Some(shift) = self.hooks.init_header_shift(data) {
            let regions = self
                .hooks
                .override_get_regions(data, shift)
                .unwrap_or_else(|| region::matching_regions(validator, data, shift));
            let region = regions.into_iter().next().ok_or(Error::FormatNotRecognized)?;
            return Ok((region, shift));
        }
        if let Some(regions) = self.hooks.override_get_regions(data, 0) {
            let region = regions.into_iter().next().ok_or(Error::FormatNotRecognized)?;
            return Ok((region, 0));
        }
        let found = region::detect(validator, data)?;
        Ok((found.region, found.header_shift))
    }

    fn try_load(&mut self, bytes: Vec<u8>) -> Result<Loaded> {
        let data = self.hooks.before_init_data_view(bytes)?;
        let (region, header_shift) = self.detect(&data)?;
        let tree = {
            let ctx = HookContext::new(&data, Some(region.as_str()), header_shift);
            let stack = self.hooks.init_shifts(&ctx, ShiftStack::with_header(header_shift));
            self.hooks.before_items_parsing(&ctx);
            let tree = walk::walk(&self.schema, &ctx, self.hooks.as_ref(), stack);
            self.hooks.on_ready(&ctx);
            tree
        };
        Ok(Loaded { data, region, header_shift, tree })
    }

    /// Drop the buffer, region, header shift and tree together.
    pub fn reset(&mut self) {
        self.hooks.on_reset();
        self.state = None;
        debug!("session reset");
    }

    /// The leaf for `key` after `override_item`.
    pub fn resolve(&self, key: &ItemKey) -> Result<ResolvedItem> {
        let loaded = self.loaded()?;
        resolve_in(loaded, self.hooks.as_ref(), key)
    }

    /// Read one resolved leaf, hook first.
    pub fn read_item(&self, item: &ResolvedItem) -> Result<Value> {
        let loaded = self.loaded()?;
        read_in(loaded, self.hooks.as_ref(), &self.schema, item)
    }

    pub fn get(&self, key: &ItemKey) -> Result<Value> {
        let item = self.resolve(key)?;
        self.read_item(&item)
    }

    /// Every leaf in tree order with its value or its own error.
    pub fn render(&self) -> Result<Vec<RenderedField>> {
        let loaded = self.loaded()?;
        let ctx = loaded.ctx();
        let mut out = Vec::new();
        for leaf in walk::leaves(&loaded.tree) {
            let item = self.hooks.override_item(&ctx, leaf.clone());
            let value = read_in(loaded, self.hooks.as_ref(), &self.schema, &item);
            if let Err(e) = &value {
                debug!("{}: {}", item.label(), e);
            }
            out.push(RenderedField { item, value });
        }
        Ok(out)
    }

    /// Write `value` to `key`, apply derived writes, then recompute checksums once.
    pub fn set(&mut self, key: &ItemKey, value: Value) -> Result<EditReport> {
        self.edit(key, value, None)
    }

    /// Set a single flag of a bitflag set.
    pub fn set_flag(&mut self, key: &ItemKey, index: usize, on: bool) -> Result<EditReport> {
        let item = self.resolve(key)?;
        let mut flags = match self.read_item(&item)? {
            Value::Flags(f) => f,
            other => {
                return Err(Error::TypeMismatch(format!("{} holds {}, not flags", key, other.kind())))
            }
        };
        let slot = flags
            .get_mut(index)
            .ok_or_else(|| Error::InvalidWriteValue(format!("flag index {} out of range for {}", index, key)))?;
        *slot = on;
        self.edit(key, Value::Flags(flags), Some(index))
    }

    fn edit(&mut self, key: &ItemKey, value: Value, flag: Option<usize>) -> Result<EditReport> {
        let loaded = self.state.as_mut().ok_or(Error::NotLoaded)?;
        let snapshot = loaded.data.clone();
        match apply_edit(loaded, self.hooks.as_ref(), &self.schema, &self.options, key, value, flag) {
            Ok(report) => Ok(report),
            Err(e) => {
                loaded.data = snapshot;
                Err(e)
            }
        }
    }

    /// Recompute every checksum now.
    pub fn recompute_checksums(&mut self) -> Result<ChecksumReport> {
        let loaded = self.state.as_mut().ok_or(Error::NotLoaded)?;
        checksum::recompute_all(
            &self.schema,
            &loaded.tree,
            &mut loaded.data,
            Some(loaded.region.as_str()),
            loaded.header_shift,
            self.hooks.as_ref(),
        )
    }

    /// Bytes to write out, after `before_saving`. The session buffer is unchanged.
    pub fn save(&self) -> Result<Vec<u8>> {
        let loaded = self.loaded()?;
        self.hooks.before_saving(loaded.data.clone())
    }
}

fn resolve_in(loaded: &Loaded, hooks: &dyn Hooks, key: &ItemKey) -> Result<ResolvedItem> {
    let leaf = walk::find(&loaded.tree, key).ok_or_else(|| Error::UnknownItem(key.to_string()))?;
    Ok(hooks.override_item(&loaded.ctx(), leaf.clone()))
}

fn read_in(loaded: &Loaded, hooks: &dyn Hooks, schema: &Schema, item: &ResolvedItem) -> Result<Value> {
    match hooks.override_get_int(&loaded.ctx(), item) {
        Some(v) => Ok(v),
        None => field::read(&loaded.data, item, &schema.resources),
    }
}

fn apply_edit(
    loaded: &mut Loaded,
    hooks: &dyn Hooks,
    schema: &Schema,
    options: &SessionOptions,
    key: &ItemKey,
    value: Value,
    flag: Option<usize>,
) -> Result<EditReport> {
    let mut queue = VecDeque::from([(key.clone(), value, flag, 0usize)]);
    let mut visited = HashSet::new();
    let mut report = EditReport::default();
    while let Some((key, value, flag, depth)) = queue.pop_front() {
        if depth > options.max_propagation_depth {
            return Err(Error::PropagationDepth(options.max_propagation_depth));
        }
        if !visited.insert(key.clone()) {
            return Err(Error::PropagationCycle(key.to_string()));
        }
        let item = resolve_in(loaded, hooks, &key)?;
        if item.disabled {
            return Err(Error::InvalidWriteValue(format!("{} is read-only", key)));
        }
        if !hooks.override_set_int(&mut loaded.data, &item, &value)? {
            match flag {
                Some(index) => {
                    let on = value.as_flags().and_then(|f| f.get(index).copied()).ok_or_else(|| {
                        Error::TypeMismatch(format!("{} flag {} needs a flag set value", key, index))
                    })?;
                    field::write_flag(&mut loaded.data, &item, index, on)?;
                }
                None => field::write(&mut loaded.data, &item, &value, &schema.resources)?,
            }
        }
        debug!("set {} = {:?}", key, value);
        for p in hooks.after_set_int(&loaded.ctx(), &item, flag) {
            debug!("{} propagates to {}", key, p.key);
            queue.push_back((p.key, p.value, None, depth + 1));
        }
        report.written.push(key);
    }
    if options.recompute_checksums_on_edit {
        let checksums = checksum::recompute_all(
            schema,
            &loaded.tree,
            &mut loaded.data,
            Some(loaded.region.as_str()),
            loaded.header_shift,
            hooks,
        )?;
        if options.strict_checksums {
            if let Some(id) = checksums.missing.first() {
                return Err(Error::ChecksumAlgorithmMissing(id.clone()));
            }
        }
        report.checksums = Some(checksums);
    }
    Ok(report)
}
