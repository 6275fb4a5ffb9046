//! Schema model: the tagged `Item` tree plus validator, checksum list and resources.
//!
//! Schemas are JSON documents. Every node kind is one variant of [`Item`]; traversal
//! code goes through the capability accessors ([`Item::address`], [`Item::children`],
//! [`Item::checksum_range`], [`Item::flags`], [`Item::meta`]) instead of matching on
//! variants wherever it only needs one of those capabilities.

use crate::checksum::ChecksumAlgorithm;
use crate::codec::{Access, BitWindow, CharTable, DataType, Endianness, StringAccess};
use crate::ops::Op;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Root schema for one game / format.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Game identifier, used to select hooks from a registry.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub validator: Validator,
    #[serde(default)]
    pub items: Vec<Item>,
    /// Checksum ids recomputed in bulk, in this order. Empty = every checksum in tree order.
    #[serde(default)]
    pub checksums: Vec<String>,
    #[serde(default)]
    pub resources: Resources,
}

/// Named code → label dictionaries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Resources(pub BTreeMap<String, CharTable>);

impl Resources {
    pub fn table(&self, name: &str) -> Option<&CharTable> {
        self.0.get(name)
    }

    pub fn label(&self, name: &str, code: u64) -> Option<&str> {
        self.0.get(name)?.get(&code).map(String::as_str)
    }
}

/// Region detection rules.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "RawValidator")]
pub struct Validator {
    /// Regions in declaration order; the first match wins.
    pub regions: Vec<RegionDef>,
    /// Header shifts retried when nothing matches at offset 0.
    pub header_shifts: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct RegionDef {
    pub name: String,
    pub matcher: Matcher,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawValidator {
    #[serde(default)]
    regions: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    header_shifts: Vec<usize>,
}

impl TryFrom<RawValidator> for Validator {
    type Error = String;

    fn try_from(raw: RawValidator) -> Result<Self, Self::Error> {
        let mut regions = Vec::with_capacity(raw.regions.len());
        for (name, v) in raw.regions {
            let matcher = Matcher::try_from(v).map_err(|e| format!("region {}: {}", name, e))?;
            regions.push(RegionDef { name, matcher });
        }
        Ok(Validator { regions, header_shifts: raw.header_shifts })
    }
}

/// Byte-pattern predicate: `{ "<offset>": [bytes], ... }`, `{ "$and": [...] }`, `{ "$or": [...] }`.
///
/// Offsets are relative to the base address the matcher is evaluated at.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub enum Matcher {
    /// Every `(offset, bytes)` pair must match.
    Bytes(Vec<(usize, Vec<u8>)>),
    And(Vec<Matcher>),
    Or(Vec<Matcher>),
}

/// Parse a decimal or `0x`-prefixed offset.
pub fn parse_offset(s: &str) -> Option<usize> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

impl TryFrom<serde_json::Value> for Matcher {
    type Error = String;

    fn try_from(v: serde_json::Value) -> Result<Self, Self::Error> {
        let serde_json::Value::Object(map) = v else {
            return Err("matcher must be an object".to_string());
        };
        let combinator = |list: &serde_json::Value| -> Result<Vec<Matcher>, String> {
            list.as_array()
                .ok_or_else(|| "combinator expects an array".to_string())?
                .iter()
                .cloned()
                .map(Matcher::try_from)
                .collect()
        };
        if map.len() == 1 {
            if let Some(list) = map.get("$and") {
                return Ok(Matcher::And(combinator(list)?));
            }
            if let Some(list) = map.get("$or") {
                return Ok(Matcher::Or(combinator(list)?));
            }
        }
        let mut pairs = Vec::with_capacity(map.len());
        for (key, bytes) in map {
            let offset = parse_offset(&key).ok_or_else(|| format!("invalid offset key {:?}", key))?;
            let bytes: Vec<u8> = serde_json::from_value(bytes)
                .map_err(|e| format!("offset {}: expected byte array ({})", key, e))?;
            pairs.push((offset, bytes));
        }
        Ok(Matcher::Bytes(pairs))
    }
}

/// Visibility / enablement: a flag, or one flag per container instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Toggle {
    Flag(bool),
    PerInstance(Vec<bool>),
}

impl Default for Toggle {
    fn default() -> Self {
        Toggle::Flag(false)
    }
}

impl Toggle {
    /// Resolve for an instance index (innermost container); missing entries are `false`.
    pub fn get(&self, instance: Option<usize>) -> bool {
        match self {
            Toggle::Flag(b) => *b,
            Toggle::PerInstance(v) => instance.and_then(|i| v.get(i).copied()).unwrap_or(false),
        }
    }
}

/// Structural metadata shared by every item.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMeta {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hidden: Toggle,
    #[serde(default)]
    pub disabled: Toggle,
    /// Item exists only for these regions (empty = all).
    #[serde(default)]
    pub regions: Vec<String>,
}

impl ItemMeta {
    /// Regions this item is limited to, falling back to the enclosing item's.
    pub fn effective_regions<'a>(&'a self, inherited: &'a [String]) -> &'a [String] {
        if self.regions.is_empty() {
            inherited
        } else {
            &self.regions
        }
    }
}

/// Whether two region lists can be active for the same buffer (empty = every region).
pub fn regions_overlap(a: &[String], b: &[String]) -> bool {
    a.is_empty() || b.is_empty() || a.iter().any(|r| b.contains(r))
}

/// Byte offset plus bit index inside that byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub offset: usize,
    pub bit: u8,
}

/// `[start, end)` byte span a checksum covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ControlRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntField {
    #[serde(flatten)]
    pub meta: ItemMeta,
    pub offset: usize,
    /// Bit index for `bit` fields.
    #[serde(default)]
    pub bit: u8,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub endian: Endianness,
    #[serde(default)]
    pub bit_window: Option<BitWindow>,
    #[serde(default)]
    pub bcd: bool,
    #[serde(default)]
    pub operations: Vec<Op>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
    #[serde(default)]
    pub resource: Option<String>,
}

impl IntField {
    pub fn access(&self) -> Access {
        Access {
            data_type: self.data_type,
            endian: self.endian,
            window: self.bit_window,
            bcd: self.bcd,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDef {
    pub offset: usize,
    pub bit: u8,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitflagSet {
    #[serde(flatten)]
    pub meta: ItemMeta,
    pub flags: Vec<FlagDef>,
    /// Stored bit 0 means "set".
    #[serde(default)]
    pub reversed: bool,
}

fn default_on() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanField {
    #[serde(flatten)]
    pub meta: ItemMeta,
    pub offset: usize,
    #[serde(default)]
    pub bit: u8,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub endian: Endianness,
    #[serde(default = "default_on")]
    pub on: u64,
    #[serde(default)]
    pub off: u64,
}

impl BooleanField {
    pub fn access(&self) -> Access {
        Access::new(self.data_type, self.endian)
    }
}

fn default_char_width() -> u8 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StringField {
    #[serde(flatten)]
    pub meta: ItemMeta,
    pub offset: usize,
    pub length: usize,
    #[serde(default = "default_char_width")]
    pub char_width: u8,
    #[serde(default)]
    pub endian: Endianness,
    #[serde(default)]
    pub terminator: Option<u32>,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub fallback: Option<char>,
    /// Character table (resource name).
    #[serde(default)]
    pub resource: Option<String>,
}

impl StringField {
    pub fn access(&self) -> StringAccess {
        StringAccess {
            length: self.length,
            char_width: self.char_width,
            endian: self.endian,
            terminator: self.terminator,
            fallback: self.fallback,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumField {
    #[serde(flatten)]
    pub meta: ItemMeta,
    pub offset: usize,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub endian: Endianness,
    pub control: ControlRange,
    #[serde(default)]
    pub algorithm: Option<ChecksumAlgorithm>,
    /// Checksum is absent when this matches (evaluated at the field's shift).
    #[serde(default)]
    pub skip_if: Option<Matcher>,
}

impl ChecksumField {
    pub fn access(&self) -> Access {
        Access::new(self.data_type, self.endian)
    }
}

/// How container instances get their shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstanceMode {
    /// Instance `i` at `i * length`.
    #[default]
    Fixed,
    /// Base read from a pointer, then stride.
    Pointer,
    /// Shifts come from a hook.
    Hook,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerDef {
    pub offset: usize,
    #[serde(default = "pointer_default_type")]
    pub data_type: DataType,
    #[serde(default)]
    pub endian: Endianness,
    /// Subtracted from the pointer value (memory-map base).
    #[serde(default)]
    pub base: u64,
}

fn pointer_default_type() -> DataType {
    DataType::Uint32
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(flatten)]
    pub meta: ItemMeta,
    pub instances: usize,
    /// Stride in bytes between instances.
    #[serde(default)]
    pub length: usize,
    #[serde(default)]
    pub mode: InstanceMode,
    #[serde(default)]
    pub pointer: Option<PointerDef>,
    /// Instance is read-only when this matches at the instance's shift.
    #[serde(default)]
    pub disable_if: Option<Matcher>,
    #[serde(default)]
    pub items: Vec<Item>,
}

/// Bundle of int fields shown together (e.g. one timer split into h/m/s).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(flatten)]
    pub meta: ItemMeta,
    #[serde(default)]
    pub presentation: Option<String>,
    pub items: Vec<Item>,
}

/// Pure grouping; no storage semantics.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    #[serde(flatten)]
    pub meta: ItemMeta,
    #[serde(default)]
    pub items: Vec<Item>,
}

/// Opaque UI extension point.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentEmbed {
    #[serde(flatten)]
    pub meta: ItemMeta,
    pub component: String,
    #[serde(default)]
    pub props: serde_json::Value,
}

/// A schema node.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Item {
    Int(IntField),
    Bitflags(BitflagSet),
    Bool(BooleanField),
    String(StringField),
    Checksum(ChecksumField),
    Container(Container),
    Group(Group),
    Section(Section),
    Tabs(Section),
    Component(ComponentEmbed),
}

impl Item {
    pub fn meta(&self) -> &ItemMeta {
        match self {
            Item::Int(f) => &f.meta,
            Item::Bitflags(f) => &f.meta,
            Item::Bool(f) => &f.meta,
            Item::String(f) => &f.meta,
            Item::Checksum(f) => &f.meta,
            Item::Container(c) => &c.meta,
            Item::Group(g) => &g.meta,
            Item::Section(s) | Item::Tabs(s) => &s.meta,
            Item::Component(c) => &c.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ItemMeta {
        match self {
            Item::Int(f) => &mut f.meta,
            Item::Bitflags(f) => &mut f.meta,
            Item::Bool(f) => &mut f.meta,
            Item::String(f) => &mut f.meta,
            Item::Checksum(f) => &mut f.meta,
            Item::Container(c) => &mut c.meta,
            Item::Group(g) => &mut g.meta,
            Item::Section(s) | Item::Tabs(s) => &mut s.meta,
            Item::Component(c) => &mut c.meta,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.meta().id.as_deref()
    }

    /// Declared address, for items stored at a single location.
    pub fn address(&self) -> Option<Address> {
        match self {
            Item::Int(f) => Some(Address { offset: f.offset, bit: f.bit }),
            Item::Bool(f) => Some(Address { offset: f.offset, bit: f.bit }),
            Item::String(f) => Some(Address { offset: f.offset, bit: 0 }),
            Item::Checksum(f) => Some(Address { offset: f.offset, bit: 0 }),
            _ => None,
        }
    }

    /// Mutable offset, for hooks relocating a field.
    pub fn offset_mut(&mut self) -> Option<&mut usize> {
        match self {
            Item::Int(f) => Some(&mut f.offset),
            Item::Bool(f) => Some(&mut f.offset),
            Item::String(f) => Some(&mut f.offset),
            Item::Checksum(f) => Some(&mut f.offset),
            _ => None,
        }
    }

    pub fn children(&self) -> Option<&[Item]> {
        match self {
            Item::Container(c) => Some(&c.items),
            Item::Group(g) => Some(&g.items),
            Item::Section(s) | Item::Tabs(s) => Some(&s.items),
            _ => None,
        }
    }

    pub fn checksum_range(&self) -> Option<ControlRange> {
        match self {
            Item::Checksum(c) => Some(c.control),
            _ => None,
        }
    }

    pub fn flags(&self) -> Option<&[FlagDef]> {
        match self {
            Item::Bitflags(b) => Some(&b.flags),
            _ => None,
        }
    }

    /// Items that hold a value in the buffer.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Item::Int(_) | Item::Bitflags(_) | Item::Bool(_) | Item::String(_) | Item::Checksum(_)
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Item::Int(_) => "int",
            Item::Bitflags(_) => "bitflags",
            Item::Bool(_) => "bool",
            Item::String(_) => "string",
            Item::Checksum(_) => "checksum",
            Item::Container(_) => "container",
            Item::Group(_) => "group",
            Item::Section(_) => "section",
            Item::Tabs(_) => "tabs",
            Item::Component(_) => "component",
        }
    }

    /// Depth-first visit of this item and all descendants.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Item)) {
        f(self);
        if let Some(children) = self.children() {
            for c in children {
                c.visit(f);
            }
        }
    }
}

impl Schema {
    /// Depth-first visit of every item in the schema.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Item)) {
        for item in &self.items {
            item.visit(f);
        }
    }
}
