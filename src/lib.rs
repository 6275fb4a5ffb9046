//! # saveschema: declarative binary schemas for console save files
//!
//! A JSON schema describes one save format as a tree of typed items (integers,
//! flags, strings, checksums) plus containers of repeated structures. The engine
//! resolves every item's bit address under nested shifts, reads and writes it
//! through a bit-level accessor, detects the file's region from byte patterns and
//! recomputes checksums. Per-game [`Hooks`] replace any of those steps.
//!
//! ## Addressing
//!
//! ```text
//! bit address = (offset + header shift + instance shift(s) + hook shift) * 8 + bit
//! ```
//!
//! - **Header shift**: chosen once at load by the region validator or a hook
//! - **Instance shifts**: one per enclosing container, outer to inner
//! - **Hook shift**: [`Hooks::override_item_shifts`] may replace the stack for one item
//!
//! ## Item kinds
//!
//! - `int`: `uint8`..`int64`, `uint24`, `float32`, `bit`, nibbles; bit windows, BCD, operation pipelines
//! - `bool`, `bitflags`, `string` (char width 1..4, char tables, terminator)
//! - `checksum`: `sum`, `xor`, `twosComplement`, `crc32c` or a hook
//! - `container` (fixed stride, pointer, hook), `group`, `section`, `tabs`, `component`
//!
//! ## Example schema
//!
//! ```text
//! {
//!   "id": "demo",
//!   "validator": { "regions": { "usa": { "0x10": [65, 66] } } },
//!   "items": [
//!     { "type": "int", "id": "money", "offset": 32, "dataType": "uint16", "max": 9999 },
//!     { "type": "checksum", "id": "sum", "offset": 15,
//!       "control": { "start": 0, "end": 16 }, "algorithm": "xor" }
//!   ]
//! }
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let schema = saveschema::parse(&std::fs::read_to_string("demo.json")?)?;
//! let mut session = saveschema::EditingSession::new(schema);
//! session.load(std::fs::read("save.bin")?)?;
//! session.set(&saveschema::ItemKey::new("money"), 500u64.into())?;
//! std::fs::write("save.bin", session.save()?)?;
//! ```
//!
//! See `tests/integration.rs` for full examples.

pub mod checksum;
pub mod codec;
pub mod container;
pub mod dump;
pub mod error;
pub mod field;
pub mod hooks;
pub mod lint;
pub mod ops;
pub mod parser;
pub mod region;
pub mod schema;
pub mod session;
pub mod shift;
pub mod value;
pub mod walk;

pub use checksum::{ChecksumAlgorithm, ChecksumReport};
pub use codec::{Access, BitWindow, DataType, Endianness};
pub use container::InstanceShift;
pub use error::{Error, Result};
pub use hooks::{ChecksumOutcome, DefaultHooks, HookContext, HookRegistry, Hooks, Propagation};
pub use parser::{parse, parse_file};
pub use region::{detect, Detection};
pub use schema::{Item, Matcher, Schema};
pub use session::{EditReport, EditingSession, RenderedField, SessionOptions};
pub use shift::ShiftStack;
pub use value::Value;
pub use walk::{InstanceState, ItemKey, ResolvedItem, ResolvedNode};
