//! End-to-end editing sessions: detection, edits, propagation, checksums, lifecycle hooks.

use saveschema::checksum::ChecksumAlgorithm;
use saveschema::{
    parse, ChecksumOutcome, EditingSession, Error, HookContext, HookRegistry, Hooks, ItemKey, Propagation,
    ResolvedItem, Schema, SessionOptions, Value,
};
use std::cell::RefCell;
use std::rc::Rc;

fn schema(src: &str) -> Schema {
    parse(src).expect("schema")
}

// --- Scenario A: region detection ----------------------------------------------------

#[test]
fn scenario_a_detects_usa_at_offset_zero() {
    let s = schema(
        r#"{ "validator": { "regions": {
                "europe": { "0x10": [69, 85] },
                "usa": { "0x10": [65, 66] }
             } },
             "items": [] }"#,
    );
    let mut data = vec![0u8; 0x20];
    data[0x10] = 0x41;
    data[0x11] = 0x42;
    let mut session = EditingSession::new(s);
    session.load(data).unwrap();
    assert_eq!(session.region(), Some("usa"));
    assert_eq!(session.header_shift(), Some(0));
}

#[test]
fn unrecognized_format_leaves_session_empty() {
    let s = schema(r#"{ "validator": { "regions": { "usa": { "0": [1] } } }, "items": [] }"#);
    let failed = Rc::new(RefCell::new(false));
    struct Watch(Rc<RefCell<bool>>);
    impl Hooks for Watch {
        fn on_init_failed(&mut self) {
            *self.0.borrow_mut() = true;
        }
    }
    let mut session = EditingSession::with_hooks(s, Box::new(Watch(failed.clone())));
    session.load(vec![1]).unwrap();
    assert!(session.is_loaded());
    assert!(matches!(session.load(vec![2]), Err(Error::FormatNotRecognized)));
    assert!(!session.is_loaded());
    assert!(session.data().is_none());
    assert!(*failed.borrow());
}

// --- Scenario B: XOR checksum --------------------------------------------------------

const XOR_SCHEMA: &str = r#"{
    "validator": { "regions": { "any": {} } },
    "items": [
        { "type": "int", "id": "b3", "offset": 3 },
        { "type": "checksum", "id": "xor", "offset": 15, "dataType": "uint8",
          "control": { "start": 0, "end": 16 }, "algorithm": "xor" }
    ],
    "checksums": ["xor"]
}"#;

#[test]
fn scenario_b_xor_checksum_matches_hand_fold() {
    let mut data: Vec<u8> = (0x01..=0x0f).collect();
    data.push(0x00);
    let expected = data[..0x0f].iter().fold(0u8, |acc, b| acc ^ b);

    let mut session = EditingSession::new(schema(XOR_SCHEMA));
    session.load(data).unwrap();
    let report = session.recompute_checksums().unwrap();
    assert_eq!(report.updated, ["xor"]);
    assert_eq!(session.data().unwrap()[0x0f], expected);
}

#[test]
fn checksum_recompute_is_idempotent_and_ignores_stale_value() {
    let mut data: Vec<u8> = (0x01..=0x0f).collect();
    data.push(0xaa);
    let mut session = EditingSession::new(schema(XOR_SCHEMA));
    session.load(data).unwrap();
    session.recompute_checksums().unwrap();
    let first = session.data().unwrap().to_vec();
    session.recompute_checksums().unwrap();
    assert_eq!(session.data().unwrap(), &first[..]);
    assert_eq!(first[0x0f], (0x01..=0x0fu8).fold(0, |a, b| a ^ b));
}

#[test]
fn edit_recomputes_checksum_once() {
    let data: Vec<u8> = vec![0u8; 16];
    let mut session = EditingSession::new(schema(XOR_SCHEMA));
    session.load(data).unwrap();
    let report = session.set(&ItemKey::new("b3"), Value::UInt(0x5a)).unwrap();
    assert_eq!(report.written, [ItemKey::new("b3")]);
    assert_eq!(report.checksums.unwrap().updated, ["xor"]);
    assert_eq!(session.data().unwrap()[15], 0x5a);
}

#[test]
fn missing_algorithm_is_reported_apart_from_absent() {
    let s = schema(
        r#"{ "validator": { "regions": { "any": {} } },
             "items": [
                { "type": "checksum", "id": "custom", "offset": 0, "dataType": "uint16", "control": { "start": 2, "end": 8 } },
                { "type": "checksum", "id": "slot", "offset": 8, "control": { "start": 9, "end": 12 }, "algorithm": "sum",
                  "skipIf": { "9": [255, 255, 255] } },
                { "type": "int", "id": "v", "offset": 2 }
             ] }"#,
    );
    let mut data = vec![0u8; 12];
    data[9..12].copy_from_slice(&[255, 255, 255]);
    let mut session = EditingSession::new(s);
    session.load(data).unwrap();
    let report = session.recompute_checksums().unwrap();
    assert_eq!(report.missing, ["custom"]);
    assert_eq!(report.absent, ["slot"]);
    assert!(report.updated.is_empty());
    assert_eq!(session.data().unwrap()[8], 0);
}

#[test]
fn strict_checksums_fail_the_edit_and_restore_bytes() {
    let s = schema(
        r#"{ "validator": { "regions": { "any": {} } },
             "items": [
                { "type": "checksum", "id": "custom", "offset": 0, "control": { "start": 1, "end": 4 } },
                { "type": "int", "id": "v", "offset": 2 }
             ] }"#,
    );
    let options = SessionOptions { strict_checksums: true, ..SessionOptions::default() };
    let mut session = EditingSession::new(s).with_options(options);
    session.load(vec![0u8; 4]).unwrap();
    let err = session.set(&ItemKey::new("v"), Value::UInt(9)).unwrap_err();
    assert!(matches!(err, Error::ChecksumAlgorithmMissing(id) if id == "custom"));
    assert_eq!(session.data().unwrap(), &[0u8; 4]);
}

struct Crc16Hooks;

impl Hooks for Crc16Hooks {
    fn generate_checksum(&self, ctx: &HookContext, item: &ResolvedItem) -> Option<ChecksumOutcome> {
        if item.item.id() != Some("crc") {
            return None;
        }
        // CRC-16/CCITT-FALSE over bytes 2.., as a stand-in for a game-specific algorithm.
        let mut crc: u16 = 0xffff;
        for b in &ctx.data[2..] {
            crc ^= (*b as u16) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
            }
        }
        Some(ChecksumOutcome::Value(crc as u64))
    }
}

#[test]
fn checksum_hook_takes_precedence() {
    let s = schema(
        r#"{ "id": "crcgame", "validator": { "regions": { "any": {} } },
             "items": [ { "type": "checksum", "id": "crc", "offset": 0, "dataType": "uint16", "endian": "big",
                          "control": { "start": 2, "end": 11 }, "algorithm": "sum" } ] }"#,
    );
    let mut registry = HookRegistry::new();
    registry.register("crcgame", || Box::new(Crc16Hooks));
    let mut data = vec![0u8, 0];
    data.extend_from_slice(b"123456789");
    let mut session = EditingSession::with_registry(s, &registry);
    session.load(data).unwrap();
    session.recompute_checksums().unwrap();
    assert_eq!(&session.data().unwrap()[..2], &[0x29, 0xb1]);
}

#[test]
fn builtin_crc32c_little_endian() {
    let s = schema(
        r#"{ "validator": { "regions": { "any": {} } },
             "items": [ { "type": "checksum", "id": "crc", "offset": 9, "dataType": "uint32",
                          "control": { "start": 0, "end": 9 }, "algorithm": "crc32c" } ] }"#,
    );
    assert!(matches!(&s.items[0], saveschema::Item::Checksum(c) if c.algorithm == Some(ChecksumAlgorithm::Crc32c)));
    let mut data = b"123456789".to_vec();
    data.extend_from_slice(&[0; 4]);
    let mut session = EditingSession::new(s);
    session.load(data).unwrap();
    session.recompute_checksums().unwrap();
    assert_eq!(&session.data().unwrap()[9..], &0xe306_9283u32.to_le_bytes());
}

// --- Edits ---------------------------------------------------------------------------

const STATS_SCHEMA: &str = r#"{
    "validator": { "regions": { "any": {} } },
    "items": [
        { "type": "section", "name": "Stats", "items": [
            { "type": "int", "id": "level", "offset": 0, "max": 99 },
            { "type": "int", "id": "hp_max", "offset": 1, "dataType": "uint16", "endian": "big" },
            { "type": "int", "id": "hp", "offset": 3, "dataType": "uint16", "endian": "big" },
            { "type": "int", "id": "locked", "offset": 5, "disabled": true }
        ] },
        { "type": "group", "id": "time", "items": [
            { "type": "int", "id": "minutes", "offset": 6, "dataType": "uint16",
              "operations": [ { "op": "component", "unit": 60 } ] },
            { "type": "int", "id": "seconds", "offset": 6, "dataType": "uint16",
              "operations": [ { "op": "component", "unit": 1, "count": 60 } ] }
        ] },
        { "type": "int", "id": "gold", "offset": 8, "dataType": "uint24", "bcd": true }
    ]
}"#;

/// level -> hp_max = level * 10 -> hp = hp_max.
struct LinkedStats;

impl Hooks for LinkedStats {
    fn after_set_int(&self, _ctx: &HookContext, item: &ResolvedItem, _flag: Option<usize>) -> Vec<Propagation> {
        match item.item.id() {
            Some("level") => vec![Propagation { key: ItemKey::new("hp_max"), value: Value::UInt(0) }],
            Some("hp_max") => vec![Propagation { key: ItemKey::new("hp"), value: Value::UInt(0) }],
            _ => Vec::new(),
        }
    }

    fn override_set_int(&self, data: &mut [u8], item: &ResolvedItem, _value: &Value) -> saveschema::Result<bool> {
        match item.item.id() {
            Some("hp_max") => {
                let v = data[0] as u16 * 10;
                data[1..3].copy_from_slice(&v.to_be_bytes());
                Ok(true)
            }
            Some("hp") => {
                let (a, b) = (data[1], data[2]);
                data[3] = a;
                data[4] = b;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[test]
fn propagation_runs_breadth_first_before_checksums() {
    let mut session = EditingSession::with_hooks(schema(STATS_SCHEMA), Box::new(LinkedStats));
    session.load(vec![0u8; 11]).unwrap();
    let report = session.set(&ItemKey::new("level"), Value::UInt(12)).unwrap();
    assert_eq!(
        report.written,
        [ItemKey::new("level"), ItemKey::new("hp_max"), ItemKey::new("hp")]
    );
    assert_eq!(session.get(&ItemKey::new("hp_max")).unwrap(), Value::UInt(120));
    assert_eq!(session.get(&ItemKey::new("hp")).unwrap(), Value::UInt(120));
}

struct Cyclic;

impl Hooks for Cyclic {
    fn after_set_int(&self, _ctx: &HookContext, item: &ResolvedItem, _flag: Option<usize>) -> Vec<Propagation> {
        let next = if item.item.id() == Some("hp") { "hp_max" } else { "hp" };
        vec![Propagation { key: ItemKey::new(next), value: Value::UInt(1) }]
    }
}

#[test]
fn propagation_cycle_is_an_error_and_nothing_is_written() {
    let mut session = EditingSession::with_hooks(schema(STATS_SCHEMA), Box::new(Cyclic));
    session.load(vec![0u8; 11]).unwrap();
    let err = session.set(&ItemKey::new("hp"), Value::UInt(7)).unwrap_err();
    assert!(matches!(err, Error::PropagationCycle(_)));
    assert_eq!(session.data().unwrap(), &[0u8; 11]);
}

struct Chain;

impl Hooks for Chain {
    fn after_set_int(&self, _ctx: &HookContext, item: &ResolvedItem, _flag: Option<usize>) -> Vec<Propagation> {
        let id = item.item.id().unwrap_or_default();
        let n: usize = id.trim_start_matches('c').parse().unwrap_or(0);
        vec![Propagation { key: ItemKey::new(format!("c{}", n + 1)), value: Value::UInt(1) }]
    }
}

#[test]
fn propagation_depth_is_bounded() {
    let items: Vec<String> = (0..10)
        .map(|i| format!(r#"{{ "type": "int", "id": "c{}", "offset": {} }}"#, i, i))
        .collect();
    let src = format!(r#"{{ "validator": {{ "regions": {{ "any": {{}} }} }}, "items": [{}] }}"#, items.join(","));
    let options = SessionOptions { max_propagation_depth: 3, ..SessionOptions::default() };
    let mut session = EditingSession::with_hooks(schema(&src), Box::new(Chain)).with_options(options);
    session.load(vec![0u8; 10]).unwrap();
    assert!(matches!(session.set(&ItemKey::new("c0"), Value::UInt(1)), Err(Error::PropagationDepth(3))));
    assert_eq!(session.data().unwrap(), &[0u8; 10]);
}

#[test]
fn invalid_values_are_rejected_without_mutation() {
    let mut session = EditingSession::new(schema(STATS_SCHEMA));
    session.load(vec![0u8; 11]).unwrap();
    assert!(matches!(
        session.set(&ItemKey::new("level"), Value::UInt(100)),
        Err(Error::InvalidWriteValue(_))
    ));
    assert!(matches!(
        session.set(&ItemKey::new("locked"), Value::UInt(1)),
        Err(Error::InvalidWriteValue(_))
    ));
    assert!(matches!(
        session.set(&ItemKey::new("nope"), Value::UInt(1)),
        Err(Error::UnknownItem(_))
    ));
    assert!(matches!(
        session.set(&ItemKey::new("level"), Value::from("ten")),
        Err(Error::TypeMismatch(_))
    ));
    assert_eq!(session.data().unwrap(), &[0u8; 11]);
}

#[test]
fn partial_update_through_session() {
    let mut data = vec![0u8; 11];
    data[6..8].copy_from_slice(&150u16.to_le_bytes());
    let mut session = EditingSession::new(schema(STATS_SCHEMA));
    session.load(data).unwrap();
    assert_eq!(session.get(&ItemKey::new("minutes")).unwrap(), Value::Int(2));
    assert_eq!(session.get(&ItemKey::new("seconds")).unwrap(), Value::Int(30));
    session.set(&ItemKey::new("seconds"), Value::UInt(45)).unwrap();
    assert_eq!(&session.data().unwrap()[6..8], &165u16.to_le_bytes());
    assert_eq!(session.get(&ItemKey::new("minutes")).unwrap(), Value::Int(2));
    assert_eq!(session.get(&ItemKey::new("seconds")).unwrap(), Value::Int(45));
}

#[test]
fn bcd_field_through_session() {
    let mut session = EditingSession::new(schema(STATS_SCHEMA));
    session.load(vec![0u8; 11]).unwrap();
    session.set(&ItemKey::new("gold"), Value::UInt(123456)).unwrap();
    assert_eq!(&session.data().unwrap()[8..11], &[0x56, 0x34, 0x12]);
    assert!(session.set(&ItemKey::new("gold"), Value::UInt(1_000_000)).is_err());
}

#[test]
fn render_isolates_field_errors() {
    let s = schema(
        r#"{ "validator": { "regions": { "any": {} } },
             "items": [
                { "type": "int", "id": "ok", "offset": 0 },
                { "type": "int", "id": "far", "offset": 100, "dataType": "uint32" },
                { "type": "string", "id": "name", "offset": 1, "length": 3, "terminator": 0 }
             ] }"#,
    );
    let mut session = EditingSession::new(s);
    session.load(vec![7, b'A', b'B', 0]).unwrap();
    let fields = session.render().unwrap();
    assert_eq!(fields.len(), 3);
    assert_eq!(fields[0].value.as_ref().unwrap(), &Value::UInt(7));
    assert!(matches!(fields[1].value, Err(Error::AddressOutOfRange { .. })));
    assert_eq!(fields[2].value.as_ref().unwrap(), &Value::from("AB"));
}

#[test]
fn set_flag_honours_reversed() {
    let s = schema(
        r#"{ "validator": { "regions": { "any": {} } },
             "items": [ { "type": "bitflags", "id": "events", "reversed": true, "flags": [
                { "offset": 0, "bit": 0, "label": "met_king" },
                { "offset": 0, "bit": 7, "label": "beat_boss" }
             ] } ] }"#,
    );
    let mut session = EditingSession::new(s);
    session.load(vec![0xff]).unwrap();
    session.set_flag(&ItemKey::new("events"), 1, true).unwrap();
    assert_eq!(session.data().unwrap(), &[0x7f]);
    assert_eq!(session.get(&ItemKey::new("events")).unwrap(), Value::Flags(vec![false, true]));
}

// --- Lifecycle -----------------------------------------------------------------------

#[derive(Clone, Default)]
struct Events(Rc<RefCell<Vec<&'static str>>>);

/// Save-state wrapper: 4-byte magic prefix stripped before parsing, restored on save.
struct Wrapped {
    events: Events,
}

impl Hooks for Wrapped {
    fn before_init_data_view(&mut self, data: Vec<u8>) -> saveschema::Result<Vec<u8>> {
        self.events.0.borrow_mut().push("before_init_data_view");
        if data.len() < 4 || &data[..4] != b"WRAP" {
            return Err(Error::Hook("missing wrapper".to_string()));
        }
        Ok(data[4..].to_vec())
    }

    fn before_items_parsing(&mut self, _ctx: &HookContext) {
        self.events.0.borrow_mut().push("before_items_parsing");
    }

    fn on_ready(&mut self, _ctx: &HookContext) {
        self.events.0.borrow_mut().push("on_ready");
    }

    fn before_saving(&self, data: Vec<u8>) -> saveschema::Result<Vec<u8>> {
        let mut out = b"WRAP".to_vec();
        out.extend(data);
        Ok(out)
    }

    fn on_reset(&mut self) {
        self.events.0.borrow_mut().push("on_reset");
    }

    fn on_init_failed(&mut self) {
        self.events.0.borrow_mut().push("on_init_failed");
    }
}

#[test]
fn lifecycle_hooks_run_in_order() {
    let s = schema(
        r#"{ "validator": { "regions": { "any": { "0": [9] } } },
             "items": [ { "type": "int", "id": "v", "offset": 1 } ] }"#,
    );
    let events = Events::default();
    let mut session = EditingSession::with_hooks(s, Box::new(Wrapped { events: events.clone() }));
    session.load(b"WRAP\x09\x05".to_vec()).unwrap();
    assert_eq!(session.get(&ItemKey::new("v")).unwrap(), Value::UInt(5));
    session.set(&ItemKey::new("v"), Value::UInt(6)).unwrap();
    assert_eq!(session.save().unwrap(), b"WRAP\x09\x06");
    assert_eq!(session.data().unwrap(), &[9, 6]);
    session.reset();
    assert!(session.load(b"NOPE".to_vec()).is_err());
    assert_eq!(
        *events.0.borrow(),
        [
            "before_init_data_view",
            "before_items_parsing",
            "on_ready",
            "on_reset",
            "before_init_data_view",
            "on_init_failed"
        ]
    );
}

struct ForcedRegion;

impl Hooks for ForcedRegion {
    fn init_header_shift(&self, _data: &[u8]) -> Option<usize> {
        Some(2)
    }

    fn override_get_regions(&self, _data: &[u8], shift: usize) -> Option<Vec<String>> {
        (shift == 2).then(|| vec!["japan".to_string()])
    }
}

#[test]
fn hooks_replace_detection() {
    let s = schema(
        r#"{ "validator": { "regions": { "usa": { "0": [1] } } },
             "items": [
                { "type": "int", "id": "jp", "offset": 0, "regions": ["japan"] },
                { "type": "int", "id": "us", "offset": 0, "regions": ["usa"] }
             ] }"#,
    );
    let mut session = EditingSession::with_hooks(s, Box::new(ForcedRegion));
    session.load(vec![1, 0, 42]).unwrap();
    assert_eq!(session.region(), Some("japan"));
    assert_eq!(session.header_shift(), Some(2));
    assert_eq!(session.get(&ItemKey::new("jp")).unwrap(), Value::UInt(42));
    assert!(matches!(session.get(&ItemKey::new("us")), Err(Error::UnknownItem(_))));
}

struct Overrides;

impl Hooks for Overrides {
    fn override_get_int(&self, _ctx: &HookContext, item: &ResolvedItem) -> Option<Value> {
        (item.item.id() == Some("virtual")).then_some(Value::UInt(1234))
    }

    fn override_item(&self, _ctx: &HookContext, mut item: ResolvedItem) -> ResolvedItem {
        if item.item.id() == Some("moved") {
            if let Some(offset) = item.item.offset_mut() {
                *offset = 1;
            }
        }
        item
    }
}

#[test]
fn read_and_shape_overrides() {
    let s = schema(
        r#"{ "validator": { "regions": { "any": {} } },
             "items": [
                { "type": "int", "id": "virtual", "offset": 0 },
                { "type": "int", "id": "moved", "offset": 0 }
             ] }"#,
    );
    let mut session = EditingSession::with_hooks(s, Box::new(Overrides));
    session.load(vec![5, 6]).unwrap();
    assert_eq!(session.get(&ItemKey::new("virtual")).unwrap(), Value::UInt(1234));
    assert_eq!(session.get(&ItemKey::new("moved")).unwrap(), Value::UInt(6));
    session.set(&ItemKey::new("moved"), Value::UInt(9)).unwrap();
    assert_eq!(session.data().unwrap(), &[5, 9]);
}

// --- Buffers shorter than the schema ---------------------------------------------------

#[test]
fn truncated_last_slot_does_not_roll_back_unrelated_edit() {
    let s = schema(
        r#"{ "validator": { "regions": { "any": {} } },
             "items": [
                { "type": "int", "id": "gold", "offset": 0 },
                { "type": "container", "id": "slots", "instances": 2, "length": 3, "items": [
                    { "type": "checksum", "id": "sum", "offset": 4,
                      "control": { "start": 2, "end": 4 }, "algorithm": "sum" }
                ] }
             ] }"#,
    );
    let mut session = EditingSession::new(s);
    session.load(vec![0, 0, 1, 2, 0, 0]).unwrap();

    let report = session.set(&ItemKey::new("gold"), Value::UInt(5)).unwrap();
    assert_eq!(session.get(&ItemKey::new("gold")).unwrap(), Value::UInt(5));
    let checksums = report.checksums.unwrap();
    assert_eq!(checksums.updated, ["sum[0]"]);
    assert_eq!(checksums.failed.len(), 1);
    assert_eq!(checksums.failed[0].0, "sum[1]");
    assert!(!checksums.is_complete());
    assert_eq!(session.data().unwrap(), &[5, 0, 1, 2, 3, 0]);
}

#[test]
fn render_reports_far_offsets_per_field() {
    let s = schema(
        r#"{ "validator": { "regions": { "any": {} } },
             "items": [
                { "type": "int", "id": "ok", "offset": 0 },
                { "type": "int", "id": "far", "offset": 4611686018427387904 }
             ] }"#,
    );
    let mut session = EditingSession::new(s);
    session.load(vec![7, 0, 0, 0]).unwrap();
    let rendered = session.render().unwrap();
    assert_eq!(rendered.len(), 2);
    let value = |id: &str| &rendered.iter().find(|f| f.item.label() == id).unwrap().value;
    assert_eq!(*value("ok").as_ref().unwrap(), Value::UInt(7));
    assert!(matches!(value("far"), Err(Error::AddressOutOfRange { .. })));
    assert!(matches!(session.get(&ItemKey::new("far")), Err(Error::AddressOutOfRange { .. })));
}
