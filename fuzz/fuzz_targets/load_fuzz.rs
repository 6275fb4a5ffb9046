//! Load fuzz target: a fixed schema with containers, pointers and checksums over
//! arbitrary save bytes. Load, render, one edit and save must never panic.
//! Build with: cargo fuzz run load_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const SCHEMA: &str = r#"{
    "validator": { "regions": { "any": {} }, "headerShifts": [1, 3] },
    "items": [
        { "type": "int", "id": "money", "offset": 2, "dataType": "uint24", "bcd": true },
        { "type": "container", "id": "party", "instances": 4, "length": 6, "mode": "pointer",
          "pointer": { "offset": 0, "dataType": "uint16", "base": 0 },
          "disableIf": { "0": [255] },
          "items": [
            { "type": "string", "id": "name", "offset": 0, "length": 2, "charWidth": 2, "terminator": 0 },
            { "type": "int", "id": "hp", "offset": 4, "dataType": "uint16", "bitWindow": { "start": 3, "length": 9 } },
            { "type": "checksum", "id": "sum", "offset": 5, "control": { "start": 0, "end": 8 }, "algorithm": "xor" }
          ] }
    ]
}"#;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let schema = match saveschema::parse(SCHEMA) {
        Ok(s) => s,
        Err(_) => return,
    };
    let mut session = saveschema::EditingSession::new(schema);
    if session.load(data.to_vec()).is_err() {
        return;
    }
    let _ = session.render();
    let _ = session.set(&saveschema::ItemKey::at("hp", &[1]), saveschema::Value::UInt(300));
    let _ = session.save();
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run load_fuzz");
}
