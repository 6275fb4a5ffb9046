//! Format resolved values for display (dump text). Uses resources for labels and
//! flag names; checksums are shown in hex.

use crate::schema::{Item, Resources};
use crate::session::EditingSession;
use crate::value::Value;
use crate::walk::{InstanceState, ResolvedNode};
use std::io::{self, Write};

fn format_scalar(v: &Value) -> String {
    match v {
        Value::Bool(b) => b.to_string(),
        Value::Int(x) => x.to_string(),
        Value::UInt(x) => x.to_string(),
        Value::Float(x) => format!("{}", x),
        Value::Str(s) => format!("{:?}", s),
        Value::Flags(f) => f.iter().map(|b| if *b { '1' } else { '0' }).collect(),
    }
}

/// Format a leaf value for its item.
pub fn format_value(v: &Value, item: &Item, resources: &Resources) -> String {
    match (item, v) {
        (Item::Checksum(c), _) => match v.as_u64() {
            Some(x) => format!("{:#0width$x}", x, width = c.data_type.bytes() * 2 + 2),
            None => format_scalar(v),
        },
        (Item::Int(f), _) => {
            let label = f
                .resource
                .as_deref()
                .zip(v.as_u64())
                .and_then(|(r, code)| resources.label(r, code));
            match label {
                Some(l) => format!("{} ({})", format_scalar(v), l),
                None => format_scalar(v),
            }
        }
        (Item::Bitflags(b), Value::Flags(flags)) => {
            let set: Vec<&str> = b
                .flags
                .iter()
                .zip(flags)
                .filter(|(def, on)| **on && !def.hidden)
                .map(|(def, _)| def.label.as_str())
                .collect();
            if set.is_empty() {
                "(none)".to_string()
            } else {
                set.join(", ")
            }
        }
        _ => format_scalar(v),
    }
}

fn display_name(meta: &crate::schema::ItemMeta, fallback: &str) -> String {
    meta.name
        .clone()
        .or_else(|| meta.id.clone())
        .unwrap_or_else(|| fallback.to_string())
}

/// Write the resolved tree with values, indented by nesting.
pub fn dump_tree<W: Write>(session: &EditingSession, out: &mut W, show_hidden: bool) -> io::Result<()> {
    let Some(tree) = session.tree() else {
        return writeln!(out, "(no buffer loaded)");
    };
    if let (Some(region), Some(shift)) = (session.region(), session.header_shift()) {
        writeln!(out, "region: {} (header shift {:#x})", region, shift)?;
    }
    dump_nodes(session, tree, out, 0, show_hidden)
}

fn dump_nodes<W: Write>(
    session: &EditingSession,
    nodes: &[ResolvedNode],
    out: &mut W,
    depth: usize,
    show_hidden: bool,
) -> io::Result<()> {
    let pad = "  ".repeat(depth);
    for node in nodes {
        match node {
            ResolvedNode::Leaf(leaf) => {
                if leaf.hidden && !show_hidden {
                    continue;
                }
                let name = display_name(leaf.item.meta(), leaf.item.kind_name());
                let text = match session.read_item(leaf) {
                    Ok(v) => format_value(&v, &leaf.item, &session.schema().resources),
                    Err(e) => format!("<{}>", e),
                };
                let ro = if leaf.disabled { " [read-only]" } else { "" };
                writeln!(out, "{}{}: {}{}", pad, name, text, ro)?;
            }
            ResolvedNode::Branch { kind, meta, hidden, children } => {
                if *hidden && !show_hidden {
                    continue;
                }
                writeln!(out, "{}{}:", pad, display_name(meta, kind))?;
                dump_nodes(session, children, out, depth + 1, show_hidden)?;
            }
            ResolvedNode::Container { meta, hidden, instances } => {
                if *hidden && !show_hidden {
                    continue;
                }
                let name = display_name(meta, "container");
                for inst in instances {
                    match inst.state {
                        InstanceState::Vetoed => writeln!(out, "{}{}[{}]: (empty)", pad, name, inst.index)?,
                        InstanceState::Disabled => writeln!(out, "{}{}[{}]: [read-only]", pad, name, inst.index)?,
                        InstanceState::Present => writeln!(out, "{}{}[{}]:", pad, name, inst.index)?,
                    }
                    dump_nodes(session, &inst.children, out, depth + 1, show_hidden)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_and_resource_formatting() {
        let resources: Resources = serde_json::from_str(r#"{ "items": { "1": "Potion" } }"#).unwrap();
        let int: Item = serde_json::from_str(r#"{ "type": "int", "offset": 0, "resource": "items" }"#).unwrap();
        assert_eq!(format_value(&Value::UInt(1), &int, &resources), "1 (Potion)");
        let sum: Item = serde_json::from_str(
            r#"{ "type": "checksum", "offset": 0, "dataType": "uint16", "control": { "start": 0, "end": 2 } }"#,
        )
        .unwrap();
        assert_eq!(format_value(&Value::UInt(0x1f), &sum, &resources), "0x001f");
    }
}
