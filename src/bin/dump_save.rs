//! Load a schema and a save file, print the resolved tree, optionally apply edits
//! and write the re-saved bytes.
//!
//! Usage:
//!   dump_save --schema game.json save.bin
//!   dump_save --schema game.json save.bin --set money=500 --set "hp[1]=99" --out edited.bin

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use saveschema::dump::dump_tree;
use saveschema::{parser, EditingSession, ItemKey, SessionOptions, Value};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dump_save", about = "Print and edit a save file through its schema")]
struct Args {
    /// JSON schema describing the save format
    #[arg(long, env = "SAVESCHEMA_SCHEMA")]
    schema: PathBuf,

    /// Save file or ROM image
    input: PathBuf,

    /// Edits `id=value` or `id[i][j]=value`, applied in order
    #[arg(long = "set")]
    sets: Vec<String>,

    /// Write the re-saved bytes here
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Session options as JSON (e.g. '{"strict_checksums":true}')
    #[arg(long, env = "SAVESCHEMA_OPTIONS")]
    options: Option<String>,

    /// Include hidden items
    #[arg(long)]
    all: bool,
}

/// Parse `id[0][2]=value`.
fn parse_edit(s: &str) -> anyhow::Result<(ItemKey, Value)> {
    let (lhs, rhs) = s.split_once('=').with_context(|| format!("edit {:?} needs `=`", s))?;
    let (id, rest) = match lhs.find('[') {
        Some(i) => (&lhs[..i], &lhs[i..]),
        None => (lhs, ""),
    };
    let mut instances: Vec<usize> = Vec::new();
    for part in rest.split(']').filter(|p| !p.is_empty()) {
        let index = part
            .strip_prefix('[')
            .with_context(|| format!("bad instance path in {:?}", lhs))?;
        instances.push(index.parse().with_context(|| format!("bad instance index {:?}", index))?);
    }
    let value = match rhs {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(v) = rhs.parse::<u64>() {
                Value::UInt(v)
            } else if let Ok(v) = rhs.parse::<i64>() {
                Value::Int(v)
            } else if let Ok(v) = rhs.parse::<f64>() {
                Value::Float(v)
            } else {
                Value::Str(rhs.to_string())
            }
        }
    };
    Ok((ItemKey::at(id.trim(), &instances), value))
}

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args = Args::parse();

    let schema = parser::parse_file(&args.schema)
        .with_context(|| format!("loading schema {}", args.schema.display()))?;
    let options: SessionOptions = match &args.options {
        Some(json) => serde_json::from_str(json).context("parsing --options")?,
        None => SessionOptions::default(),
    };
    let bytes = std::fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;

    let mut session = EditingSession::new(schema).with_options(options);
    session
        .load(bytes)
        .with_context(|| format!("{} is not a valid file for this schema", args.input.display()))?;

    for edit in &args.sets {
        let (key, value) = parse_edit(edit)?;
        let report = session.set(&key, value).with_context(|| format!("applying {}", edit))?;
        info!("{}: wrote {} item(s)", edit, report.written.len());
        if let Some(checksums) = report.checksums {
            if !checksums.missing.is_empty() {
                warn!("checksums without algorithm: {}", checksums.missing.join(", "));
            }
            for (label, reason) in &checksums.failed {
                warn!("checksum {} left unchanged: {}", label, reason);
            }
        }
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    dump_tree(&session, &mut out, args.all)?;
    out.flush()?;

    if let Some(path) = &args.out {
        let bytes = session.save()?;
        std::fs::write(path, &bytes).with_context(|| format!("writing {}", path.display()))?;
        info!("wrote {} bytes to {}", bytes.len(), path.display());
    } else if !args.sets.is_empty() {
        warn!("edits given without --out; nothing written");
    }
    Ok(())
}
