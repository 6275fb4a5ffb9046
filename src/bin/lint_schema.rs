//! Lint schema files: structural validity plus the warning rules in `saveschema::lint`.
//!
//! Usage:
//!   lint_schema [OPTIONS] [FILE.json ...]
//!   lint_schema < schema.json
//!
//! Exit code 1 if any error-level findings.

use clap::Parser;
use saveschema::lint::{lint_source, LintMessage, Severity};
use std::io::{self, Read};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lint_schema", about = "Check save-file schemas for structural errors and likely mistakes")]
struct Args {
    /// Schema files; stdin when empty
    files: Vec<PathBuf>,

    /// Human-readable output
    #[arg(short = 'H', long)]
    human: bool,

    /// Treat warnings as errors
    #[arg(long)]
    deny_warnings: bool,
}

fn print_message(path: &str, m: &LintMessage, human: bool) {
    let severity = match m.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };
    if human {
        println!("  {} {}: {}", path, m.path, m.message);
        println!("    rule: {}", m.rule.name());
    } else {
        println!("{}:{}: {}: {} [{}]", path, m.path, severity, m.message, m.rule.name());
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("warn"));
    let args = Args::parse();

    let mut sources = Vec::new();
    if args.files.is_empty() {
        let mut src = String::new();
        io::stdin().read_to_string(&mut src)?;
        sources.push(("<stdin>".to_string(), src));
    }
    let mut has_error = false;
    for path in &args.files {
        match std::fs::read_to_string(path) {
            Ok(src) => sources.push((path.display().to_string(), src)),
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                has_error = true;
            }
        }
    }

    let (mut total_errors, mut total_warnings) = (0usize, 0usize);
    for (path, src) in &sources {
        let messages = lint_source(src);
        for m in &messages {
            match m.severity {
                Severity::Error => total_errors += 1,
                Severity::Warning => total_warnings += 1,
            }
            print_message(path, m, args.human);
        }
    }
    if total_errors > 0 || total_warnings > 0 {
        eprintln!("lint: {} error(s), {} warning(s)", total_errors, total_warnings);
    }
    if has_error || total_errors > 0 || (args.deny_warnings && total_warnings > 0) {
        std::process::exit(1);
    }
    Ok(())
}
