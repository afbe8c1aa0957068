//! Lint `.csn` descriptor files: widths, union sizes, dangling names, count ordering, cycles.
//!
//! Usage:
//!   csn1_lint [OPTIONS] [FILE.csn ...]
//!   csn1_lint < file.csn
//!
//! Options:
//!   --human, -H  Human-readable output
//!
//! If no files are given, reads from stdin. Exit code 1 on parse errors or error-level findings.

use anyhow::Context;
use csn1dsl::lint::{lint, LintMessage, LintRule, Severity};
use std::io::{self, Read};
use tracing_subscriber::EnvFilter;

fn rule_id(rule: LintRule) -> &'static str {
    match rule {
        LintRule::UIntWidth => "uint-width",
        LintRule::MaskedWidth => "masked-width",
        LintRule::BitmapWidth => "bitmap-width",
        LintRule::UnionSize => "union-size",
        LintRule::UnknownTable => "unknown-table",
        LintRule::UnknownCrumbSpec => "unknown-crumb-spec",
        LintRule::CrumbIndex => "crumb-index",
        LintRule::CrumbWidth => "crumb-width",
        LintRule::CountFieldOrder => "count-field-order",
        LintRule::NestedCycle => "nested-cycle",
        LintRule::NextExistsSkip => "next-exists-skip",
        LintRule::EmptyChoice => "empty-choice",
        LintRule::ChoiceWithoutTrap => "choice-without-trap",
    }
}

#[derive(Clone, Copy)]
enum OutputStyle {
    Compact,
    Human,
}

fn print_message(path: &str, m: &LintMessage, style: OutputStyle) {
    let severity_str = match m.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };
    match style {
        OutputStyle::Compact => {
            println!(
                "{}:{}#{}: {}: {} [{}]",
                path,
                m.table,
                m.index,
                severity_str,
                m.message,
                rule_id(m.rule)
            );
        }
        OutputStyle::Human => {
            println!("  {} table {} #{} '{}': {}", path, m.table, m.index, m.label, m.message);
            println!("    rule: {} ({})", rule_id(m.rule), severity_str);
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let style = if let Some(pos) = args.iter().position(|a| a == "--human" || a == "-H") {
        args.remove(pos);
        OutputStyle::Human
    } else {
        OutputStyle::Compact
    };

    let mut sources = Vec::new();
    if args.is_empty() {
        let mut src = String::new();
        io::stdin().read_to_string(&mut src).context("reading stdin")?;
        sources.push(("<stdin>".to_string(), src));
    } else {
        for path in &args {
            match std::fs::read_to_string(path) {
                Ok(s) => sources.push((path.clone(), s)),
                Err(e) => {
                    eprintln!("{}: {}", path, e);
                    std::process::exit(1);
                }
            }
        }
    }

    let mut has_error = false;
    let mut total_warnings = 0usize;
    let mut total_errors = 0usize;
    for (path, src) in &sources {
        let messages = match lint(src) {
            Ok(m) => m,
            Err(e) => {
                eprintln!("{}: {}", path, e);
                has_error = true;
                continue;
            }
        };
        for m in &messages {
            match m.severity {
                Severity::Error => total_errors += 1,
                Severity::Warning => total_warnings += 1,
            }
            print_message(path, m, style);
        }
        if messages.iter().any(|m| m.severity == Severity::Error) {
            has_error = true;
        }
    }

    if total_errors > 0 || total_warnings > 0 {
        eprintln!("lint: {} error(s), {} warning(s)", total_errors, total_warnings);
    }
    if has_error {
        std::process::exit(1);
    }
    Ok(())
}
