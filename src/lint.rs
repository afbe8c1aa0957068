//! Static checks for descriptor grammars.
//!
//! ## Rules
//!
//! - **UIntWidth**: integer widths in range (`uint` 1..=32, `fixed` 1..=64, array elements 1..=32).
//! - **MaskedWidth**: `uint_lh` is 1..=8 bits.
//! - **BitmapWidth**: `bitmap(n)` is 1..=64 bits.
//! - **UnionSize**: a union needs at least two candidates.
//! - **UnknownTable** / **UnknownCrumbSpec**: every name resolves.
//! - **CrumbIndex**: `split_crumb(Spec, i)` indexes an existing crumb.
//! - **CrumbWidth**: each crumb is 1..=64 bits and a spec assembles at most 64.
//! - **CountFieldOrder**: a count field is decoded before it is used (warning).
//! - **NestedCycle**: tables that can reach themselves (warning; fine behind a union or tag).
//! - **NextExistsSkip**: `next_exists(k)` does not skip past the end of its table.
//! - **EmptyChoice**: a choice has at least one candidate.
//! - **ChoiceWithoutTrap**: a choice without a 0-bit fallback candidate (warning).
//!
//! Error-level findings make [`ResolvedGrammar::resolve`](crate::ast::ResolvedGrammar::resolve) fail.
//! Run the linter on files via the `csn1_lint` binary. Exit code 1 if any error-level findings.

use crate::ast::*;
use std::collections::{HashMap, HashSet};

/// Severity of a lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Identifies which rule produced the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintRule {
    UIntWidth,
    MaskedWidth,
    BitmapWidth,
    UnionSize,
    UnknownTable,
    UnknownCrumbSpec,
    CrumbIndex,
    CrumbWidth,
    CountFieldOrder,
    NestedCycle,
    NextExistsSkip,
    EmptyChoice,
    ChoiceWithoutTrap,
}

/// A single lint message with location.
#[derive(Debug, Clone)]
pub struct LintMessage {
    pub table: String,
    /// Position of the descriptor in its table.
    pub index: usize,
    pub label: String,
    pub rule: LintRule,
    pub severity: Severity,
    pub message: String,
}

impl std::fmt::Display for LintMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sev = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(
            f,
            "{} [{:?}] table {} #{} '{}': {}",
            sev, self.rule, self.table, self.index, self.label, self.message
        )
    }
}

pub fn has_errors(messages: &[LintMessage]) -> bool {
    messages.iter().any(|m| m.severity == Severity::Error)
}

/// Parse `source` and lint the result.
pub fn lint(source: &str) -> Result<Vec<LintMessage>, String> {
    Ok(check_grammar(&crate::parser::parse(source)?))
}

struct Ctx<'g> {
    grammar: &'g Grammar,
    tables: HashSet<&'g str>,
    crumbs: HashMap<&'g str, &'g CrumbSpec>,
    out: Vec<LintMessage>,
}

impl Ctx<'_> {
    fn push(&mut self, table: &str, index: usize, d: &Descriptor, rule: LintRule, severity: Severity, message: String) {
        self.out.push(LintMessage {
            table: table.to_string(),
            index,
            label: d.label.clone(),
            rule,
            severity,
            message,
        });
    }
}

/// Run all rules on a grammar. Messages come in table order.
pub fn check_grammar(grammar: &Grammar) -> Vec<LintMessage> {
    let mut ctx = Ctx {
        grammar,
        tables: grammar.tables.iter().map(|t| t.name.as_str()).collect(),
        crumbs: grammar.crumb_specs.iter().map(|c| (c.name.as_str(), c)).collect(),
        out: Vec::new(),
    };
    for spec in &grammar.crumb_specs {
        check_crumbs(&mut ctx, spec);
    }
    for t in &grammar.tables {
        let mut written = HashSet::new();
        check_sequence(&mut ctx, &t.name, &t.descriptors, &mut written);
    }
    check_cycles(&mut ctx);
    ctx.out
}

/// Crumb specs have no table; messages carry the spec name in its place.
fn check_crumbs(ctx: &mut Ctx<'_>, spec: &CrumbSpec) {
    let mut report = |index: usize, message: String| {
        ctx.out.push(LintMessage {
            table: spec.name.clone(),
            index,
            label: spec.name.clone(),
            rule: LintRule::CrumbWidth,
            severity: Severity::Error,
            message,
        })
    };
    for (i, c) in spec.crumbs.iter().enumerate() {
        if c.bits == 0 || c.bits > 64 {
            report(i, format!("crumb {} is {} bits, outside 1..=64", i, c.bits));
        }
    }
    if spec.total_bits() > 64 {
        report(0, format!("crumbs assemble {} bits, more than 64", spec.total_bits()));
    }
}

fn check_sequence(ctx: &mut Ctx<'_>, table: &str, descriptors: &[Descriptor], written: &mut HashSet<String>) {
    for (i, d) in descriptors.iter().enumerate() {
        check_descriptor(ctx, table, i, d, written);
        if let Node::NextExists { skip } | Node::NextExistsMaskedLH { skip } = d.node {
            if i + 1 + skip > descriptors.len() {
                ctx.push(
                    table,
                    i,
                    d,
                    LintRule::NextExistsSkip,
                    Severity::Error,
                    format!("skips {} descriptors but only {} follow", skip, descriptors.len() - i - 1),
                );
            }
        }
    }
}

/// Candidates run alone, so nothing follows them for `next_exists` to skip.
fn check_candidate(ctx: &mut Ctx<'_>, table: &str, i: usize, c: &Descriptor, written: &mut HashSet<String>) {
    check_descriptor(ctx, table, i, c, written);
    if let Node::NextExists { skip } | Node::NextExistsMaskedLH { skip } = c.node {
        if skip > 0 {
            ctx.push(
                table,
                i,
                c,
                LintRule::NextExistsSkip,
                Severity::Error,
                format!("candidate skips {} descriptors but none follow", skip),
            );
        }
    }
}

fn width_check(ctx: &mut Ctx<'_>, table: &str, i: usize, d: &Descriptor, rule: LintRule, width: u32, max: u32) {
    if width == 0 || width > max {
        ctx.push(table, i, d, rule, Severity::Error, format!("width {} outside 1..={}", width, max));
    }
}

fn check_descriptor(ctx: &mut Ctx<'_>, table: &str, i: usize, d: &Descriptor, written: &mut HashSet<String>) {
    if let Some(count) = d.node.count_ref() {
        if !written.contains(count) {
            ctx.push(
                table,
                i,
                d,
                LintRule::CountFieldOrder,
                Severity::Warning,
                format!("count field '{}' is not decoded earlier in this table", count),
            );
        }
    }
    if let Some(target) = d.node.table_ref() {
        if !ctx.tables.contains(target) {
            ctx.push(table, i, d, LintRule::UnknownTable, Severity::Error, format!("unknown table '{}'", target));
        }
    }

    match &d.node {
        Node::UInt { width } | Node::UIntOffset { width, .. } => {
            width_check(ctx, table, i, d, LintRule::UIntWidth, *width as u32, 32)
        }
        Node::RecursiveArray { width, .. } => width_check(ctx, table, i, d, LintRule::UIntWidth, *width as u32, 32),
        Node::FixedValue { width, .. } => width_check(ctx, table, i, d, LintRule::UIntWidth, *width as u32, 64),
        Node::UIntArray { width, .. } => {
            width_check(ctx, table, i, d, LintRule::UIntWidth, *width as u32, 32);
            if (17..=32).contains(width) {
                ctx.push(
                    table,
                    i,
                    d,
                    LintRule::UIntWidth,
                    Severity::Warning,
                    format!("array elements of {} bits are not decoded (max 16)", width),
                );
            }
        }
        Node::UIntMaskedLH { width } => width_check(ctx, table, i, d, LintRule::MaskedWidth, *width as u32, 8),
        Node::Bitmap { width } => width_check(ctx, table, i, d, LintRule::BitmapWidth, *width as u32, 64),
        Node::SplitBits { spec } => {
            if !ctx.crumbs.contains_key(spec.as_str()) {
                ctx.push(table, i, d, LintRule::UnknownCrumbSpec, Severity::Error, format!("unknown crumb spec '{}'", spec));
            }
        }
        Node::SplitBitsCrumb { spec, index } => match ctx.crumbs.get(spec.as_str()).map(|c| c.crumbs.len()) {
            None => {
                ctx.push(table, i, d, LintRule::UnknownCrumbSpec, Severity::Error, format!("unknown crumb spec '{}'", spec))
            }
            Some(n) if *index >= n => ctx.push(
                table,
                i,
                d,
                LintRule::CrumbIndex,
                Severity::Error,
                format!("crumb {} of '{}' which has {} crumbs", index, spec, n),
            ),
            Some(_) => {}
        },
        Node::Union { candidates } | Node::UnionMaskedLH { candidates } => {
            if candidates.len() < 2 {
                ctx.push(
                    table,
                    i,
                    d,
                    LintRule::UnionSize,
                    Severity::Error,
                    format!("union of {} candidate(s)", candidates.len()),
                );
            }
            for c in candidates {
                check_candidate(ctx, table, i, c, written);
            }
        }
        Node::Choice { candidates } => {
            if candidates.is_empty() {
                ctx.push(table, i, d, LintRule::EmptyChoice, Severity::Error, "choice without candidates".to_string());
            } else if !candidates.iter().any(|c| c.bits == 0) {
                ctx.push(
                    table,
                    i,
                    d,
                    LintRule::ChoiceWithoutTrap,
                    Severity::Warning,
                    "no 0-bit fallback candidate; unmatched selectors fail with a script error".to_string(),
                );
            }
            for c in candidates {
                check_candidate(ctx, table, i, &c.descriptor, written);
            }
        }
        _ => {}
    }

    if let Some(f) = &d.field {
        written.insert(f.clone());
    }
    match &d.node {
        Node::RecursiveArray { count, .. }
        | Node::RecursiveTypeArray { count, .. }
        | Node::RecursiveTypeArrayFirstAlwaysPresent { count, .. }
        | Node::RecursiveTypeArrayFirstAlwaysPresentReversedTag { count, .. } => {
            written.insert(count.clone());
        }
        _ => {}
    }
}

fn table_refs(descriptors: &[Descriptor]) -> Vec<String> {
    let mut refs = Vec::new();
    let _ = for_each_descriptor::<()>(descriptors, &mut |d| {
        if let Some(t) = d.node.table_ref() {
            refs.push(t.to_string());
        }
        Ok(())
    });
    refs
}

fn check_cycles(ctx: &mut Ctx<'_>) {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    let grammar = ctx.grammar;
    let index: HashMap<&str, usize> = grammar.tables.iter().enumerate().map(|(i, t)| (t.name.as_str(), i)).collect();
    let edges: Vec<Vec<usize>> = grammar
        .tables
        .iter()
        .map(|t| table_refs(&t.descriptors).iter().filter_map(|r| index.get(r.as_str()).copied()).collect())
        .collect();
    let mut marks = vec![Mark::New; grammar.tables.len()];
    let mut reported = HashSet::new();

    fn visit(n: usize, edges: &[Vec<usize>], marks: &mut [Mark], cycles: &mut Vec<(usize, usize)>) {
        marks[n] = Mark::Active;
        for &m in &edges[n] {
            match marks[m] {
                Mark::New => visit(m, edges, marks, cycles),
                Mark::Active => cycles.push((n, m)),
                Mark::Done => {}
            }
        }
        marks[n] = Mark::Done;
    }

    let mut cycles = Vec::new();
    for start in 0..grammar.tables.len() {
        if marks[start] == Mark::New {
            visit(start, &edges, &mut marks, &mut cycles);
        }
    }
    for (from, to) in cycles {
        if !reported.insert(to) {
            continue;
        }
        let t = &grammar.tables[from];
        let target = &grammar.tables[to].name;
        let pos = t
            .descriptors
            .iter()
            .position(|d| table_refs(std::slice::from_ref(d)).iter().any(|r| r == target));
        if let Some((pos, d)) = pos.and_then(|p| t.descriptors.get(p).map(|d| (p, d))) {
            ctx.push(
                &t.name,
                pos,
                d,
                LintRule::NestedCycle,
                Severity::Warning,
                format!("table '{}' can reach itself through '{}'", target, t.name),
            );
        }
    }
}
