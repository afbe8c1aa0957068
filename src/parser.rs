//! Parse `.csn` descriptor text into a [`Grammar`] using PEST.

use crate::ast::*;
use crate::error::ErrorKind;
use crate::registry::Registry;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct Csn1Parser;

type Pair<'i> = pest::iterators::Pair<'i, Rule>;

/// Parse descriptor source into a grammar (names are not resolved yet).
pub fn parse(source: &str) -> Result<Grammar, String> {
    let pairs = Csn1Parser::parse(Rule::file, source).map_err(|e| format!("Parse error: {}", e))?;
    let file = pairs.into_iter().next().ok_or("Empty parse")?;
    let mut grammar = Grammar::new();
    for inner in file.into_inner() {
        match inner.as_rule() {
            Rule::crumbs_def => grammar.crumb_specs.push(build_crumbs(inner)?),
            Rule::table_def => grammar.tables.push(build_table(inner)?),
            _ => {}
        }
    }
    Ok(grammar)
}

/// Parse and resolve against `registry` in one step.
pub fn parse_resolved(source: &str, registry: &Registry) -> Result<ResolvedGrammar, String> {
    ResolvedGrammar::resolve(parse(source)?, registry)
}

fn line_of(pair: &Pair<'_>) -> usize {
    pair.as_span().start_pos().line_col().0
}

fn build_crumbs(pair: Pair<'_>) -> Result<CrumbSpec, String> {
    let line = line_of(&pair);
    let mut it = pair.into_inner();
    let name = it.next().ok_or("crumbs: missing name")?.as_str().to_string();
    let mut lengths = Vec::new();
    for n in it {
        let v = parse_num(n.as_str())?;
        let bits = u8::try_from(v).map_err(|_| format!("line {}: crumb length {} out of range", line, v))?;
        lengths.push(bits);
    }
    Ok(CrumbSpec::msb_first(&name, &lengths))
}

fn build_table(pair: Pair<'_>) -> Result<Table, String> {
    let mut it = pair.into_inner();
    let name = it.next().ok_or("table: missing name")?.as_str().to_string();
    let descriptors = it
        .filter(|p| p.as_rule() == Rule::entry)
        .map(build_entry)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("table {}: {}", name, e))?;
    Ok(Table { name, descriptors })
}

fn build_entry(pair: Pair<'_>) -> Result<Descriptor, String> {
    let mut it = pair.into_inner();
    let field = it.next().ok_or("entry: missing field name")?.as_str();
    let kind = it.next().ok_or("entry: missing kind")?;
    let node = build_kind(kind)?;
    let field = if field == "_" { None } else { Some(field) };
    let mut d = Descriptor::new(field, node);
    for rest in it {
        match rest.as_rule() {
            Rule::nullable => d.may_be_null = true,
            Rule::string => d.label = string_body(rest),
            _ => {}
        }
    }
    Ok(d)
}

fn build_kind(pair: Pair<'_>) -> Result<Node, String> {
    let inner = pair.into_inner().next().ok_or("kind: empty")?;
    match inner.as_rule() {
        Rule::choice_kind => build_choice(inner),
        Rule::union_kind => build_union(inner),
        Rule::simple_kind => build_simple(inner),
        r => Err(format!("unexpected kind rule {:?}", r)),
    }
}

fn build_choice(pair: Pair<'_>) -> Result<Node, String> {
    let mut candidates = Vec::new();
    for arm in pair.into_inner() {
        let line = line_of(&arm);
        let mut it = arm.into_inner();
        let bits = parse_num(it.next().ok_or("choice arm: missing bit count")?.as_str())?;
        let value = parse_num(it.next().ok_or("choice arm: missing value")?.as_str())?;
        let mut keep_bits = false;
        let mut descriptor = None;
        for rest in it {
            match rest.as_rule() {
                Rule::keep => keep_bits = true,
                Rule::entry => descriptor = Some(build_entry(rest)?),
                _ => {}
            }
        }
        let bits = u8::try_from(bits)
            .ok()
            .filter(|b| *b <= 64)
            .ok_or_else(|| format!("line {}: choice selector of {} bits", line, bits))?;
        let value = u64::try_from(value).map_err(|_| format!("line {}: negative choice value", line))?;
        candidates.push(ChoiceCandidate {
            bits,
            value,
            keep_bits,
            descriptor: descriptor.ok_or("choice arm: missing entry")?,
        });
    }
    Ok(Node::Choice { candidates })
}

fn build_union(pair: Pair<'_>) -> Result<Node, String> {
    let mut it = pair.into_inner();
    let kw = it.next().ok_or("union: missing keyword")?;
    let masked = kw.as_str() == "union_lh";
    let candidates = it.map(build_entry).collect::<Result<Vec<_>, _>>()?;
    Ok(if masked { Node::UnionMaskedLH { candidates } } else { Node::Union { candidates } })
}

enum Arg {
    Num(i128),
    Name(String),
    Text(String),
}

/// Arguments of one `kind(...)`, with typed accessors that report the line.
struct Args<'k> {
    kind: &'k str,
    line: usize,
    list: Vec<Arg>,
}

impl Args<'_> {
    fn err(&self, msg: impl std::fmt::Display) -> String {
        format!("line {}: {}: {}", self.line, self.kind, msg)
    }

    fn arity(&self, min: usize, max: usize) -> Result<(), String> {
        let n = self.list.len();
        if n < min || n > max {
            let want = if min == max { min.to_string() } else { format!("{}..={}", min, max) };
            return Err(self.err(format!("expected {} argument(s), got {}", want, n)));
        }
        Ok(())
    }

    fn int(&self, i: usize) -> Result<i128, String> {
        match self.list.get(i) {
            Some(Arg::Num(v)) => Ok(*v),
            Some(_) => Err(self.err(format!("argument {} must be a number", i + 1))),
            None => Err(self.err(format!("missing argument {}", i + 1))),
        }
    }

    fn int_or(&self, i: usize, default: i128) -> Result<i128, String> {
        if i < self.list.len() {
            self.int(i)
        } else {
            Ok(default)
        }
    }

    fn num<T: TryFrom<i128>>(&self, i: usize) -> Result<T, String> {
        let v = self.int(i)?;
        T::try_from(v).map_err(|_| self.err(format!("argument {} out of range: {}", i + 1, v)))
    }

    fn name(&self, i: usize) -> Result<String, String> {
        match self.list.get(i) {
            Some(Arg::Name(s)) => Ok(s.clone()),
            Some(_) => Err(self.err(format!("argument {} must be a name", i + 1))),
            None => Err(self.err(format!("missing argument {}", i + 1))),
        }
    }

    fn text(&self, i: usize) -> Result<String, String> {
        match self.list.get(i) {
            Some(Arg::Text(s)) => Ok(s.clone()),
            Some(_) => Err(self.err(format!("argument {} must be a string", i + 1))),
            None => Err(self.err(format!("missing argument {}", i + 1))),
        }
    }

    fn count(&self, i: usize) -> Result<Count, String> {
        match self.list.get(i) {
            Some(Arg::Num(_)) => Ok(Count::Fixed(self.num(i)?)),
            Some(Arg::Name(s)) => Ok(Count::Field(s.clone())),
            _ => Err(self.err(format!("argument {} must be a count", i + 1))),
        }
    }
}

fn build_simple(pair: Pair<'_>) -> Result<Node, String> {
    let line = line_of(&pair);
    let mut it = pair.into_inner();
    let kind = it.next().ok_or("kind: missing name")?.as_str();
    let mut list = Vec::new();
    if let Some(args) = it.next() {
        for a in args.into_inner() {
            list.push(match a.as_rule() {
                Rule::num => Arg::Num(parse_num(a.as_str())?),
                Rule::ident => Arg::Name(a.as_str().to_string()),
                Rule::string => Arg::Text(string_body(a)),
                r => return Err(format!("line {}: unexpected argument {:?}", line, r)),
            });
        }
    }
    let a = Args { kind, line, list };

    let node = match kind {
        "bit" => {
            a.arity(0, 0)?;
            Node::Bit
        }
        "uint" => {
            a.arity(1, 1)?;
            Node::UInt { width: a.num(0)? }
        }
        "uint_offset" => {
            a.arity(2, 2)?;
            Node::UIntOffset { width: a.num(0)?, offset: a.num(1)? }
        }
        "uint_lh" => {
            a.arity(1, 1)?;
            Node::UIntMaskedLH { width: a.num(0)? }
        }
        "split_bits" => {
            a.arity(1, 1)?;
            Node::SplitBits { spec: a.name(0)? }
        }
        "split_crumb" => {
            a.arity(2, 2)?;
            Node::SplitBitsCrumb { spec: a.name(0)?, index: a.num(1)? }
        }
        "uint_array" => {
            a.arity(2, 2)?;
            Node::UIntArray { width: a.num(0)?, count: a.count(1)? }
        }
        "type" => {
            a.arity(1, 1)?;
            Node::NestedType { table: a.name(0)? }
        }
        "type_array" => {
            a.arity(2, 2)?;
            Node::TypeArray { table: a.name(0)?, count: a.num(1)? }
        }
        "var_type_array" => {
            a.arity(2, 2)?;
            Node::VariableTypeArray { table: a.name(0)?, count: a.name(1)? }
        }
        "var_type_array_offset" => {
            a.arity(2, 2)?;
            Node::VariableTypeArrayOffset { table: a.name(0)?, count: a.name(1)? }
        }
        "bitmap" => {
            a.arity(1, 1)?;
            Node::Bitmap { width: a.num(0)? }
        }
        "var_bitmap" => {
            a.arity(1, 2)?;
            Node::VariableBitmap { count: a.name(0)?, offset: offset(&a, 1)? }
        }
        "var_bitmap_to_end" => {
            a.arity(0, 1)?;
            Node::VariableBitmapToEnd { offset: offset(&a, 0)? }
        }
        "left_var_bitmap" => {
            a.arity(1, 2)?;
            Node::LeftAlignedVariableBitmap { count: a.name(0)?, offset: offset(&a, 1)? }
        }
        "left_var_bitmap_to_end" => {
            a.arity(0, 1)?;
            Node::LeftAlignedVariableBitmapToEnd { offset: offset(&a, 0)? }
        }
        "padding_to_end" => {
            a.arity(0, 0)?;
            Node::PaddingToEnd
        }
        "var_array" => {
            a.arity(1, 2)?;
            Node::VariableArray { count: a.name(0)?, offset: offset(&a, 1)? }
        }
        "rec_array" => {
            a.arity(2, 3)?;
            let tag = if a.list.len() == 3 {
                match a.name(2)?.as_str() {
                    "reversed" => Tag::Reversed,
                    other => return Err(a.err(format!("unknown tag polarity '{}'", other))),
                }
            } else {
                Tag::Standard
            };
            Node::RecursiveArray { width: a.num(0)?, count: a.name(1)?, tag }
        }
        "rec_type_array" => {
            a.arity(2, 2)?;
            Node::RecursiveTypeArray { table: a.name(0)?, count: a.name(1)? }
        }
        "rec_type_array_first" => {
            a.arity(2, 2)?;
            Node::RecursiveTypeArrayFirstAlwaysPresent { table: a.name(0)?, count: a.name(1)? }
        }
        "rec_type_array_first_reversed" => {
            a.arity(2, 2)?;
            Node::RecursiveTypeArrayFirstAlwaysPresentReversedTag { table: a.name(0)?, count: a.name(1)? }
        }
        "exists" => {
            a.arity(0, 0)?;
            Node::Exists
        }
        "exists_lh" => {
            a.arity(0, 0)?;
            Node::ExistsMaskedLH
        }
        "next_exists" => {
            a.arity(1, 1)?;
            Node::NextExists { skip: a.num(0)? }
        }
        "next_exists_lh" => {
            a.arity(1, 1)?;
            Node::NextExistsMaskedLH { skip: a.num(0)? }
        }
        "null" => {
            a.arity(1, 1)?;
            Node::Null { width: a.num(0)? }
        }
        "fixed" => {
            a.arity(2, 2)?;
            Node::FixedValue { width: a.num(0)?, value: a.num(1)? }
        }
        "callback" => {
            a.arity(3, 3)?;
            Node::Callback { name: a.name(0)?, params: (a.name(1)?, a.name(2)?) }
        }
        "serialize" => {
            a.arity(1, 2)?;
            let length_len = u8::try_from(a.int_or(1, 0)?).map_err(|_| a.err("length prefix out of range"))?;
            Node::Serialize { name: a.name(0)?, length_len }
        }
        "trap" => {
            a.arity(2, 2)?;
            let name = a.name(0)?;
            let kind = ErrorKind::from_name(&name).ok_or_else(|| a.err(format!("unknown error kind '{}'", name)))?;
            Node::TrapError { kind, message: a.text(1)? }
        }
        "end" => {
            a.arity(0, 0)?;
            Node::End
        }
        _ => return Err(format!("line {}: unknown kind '{}'", line, kind)),
    };
    Ok(node)
}

fn offset(a: &Args<'_>, i: usize) -> Result<i32, String> {
    let v = a.int_or(i, 0)?;
    i32::try_from(v).map_err(|_| a.err(format!("offset out of range: {}", v)))
}

/// Decimal, `0x` hex or `0b` binary, optionally negative.
fn parse_num(s: &str) -> Result<i128, String> {
    let (neg, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let v = if let Some(h) = body.strip_prefix("0x") {
        i128::from_str_radix(h, 16)
    } else if let Some(b) = body.strip_prefix("0b") {
        i128::from_str_radix(b, 2)
    } else {
        body.parse::<i128>()
    }
    .map_err(|e| format!("bad number '{}': {}", s, e))?;
    Ok(if neg { -v } else { v })
}

fn string_body(pair: Pair<'_>) -> String {
    pair.into_inner().next().map(|p| unescape(p.as_str())).unwrap_or_default()
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}
