//! Descriptor grammar: the CSN.1 "instruction set" and the tables built from it.
//!
//! A [`Table`] is an ordered list of [`Descriptor`]s describing one message or
//! sub-structure. Tables refer to each other by name (`type(T)`, arrays of `T`),
//! and [`ResolvedGrammar`] turns the names into indexes once, at startup. After
//! resolution a grammar is read-only and can be shared across threads.
//!
//! `Choice` and `Union` own their candidates, so the grammar is a tree: there is
//! no "skip N slots" arithmetic for them. `NextExists` keeps its skip count since
//! it skips siblings within one table.

use crate::error::ErrorKind;
use crate::registry::{Callback, Registry, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

/// A whole description: crumb specs plus tables.
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    pub crumb_specs: Vec<CrumbSpec>,
    pub tables: Vec<Table>,
}

/// Layout of a split field: its crumbs, most significant first.
#[derive(Debug, Clone, PartialEq)]
pub struct CrumbSpec {
    pub name: String,
    pub crumbs: Vec<Crumb>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crumb {
    pub bits: u8,
    /// Position of the crumb's least significant bit in the assembled value.
    pub shift: u32,
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub descriptors: Vec<Descriptor>,
}

/// One directive of a table.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Output slot written by this descriptor (`None` for `_`).
    pub field: Option<String>,
    pub label: String,
    /// Running out of bits here yields an absent value instead of an error.
    pub may_be_null: bool,
    pub node: Node,
}

/// Element count: literal or a field decoded earlier in the same table.
#[derive(Debug, Clone, PartialEq)]
pub enum Count {
    Fixed(u32),
    Field(String),
}

/// Polarity of the continuation bit in self-terminating lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// `1` continues, `0` stops.
    Standard,
    /// `0` continues, `1` stops.
    Reversed,
}

impl Tag {
    pub fn continues(self, bit: bool) -> bool {
        match self {
            Tag::Standard => bit,
            Tag::Reversed => !bit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChoiceCandidate {
    pub bits: u8,
    pub value: u64,
    /// Leave the selector bits in the stream for the candidate to decode.
    pub keep_bits: bool,
    pub descriptor: Descriptor,
}

#[derive(Debug, Clone)]
pub enum Node {
    End,
    Bit,
    UInt { width: u8 },
    UIntOffset { width: u8, offset: u32 },
    UIntMaskedLH { width: u8 },
    SplitBits { spec: String },
    SplitBitsCrumb { spec: String, index: usize },
    UIntArray { width: u8, count: Count },
    NestedType { table: String },
    TypeArray { table: String, count: u32 },
    VariableTypeArray { table: String, count: String },
    VariableTypeArrayOffset { table: String, count: String },
    Bitmap { width: u8 },
    VariableBitmap { count: String, offset: i32 },
    VariableBitmapToEnd { offset: i32 },
    LeftAlignedVariableBitmap { count: String, offset: i32 },
    LeftAlignedVariableBitmapToEnd { offset: i32 },
    PaddingToEnd,
    VariableArray { count: String, offset: i32 },
    RecursiveArray { width: u8, count: String, tag: Tag },
    RecursiveTypeArray { table: String, count: String },
    RecursiveTypeArrayFirstAlwaysPresent { table: String, count: String },
    RecursiveTypeArrayFirstAlwaysPresentReversedTag { table: String, count: String },
    Exists,
    ExistsMaskedLH,
    NextExists { skip: usize },
    NextExistsMaskedLH { skip: usize },
    Null { width: u32 },
    FixedValue { width: u8, value: u64 },
    Callback { name: String, params: (String, String) },
    Serialize { name: String, length_len: u8 },
    Choice { candidates: Vec<ChoiceCandidate> },
    Union { candidates: Vec<Descriptor> },
    UnionMaskedLH { candidates: Vec<Descriptor> },
    TrapError { kind: ErrorKind, message: String },
}

impl Node {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::End => "End",
            Node::Bit => "Bit",
            Node::UInt { .. } => "UInt",
            Node::UIntOffset { .. } => "UIntOffset",
            Node::UIntMaskedLH { .. } => "UIntMaskedLH",
            Node::SplitBits { .. } => "SplitBits",
            Node::SplitBitsCrumb { .. } => "SplitBitsCrumb",
            Node::UIntArray { .. } => "UIntArray",
            Node::NestedType { .. } => "NestedType",
            Node::TypeArray { .. } => "TypeArray",
            Node::VariableTypeArray { .. } => "VariableTypeArray",
            Node::VariableTypeArrayOffset { .. } => "VariableTypeArrayOffset",
            Node::Bitmap { .. } => "Bitmap",
            Node::VariableBitmap { .. } => "VariableBitmap",
            Node::VariableBitmapToEnd { .. } => "VariableBitmapToEnd",
            Node::LeftAlignedVariableBitmap { .. } => "LeftAlignedVariableBitmap",
            Node::LeftAlignedVariableBitmapToEnd { .. } => "LeftAlignedVariableBitmapToEnd",
            Node::PaddingToEnd => "PaddingToEnd",
            Node::VariableArray { .. } => "VariableArray",
            Node::RecursiveArray { .. } => "RecursiveArray",
            Node::RecursiveTypeArray { .. } => "RecursiveTypeArray",
            Node::RecursiveTypeArrayFirstAlwaysPresent { .. } => "RecursiveTypeArrayFirstAlwaysPresent",
            Node::RecursiveTypeArrayFirstAlwaysPresentReversedTag { .. } => {
                "RecursiveTypeArrayFirstAlwaysPresentReversedTag"
            }
            Node::Exists => "Exists",
            Node::ExistsMaskedLH => "ExistsMaskedLH",
            Node::NextExists { .. } => "NextExists",
            Node::NextExistsMaskedLH { .. } => "NextExistsMaskedLH",
            Node::Null { .. } => "Null",
            Node::FixedValue { .. } => "FixedValue",
            Node::Callback { .. } => "Callback",
            Node::Serialize { .. } => "Serialize",
            Node::Choice { .. } => "Choice",
            Node::Union { .. } => "Union",
            Node::UnionMaskedLH { .. } => "UnionMaskedLH",
            Node::TrapError { .. } => "TrapError",
        }
    }

    /// Name of the nested table this node decodes, if any.
    pub fn table_ref(&self) -> Option<&str> {
        match self {
            Node::NestedType { table }
            | Node::TypeArray { table, .. }
            | Node::VariableTypeArray { table, .. }
            | Node::VariableTypeArrayOffset { table, .. }
            | Node::RecursiveTypeArray { table, .. }
            | Node::RecursiveTypeArrayFirstAlwaysPresent { table, .. }
            | Node::RecursiveTypeArrayFirstAlwaysPresentReversedTag { table, .. } => Some(table),
            _ => None,
        }
    }

    /// Name of the count field this node reads (not the one it writes).
    pub fn count_ref(&self) -> Option<&str> {
        match self {
            Node::UIntArray { count: Count::Field(f), .. }
            | Node::VariableTypeArray { count: f, .. }
            | Node::VariableTypeArrayOffset { count: f, .. }
            | Node::VariableBitmap { count: f, .. }
            | Node::LeftAlignedVariableBitmap { count: f, .. }
            | Node::VariableArray { count: f, .. } => Some(f),
            _ => None,
        }
    }
}

/// Number of selector bits for a union of `n` candidates: ceil(log2(n)).
pub fn union_selector_bits(n: usize) -> u8 {
    if n < 2 {
        return 0;
    }
    (usize::BITS - (n - 1).leading_zeros()) as u8
}

// ==================== Builder helpers ====================

impl Descriptor {
    pub fn new(field: Option<&str>, node: Node) -> Self {
        let label = field.map(str::to_string).unwrap_or_else(|| node.kind_name().to_string());
        Descriptor { field: field.map(str::to_string), label, may_be_null: false, node }
    }

    pub fn nullable(mut self) -> Self {
        self.may_be_null = true;
        self
    }

    pub fn labeled(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn end() -> Self {
        Descriptor::new(None, Node::End)
    }

    pub fn bit(field: &str) -> Self {
        Descriptor::new(Some(field), Node::Bit)
    }

    pub fn uint(field: &str, width: u8) -> Self {
        Descriptor::new(Some(field), Node::UInt { width })
    }

    pub fn uint_offset(field: &str, width: u8, offset: u32) -> Self {
        Descriptor::new(Some(field), Node::UIntOffset { width, offset })
    }

    pub fn uint_lh(field: &str, width: u8) -> Self {
        Descriptor::new(Some(field), Node::UIntMaskedLH { width })
    }

    pub fn nested(field: &str, table: &str) -> Self {
        Descriptor::new(Some(field), Node::NestedType { table: table.to_string() })
    }

    pub fn rec_array(field: &str, width: u8, count: &str, tag: Tag) -> Self {
        Descriptor::new(Some(field), Node::RecursiveArray { width, count: count.to_string(), tag })
    }

    pub fn exists(field: &str) -> Self {
        Descriptor::new(Some(field), Node::Exists)
    }

    pub fn next_exists(field: &str, skip: usize) -> Self {
        Descriptor::new(Some(field), Node::NextExists { skip })
    }

    pub fn null(width: u32) -> Self {
        Descriptor::new(None, Node::Null { width })
    }

    pub fn fixed(width: u8, value: u64) -> Self {
        Descriptor::new(None, Node::FixedValue { width, value })
    }

    pub fn padding_to_end() -> Self {
        Descriptor::new(None, Node::PaddingToEnd)
    }

    pub fn union(field: &str, candidates: Vec<Descriptor>) -> Self {
        Descriptor::new(Some(field), Node::Union { candidates })
    }

    pub fn choice(field: &str, candidates: Vec<ChoiceCandidate>) -> Self {
        Descriptor::new(Some(field), Node::Choice { candidates })
    }

    pub fn trap(kind: ErrorKind, message: &str) -> Self {
        Descriptor::new(None, Node::TrapError { kind, message: message.to_string() })
    }
}

impl ChoiceCandidate {
    pub fn new(bits: u8, value: u64, descriptor: Descriptor) -> Self {
        ChoiceCandidate { bits, value, keep_bits: false, descriptor }
    }

    pub fn keep_bits(mut self) -> Self {
        self.keep_bits = true;
        self
    }
}

impl CrumbSpec {
    /// Build a spec from crumb lengths, most significant crumb first.
    pub fn msb_first(name: &str, lengths: &[u8]) -> Self {
        let total: u32 = lengths.iter().map(|&b| b as u32).sum();
        let mut used = 0u32;
        let crumbs = lengths
            .iter()
            .map(|&bits| {
                used += bits as u32;
                Crumb { bits, shift: total.saturating_sub(used) }
            })
            .collect();
        CrumbSpec { name: name.to_string(), crumbs }
    }

    pub fn total_bits(&self) -> u32 {
        self.crumbs.iter().map(|c| c.bits as u32).sum()
    }
}

impl Table {
    pub fn new(name: &str, descriptors: Vec<Descriptor>) -> Self {
        Table { name: name.to_string(), descriptors }
    }
}

impl Grammar {
    pub fn new() -> Self {
        Grammar::default()
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn with_crumbs(mut self, spec: CrumbSpec) -> Self {
        self.crumb_specs.push(spec);
        self
    }
}

// ==================== Resolution ====================

/// Resolved grammar: tables and crumb specs by name, callbacks and serializers bound.
#[derive(Clone)]
pub struct ResolvedGrammar {
    pub grammar: Grammar,
    pub tables_by_name: HashMap<String, usize>,
    pub crumbs_by_name: HashMap<String, usize>,
    callbacks: HashMap<String, Arc<dyn Callback>>,
    serializers: HashMap<String, Arc<dyn Serializer>>,
}

impl std::fmt::Debug for ResolvedGrammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedGrammar")
            .field("tables", &self.tables_by_name.len())
            .field("crumb_specs", &self.crumbs_by_name.len())
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .field("serializers", &self.serializers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ResolvedGrammar {
    /// Resolve names, bind registry entries and reject grammars with lint errors.
    pub fn resolve(grammar: Grammar, registry: &Registry) -> Result<Self, String> {
        let mut tables_by_name = HashMap::new();
        let mut crumbs_by_name = HashMap::new();
        for (i, t) in grammar.tables.iter().enumerate() {
            if tables_by_name.insert(t.name.clone(), i).is_some() {
                return Err(format!("Duplicate table name: {}", t.name));
            }
        }
        for (i, c) in grammar.crumb_specs.iter().enumerate() {
            if crumbs_by_name.insert(c.name.clone(), i).is_some() {
                return Err(format!("Duplicate crumb spec name: {}", c.name));
            }
        }

        let errors: Vec<String> = crate::lint::check_grammar(&grammar)
            .into_iter()
            .filter(|m| m.severity == crate::lint::Severity::Error)
            .map(|m| m.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(errors.join("; "));
        }

        let mut callbacks = HashMap::new();
        let mut serializers = HashMap::new();
        for t in &grammar.tables {
            for_each_descriptor(&t.descriptors, &mut |d| match &d.node {
                Node::Callback { name, .. } => match registry.callback(name) {
                    Some(cb) => {
                        callbacks.insert(name.clone(), cb);
                        Ok(())
                    }
                    None => Err(format!("table {}: unregistered callback '{}'", t.name, name)),
                },
                Node::Serialize { name, .. } => match registry.serializer(name) {
                    Some(s) => {
                        serializers.insert(name.clone(), s);
                        Ok(())
                    }
                    None => Err(format!("table {}: unregistered serializer '{}'", t.name, name)),
                },
                _ => Ok(()),
            })?;
        }

        Ok(ResolvedGrammar { grammar, tables_by_name, crumbs_by_name, callbacks, serializers })
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables_by_name.get(name).map(|&i| &self.grammar.tables[i])
    }

    pub fn get_crumb_spec(&self, name: &str) -> Option<&CrumbSpec> {
        self.crumbs_by_name.get(name).map(|&i| &self.grammar.crumb_specs[i])
    }

    pub fn callback(&self, name: &str) -> Option<&Arc<dyn Callback>> {
        self.callbacks.get(name)
    }

    pub fn serializer(&self, name: &str) -> Option<&Arc<dyn Serializer>> {
        self.serializers.get(name)
    }
}

/// Visit every descriptor, including choice/union candidates.
pub fn for_each_descriptor<E>(
    descriptors: &[Descriptor],
    f: &mut dyn FnMut(&Descriptor) -> Result<(), E>,
) -> Result<(), E> {
    for d in descriptors {
        f(d)?;
        match &d.node {
            Node::Choice { candidates } => {
                for c in candidates {
                    for_each_descriptor(std::slice::from_ref(&c.descriptor), f)?;
                }
            }
            Node::Union { candidates } | Node::UnionMaskedLH { candidates } => {
                for_each_descriptor(candidates, f)?;
            }
            _ => {}
        }
    }
    Ok(())
}
