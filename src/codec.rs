//! CSN.1 interpreter: walk a descriptor table over a bit stream.
//!
//! [`Codec::decode`] runs one table against a buffer, a start bit and a bit
//! budget, writing decoded fields into a caller-owned [`Record`] and returning
//! the unconsumed budget plus the [`DecodeEvent`]s for display.
//!
//! Descriptors are executed left to right. The exceptions are:
//!
//! - `NextExists*` with a `0` flag skips the next `k` siblings;
//! - `Exists*` with a `0` flag ends the current table successfully;
//! - `Choice` / `Union` run exactly one of the candidates they own;
//! - `End` ends the current table.
//!
//! Composite kinds decode into a child cursor and the parent adopts the child's
//! final position only on success. Any failure aborts the whole decode: the
//! error keeps the offset and label where it was raised, and the events decoded
//! so far are attached to it (see [`DecodeError::partial`]).

use crate::ast::*;
use crate::bits::BitCursor;
use crate::error::{DecodeError, ErrorKind};
use crate::event::{DecodeEvent, EventValue};
use crate::value::{Record, Value};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Interpreter settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeOptions {
    /// Maximum nesting of sub-tables before decoding is refused.
    pub max_depth: usize,
    /// Build [`DecodeEvent`]s; turn off for extent-only decoding.
    pub collect_events: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions { max_depth: 64, collect_events: true }
    }
}

/// Successful decode.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeResult {
    /// Budget left after the table ended.
    pub remaining_bits: i64,
    /// Absolute bit offset where decoding stopped.
    pub end_offset: usize,
    pub events: Vec<DecodeEvent>,
}

#[derive(Debug, Clone)]
pub struct Codec {
    resolved: ResolvedGrammar,
    options: DecodeOptions,
}

impl Codec {
    pub fn new(resolved: ResolvedGrammar) -> Self {
        Codec { resolved, options: DecodeOptions::default() }
    }

    pub fn with_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> DecodeOptions {
        self.options
    }

    pub fn resolved(&self) -> &ResolvedGrammar {
        &self.resolved
    }

    /// Decode `table_name` from `data`, starting at `start_bit`, with `budget` bits available.
    pub fn decode(
        &self,
        table_name: &str,
        data: &[u8],
        start_bit: usize,
        budget: i64,
        record: &mut Record,
    ) -> Result<DecodeResult, DecodeError> {
        let table = self.resolved.get_table(table_name).ok_or_else(|| {
            DecodeError::new(ErrorKind::ScriptError, start_bit, table_name).with_detail("unknown table")
        })?;
        self.decode_table(table, data, start_bit, budget, record)
    }

    /// Decode a whole buffer into a fresh record.
    pub fn decode_message(&self, table_name: &str, data: &[u8]) -> Result<(Record, DecodeResult), DecodeError> {
        let mut record = Record::new();
        let result = self.decode(table_name, data, 0, (data.len() * 8) as i64, &mut record)?;
        Ok((record, result))
    }

    /// Decode with a table that is not necessarily part of the resolved grammar.
    /// Nested references still resolve against the grammar.
    pub fn decode_table(
        &self,
        table: &Table,
        data: &[u8],
        start_bit: usize,
        budget: i64,
        record: &mut Record,
    ) -> Result<DecodeResult, DecodeError> {
        let interp = Interp { resolved: &self.resolved, options: self.options };
        interp.decode_top(table, data, start_bit, budget, record)
    }
}

/// Decode with default options. See [`Codec::decode`].
pub fn decode(
    resolved: &ResolvedGrammar,
    table_name: &str,
    data: &[u8],
    start_bit: usize,
    budget: i64,
    record: &mut Record,
) -> Result<DecodeResult, DecodeError> {
    let table = resolved.get_table(table_name).ok_or_else(|| {
        DecodeError::new(ErrorKind::ScriptError, start_bit, table_name).with_detail("unknown table")
    })?;
    let interp = Interp { resolved, options: DecodeOptions::default() };
    interp.decode_top(table, data, start_bit, budget, record)
}

// ==================== Interpreter ====================

/// Error on its way up; `logged` once an error event was emitted for it.
struct Failure {
    error: DecodeError,
    logged: bool,
}

impl From<DecodeError> for Failure {
    fn from(error: DecodeError) -> Self {
        Failure { error, logged: false }
    }
}

type Step<T> = Result<T, Failure>;

enum Flow {
    Next,
    Skip(usize),
    Stop,
}

/// State of one record level: the record and split-bit fragments read so far, by crumb spec.
struct Level<'r> {
    record: &'r mut Record,
    crumbs: HashMap<String, Vec<Option<u64>>>,
}

struct Interp<'c> {
    resolved: &'c ResolvedGrammar,
    options: DecodeOptions,
}

fn fail(kind: ErrorKind, at: usize, d: &Descriptor) -> DecodeError {
    DecodeError::new(kind, at, &d.label)
}

/// Store `v` in the narrowest width holding both `width` bits and the value itself.
fn fit(width: u8, v: u64) -> Value {
    let need = (64 - v.leading_zeros()) as u8;
    Value::uint(width.max(need), v)
}

fn biased(n: u64, offset: i32, at: usize, d: &Descriptor) -> Result<u64, DecodeError> {
    let v = i64::try_from(n).unwrap_or(i64::MAX).saturating_add(offset as i64);
    if v < 0 {
        return Err(fail(ErrorKind::DataNotValid, at, d).with_detail(format!("count {} with offset {} is negative", n, offset)));
    }
    Ok(v as u64)
}

/// Bits needed by `n` elements of `width` bits, saturating.
fn span_bits(n: u64, width: u64) -> i64 {
    i64::try_from(n.saturating_mul(width)).unwrap_or(i64::MAX)
}

/// Preallocation for `n` elements, capped by what the remaining budget can hold.
fn capacity(n: u64, element_bits: u64, cur: &BitCursor<'_>) -> usize {
    let fit = cur.remaining().max(0) as u64 / element_bits.max(1);
    n.min(fit) as usize
}

/// Bits packed MSB-first, first byte left-aligned.
fn left_aligned_bytes(raw: u64, width: u8) -> Vec<u8> {
    let nbytes = (width as usize + 7) / 8;
    let aligned = if width == 0 { 0 } else { raw << (64 - width as u32) };
    aligned.to_be_bytes()[..nbytes].to_vec()
}

impl<'c> Interp<'c> {
    fn decode_top(
        &self,
        table: &Table,
        data: &[u8],
        start_bit: usize,
        budget: i64,
        record: &mut Record,
    ) -> Result<DecodeResult, DecodeError> {
        debug!(table = %table.name, start_bit, budget, "csn1 decode");
        if budget < 0 {
            return Err(DecodeError::new(ErrorKind::DataNotValid, start_bit, &table.name)
                .with_detail(format!("negative bit budget {}", budget)));
        }
        if (start_bit as i64).saturating_add(budget) > (data.len() * 8) as i64 {
            return Err(DecodeError::new(ErrorKind::MessageTooLong, start_bit, &table.name).with_detail(format!(
                "{} bits from bit {} exceed a {}-byte buffer",
                budget,
                start_bit,
                data.len()
            )));
        }
        let mut cur = BitCursor::new(data, start_bit, budget);
        let mut events = Vec::new();
        match self.run_table(table, &mut cur, record, &mut events, 0) {
            Ok(()) => {
                debug!(table = %table.name, end = cur.offset(), remaining = cur.remaining(), "csn1 decode done");
                Ok(DecodeResult { remaining_bits: cur.remaining(), end_offset: cur.offset(), events })
            }
            Err(f) => {
                let mut e = f.error;
                debug!(table = %table.name, kind = ?e.kind, label = %e.label, bit = e.bit_offset, "csn1 decode failed");
                e.partial = events;
                Err(e)
            }
        }
    }

    fn emit(&self, events: &mut Vec<DecodeEvent>, e: DecodeEvent) {
        if self.options.collect_events {
            events.push(e);
        }
    }

    fn emit_group(&self, events: &mut Vec<DecodeEvent>, label: &str, start: usize, end: usize, children: Vec<DecodeEvent>) {
        if self.options.collect_events {
            events.push(DecodeEvent::nested(label, start, end - start, children));
        }
    }

    fn run_table(
        &self,
        table: &Table,
        cur: &mut BitCursor<'_>,
        record: &mut Record,
        events: &mut Vec<DecodeEvent>,
        depth: usize,
    ) -> Step<()> {
        if depth > self.options.max_depth {
            return Err(DecodeError::new(ErrorKind::StreamNotSupported, cur.offset(), &table.name)
                .with_detail(format!("nesting deeper than {} tables", self.options.max_depth))
                .into());
        }
        let mut level = Level { record, crumbs: HashMap::new() };
        self.run(&table.descriptors, cur, &mut level, events, depth)
    }

    fn run(
        &self,
        descriptors: &[Descriptor],
        cur: &mut BitCursor<'_>,
        level: &mut Level<'_>,
        events: &mut Vec<DecodeEvent>,
        depth: usize,
    ) -> Step<()> {
        let mut pc = 0;
        while pc < descriptors.len() {
            match self.exec(&descriptors[pc], cur, level, events, depth)? {
                Flow::Next => pc += 1,
                Flow::Skip(n) => pc += 1 + n,
                Flow::Stop => return Ok(()),
            }
        }
        Ok(())
    }

    /// Execute one descriptor; a failure raised here gets an error event.
    fn exec(
        &self,
        d: &Descriptor,
        cur: &mut BitCursor<'_>,
        level: &mut Level<'_>,
        events: &mut Vec<DecodeEvent>,
        depth: usize,
    ) -> Step<Flow> {
        trace!(
            kind = d.node.kind_name(),
            label = %d.label,
            offset = cur.offset(),
            remaining = cur.remaining(),
            "csn1 step"
        );
        match self.step(d, cur, level, events, depth) {
            Ok(flow) => Ok(flow),
            Err(mut f) => {
                if !f.logged {
                    let ev = DecodeEvent::error(&d.label, f.error.bit_offset, f.error.describe());
                    self.emit(events, ev);
                    f.logged = true;
                }
                Err(f)
            }
        }
    }

    fn store(&self, level: &mut Level<'_>, d: &Descriptor, v: Value) {
        if let Some(f) = &d.field {
            level.record.set(f.as_str(), v);
        }
    }

    /// `may_be_null` field without enough bits: store an absent value, consume nothing.
    fn short(&self, d: &Descriptor, cur: &BitCursor<'_>, need: i64) -> bool {
        d.may_be_null && cur.remaining() < need.max(1)
    }

    fn absent(&self, d: &Descriptor, cur: &BitCursor<'_>, level: &mut Level<'_>, events: &mut Vec<DecodeEvent>) {
        self.store(level, d, Value::Absent);
        self.emit(events, DecodeEvent::not_present(&d.label, cur.offset()));
    }

    fn read(&self, cur: &mut BitCursor<'_>, width: u8, d: &Descriptor) -> Step<u64> {
        let at = cur.offset();
        cur.read_bits(width).map_err(|k| fail(k, at, d).into())
    }

    fn skip(&self, cur: &mut BitCursor<'_>, width: usize, d: &Descriptor) -> Step<()> {
        let at = cur.offset();
        cur.skip(width).map_err(|k| fail(k, at, d).into())
    }

    fn count_field(&self, level: &Level<'_>, field: &str, at: usize, d: &Descriptor) -> Step<u64> {
        level.record.u64(field).ok_or_else(|| {
            fail(ErrorKind::ScriptError, at, d)
                .with_detail(format!("count field '{}' not decoded yet", field))
                .into()
        })
    }

    fn table(&self, name: &str, at: usize, d: &Descriptor) -> Step<&'c Table> {
        self.resolved.get_table(name).ok_or_else(|| {
            fail(ErrorKind::ScriptError, at, d).with_detail(format!("unknown table '{}'", name)).into()
        })
    }

    /// Decode one instance of `table` in a child cursor; splice on success.
    fn nested(
        &self,
        table: &Table,
        label: &str,
        cur: &mut BitCursor<'_>,
        events: &mut Vec<DecodeEvent>,
        depth: usize,
    ) -> Step<Record> {
        let start = cur.offset();
        let mut child = cur.child();
        let mut record = Record::new();
        let mut children = Vec::new();
        let res = self.run_table(table, &mut child, &mut record, &mut children, depth + 1);
        self.emit_group(events, label, start, child.offset(), children);
        res?;
        cur.splice(&child);
        Ok(record)
    }

    fn step(
        &self,
        d: &Descriptor,
        cur: &mut BitCursor<'_>,
        level: &mut Level<'_>,
        events: &mut Vec<DecodeEvent>,
        depth: usize,
    ) -> Step<Flow> {
        let at = cur.offset();
        match &d.node {
            Node::End => Ok(Flow::Stop),

            Node::Bit => {
                if self.short(d, cur, 1) {
                    self.absent(d, cur, level, events);
                    return Ok(Flow::Next);
                }
                let v = self.read(cur, 1, d)?;
                self.store(level, d, Value::U8(v as u8));
                self.emit(events, DecodeEvent::leaf(&d.label, at, 1, EventValue::UInt(v)));
                Ok(Flow::Next)
            }

            Node::UInt { width } => self.uint(d, cur, level, events, *width, 0),
            Node::UIntOffset { width, offset } => self.uint(d, cur, level, events, *width, *offset as u64),

            Node::UIntMaskedLH { width } => {
                if !(1..=8).contains(width) {
                    return Err(fail(ErrorKind::GeneralError, at, d)
                        .with_detail(format!("masked field of {} bits (max 8)", width))
                        .into());
                }
                if self.short(d, cur, *width as i64) {
                    self.absent(d, cur, level, events);
                    return Ok(Flow::Next);
                }
                let v = cur.read_masked_bits(*width).map_err(|k| Failure::from(fail(k, at, d)))?;
                self.store(level, d, Value::U8(v));
                self.emit(events, DecodeEvent::leaf(&d.label, at, *width as usize, EventValue::UInt(v as u64)));
                Ok(Flow::Next)
            }

            Node::SplitBitsCrumb { spec, index } => {
                let spec_def = self.resolved.get_crumb_spec(spec).ok_or_else(|| {
                    Failure::from(fail(ErrorKind::ScriptError, at, d).with_detail(format!("unknown crumb spec '{}'", spec)))
                })?;
                let crumb = *spec_def.crumbs.get(*index).ok_or_else(|| {
                    Failure::from(fail(ErrorKind::ScriptError, at, d).with_detail(format!("crumb index {} out of range", index)))
                })?;
                let v = self.read(cur, crumb.bits, d)?;
                let slots = level.crumbs.entry(spec.clone()).or_insert_with(|| vec![None; spec_def.crumbs.len()]);
                slots[*index] = Some(v);
                self.store(level, d, Value::uint(crumb.bits, v));
                self.emit(events, DecodeEvent::leaf(&d.label, at, crumb.bits as usize, EventValue::UInt(v)));
                Ok(Flow::Next)
            }

            Node::SplitBits { spec } => {
                let spec_def = self.resolved.get_crumb_spec(spec).ok_or_else(|| {
                    Failure::from(fail(ErrorKind::ScriptError, at, d).with_detail(format!("unknown crumb spec '{}'", spec)))
                })?;
                let total = spec_def.total_bits();
                if !(1..=64).contains(&total) {
                    return Err(fail(ErrorKind::GeneralError, at, d)
                        .with_detail(format!("crumb spec '{}' assembles {} bits", spec, total))
                        .into());
                }
                let slots = level.crumbs.remove(spec.as_str()).unwrap_or_default();
                let mut value = 0u64;
                for (i, crumb) in spec_def.crumbs.iter().enumerate() {
                    let part = slots.get(i).copied().flatten().ok_or_else(|| {
                        Failure::from(fail(ErrorKind::InternalError, at, d).with_detail(format!("crumb {} of '{}' not read", i, spec)))
                    })?;
                    value |= part.checked_shl(crumb.shift).unwrap_or(0);
                }
                self.store(level, d, Value::uint(total as u8, value));
                self.emit(events, DecodeEvent::leaf(&d.label, at, 0, EventValue::UInt(value)));
                Ok(Flow::Next)
            }

            Node::UIntArray { width, count } => {
                match *width {
                    1..=16 => {}
                    17..=32 => {
                        return Err(fail(ErrorKind::NotImplemented, at, d)
                            .with_detail(format!("array elements of {} bits", width))
                            .into())
                    }
                    _ => {
                        return Err(fail(ErrorKind::GeneralError, at, d)
                            .with_detail(format!("array elements of {} bits", width))
                            .into())
                    }
                }
                let n = match count {
                    Count::Fixed(n) => *n as u64,
                    Count::Field(f) => self.count_field(level, f, at, d)?,
                };
                if self.short(d, cur, span_bits(n, *width as u64)) {
                    self.absent(d, cur, level, events);
                    return Ok(Flow::Next);
                }
                let mut items = Vec::with_capacity(capacity(n, *width as u64, cur));
                let mut children = Vec::new();
                let mut res = Ok(());
                for i in 0..n {
                    let el_at = cur.offset();
                    match self.read(cur, *width, d) {
                        Ok(v) => {
                            items.push(Value::uint(*width, v));
                            self.emit(
                                &mut children,
                                DecodeEvent::leaf(&format!("{}[{}]", d.label, i), el_at, *width as usize, EventValue::UInt(v)),
                            );
                        }
                        Err(f) => {
                            res = Err(f);
                            break;
                        }
                    }
                }
                self.emit_group(events, &d.label, at, cur.offset(), children);
                res?;
                self.store(level, d, Value::List(items));
                Ok(Flow::Next)
            }

            Node::NestedType { table } => {
                if self.short(d, cur, 1) {
                    self.absent(d, cur, level, events);
                    return Ok(Flow::Next);
                }
                let t = self.table(table, at, d)?;
                let record = self.nested(t, &d.label, cur, events, depth)?;
                self.store(level, d, Value::Struct(record));
                Ok(Flow::Next)
            }

            Node::TypeArray { table, count } => self.type_array(d, cur, level, events, depth, table, *count as u64),
            Node::VariableTypeArray { table, count } => {
                let n = self.count_field(level, count, at, d)?;
                self.type_array(d, cur, level, events, depth, table, n)
            }
            Node::VariableTypeArrayOffset { table, count } => {
                let n = self.count_field(level, count, at, d)?.saturating_sub(1);
                self.type_array(d, cur, level, events, depth, table, n)
            }

            Node::Bitmap { width } => {
                if !(1..=64).contains(width) {
                    return Err(fail(ErrorKind::GeneralError, at, d)
                        .with_detail(format!("bitmap of {} bits (max 64)", width))
                        .into());
                }
                if self.short(d, cur, *width as i64) {
                    self.absent(d, cur, level, events);
                    return Ok(Flow::Next);
                }
                let raw = self.read(cur, *width, d)?;
                self.store(level, d, Value::Bytes(left_aligned_bytes(raw, *width)));
                self.emit(events, DecodeEvent::leaf(&d.label, at, *width as usize, EventValue::UInt(raw)));
                Ok(Flow::Next)
            }

            Node::VariableBitmap { count, offset } => {
                let n = self.count_field(level, count, at, d)?;
                let n = biased(n, *offset, at, d)?;
                self.bitmap(d, cur, level, events, n as usize, false)
            }
            Node::VariableBitmapToEnd { offset } => {
                let n = self.bits_to_end(cur, *offset, d)?;
                self.bitmap(d, cur, level, events, n, false)
            }
            Node::LeftAlignedVariableBitmap { count, offset } => {
                let n = self.count_field(level, count, at, d)?;
                let n = biased(n, *offset, at, d)?;
                self.bitmap(d, cur, level, events, n as usize, true)
            }
            Node::LeftAlignedVariableBitmapToEnd { offset } => {
                let n = self.bits_to_end(cur, *offset, d)?;
                self.bitmap(d, cur, level, events, n, true)
            }

            Node::PaddingToEnd => {
                let n = cur.remaining().max(0) as usize;
                let raw = if n <= 64 { cur.peek_bits(n as u8).unwrap_or(0) } else { 0 };
                self.skip(cur, n, d)?;
                self.emit(events, DecodeEvent::leaf(&d.label, at, n, EventValue::bits(n, raw)));
                Ok(Flow::Next)
            }

            Node::VariableArray { count, offset } => {
                let n = self.count_field(level, count, at, d)?;
                let n = biased(n, *offset, at, d)?;
                if self.short(d, cur, span_bits(n, 8)) {
                    self.absent(d, cur, level, events);
                    return Ok(Flow::Next);
                }
                let mut bytes = Vec::with_capacity(capacity(n, 8, cur));
                for _ in 0..n {
                    bytes.push(self.read(cur, 8, d)? as u8);
                }
                self.emit(events, DecodeEvent::leaf(&d.label, at, n as usize * 8, EventValue::Bytes(bytes.clone())));
                self.store(level, d, Value::Bytes(bytes));
                Ok(Flow::Next)
            }

            Node::RecursiveArray { width, count, tag } => {
                if !(1..=32).contains(width) {
                    return Err(fail(ErrorKind::GeneralError, at, d)
                        .with_detail(format!("list elements of {} bits", width))
                        .into());
                }
                let mut items = Vec::new();
                let mut children = Vec::new();
                let res = self.recursive_items(d, cur, *width, *tag, &mut items, &mut children);
                self.emit_group(events, &d.label, at, cur.offset(), children);
                res?;
                let n = items.len() as u64;
                self.store(level, d, Value::List(items));
                level.record.set(count.as_str(), fit(8, n));
                Ok(Flow::Next)
            }

            Node::RecursiveTypeArray { table, count } => {
                self.recursive_type_array(d, cur, level, events, depth, table, count, false, Tag::Standard)
            }
            Node::RecursiveTypeArrayFirstAlwaysPresent { table, count } => {
                self.recursive_type_array(d, cur, level, events, depth, table, count, true, Tag::Standard)
            }
            Node::RecursiveTypeArrayFirstAlwaysPresentReversedTag { table, count } => {
                self.recursive_type_array(d, cur, level, events, depth, table, count, true, Tag::Reversed)
            }

            Node::Exists | Node::ExistsMaskedLH => {
                if self.short(d, cur, 1) {
                    self.store(level, d, Value::U8(0));
                    self.emit(events, DecodeEvent::not_present(&d.label, at));
                    return Ok(Flow::Stop);
                }
                let v = self.flag(d, cur)?;
                self.store(level, d, Value::U8(v as u8));
                self.emit(events, DecodeEvent::leaf(&d.label, at, 1, EventValue::UInt(v as u64)));
                Ok(if v { Flow::Next } else { Flow::Stop })
            }

            Node::NextExists { skip } | Node::NextExistsMaskedLH { skip } => {
                if self.short(d, cur, 1) {
                    self.store(level, d, Value::U8(0));
                    self.emit(events, DecodeEvent::not_present(&d.label, at));
                    return Ok(Flow::Skip(*skip));
                }
                let v = self.flag(d, cur)?;
                self.store(level, d, Value::U8(v as u8));
                self.emit(events, DecodeEvent::leaf(&d.label, at, 1, EventValue::UInt(v as u64)));
                Ok(if v { Flow::Next } else { Flow::Skip(*skip) })
            }

            Node::Null { width } => {
                let n = *width as usize;
                let raw = if n <= 64 { cur.peek_bits(n as u8).unwrap_or(0) } else { 0 };
                self.skip(cur, n, d)?;
                self.emit(events, DecodeEvent::leaf(&d.label, at, n, EventValue::bits(n, raw)));
                Ok(Flow::Next)
            }

            Node::FixedValue { width, value } => {
                if !(1..=64).contains(width) {
                    return Err(fail(ErrorKind::GeneralError, at, d)
                        .with_detail(format!("fixed value of {} bits", width))
                        .into());
                }
                let v = self.read(cur, *width, d)?;
                if v != *value {
                    return Err(fail(ErrorKind::GeneralError, at, d)
                        .with_detail(format!("expected {:#x}, found {:#x}", value, v))
                        .into());
                }
                self.store(level, d, Value::uint(*width, v));
                self.emit(events, DecodeEvent::leaf(&d.label, at, *width as usize, EventValue::UInt(v)));
                Ok(Flow::Next)
            }

            Node::Callback { name, params } => {
                let cb = self.resolved.callback(name).ok_or_else(|| {
                    Failure::from(fail(ErrorKind::ScriptError, at, d).with_detail(format!("unregistered callback '{}'", name)))
                })?;
                let n = cb.call(cur.data(), at, &mut *level.record, (params.0.as_str(), params.1.as_str()));
                self.skip(cur, n, d)?;
                self.emit(events, DecodeEvent::leaf(&d.label, at, n, EventValue::BitCount(n)));
                Ok(Flow::Next)
            }

            Node::Serialize { name, length_len } => self.serialize(d, cur, level, events, name, *length_len),

            Node::Choice { candidates } => {
                if self.short(d, cur, 1) {
                    self.absent(d, cur, level, events);
                    return Ok(Flow::Next);
                }
                let mut unreadable = None;
                for (i, c) in candidates.iter().enumerate() {
                    let sel = match cur.peek_bits(c.bits) {
                        Ok(sel) => sel,
                        Err(k) => {
                            unreadable.get_or_insert(k);
                            continue;
                        }
                    };
                    if sel != c.value {
                        continue;
                    }
                    self.store(level, d, Value::U8(i as u8));
                    let mut children = Vec::new();
                    if !c.keep_bits && c.bits > 0 {
                        self.skip(cur, c.bits as usize, d)?;
                        self.emit(
                            &mut children,
                            DecodeEvent::leaf(&format!("{} selector", d.label), at, c.bits as usize, EventValue::UInt(sel)),
                        );
                    }
                    let res = self.exec(&c.descriptor, cur, level, &mut children, depth);
                    self.emit_group(events, &d.label, at, cur.offset(), children);
                    res?;
                    return Ok(Flow::Next);
                }
                match unreadable {
                    Some(k) => Err(fail(k, at, d).with_detail("choice selector runs past the budget").into()),
                    None => Err(fail(ErrorKind::ScriptError, at, d).with_detail("no choice candidate matches").into()),
                }
            }

            Node::Union { candidates } => self.union(d, cur, level, events, depth, candidates, false),
            Node::UnionMaskedLH { candidates } => self.union(d, cur, level, events, depth, candidates, true),

            Node::TrapError { kind, message } => Err(fail(*kind, at, d).with_detail(message.clone()).into()),
        }
    }

    fn uint(
        &self,
        d: &Descriptor,
        cur: &mut BitCursor<'_>,
        level: &mut Level<'_>,
        events: &mut Vec<DecodeEvent>,
        width: u8,
        offset: u64,
    ) -> Step<Flow> {
        let at = cur.offset();
        if !(1..=32).contains(&width) {
            return Err(fail(ErrorKind::GeneralError, at, d)
                .with_detail(format!("integer of {} bits (max 32)", width))
                .into());
        }
        if self.short(d, cur, width as i64) {
            self.absent(d, cur, level, events);
            return Ok(Flow::Next);
        }
        let raw = self.read(cur, width, d)?;
        let v = raw + offset;
        self.store(level, d, fit(width, v));
        self.emit(events, DecodeEvent::leaf(&d.label, at, width as usize, EventValue::UInt(v)));
        Ok(Flow::Next)
    }

    fn flag(&self, d: &Descriptor, cur: &mut BitCursor<'_>) -> Step<bool> {
        let at = cur.offset();
        let v = match d.node {
            Node::ExistsMaskedLH | Node::NextExistsMaskedLH { .. } => {
                cur.read_masked_bits(1).map_err(|k| Failure::from(fail(k, at, d)))? as u64
            }
            _ => self.read(cur, 1, d)?,
        };
        Ok(v != 0)
    }

    fn bits_to_end(&self, cur: &BitCursor<'_>, reserve: i32, d: &Descriptor) -> Step<usize> {
        let n = cur.remaining() - reserve as i64;
        if n < 0 {
            return Err(fail(ErrorKind::DataNotValid, cur.offset(), d)
                .with_detail(format!("{} bits left, {} reserved", cur.remaining(), reserve))
                .into());
        }
        Ok(n as usize)
    }

    fn bitmap(
        &self,
        d: &Descriptor,
        cur: &mut BitCursor<'_>,
        level: &mut Level<'_>,
        events: &mut Vec<DecodeEvent>,
        n: usize,
        left_aligned: bool,
    ) -> Step<Flow> {
        let at = cur.offset();
        if n > 0 && self.short(d, cur, n as i64) {
            self.absent(d, cur, level, events);
            return Ok(Flow::Next);
        }
        let raw = if n <= 64 { cur.peek_bits(n as u8).map_err(|k| Failure::from(fail(k, at, d)))? } else { 0 };
        let partial = n % 8;
        let mut bytes = Vec::with_capacity(capacity((n as u64 + 7) / 8, 8, cur));
        if left_aligned {
            for _ in 0..n / 8 {
                bytes.push(self.read(cur, 8, d)? as u8);
            }
            if partial > 0 {
                let v = self.read(cur, partial as u8, d)? as u8;
                bytes.push(v << (8 - partial));
            }
        } else {
            if partial > 0 {
                bytes.push(self.read(cur, partial as u8, d)? as u8);
            }
            for _ in 0..n / 8 {
                bytes.push(self.read(cur, 8, d)? as u8);
            }
        }
        self.store(level, d, Value::Bytes(bytes));
        self.emit(events, DecodeEvent::leaf(&d.label, at, n, EventValue::bits(n, raw)));
        Ok(Flow::Next)
    }

    #[allow(clippy::too_many_arguments)]
    fn type_array(
        &self,
        d: &Descriptor,
        cur: &mut BitCursor<'_>,
        level: &mut Level<'_>,
        events: &mut Vec<DecodeEvent>,
        depth: usize,
        table: &str,
        n: u64,
    ) -> Step<Flow> {
        let at = cur.offset();
        if n > 0 && self.short(d, cur, 1) {
            self.absent(d, cur, level, events);
            return Ok(Flow::Next);
        }
        let t = self.table(table, at, d)?;
        let mut items = Vec::with_capacity(capacity(n, 1, cur));
        let mut children = Vec::new();
        let mut res = Ok(());
        for i in 0..n {
            match self.nested(t, &format!("{}[{}]", d.label, i), cur, &mut children, depth) {
                Ok(r) => items.push(Value::Struct(r)),
                Err(f) => {
                    res = Err(f);
                    break;
                }
            }
        }
        self.emit_group(events, &d.label, at, cur.offset(), children);
        res?;
        self.store(level, d, Value::List(items));
        Ok(Flow::Next)
    }

    fn recursive_items(
        &self,
        d: &Descriptor,
        cur: &mut BitCursor<'_>,
        width: u8,
        tag: Tag,
        items: &mut Vec<Value>,
        children: &mut Vec<DecodeEvent>,
    ) -> Step<()> {
        loop {
            let tag_at = cur.offset();
            let bit = self.read(cur, 1, d)?;
            self.emit(children, DecodeEvent::leaf(&format!("{} tag", d.label), tag_at, 1, EventValue::UInt(bit)));
            if !tag.continues(bit == 1) {
                return Ok(());
            }
            let el_at = cur.offset();
            let v = self.read(cur, width, d)?;
            self.emit(
                children,
                DecodeEvent::leaf(&format!("{}[{}]", d.label, items.len()), el_at, width as usize, EventValue::UInt(v)),
            );
            items.push(Value::uint(width, v));
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn recursive_type_array(
        &self,
        d: &Descriptor,
        cur: &mut BitCursor<'_>,
        level: &mut Level<'_>,
        events: &mut Vec<DecodeEvent>,
        depth: usize,
        table: &str,
        count: &str,
        first_present: bool,
        tag: Tag,
    ) -> Step<Flow> {
        let at = cur.offset();
        let t = self.table(table, at, d)?;
        let mut items = Vec::new();
        let mut children = Vec::new();
        let res = self.recursive_type_items(d, cur, t, depth, first_present, tag, &mut items, &mut children);
        self.emit_group(events, &d.label, at, cur.offset(), children);
        res?;
        let n = items.len() as u64;
        self.store(level, d, Value::List(items));
        level.record.set(count, fit(8, n));
        Ok(Flow::Next)
    }

    #[allow(clippy::too_many_arguments)]
    fn recursive_type_items(
        &self,
        d: &Descriptor,
        cur: &mut BitCursor<'_>,
        table: &Table,
        depth: usize,
        first_present: bool,
        tag: Tag,
        items: &mut Vec<Value>,
        children: &mut Vec<DecodeEvent>,
    ) -> Step<()> {
        if first_present {
            let r = self.nested(table, &format!("{}[0]", d.label), cur, children, depth)?;
            items.push(Value::Struct(r));
        }
        loop {
            let tag_at = cur.offset();
            let bit = self.read(cur, 1, d)?;
            self.emit(children, DecodeEvent::leaf(&format!("{} tag", d.label), tag_at, 1, EventValue::UInt(bit)));
            if !tag.continues(bit == 1) {
                return Ok(());
            }
            let r = self.nested(table, &format!("{}[{}]", d.label, items.len()), cur, children, depth)?;
            items.push(Value::Struct(r));
        }
    }

    fn serialize(
        &self,
        d: &Descriptor,
        cur: &mut BitCursor<'_>,
        level: &mut Level<'_>,
        events: &mut Vec<DecodeEvent>,
        name: &str,
        length_len: u8,
    ) -> Step<Flow> {
        let at = cur.offset();
        if self.short(d, cur, length_len as i64) {
            self.absent(d, cur, level, events);
            return Ok(Flow::Next);
        }
        let serializer = self.resolved.serializer(name).ok_or_else(|| {
            Failure::from(fail(ErrorKind::ScriptError, at, d).with_detail(format!("unregistered serializer '{}'", name)))
        })?;
        let mut children = Vec::new();
        let mut length = 0u64;
        if length_len > 0 {
            length = self.read(cur, length_len, d)?;
            self.emit(
                &mut children,
                DecodeEvent::leaf(&format!("{} length", d.label), at, length_len as usize, EventValue::UInt(length)),
            );
            if length as i64 > cur.remaining() {
                self.emit_group(events, &d.label, at, cur.offset(), children);
                return Err(fail(ErrorKind::NeedMoreBits, cur.offset(), d)
                    .with_detail(format!("length {} exceeds {} remaining bits", length, cur.remaining()))
                    .into());
            }
        }
        let budget = if length > 0 { length as i64 } else { cur.remaining() };
        let mut sub = cur.bounded(budget);
        let body_start = sub.offset();
        let mut record = Record::new();
        let res = serializer.serialize(&mut sub, &mut record, &mut children);
        if res.is_ok() && length > 0 {
            let used = (sub.offset() - body_start) as u64;
            if used < length {
                let spare = (length - used) as usize;
                self.emit(
                    &mut children,
                    DecodeEvent::leaf(&format!("{} spare", d.label), sub.offset(), spare, EventValue::BitCount(spare)),
                );
            }
        }
        let end = if res.is_ok() && length > 0 { body_start + length as usize } else { sub.offset() };
        self.emit_group(events, &d.label, at, end, children);
        res?;
        if length > 0 {
            self.skip(cur, length as usize, d)?;
        } else {
            cur.splice(&sub);
        }
        self.store(level, d, Value::Struct(record));
        Ok(Flow::Next)
    }

    #[allow(clippy::too_many_arguments)]
    fn union(
        &self,
        d: &Descriptor,
        cur: &mut BitCursor<'_>,
        level: &mut Level<'_>,
        events: &mut Vec<DecodeEvent>,
        depth: usize,
        candidates: &[Descriptor],
        masked: bool,
    ) -> Step<Flow> {
        let at = cur.offset();
        if candidates.len() < 2 {
            return Err(fail(ErrorKind::ScriptError, at, d)
                .with_detail(format!("union of {} candidates", candidates.len()))
                .into());
        }
        let bits = union_selector_bits(candidates.len());
        if self.short(d, cur, bits as i64) {
            self.absent(d, cur, level, events);
            return Ok(Flow::Next);
        }
        let mut raw = 0u64;
        for _ in 0..bits {
            let bit_at = cur.offset();
            let b = if masked {
                cur.read_masked_bits(1).map_err(|k| Failure::from(fail(k, bit_at, d)))? as u64
            } else {
                self.read(cur, 1, d)?
            };
            raw = (raw << 1) | b;
        }
        let index = (raw as usize).min(candidates.len() - 1);
        let chosen = candidates.get(index).ok_or_else(|| {
            Failure::from(fail(ErrorKind::InvalidUnionIndex, at, d).with_detail(format!("index {}", index)))
        })?;
        self.store(level, d, Value::U8(index as u8));
        let mut children = Vec::new();
        self.emit(
            &mut children,
            DecodeEvent::leaf(&format!("{} selector", d.label), at, bits as usize, EventValue::UInt(raw)),
        );
        let res = self.exec(chosen, cur, level, &mut children, depth);
        self.emit_group(events, &d.label, at, cur.offset(), children);
        res?;
        Ok(Flow::Next)
    }
}
