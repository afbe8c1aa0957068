//! Property-based tests for the bit cursor and the interpreter.
//!
//! Uses QuickCheck to generate payloads and check invariants that must hold for
//! any input: masking is an involution, reads match a naive bit walk, decoded
//! events never overlap, and a successful decode accounts for every bit it consumed.

mod common;

use common::{codec, codec_src};
use csn1dsl::ast::union_selector_bits;
use csn1dsl::bits::mask_byte;
use csn1dsl::event::{leaf_bits, visit_events};
use csn1dsl::{parse, BitCursor, DecodeEvent, Descriptor, ErrorKind, Grammar, Record, Table, Tag};
use quickcheck::TestResult;
use quickcheck_macros::quickcheck as qc_quickcheck;

const MIXED: &str = r#"
table Item {
    v: uint(3);
    more: next_exists(1);
    extra: uint_lh(4);
}

table Msg {
    kind: union {
        a: uint(2);
        b: type(Item);
        c: rec_array(2, n);
        d: bitmap(5);
    };
    items: rec_type_array(Item, count);
    tail: uint(6) ?;
    _: padding_to_end;
}
"#;

fn naive_bits(data: &[u8], offset: usize, width: u8) -> u64 {
    (0..width as usize).fold(0u64, |acc, i| {
        let pos = offset + i;
        (acc << 1) | ((data[pos / 8] >> (7 - pos % 8)) & 1) as u64
    })
}

/// Leaf events (errors excluded) in stream order never start before the previous one ended.
fn leaves_are_ordered(events: &[DecodeEvent]) -> bool {
    let mut end = 0usize;
    let mut ok = true;
    visit_events(events, &mut |_, e| {
        if e.is_nested() || e.is_error {
            return;
        }
        if e.start_bit < end {
            ok = false;
        }
        end = e.start_bit + e.bit_length;
    });
    ok
}

/// Property: applying the LH dither twice restores the octet.
#[qc_quickcheck]
fn masking_is_an_involution(b: u8) -> bool {
    mask_byte(mask_byte(b)) == b
}

/// Property: `read_bits` agrees with a bit-by-bit walk and moves offset and budget together.
#[qc_quickcheck]
fn read_bits_matches_naive_walk(data: Vec<u8>, offset: usize, width: u8) -> TestResult {
    let width = width % 33;
    let total = data.len() * 8;
    if width == 0 || total < width as usize {
        return TestResult::discard();
    }
    let offset = offset % (total - width as usize + 1);
    let mut cur = BitCursor::new(&data, offset, (total - offset) as i64);
    let before = cur.remaining();
    match cur.read_bits(width) {
        Ok(v) => TestResult::from_bool(
            v == naive_bits(&data, offset, width)
                && cur.offset() == offset + width as usize
                && cur.remaining() == before - width as i64,
        ),
        Err(_) => TestResult::failed(),
    }
}

/// Property: a successful decode consumes exactly the bits its leaf events cover,
/// and events (complete or partial) are in stream order.
#[qc_quickcheck]
fn decoded_events_cover_consumed_bits(data: Vec<u8>) -> TestResult {
    if data.is_empty() || data.len() > 64 {
        return TestResult::discard();
    }
    let c = codec_src(MIXED);
    let budget = (data.len() * 8) as i64;
    let mut rec = Record::new();
    match c.decode("Msg", &data, 0, budget, &mut rec) {
        Ok(r) => TestResult::from_bool(
            leaves_are_ordered(&r.events)
                && leaf_bits(&r.events) as i64 == budget - r.remaining_bits
                && r.remaining_bits == 0,
        ),
        Err(e) => TestResult::from_bool(
            leaves_are_ordered(&e.partial) && e.partial.iter().filter(|ev| ev.is_error).count() <= 1,
        ),
    }
}

/// Property: the union index is the selector value clamped to the last candidate.
#[qc_quickcheck]
fn union_index_is_clamped(n: u8, byte: u8) -> TestResult {
    let n = n as usize % 10;
    if n < 2 {
        return TestResult::discard();
    }
    let candidates = (0..n).map(|i| Descriptor::bit(&format!("c{}", i))).collect();
    let c = codec(Grammar::new().with_table(Table::new("T", vec![Descriptor::union("which", candidates)])));
    let bits = union_selector_bits(n);
    let raw = (byte >> (8 - bits)) as u64;
    let mut rec = Record::new();
    match c.decode("T", &[byte], 0, 8, &mut rec) {
        Ok(_) => TestResult::from_bool(rec.u64("which") == Some(raw.min(n as u64 - 1))),
        Err(_) => TestResult::failed(),
    }
}

/// Property: a self-terminating list that never terminates runs out of bits instead of looping.
#[qc_quickcheck]
fn unterminated_list_needs_more_bits(len: u8, width: u8) -> TestResult {
    let len = len as usize % 16 + 1;
    let width = width % 8 + 1;
    let table = Table::new("T", vec![Descriptor::rec_array("items", width, "count", Tag::Standard)]);
    let c = codec(Grammar::new().with_table(table));
    let data = vec![0xFF; len];
    let mut rec = Record::new();
    match c.decode("T", &data, 0, (len * 8) as i64, &mut rec) {
        Err(e) => TestResult::from_bool(e.kind == ErrorKind::NeedMoreBits),
        Ok(_) => TestResult::failed(),
    }
}

/// Property: the parser returns an error instead of panicking on arbitrary text.
#[qc_quickcheck]
fn parser_never_panics(src: String) -> bool {
    let _ = parse(&src);
    true
}
