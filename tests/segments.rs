//! Segment walks over the `SegA` / `SegB` tables of the demo grammar.

mod common;

use common::{codec_src, BitWriter};
use csn1dsl::{decode_segments, Codec, ErrorKind, Value};

const TABLES: [&str; 2] = ["SegA", "SegB"];

fn demo() -> Codec {
    codec_src(include_str!("../demos/packet_uplink_ack.csn"))
}

/// SegA(a = 5), SegB(body = AB CD), then `tail`.
fn stream(tail: &[(u64, usize)]) -> (Vec<u8>, i64) {
    let mut w = BitWriter::new();
    w.push(0b01, 2).push(5, 6);
    w.push(0b10, 2).push(2, 3).push(0xAB, 8).push(0xCD, 8);
    for &(v, n) in tail {
        w.push(v, n);
    }
    let n = w.len_bits() as i64;
    (w.bytes(), n)
}

#[test]
fn walks_until_no_tag_matches() {
    let c = demo();
    let (data, n) = stream(&[(0, 3)]);
    let r = decode_segments(&c, &TABLES, &data, 0, n, 1).expect("walk");
    assert!(r.error.is_none());
    let names: Vec<&str> = r.segments.iter().map(|s| s.table.as_str()).collect();
    assert_eq!(names, vec!["SegA", "SegB"]);
    assert_eq!(r.segments[0].bit_range, (0, 8));
    assert_eq!(r.segments[1].bit_range, (8, 29));
    assert_eq!(r.segments[0].record.u64("a"), Some(5));
    assert_eq!(r.segments[1].record.get("body"), Some(&Value::Bytes(vec![0xAB, 0xCD])));
    assert_eq!((r.end_offset, r.remaining_bits), (29, 3));
}

#[test]
fn minimum_size_stops_before_short_tail() {
    let c = demo();
    let (data, n) = stream(&[(0b0100, 4)]);

    let r = decode_segments(&c, &TABLES, &data, 0, n, 1).expect("walk");
    let err = r.error.expect("truncated SegA");
    assert_eq!(err.kind, ErrorKind::NeedMoreBits);
    assert_eq!(r.segments.len(), 2);

    let r = decode_segments(&c, &TABLES, &data, 0, n, 8).expect("walk");
    assert!(r.error.is_none());
    assert_eq!(r.segments.len(), 2);
    assert_eq!(r.remaining_bits, 4);
}

#[test]
fn failure_keeps_earlier_segments() {
    let c = demo();
    let mut w = BitWriter::new();
    w.push(0b01, 2).push(63, 6);
    w.push(0b10, 2).push(3, 3).push(0xFF, 8);
    let n = w.len_bits() as i64;
    let data = w.bytes();
    let r = decode_segments(&c, &TABLES, &data, 0, n, 1).expect("walk");
    assert_eq!(r.segments.len(), 1);
    assert_eq!(r.segments[0].record.u64("a"), Some(63));
    let err = r.error.expect("SegB runs short");
    assert_eq!(err.kind, ErrorKind::NeedMoreBits);
    assert_eq!(err.label, "body");
    assert!(err.partial.last().map(|e| e.is_error).unwrap_or(false));
    assert_eq!(r.end_offset, 8);
}

#[test]
fn bad_budgets_are_rejected() {
    let c = demo();
    assert_eq!(decode_segments(&c, &TABLES, &[0], 0, -1, 1).unwrap_err().kind, ErrorKind::DataNotValid);
    assert_eq!(decode_segments(&c, &TABLES, &[0], 0, 9, 1).unwrap_err().kind, ErrorKind::MessageTooLong);
}
