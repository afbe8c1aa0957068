//! Benchmark: decode a Packet Uplink Ack/Nack block from demos/packet_uplink_ack.csn,
//! with events (display path) and without (extent-only path).

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use csn1dsl::{parse, Codec, DecodeOptions, Record, Registry, ResolvedGrammar};
use std::path::PathBuf;

/// MSB-first bit writer for building payloads.
struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    fn new() -> Self {
        BitWriter { bytes: Vec::new(), bits: 0 }
    }

    fn push(&mut self, value: u64, width: usize) -> &mut Self {
        for i in (0..width).rev() {
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.bits % 8);
            }
            self.bits += 1;
        }
        self
    }

    fn finish(&mut self, len: usize) -> Vec<u8> {
        let mut out = self.bytes.clone();
        out.resize(len, 0x2B);
        out
    }
}

fn uplink_ack_block() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.push(0b001001, 6).push(0, 2).push(0, 2);
    w.push(0, 1).push(0b10101, 5);
    w.push(1, 2);
    w.push(0x2A, 7).push(1, 1).push(0xF0F0_F0F0_0F0F_0F0F, 64);
    w.push(1, 1);
    w.push(1, 1).push(20, 6).push(1, 1).push(3, 4).push(5, 3);
    for (tsc, arfcn, maio) in [(2u64, 0x155u64, 7u64), (5, 0x2AA, 33)] {
        w.push(1, 1).push(tsc, 3).push(arfcn >> 8, 2).push(maio, 6).push(arfcn & 0xFF, 8);
    }
    w.push(0, 1);
    w.push(1, 1).push(9, 4).push(1, 1).push(12, 4).push(0, 1);
    w.finish(23)
}

fn bench_decode(c: &mut Criterion) {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let src = std::fs::read_to_string(manifest.join("demos/packet_uplink_ack.csn")).expect("read csn");
    let grammar = parse(&src).expect("parse csn");
    let resolved = ResolvedGrammar::resolve(grammar, &Registry::new()).expect("resolve");
    let codec = Codec::new(resolved.clone());
    let extent_only = Codec::new(resolved).with_options(DecodeOptions { collect_events: false, ..Default::default() });
    let block = uplink_ack_block();
    let budget = (block.len() * 8) as i64;

    c.bench_function("decode_packet_uplink_ack", |b| {
        b.iter(|| {
            let mut record = Record::new();
            let r = codec.decode("PacketUplinkAck", black_box(&block), 0, budget, &mut record);
            black_box((r.is_ok(), record.len()))
        })
    });

    c.bench_function("decode_packet_uplink_ack_no_events", |b| {
        b.iter(|| {
            let mut record = Record::new();
            let r = extent_only.decode("PacketUplinkAck", black_box(&block), 0, budget, &mut record);
            black_box(r.map(|r| r.remaining_bits).ok())
        })
    });
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
