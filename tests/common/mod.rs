//! Helpers shared by the integration tests.
#![allow(dead_code)]

use csn1dsl::{parse, Codec, Grammar, Registry, ResolvedGrammar};

/// MSB-first bit writer for building payloads.
#[derive(Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        BitWriter::default()
    }

    pub fn push(&mut self, value: u64, width: usize) -> &mut Self {
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

    pub fn len_bits(&self) -> usize {
        self.bits
    }

    /// Bytes written so far, padded to `len` bytes with `fill`.
    pub fn padded(&self, len: usize, fill: u8) -> Vec<u8> {
        let mut out = self.bytes.clone();
        if out.len() < len {
            out.resize(len, fill);
        }
        out
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

/// Bytes and bit count for a string of `0`/`1` (spaces ignored).
pub fn bits(s: &str) -> (Vec<u8>, i64) {
    let mut w = BitWriter::new();
    for c in s.chars().filter(|c| !c.is_whitespace()) {
        w.push(if c == '1' { 1 } else { 0 }, 1);
    }
    let n = w.len_bits() as i64;
    (w.bytes(), n)
}

pub fn codec(grammar: Grammar) -> Codec {
    codec_with(grammar, &Registry::new())
}

pub fn codec_with(grammar: Grammar, registry: &Registry) -> Codec {
    Codec::new(ResolvedGrammar::resolve(grammar, registry).expect("resolve"))
}

pub fn codec_src(src: &str) -> Codec {
    codec(parse(src).expect("parse"))
}

/// Codec over an empty grammar, for decoding ad-hoc tables with `decode_table`.
pub fn bare_codec() -> Codec {
    codec(Grammar::new())
}

/// Build the Packet Uplink Ack block decoded by `demos/packet_uplink_ack.csn`.
pub fn uplink_ack_block() -> Vec<u8> {
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
    w.padded(23, 0x2B)
}
