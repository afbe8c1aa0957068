//! Format decode events for display: one line per field with its bit pattern.
//!
//! ```text
//! 0101.... = msg_type: 5
//! ....1... = has_body: 1
//! body:
//!   .....110 00101... = value: 197
//! ```

use crate::event::{DecodeEvent, EventValue};
use std::fmt;

/// Render `events` decoded from `data`. Nested events are indented two spaces per level.
pub fn dump_events(events: &[DecodeEvent], data: &[u8]) -> String {
    EventDump { events, data }.to_string()
}

/// Display adapter over a decoded event tree.
pub struct EventDump<'a> {
    pub events: &'a [DecodeEvent],
    pub data: &'a [u8],
}

impl fmt::Display for EventDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dump_into(f, self.events, self.data, 0)
    }
}

fn dump_into(out: &mut fmt::Formatter<'_>, events: &[DecodeEvent], data: &[u8], depth: usize) -> fmt::Result {
    let indent = "  ".repeat(depth);
    for e in events {
        match &e.value {
            EventValue::Nested(children) => {
                writeln!(out, "{}{}:", indent, e.label)?;
                dump_into(out, children, data, depth + 1)?;
            }
            EventValue::Error(msg) => writeln!(out, "{}[error] {}: {}", indent, e.label, msg)?,
            EventValue::NotPresent => writeln!(out, "{}{}: not present", indent, e.label)?,
            v => match bit_pattern(data, e.start_bit, e.bit_length) {
                Some(p) => writeln!(out, "{}{} = {}: {}", indent, p, e.label, format_value(v))?,
                None => writeln!(out, "{}{}: {}", indent, e.label, format_value(v))?,
            },
        }
    }
    Ok(())
}

/// Value column text for a leaf event.
pub fn format_value(v: &EventValue) -> String {
    match v {
        EventValue::UInt(x) => x.to_string(),
        EventValue::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
            format!("0x{}", hex)
        }
        EventValue::BitCount(n) => format!("{} bits", n),
        EventValue::Nested(c) => format!("{} fields", c.len()),
        EventValue::NotPresent => "not present".to_string(),
        EventValue::Error(m) => m.clone(),
    }
}

/// Bits of `[start, start+len)` shown inside their bytes, `.` for bits outside the field.
/// `None` for empty or wider-than-64-bit fields, or ranges past the buffer.
pub fn bit_pattern(data: &[u8], start: usize, len: usize) -> Option<String> {
    if len == 0 || len > 64 || start + len > data.len() * 8 {
        return None;
    }
    let end = start + len;
    let first = start / 8;
    let last = (end - 1) / 8;
    let mut s = String::with_capacity((last - first + 1) * 9);
    for byte in first..=last {
        if byte > first {
            s.push(' ');
        }
        for bit in 0..8 {
            let pos = byte * 8 + bit;
            if pos < start || pos >= end {
                s.push('.');
            } else if data[byte] & (0x80 >> bit) != 0 {
                s.push('1');
            } else {
                s.push('0');
            }
        }
    }
    Some(s)
}
