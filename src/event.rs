//! Per-field decode records handed to the display side.

/// One decoded (or failed) field, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeEvent {
    pub label: String,
    pub start_bit: usize,
    pub bit_length: usize,
    pub value: EventValue,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventValue {
    UInt(u64),
    Bytes(Vec<u8>),
    /// Too wide to show as a number; only the bit count is kept.
    BitCount(usize),
    /// Composite field; children are in stream order.
    Nested(Vec<DecodeEvent>),
    /// `may_be_null` field missing at the end of the message.
    NotPresent,
    /// Failed field; the payload is the error text.
    Error(String),
}

impl DecodeEvent {
    pub fn leaf(label: &str, start_bit: usize, bit_length: usize, value: EventValue) -> Self {
        DecodeEvent { label: label.to_string(), start_bit, bit_length, value, is_error: false }
    }

    pub fn nested(label: &str, start_bit: usize, bit_length: usize, children: Vec<DecodeEvent>) -> Self {
        DecodeEvent {
            label: label.to_string(),
            start_bit,
            bit_length,
            value: EventValue::Nested(children),
            is_error: false,
        }
    }

    pub fn not_present(label: &str, start_bit: usize) -> Self {
        DecodeEvent::leaf(label, start_bit, 0, EventValue::NotPresent)
    }

    pub fn error(label: &str, start_bit: usize, message: String) -> Self {
        DecodeEvent {
            label: label.to_string(),
            start_bit,
            bit_length: 0,
            value: EventValue::Error(message),
            is_error: true,
        }
    }

    pub fn children(&self) -> &[DecodeEvent] {
        match &self.value {
            EventValue::Nested(c) => c,
            _ => &[],
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.value, EventValue::Nested(_))
    }
}

impl EventValue {
    /// Numeric value if it fits in 64 bits, bit count otherwise.
    pub fn bits(width: usize, raw: u64) -> EventValue {
        if width <= 64 {
            EventValue::UInt(raw)
        } else {
            EventValue::BitCount(width)
        }
    }
}

/// Depth-first walk over events; the visitor receives the nesting depth.
pub fn visit_events(events: &[DecodeEvent], visitor: &mut dyn FnMut(usize, &DecodeEvent)) {
    fn walk(events: &[DecodeEvent], depth: usize, visitor: &mut dyn FnMut(usize, &DecodeEvent)) {
        for e in events {
            visitor(depth, e);
            walk(e.children(), depth + 1, visitor);
        }
    }
    walk(events, 0, visitor);
}

/// Sum of bit lengths of leaf events (composites counted through their children).
pub fn leaf_bits(events: &[DecodeEvent]) -> usize {
    let mut total = 0;
    visit_events(events, &mut |_, e| {
        if !e.is_nested() {
            total += e.bit_length;
        }
    });
    total
}
