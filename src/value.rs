//! Output record written by the interpreter.
//!
//! Descriptor tables are data-driven (they can be loaded from `.csn` text), so the
//! output is a field-name -> slot map with a small closed set of slot types rather
//! than a compiled struct per message.

use std::collections::HashMap;

/// One decoded slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    /// Packed bits or octets (bitmaps, octet arrays).
    Bytes(Vec<u8>),
    Struct(Record),
    List(Vec<Value>),
    /// Field allowed to be missing (`?`) and the message ended before it.
    Absent,
}

impl Value {
    /// Store an unsigned value in the narrowest of 8/16/32 bits that holds `width` bits.
    pub fn uint(width: u8, v: u64) -> Value {
        match width {
            0..=8 => Value::U8(v as u8),
            9..=16 => Value::U16(v as u16),
            17..=32 => Value::U32(v as u32),
            _ => Value::U64(v),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U8(x) => Some(*x as u64),
            Value::U16(x) => Some(*x as u64),
            Value::U32(x) => Some(*x as u64),
            Value::U64(x) => Some(*x),
            Value::Absent => Some(0),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Record> {
        match self {
            Value::Struct(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }
}

/// Field-name -> value map for one message or nested sub-structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: HashMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, v: Value) {
        self.fields.insert(field.into(), v);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn u64(&self, field: &str) -> Option<u64> {
        self.get(field).and_then(Value::as_u64)
    }

    pub fn bytes(&self, field: &str) -> Option<&[u8]> {
        self.get(field).and_then(Value::as_bytes)
    }

    pub fn nested(&self, field: &str) -> Option<&Record> {
        self.get(field).and_then(Value::as_struct)
    }

    pub fn list(&self, field: &str) -> Option<&[Value]> {
        self.get(field).and_then(Value::as_list)
    }

    /// Field names in sorted order (stable display).
    pub fn keys_sorted(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.fields.keys().map(String::as_str).collect();
        keys.sort();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}
