//! Custom decoders for structurally irregular sub-fields.
//!
//! Two capability shapes exist:
//!
//! - [`Callback`]: gets the raw buffer, the current bit offset and two record
//!   fields to fill, returns how many bits it consumed. The interpreter only
//!   advances past those bits.
//! - [`Serializer`]: gets a cursor bounded to its bit range (see `serialize(Name, len_bits)`)
//!   and decodes on its own, possibly emitting events.
//!
//! Both are registered by name in a [`Registry`] before the grammar is resolved;
//! the registry is read-only afterwards.

use crate::bits::BitCursor;
use crate::error::DecodeError;
use crate::event::DecodeEvent;
use crate::value::Record;
use std::collections::HashMap;
use std::sync::Arc;

pub trait Callback: Send + Sync {
    fn call(&self, data: &[u8], bit_offset: usize, record: &mut Record, fields: (&str, &str)) -> usize;
}

pub trait Serializer: Send + Sync {
    fn serialize(
        &self,
        cursor: &mut BitCursor<'_>,
        record: &mut Record,
        events: &mut Vec<DecodeEvent>,
    ) -> Result<(), DecodeError>;
}

struct FnCallback<F>(F);

impl<F> Callback for FnCallback<F>
where
    F: Fn(&[u8], usize, &mut Record, (&str, &str)) -> usize + Send + Sync,
{
    fn call(&self, data: &[u8], bit_offset: usize, record: &mut Record, fields: (&str, &str)) -> usize {
        (self.0)(data, bit_offset, record, fields)
    }
}

struct FnSerializer<F>(F);

impl<F> Serializer for FnSerializer<F>
where
    F: Fn(&mut BitCursor<'_>, &mut Record, &mut Vec<DecodeEvent>) -> Result<(), DecodeError> + Send + Sync,
{
    fn serialize(
        &self,
        cursor: &mut BitCursor<'_>,
        record: &mut Record,
        events: &mut Vec<DecodeEvent>,
    ) -> Result<(), DecodeError> {
        (self.0)(cursor, record, events)
    }
}

/// Named callbacks and serializers.
#[derive(Default, Clone)]
pub struct Registry {
    callbacks: HashMap<String, Arc<dyn Callback>>,
    serializers: HashMap<String, Arc<dyn Serializer>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register_callback<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&[u8], usize, &mut Record, (&str, &str)) -> usize + Send + Sync + 'static,
    {
        self.callbacks.insert(name.to_string(), Arc::new(FnCallback(f)));
        self
    }

    pub fn register_serializer<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&mut BitCursor<'_>, &mut Record, &mut Vec<DecodeEvent>) -> Result<(), DecodeError>
            + Send
            + Sync
            + 'static,
    {
        self.serializers.insert(name.to_string(), Arc::new(FnSerializer(f)));
        self
    }

    pub fn insert_callback(&mut self, name: &str, cb: Arc<dyn Callback>) -> &mut Self {
        self.callbacks.insert(name.to_string(), cb);
        self
    }

    pub fn insert_serializer(&mut self, name: &str, s: Arc<dyn Serializer>) -> &mut Self {
        self.serializers.insert(name.to_string(), s);
        self
    }

    pub fn callback(&self, name: &str) -> Option<Arc<dyn Callback>> {
        self.callbacks.get(name).cloned()
    }

    pub fn serializer(&self, name: &str) -> Option<Arc<dyn Serializer>> {
        self.serializers.get(name).cloned()
    }
}
