//! # csn1dsl: table-driven CSN.1 bit-stream decoder
//!
//! CSN.1 (Concrete Syntax Notation One) describes the bit-packed messages of
//! GSM/GPRS/EGPRS radio signalling: presence flags, self-terminating lists,
//! selector-driven unions, integers split across non-adjacent bits, and fields
//! under the `0x2B` "L/H" dither. This crate describes a message layout as a
//! table of descriptors and interprets it over a byte buffer.
//!
//! ## Pieces
//!
//! - [`bits::BitCursor`]: MSB-first bit reads with a bit budget.
//! - [`ast`]: descriptor kinds, tables, grammar resolution.
//! - [`parser::parse`]: `.csn` text -> [`ast::Grammar`].
//! - [`codec::Codec`]: the interpreter; writes a [`value::Record`] and emits [`event::DecodeEvent`]s.
//! - [`registry::Registry`]: named callbacks and serializers for irregular sub-fields.
//! - [`lint`]: static grammar checks, run by [`ast::ResolvedGrammar::resolve`].
//! - [`frame::decode_segments`]: sequences of fixed-tag segments.
//! - [`dump::dump_events`]: text rendering of events.
//!
//! ## Example DSL
//!
//! ```text
//! table Ack {
//!     _:        fixed(2, 0b01) "message type";
//!     tfi:      uint(5);
//!     has_ta:   next_exists(1);
//!     ta:       uint(6) "timing advance";
//!     bitmap:   bitmap(8);
//!     _:        padding_to_end;
//! }
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use csn1dsl::{parse, Codec, Registry, ResolvedGrammar};
//!
//! let grammar = parse("table T { a: uint(4); b: bit; }").unwrap();
//! let codec = Codec::new(ResolvedGrammar::resolve(grammar, &Registry::new()).unwrap());
//! let (record, result) = codec.decode_message("T", &[0xA8]).unwrap();
//! assert_eq!(record.u64("a"), Some(0xA));
//! assert_eq!(result.remaining_bits, 3);
//! ```

pub mod ast;
pub mod bits;
pub mod codec;
pub mod dump;
pub mod error;
pub mod event;
pub mod frame;
pub mod lint;
pub mod parser;
pub mod registry;
pub mod value;

pub use ast::{ChoiceCandidate, Count, CrumbSpec, Descriptor, Grammar, Node, ResolvedGrammar, Table, Tag};
pub use bits::{BitCursor, LH_DITHER};
pub use codec::{decode, Codec, DecodeOptions, DecodeResult};
pub use dump::dump_events;
pub use error::{DecodeError, ErrorKind};
pub use event::{DecodeEvent, EventValue};
pub use frame::{decode_segments, DecodedSegment, SegmentsResult};
pub use parser::parse;
pub use registry::{Callback, Registry, Serializer};
pub use value::{Record, Value};
