//! Segment handling: decode a bit range holding a sequence of self-identifying segments.
//!
//! Each segment type is a table starting with a fixed tag (`fixed(n, v)`). At each
//! position the candidate tables are tried in order; a candidate whose tag does not
//! match fails with `GeneralError` at the position it started and the next one is
//! tried. Any other failure ends the walk; the segments decoded so far are kept.

use crate::codec::Codec;
use crate::error::{DecodeError, ErrorKind};
use crate::event::DecodeEvent;
use crate::value::Record;
use tracing::debug;

/// Result of a segment walk.
#[derive(Debug)]
pub struct SegmentsResult {
    pub segments: Vec<DecodedSegment>,
    /// Failure that ended the walk early, if any.
    pub error: Option<DecodeError>,
    /// Budget left where the walk stopped.
    pub remaining_bits: i64,
    pub end_offset: usize,
}

#[derive(Debug)]
pub struct DecodedSegment {
    pub table: String,
    pub record: Record,
    /// Absolute bit range `[start, end)`.
    pub bit_range: (usize, usize),
    pub events: Vec<DecodeEvent>,
}

/// Decode segments from `start_bit` while at least `min_segment_bits` of `budget` remain.
pub fn decode_segments(
    codec: &Codec,
    tables: &[&str],
    data: &[u8],
    start_bit: usize,
    budget: i64,
    min_segment_bits: i64,
) -> Result<SegmentsResult, DecodeError> {
    if budget < 0 {
        return Err(DecodeError::new(ErrorKind::DataNotValid, start_bit, "segments"));
    }
    if (start_bit as i64).saturating_add(budget) > (data.len() * 8) as i64 {
        return Err(DecodeError::new(ErrorKind::MessageTooLong, start_bit, "segments"));
    }

    let mut segments = Vec::new();
    let mut error = None;
    let mut offset = start_bit;
    let mut remaining = budget;

    'walk: while remaining > 0 && remaining >= min_segment_bits {
        let mut matched = false;
        for &name in tables {
            let mut record = Record::new();
            match codec.decode(name, data, offset, remaining, &mut record) {
                Ok(r) => {
                    if r.end_offset == offset {
                        debug!(table = name, offset, "segment consumed no bits, stopping");
                        break 'walk;
                    }
                    debug!(table = name, start = offset, end = r.end_offset, "segment");
                    segments.push(DecodedSegment {
                        table: name.to_string(),
                        record,
                        bit_range: (offset, r.end_offset),
                        events: r.events,
                    });
                    offset = r.end_offset;
                    remaining = r.remaining_bits;
                    matched = true;
                    break;
                }
                Err(e) if e.kind == ErrorKind::GeneralError && e.bit_offset == offset => continue,
                Err(e) => {
                    debug!(table = name, offset, error = %e, "segment failed");
                    error = Some(e);
                    break 'walk;
                }
            }
        }
        if !matched {
            break;
        }
    }

    Ok(SegmentsResult { segments, error, remaining_bits: remaining, end_offset: offset })
}
