//! Decode failure kinds and the diagnostic carried out of the interpreter.

use crate::event::DecodeEvent;

/// Closed set of reasons a decode can stop.
///
/// The numeric [`code`](ErrorKind::code) follows the historical negative return
/// values of CSN.1 dissectors so that callers which log raw codes keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    GeneralError,
    DataNotValid,
    ScriptError,
    InvalidUnionIndex,
    NeedMoreBits,
    IllegalBitValue,
    InternalError,
    StreamNotSupported,
    MessageTooLong,
    /// Width handled by the grammar but never implemented (UIntArray elements of 17..=32 bits).
    NotImplemented,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::GeneralError,
        ErrorKind::DataNotValid,
        ErrorKind::ScriptError,
        ErrorKind::InvalidUnionIndex,
        ErrorKind::NeedMoreBits,
        ErrorKind::IllegalBitValue,
        ErrorKind::InternalError,
        ErrorKind::StreamNotSupported,
        ErrorKind::MessageTooLong,
        ErrorKind::NotImplemented,
    ];

    pub fn code(self) -> i16 {
        match self {
            ErrorKind::GeneralError => -1,
            ErrorKind::DataNotValid => -2,
            ErrorKind::ScriptError => -3,
            ErrorKind::InvalidUnionIndex => -4,
            ErrorKind::NeedMoreBits => -5,
            ErrorKind::IllegalBitValue => -6,
            ErrorKind::InternalError => -7,
            ErrorKind::StreamNotSupported => -8,
            ErrorKind::MessageTooLong => -9,
            ErrorKind::NotImplemented => -999,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::GeneralError => "general error",
            ErrorKind::DataNotValid => "data not valid",
            ErrorKind::ScriptError => "error in script",
            ErrorKind::InvalidUnionIndex => "invalid union index",
            ErrorKind::NeedMoreBits => "need more bits to unpack",
            ErrorKind::IllegalBitValue => "illegal bit value",
            ErrorKind::InternalError => "internal error",
            ErrorKind::StreamNotSupported => "stream not supported",
            ErrorKind::MessageTooLong => "message too long",
            ErrorKind::NotImplemented => "not implemented",
        }
    }

    /// Name as written in `trap(Kind, "...")` descriptors.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::DataNotValid => "DataNotValid",
            ErrorKind::ScriptError => "ScriptError",
            ErrorKind::InvalidUnionIndex => "InvalidUnionIndex",
            ErrorKind::NeedMoreBits => "NeedMoreBits",
            ErrorKind::IllegalBitValue => "IllegalBitValue",
            ErrorKind::InternalError => "InternalError",
            ErrorKind::StreamNotSupported => "StreamNotSupported",
            ErrorKind::MessageTooLong => "MessageTooLong",
            ErrorKind::NotImplemented => "NotImplemented",
        }
    }

    pub fn from_name(s: &str) -> Option<ErrorKind> {
        ErrorKind::ALL.iter().copied().find(|k| k.name() == s)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A decode failure: what went wrong, where, and under which descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.describe())]
pub struct DecodeError {
    pub kind: ErrorKind,
    pub bit_offset: usize,
    pub label: String,
    /// Free-text detail (e.g. the message of a `trap` descriptor).
    pub detail: Option<String>,
    /// Events decoded before the failure, ending with the error event.
    pub partial: Vec<DecodeEvent>,
}

impl DecodeError {
    pub fn new(kind: ErrorKind, bit_offset: usize, label: impl Into<String>) -> Self {
        DecodeError { kind, bit_offset, label: label.into(), detail: None, partial: Vec::new() }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// One-line diagnostic: kind, descriptor label, byte-aligned offset.
    pub fn describe(&self) -> String {
        let mut s = format!(
            "csn1 error: {} ({}) in '{}' at byte {} (bit {})",
            self.kind.label(),
            self.kind.code(),
            self.label,
            self.bit_offset >> 3,
            self.bit_offset
        );
        if let Some(d) = &self.detail {
            s.push_str(": ");
            s.push_str(d);
        }
        s
    }
}
