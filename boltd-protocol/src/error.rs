//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding, framing, or hydrating wire data.
///
/// The packer and unpacker record the first error they hit and keep it
/// ("sticky") until reset; callers check once per top-level value instead of
/// after every field.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("read past end of buffer")]
    UnexpectedEnd,

    #[error("illegal length field of {0} bytes")]
    IllegalLengthBytes(u8),

    #[error("trying to pack too large {what} of size {size}")]
    TooLarge { what: &'static str, size: u64 },

    #[error("illegal value for bool")]
    IllegalBool,

    #[error("expected {expected}, got {actual:?}")]
    UnexpectedType {
        expected: &'static str,
        actual: crate::marker::PackType,
    },

    #[error("invalid length of {what} struct, expected {expected} but was {actual}")]
    InvalidFieldCount {
        what: &'static str,
        expected: u32,
        actual: u32,
    },

    #[error("received unknown struct tag: {0:#04x}")]
    UnknownStructTag(u8),

    #[error("unexpected tag at top level: {0:#04x}")]
    UnexpectedTopLevelTag(u8),

    #[error("unknown message tag: {0:#04x}")]
    UnknownMessageTag(u8),

    #[error("structure values are not allowed in request fields")]
    StructureInRequest,

    #[error("there should be an even number of path indices, found {0}")]
    OddPathIndices(usize),

    #[error("path {0} list contains a value of the wrong type")]
    InvalidPathElement(&'static str),

    #[error("path index out of range: {0}")]
    PathIndexOutOfRange(i64),

    #[error("invalid UTF-8 in string value")]
    InvalidUtf8,

    #[error("unrecognized statement type: {0}")]
    UnknownStatementType(String),

    #[error("cannot pack {0} values")]
    Unpackable(&'static str),
}
