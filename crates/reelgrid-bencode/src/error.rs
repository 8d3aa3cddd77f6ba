//! Error surface for bencode parsing and serialisation.

use thiserror::Error;

/// Failures raised while scanning or building bencoded payloads.
#[derive(Debug, Error)]
pub enum BencodeError {
    /// The payload ended before the current token was complete.
    #[error("truncated bencode payload at offset {offset}")]
    Truncated {
        /// Byte offset where input ran out.
        offset: usize,
    },
    /// An unexpected byte was found where a token had to start.
    #[error("unexpected byte 0x{byte:02x} at offset {offset}")]
    UnexpectedByte {
        /// Offending byte value.
        byte: u8,
        /// Byte offset of the offending byte.
        offset: usize,
    },
    /// A string length prefix or integer literal could not be parsed.
    #[error("malformed {kind} literal at offset {offset}")]
    MalformedLiteral {
        /// Literal kind (`integer` or `string-length`).
        kind: &'static str,
        /// Byte offset of the malformed literal.
        offset: usize,
    },
    /// The outer value was not a dictionary.
    #[error("top-level bencode value is not a dictionary")]
    NotADictionary,
    /// A required dictionary key was absent.
    #[error("required key `{key}` missing from dictionary")]
    MissingKey {
        /// The key that was not found.
        key: &'static str,
    },
    /// A dictionary value had the wrong bencode type.
    #[error("key `{key}` holds an unexpected value type")]
    WrongType {
        /// The key whose value was mistyped.
        key: &'static str,
    },
    /// The `pieces` blob is not a multiple of 20 bytes.
    #[error("pieces blob length {len} is not a multiple of 20")]
    InvalidPieces {
        /// Observed blob length.
        len: usize,
    },
}
