//! Error types for the relink wire protocol.

use thiserror::Error;

/// Framing errors raised while encoding or decoding relay messages.
///
/// Every variant is recoverable: the offending message is dropped and the
/// relay connection stays up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer contained no bytes at all
    #[error("empty frame")]
    Empty,

    /// Buffer ended before a field could be read
    #[error("frame truncated at offset {offset}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Cursor position where the read was attempted
        offset: usize,
        /// Bytes the field required
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// Opcode byte does not name a known message
    #[error("unknown opcode: {0}")]
    UnknownOpCode(u8),

    /// Opcode byte falls in the reserved gap (15, 16)
    #[error("reserved opcode: {0}")]
    ReservedOpCode(u8),

    /// Length prefix was negative
    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    /// String field did not hold valid UTF-8
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// Encoded message does not fit the destination buffer
    #[error("message of {needed} bytes does not fit buffer of {capacity} bytes")]
    BufferOverflow {
        /// Bytes the encoded message requires
        needed: usize,
        /// Bytes available in the buffer
        capacity: usize,
    },

    /// Field length cannot be represented by a 32-bit length prefix
    #[error("field too long to encode: {0} bytes")]
    FieldTooLong(usize),
}
