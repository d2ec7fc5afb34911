//! Bounded field reader and writer.
//!
//! Relay messages carry no schema: fields are laid out back to back in a
//! per-opcode order. Integers are 32-bit little-endian, booleans are one byte,
//! strings and blobs are prefixed with a 32-bit length. Every read checks the
//! cursor against the buffer end, so a truncated frame surfaces as a
//! [`FrameError`] instead of a panic.

use crate::error::FrameError;

/// Size of an encoded integer
pub const INT_SIZE: usize = 4;

/// Size of an encoded boolean
pub const BOOL_SIZE: usize = 1;

/// Encoded size of a length-prefixed field with `len` content bytes
#[must_use]
pub const fn prefixed_len(len: usize) -> usize {
    INT_SIZE + len
}

/// Cursor over an inbound frame
#[derive(Debug)]
pub struct FrameReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    /// Start reading at the beginning of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current cursor position
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], FrameError> {
        if needed > self.remaining() {
            return Err(FrameError::Truncated {
                offset: self.pos,
                needed,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    /// Read one raw byte
    pub fn read_u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    /// Read a one-byte boolean (any non-zero value is `true`)
    pub fn read_bool(&mut self) -> Result<bool, FrameError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a 32-bit little-endian integer
    pub fn read_i32(&mut self) -> Result<i32, FrameError> {
        let bytes = self.take(INT_SIZE)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_len(&mut self) -> Result<usize, FrameError> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| FrameError::NegativeLength(len))
    }

    /// Read a length-prefixed byte blob
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, FrameError> {
        let len = self.read_len()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, FrameError> {
        let len = self.read_len()?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| FrameError::InvalidUtf8)
    }
}

/// Cursor over an outbound buffer of fixed capacity
#[derive(Debug)]
pub struct FrameWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FrameWriter<'a> {
    /// Start writing at the beginning of `buf`
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(FrameError::BufferOverflow {
                needed: end,
                capacity: self.buf.len(),
            });
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    /// Write one raw byte
    pub fn write_u8(&mut self, value: u8) -> Result<(), FrameError> {
        self.put(&[value])
    }

    /// Write a one-byte boolean
    pub fn write_bool(&mut self, value: bool) -> Result<(), FrameError> {
        self.write_u8(u8::from(value))
    }

    /// Write a 32-bit little-endian integer
    pub fn write_i32(&mut self, value: i32) -> Result<(), FrameError> {
        self.put(&value.to_le_bytes())
    }

    fn write_len(&mut self, len: usize) -> Result<(), FrameError> {
        let len = i32::try_from(len).map_err(|_| FrameError::FieldTooLong(len))?;
        self.write_i32(len)
    }

    /// Write a length-prefixed byte blob
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<(), FrameError> {
        self.write_len(value.len())?;
        self.put(value)
    }

    /// Write a length-prefixed UTF-8 string
    pub fn write_string(&mut self, value: &str) -> Result<(), FrameError> {
        self.write_bytes(value.as_bytes())
    }
}

/// Reusable outbound buffer, one per session.
///
/// Sized to twice the underlying transport's maximum packet size. Encoding
/// borrows the buffer mutably and hands back the encoded slice, so a second
/// encode cannot start until the previous frame has been sent.
#[derive(Debug, Clone)]
pub struct SendBuffer {
    buf: Vec<u8>,
}

impl SendBuffer {
    /// Allocate a buffer for a transport with the given maximum packet size
    #[must_use]
    pub fn for_packet_size(max_packet_size: usize) -> Self {
        Self {
            buf: vec![0u8; max_packet_size.saturating_mul(2)],
        }
    }

    /// Total capacity in bytes
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Encode `message` and return the bytes ready for a single send call
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::BufferOverflow`] if the message does not fit.
    pub fn encode(&mut self, message: &crate::RelayMessage) -> Result<&[u8], FrameError> {
        let len = message.encode_into(&mut self.buf)?;
        Ok(&self.buf[..len])
    }
}
