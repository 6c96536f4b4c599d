//! Little-endian byte codec for MTP payloads.
//!
//! Every read is bound-checked against the remaining buffer and fails with
//! [`ProtocolError::TruncatedField`] instead of panicking.

use crate::error::ProtocolError;

/// Longest string, in UTF-16 code units without the terminator
pub const MAX_STRING_UNITS: usize = 254;

/// Cursor over a received payload
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! read_int {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Read a little-endian `", stringify!($ty), "`")]
            ///
            /// # Errors
            /// Returns `TruncatedField` if the buffer is too short
            pub fn $name(&mut self) -> Result<$ty, ProtocolError> {
                let bytes = self.take(std::mem::size_of::<$ty>())?;
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                Ok(<$ty>::from_le_bytes(raw))
            }
        )*
    };
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `buf`
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not consumed yet
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether the whole buffer was consumed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unconsumed tail of the buffer
    #[must_use]
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Consume `len` raw bytes
    ///
    /// # Errors
    /// Returns `TruncatedField` if fewer than `len` bytes remain
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if len > self.remaining() {
            return Err(ProtocolError::TruncatedField {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    read_int! {
        read_u8 => u8,
        read_i8 => i8,
        read_u16 => u16,
        read_i16 => i16,
        read_u32 => u32,
        read_i32 => i32,
        read_u64 => u64,
        read_i64 => i64,
    }

    /// Read a length-prefixed UTF-16LE string.
    ///
    /// The count includes the terminator; a count of zero is the empty
    /// string. Invalid surrogates are replaced rather than rejected.
    ///
    /// # Errors
    /// Returns `TruncatedField` if the buffer is too short
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let count = usize::from(self.read_u8()?);
        if count == 0 {
            return Ok(String::new());
        }
        let bytes = self.take(count * 2)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    /// Read a `u32` element count and check that `count * width` bytes remain.
    ///
    /// # Errors
    /// Returns `TruncatedField` if the elements cannot fit in the buffer
    pub fn read_array_len(&mut self, width: usize) -> Result<usize, ProtocolError> {
        let count = self.read_u32()? as usize;
        let needed = count.checked_mul(width).ok_or(ProtocolError::TruncatedField {
            needed: usize::MAX,
            remaining: self.remaining(),
        })?;
        if needed > self.remaining() {
            return Err(ProtocolError::TruncatedField {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }

    /// Read a `u16` array
    ///
    /// # Errors
    /// Returns `TruncatedField` if the buffer is too short
    pub fn read_u16_array(&mut self) -> Result<Vec<u16>, ProtocolError> {
        let count = self.read_array_len(2)?;
        (0..count).map(|_| self.read_u16()).collect()
    }

    /// Read a `u32` array
    ///
    /// # Errors
    /// Returns `TruncatedField` if the buffer is too short
    pub fn read_u32_array(&mut self) -> Result<Vec<u32>, ProtocolError> {
        let count = self.read_array_len(4)?;
        (0..count).map(|_| self.read_u32()).collect()
    }
}

/// Growable little-endian payload builder
#[derive(Debug, Clone, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

macro_rules! write_int {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Append a little-endian `", stringify!($ty), "`")]
            pub fn $name(&mut self, value: $ty) -> &mut Self {
                self.buf.extend_from_slice(&value.to_le_bytes());
                self
            }
        )*
    };
}

impl Writer {
    /// Create an empty writer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with reserved capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    write_int! {
        write_u8 => u8,
        write_i8 => i8,
        write_u16 => u16,
        write_i16 => i16,
        write_u32 => u32,
        write_i32 => i32,
        write_u64 => u64,
        write_i64 => i64,
    }

    /// Append raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append a length-prefixed UTF-16LE string with terminator.
    ///
    /// # Errors
    /// Returns `StringTooLong` beyond 254 code units and `EmbeddedNul` if the
    /// string contains U+0000
    pub fn write_string(&mut self, value: &str) -> Result<&mut Self, ProtocolError> {
        if value.is_empty() {
            self.buf.push(0);
            return Ok(self);
        }
        let units: Vec<u16> = value.encode_utf16().collect();
        if units.len() > MAX_STRING_UNITS {
            return Err(ProtocolError::StringTooLong(units.len()));
        }
        if let Some(position) = units.iter().position(|&unit| unit == 0) {
            return Err(ProtocolError::EmbeddedNul(position));
        }
        // count includes the terminator and fits in a u8 after the check above
        self.buf.push((units.len() + 1) as u8);
        for unit in units {
            self.buf.extend_from_slice(&unit.to_le_bytes());
        }
        self.buf.extend_from_slice(&[0, 0]);
        Ok(self)
    }

    /// Append a `u16` array
    pub fn write_u16_array(&mut self, values: &[u16]) -> &mut Self {
        self.write_u32(values.len() as u32);
        for &value in values {
            self.write_u16(value);
        }
        self
    }

    /// Append a `u32` array
    pub fn write_u32_array(&mut self, values: &[u32]) -> &mut Self {
        self.write_u32(values.len() as u32);
        for &value in values {
            self.write_u32(value);
        }
        self
    }

    /// Bytes written so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing was written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish and return the buffer
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}
