//! MTP container framing.
//!
//! Wire format (all little-endian):
//!
//! ```text
//! +----------+--------+--------+------------------+-------------------+
//! | length   | type   | code   | transaction id   | payload           |
//! | u32      | u16    | u16    | u32              | length - 12 bytes |
//! +----------+--------+--------+------------------+-------------------+
//! ```

use crate::codec::{Reader, Writer};
use crate::error::ProtocolError;
use std::fmt;

/// Size of the container header in bytes
pub const HEADER_SIZE: usize = 12;

/// Maximum number of parameters in a command or response container
pub const MAX_PARAMS: usize = 5;

/// Length value announcing a data container larger than `u32::MAX` bytes
pub const UNKNOWN_LENGTH: u32 = 0xFFFF_FFFF;

/// Container kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ContainerType {
    /// Operation request
    Command = 1,
    /// Data phase payload
    Data = 2,
    /// Operation result
    Response = 3,
    /// Asynchronous device event
    Event = 4,
}

impl ContainerType {
    /// Short lowercase name, used in logs and errors
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Data => "data",
            Self::Response => "response",
            Self::Event => "event",
        }
    }
}

impl TryFrom<u16> for ContainerType {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Command),
            2 => Ok(Self::Data),
            3 => Ok(Self::Response),
            4 => Ok(Self::Event),
            _ => Err(ProtocolError::MalformedContainer("unknown container type")),
        }
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed container header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Total container length including the header
    pub length: u32,
    /// Container kind
    pub kind: ContainerType,
    /// Operation, response or event code
    pub code: u16,
    /// Transaction the container belongs to
    pub transaction_id: u32,
}

impl ContainerHeader {
    /// Parse the header at the start of `buf`.
    ///
    /// Only the header is validated; the payload may continue in later
    /// buffers.
    ///
    /// # Errors
    /// Returns `MalformedContainer` for short buffers, a length below the
    /// header size or an unknown container type
    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedContainer("shorter than header"));
        }
        let mut r = Reader::new(&buf[..HEADER_SIZE]);
        let length = r.read_u32()?;
        let kind = ContainerType::try_from(r.read_u16()?)?;
        let code = r.read_u16()?;
        let transaction_id = r.read_u32()?;
        if (length as usize) < HEADER_SIZE {
            return Err(ProtocolError::MalformedContainer("length below header size"));
        }
        Ok(Self {
            length,
            kind,
            code,
            transaction_id,
        })
    }

    /// Payload length, or `None` for a container of unknown length
    #[must_use]
    pub fn payload_len(&self) -> Option<u64> {
        (self.length != UNKNOWN_LENGTH).then(|| u64::from(self.length) - HEADER_SIZE as u64)
    }

    /// Serialize the header
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..6].copy_from_slice(&(self.kind as u16).to_le_bytes());
        out[6..8].copy_from_slice(&self.code.to_le_bytes());
        out[8..12].copy_from_slice(&self.transaction_id.to_le_bytes());
        out
    }
}

/// Complete container held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Container kind
    pub kind: ContainerType,
    /// Operation, response or event code
    pub code: u16,
    /// Transaction the container belongs to
    pub transaction_id: u32,
    /// Payload after the header
    pub payload: Vec<u8>,
}

impl Container {
    /// Decode a container whose declared length matches the buffer exactly.
    ///
    /// # Errors
    /// Returns `MalformedContainer` for short buffers, unknown types or a
    /// length that disagrees with the buffer size
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let header = ContainerHeader::parse(buf)?;
        if header.length as usize != buf.len() {
            return Err(ProtocolError::MalformedContainer(
                "declared length disagrees with buffer size",
            ));
        }
        Ok(Self {
            kind: header.kind,
            code: header.code,
            transaction_id: header.transaction_id,
            payload: buf[HEADER_SIZE..].to_vec(),
        })
    }

    /// Encode header and payload into one buffer
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header().to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Header describing this container
    #[must_use]
    pub fn header(&self) -> ContainerHeader {
        ContainerHeader {
            length: u32::try_from(HEADER_SIZE + self.payload.len()).unwrap_or(UNKNOWN_LENGTH),
            kind: self.kind,
            code: self.code,
            transaction_id: self.transaction_id,
        }
    }

    /// Interpret the payload as `u32` parameters.
    ///
    /// # Errors
    /// Returns `MalformedContainer` if the payload is not a multiple of four
    /// bytes or holds more than five parameters
    pub fn params(&self) -> Result<Vec<u32>, ProtocolError> {
        if self.payload.len() % 4 != 0 {
            return Err(ProtocolError::MalformedContainer(
                "parameter block not a multiple of 4",
            ));
        }
        if self.payload.len() / 4 > MAX_PARAMS {
            return Err(ProtocolError::MalformedContainer("more than five parameters"));
        }
        let mut r = Reader::new(&self.payload);
        (0..self.payload.len() / 4).map(|_| r.read_u32()).collect()
    }
}

/// Encode a container from parameters and optional trailing bytes.
///
/// # Example
///
/// ```
/// use mtp_core::container::{encode_container, ContainerType};
///
/// let bytes = encode_container(ContainerType::Command, 0x1002, 1, &[1], None);
/// assert_eq!(bytes.len(), 16);
/// assert_eq!(&bytes[..4], &16u32.to_le_bytes());
/// ```
#[must_use]
pub fn encode_container(
    kind: ContainerType,
    code: u16,
    transaction_id: u32,
    params: &[u32],
    extra: Option<&[u8]>,
) -> Vec<u8> {
    let extra = extra.unwrap_or_default();
    let mut payload = Writer::with_capacity(params.len() * 4 + extra.len());
    for &param in params {
        payload.write_u32(param);
    }
    payload.write_bytes(extra);
    Container {
        kind,
        code,
        transaction_id,
        payload: payload.into_inner(),
    }
    .encode()
}
