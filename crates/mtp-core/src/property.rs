//! Typed property marshaling.
//!
//! Device and object property values travel as raw bytes whose layout is
//! fixed by a declared datatype code. This module turns those bytes into a
//! [`Value`] and back, and decodes the property description datasets.

use crate::codec::{Reader, Writer};
use crate::codes::{DevicePropertyCode, ObjectPropertyCode};
use crate::error::ProtocolError;
use std::fmt;

/// Fixed-width integer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Signed 8-bit
    Int8,
    /// Unsigned 8-bit
    UInt8,
    /// Signed 16-bit
    Int16,
    /// Unsigned 16-bit
    UInt16,
    /// Signed 32-bit
    Int32,
    /// Unsigned 32-bit
    UInt32,
    /// Signed 64-bit
    Int64,
    /// Unsigned 64-bit
    UInt64,
}

impl ScalarType {
    const ALL: [Self; 8] = [
        Self::Int8,
        Self::UInt8,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
    ];

    /// Width in bytes
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 => 4,
            Self::Int64 | Self::UInt64 => 8,
        }
    }

    fn index(self) -> u16 {
        match self {
            Self::Int8 => 1,
            Self::UInt8 => 2,
            Self::Int16 => 3,
            Self::UInt16 => 4,
            Self::Int32 => 5,
            Self::UInt32 => 6,
            Self::Int64 => 7,
            Self::UInt64 => 8,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::UInt8 => "uint8",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
        }
    }

    fn read(self, r: &mut Reader<'_>) -> Result<Value, ProtocolError> {
        Ok(match self {
            Self::Int8 => Value::Int8(r.read_i8()?),
            Self::UInt8 => Value::UInt8(r.read_u8()?),
            Self::Int16 => Value::Int16(r.read_i16()?),
            Self::UInt16 => Value::UInt16(r.read_u16()?),
            Self::Int32 => Value::Int32(r.read_i32()?),
            Self::UInt32 => Value::UInt32(r.read_u32()?),
            Self::Int64 => Value::Int64(r.read_i64()?),
            Self::UInt64 => Value::UInt64(r.read_u64()?),
        })
    }

    fn write(self, w: &mut Writer, value: &Value) -> Result<(), ProtocolError> {
        match (self, value) {
            (Self::Int8, Value::Int8(v)) => w.write_i8(*v),
            (Self::UInt8, Value::UInt8(v)) => w.write_u8(*v),
            (Self::Int16, Value::Int16(v)) => w.write_i16(*v),
            (Self::UInt16, Value::UInt16(v)) => w.write_u16(*v),
            (Self::Int32, Value::Int32(v)) => w.write_i32(*v),
            (Self::UInt32, Value::UInt32(v)) => w.write_u32(*v),
            (Self::Int64, Value::Int64(v)) => w.write_i64(*v),
            (Self::UInt64, Value::UInt64(v)) => w.write_u64(*v),
            _ => return Err(ProtocolError::DatatypeMismatch(self.name())),
        };
        Ok(())
    }
}

/// Declared datatype of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Single integer
    Scalar(ScalarType),
    /// `u32` count followed by integers
    Array(ScalarType),
    /// Length-prefixed UTF-16 string
    String,
}

impl DataType {
    /// Datatype code for strings
    pub const STRING_CODE: u16 = 0xFFFF;

    /// Map a wire datatype code.
    ///
    /// # Errors
    /// Returns `UnknownDatatype` for anything outside the integer, integer
    /// array and string codes (128-bit integers and "undefined" included)
    pub fn from_code(code: u16) -> Result<Self, ProtocolError> {
        if code == Self::STRING_CODE {
            return Ok(Self::String);
        }
        let element = ScalarType::ALL
            .into_iter()
            .find(|s| s.index() == code & 0x0FFF)
            .ok_or(ProtocolError::UnknownDatatype(code))?;
        match code & 0xF000 {
            0x0000 => Ok(Self::Scalar(element)),
            0x4000 => Ok(Self::Array(element)),
            _ => Err(ProtocolError::UnknownDatatype(code)),
        }
    }

    /// Wire datatype code
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::Scalar(s) => s.index(),
            Self::Array(s) => 0x4000 | s.index(),
            Self::String => Self::STRING_CODE,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => f.write_str(s.name()),
            Self::Array(s) => write!(f, "{}[]", s.name()),
            Self::String => f.write_str("string"),
        }
    }
}

/// Decoded property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Signed 8-bit
    Int8(i8),
    /// Unsigned 8-bit
    UInt8(u8),
    /// Signed 16-bit
    Int16(i16),
    /// Unsigned 16-bit
    UInt16(u16),
    /// Signed 32-bit
    Int32(i32),
    /// Unsigned 32-bit
    UInt32(u32),
    /// Signed 64-bit
    Int64(i64),
    /// Unsigned 64-bit
    UInt64(u64),
    /// String
    String(String),
    /// Array of integers of a single type
    Array(Vec<Value>),
}

impl Value {
    /// Integer value widened to `u64`, if non-negative
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::UInt8(v) => Some(v.into()),
            Self::UInt16(v) => Some(v.into()),
            Self::UInt32(v) => Some(v.into()),
            Self::UInt64(v) => Some(v),
            Self::Int8(v) => u64::try_from(v).ok(),
            Self::Int16(v) => u64::try_from(v).ok(),
            Self::Int32(v) => u64::try_from(v).ok(),
            Self::Int64(v) => u64::try_from(v).ok(),
            Self::String(_) | Self::Array(_) => None,
        }
    }

    /// Integer value widened to `i64`, if it fits
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int8(v) => Some(v.into()),
            Self::Int16(v) => Some(v.into()),
            Self::Int32(v) => Some(v.into()),
            Self::Int64(v) => Some(v),
            Self::UInt8(v) => Some(v.into()),
            Self::UInt16(v) => Some(v.into()),
            Self::UInt32(v) => Some(v.into()),
            Self::UInt64(v) => i64::try_from(v).ok(),
            Self::String(_) | Self::Array(_) => None,
        }
    }

    /// String contents, if this is a string
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int8(v) => write!(f, "{v}"),
            Self::UInt8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Read one value of `datatype` from a reader
///
/// # Errors
/// Returns `TruncatedField` if the buffer ends early
pub fn read_value(r: &mut Reader<'_>, datatype: DataType) -> Result<Value, ProtocolError> {
    match datatype {
        DataType::Scalar(s) => s.read(r),
        DataType::String => Ok(Value::String(r.read_string()?)),
        DataType::Array(s) => {
            let count = r.read_array_len(s.width())?;
            let items = (0..count)
                .map(|_| s.read(r))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(items))
        }
    }
}

/// Append one value of `datatype` to a writer
///
/// # Errors
/// Returns `DatatypeMismatch` if the value does not have the declared type,
/// `StringTooLong` for oversized strings or `EmbeddedNul` for strings
/// containing U+0000
pub fn write_value(w: &mut Writer, datatype: DataType, value: &Value) -> Result<(), ProtocolError> {
    match (datatype, value) {
        (DataType::Scalar(s), _) => s.write(w, value),
        (DataType::String, Value::String(s)) => w.write_string(s).map(|_| ()),
        (DataType::Array(s), Value::Array(items)) => {
            let count =
                u32::try_from(items.len()).map_err(|_| ProtocolError::DatatypeMismatch("array"))?;
            w.write_u32(count);
            items.iter().try_for_each(|item| s.write(w, item))
        }
        (DataType::String, _) => Err(ProtocolError::DatatypeMismatch("string")),
        (DataType::Array(_), _) => Err(ProtocolError::DatatypeMismatch("array")),
    }
}

/// Decode a property value of the declared datatype.
///
/// Trailing bytes after the value are ignored.
///
/// # Example
///
/// ```
/// use mtp_core::property::{decode, DataType, ScalarType, Value};
///
/// let value = decode(DataType::Scalar(ScalarType::UInt16), &[0x34, 0x12]).unwrap();
/// assert_eq!(value, Value::UInt16(0x1234));
/// ```
///
/// # Errors
/// Returns `TruncatedField` if `bytes` is too short for the datatype
pub fn decode(datatype: DataType, bytes: &[u8]) -> Result<Value, ProtocolError> {
    read_value(&mut Reader::new(bytes), datatype)
}

/// Encode a value as the declared datatype
///
/// # Errors
/// Returns `DatatypeMismatch` if the value does not have the declared type
pub fn encode(datatype: DataType, value: &Value) -> Result<Vec<u8>, ProtocolError> {
    let mut w = Writer::new();
    write_value(&mut w, datatype, value)?;
    Ok(w.into_inner())
}

/// Decode an unsigned integer whose width is implied by the byte count.
///
/// # Errors
/// Returns `UnsupportedIntegerWidth` unless `bytes` is 1, 2, 4 or 8 long
pub fn decode_unsigned(bytes: &[u8]) -> Result<u64, ProtocolError> {
    let mut r = Reader::new(bytes);
    match bytes.len() {
        1 => Ok(r.read_u8()?.into()),
        2 => Ok(r.read_u16()?.into()),
        4 => Ok(r.read_u32()?.into()),
        8 => r.read_u64(),
        n => Err(ProtocolError::UnsupportedIntegerWidth(n)),
    }
}

/// Allowed values advertised in a property description
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyForm {
    /// Any value of the datatype
    None,
    /// Inclusive range with step
    Range {
        /// Minimum value
        min: Value,
        /// Maximum value
        max: Value,
        /// Step size
        step: Value,
    },
    /// Explicit list of values
    Enumeration(Vec<Value>),
}

impl PropertyForm {
    fn read(r: &mut Reader<'_>, datatype: DataType) -> Result<Self, ProtocolError> {
        // Some devices omit the form flag entirely.
        if r.is_empty() {
            return Ok(Self::None);
        }
        match r.read_u8()? {
            1 => Ok(Self::Range {
                min: read_value(r, datatype)?,
                max: read_value(r, datatype)?,
                step: read_value(r, datatype)?,
            }),
            2 => {
                let count = r.read_u16()?;
                let values = (0..count)
                    .map(|_| read_value(r, datatype))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Enumeration(values))
            }
            _ => Ok(Self::None),
        }
    }
}

/// Device property description dataset (GetDevicePropDesc)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePropertyDesc {
    /// Property code
    pub code: DevicePropertyCode,
    /// Declared datatype
    pub datatype: DataType,
    /// Whether the host may set the value
    pub writable: bool,
    /// Factory default value
    pub factory_default: Value,
    /// Current value
    pub current: Value,
    /// Allowed values
    pub form: PropertyForm,
}

impl DevicePropertyDesc {
    /// Decode the dataset
    ///
    /// # Errors
    /// Returns `ProtocolError` for truncated data or unknown datatypes
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(bytes);
        let code = DevicePropertyCode(r.read_u16()?);
        let datatype = DataType::from_code(r.read_u16()?)?;
        let writable = r.read_u8()? != 0;
        let factory_default = read_value(&mut r, datatype)?;
        let current = read_value(&mut r, datatype)?;
        let form = PropertyForm::read(&mut r, datatype)?;
        Ok(Self {
            code,
            datatype,
            writable,
            factory_default,
            current,
            form,
        })
    }
}

/// Object property description dataset (GetObjectPropDesc)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPropertyDesc {
    /// Property code
    pub code: ObjectPropertyCode,
    /// Declared datatype
    pub datatype: DataType,
    /// Whether the host may set the value
    pub writable: bool,
    /// Factory default value
    pub factory_default: Value,
    /// Property group code
    pub group: u32,
    /// Allowed values
    pub form: PropertyForm,
}

impl ObjectPropertyDesc {
    /// Decode the dataset
    ///
    /// # Errors
    /// Returns `ProtocolError` for truncated data or unknown datatypes
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(bytes);
        let code = ObjectPropertyCode(r.read_u16()?);
        let datatype = DataType::from_code(r.read_u16()?)?;
        let writable = r.read_u8()? != 0;
        let factory_default = read_value(&mut r, datatype)?;
        let group = if r.remaining() >= 4 { r.read_u32()? } else { 0 };
        let form = PropertyForm::read(&mut r, datatype)?;
        Ok(Self {
            code,
            datatype,
            writable,
            factory_default,
            group,
            form,
        })
    }
}
