//! Fixed MTP datasets: DeviceInfo, StorageInfo and ObjectInfo.

use crate::codec::{Reader, Writer};
use crate::codes::{ASSOCIATION_GENERIC_FOLDER, ObjectFormat, OperationCode};
use crate::error::ProtocolError;
use crate::types::{ObjectHandle, StorageId};

/// DeviceInfo dataset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// PTP standard version, in hundredths
    pub standard_version: u16,
    /// Vendor extension id
    pub vendor_extension_id: u32,
    /// Vendor extension version
    pub vendor_extension_version: u16,
    /// Vendor extension description
    pub vendor_extension_desc: String,
    /// Functional mode
    pub functional_mode: u16,
    /// Supported operation codes
    pub operations_supported: Vec<u16>,
    /// Supported event codes
    pub events_supported: Vec<u16>,
    /// Supported device property codes
    pub device_properties_supported: Vec<u16>,
    /// Formats the device can create
    pub capture_formats: Vec<u16>,
    /// Formats the device can play back
    pub playback_formats: Vec<u16>,
    /// Manufacturer
    pub manufacturer: String,
    /// Model
    pub model: String,
    /// Device version
    pub device_version: String,
    /// Serial number
    pub serial_number: String,
}

impl DeviceInfo {
    /// Decode the dataset
    ///
    /// # Errors
    /// Returns `TruncatedField` if the data ends early
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(bytes);
        Ok(Self {
            standard_version: r.read_u16()?,
            vendor_extension_id: r.read_u32()?,
            vendor_extension_version: r.read_u16()?,
            vendor_extension_desc: r.read_string()?,
            functional_mode: r.read_u16()?,
            operations_supported: r.read_u16_array()?,
            events_supported: r.read_u16_array()?,
            device_properties_supported: r.read_u16_array()?,
            capture_formats: r.read_u16_array()?,
            playback_formats: r.read_u16_array()?,
            manufacturer: r.read_string()?,
            model: r.read_string()?,
            device_version: r.read_string()?,
            serial_number: r.read_string()?,
        })
    }

    /// Encode the dataset
    ///
    /// # Errors
    /// Returns `StringTooLong` for oversized strings
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut w = Writer::new();
        w.write_u16(self.standard_version)
            .write_u32(self.vendor_extension_id)
            .write_u16(self.vendor_extension_version);
        w.write_string(&self.vendor_extension_desc)?;
        w.write_u16(self.functional_mode)
            .write_u16_array(&self.operations_supported)
            .write_u16_array(&self.events_supported)
            .write_u16_array(&self.device_properties_supported)
            .write_u16_array(&self.capture_formats)
            .write_u16_array(&self.playback_formats);
        w.write_string(&self.manufacturer)?;
        w.write_string(&self.model)?;
        w.write_string(&self.device_version)?;
        w.write_string(&self.serial_number)?;
        Ok(w.into_inner())
    }

    /// Whether the device advertises an operation
    #[must_use]
    pub fn supports(&self, op: OperationCode) -> bool {
        self.operations_supported.contains(&op.0)
    }
}

/// StorageInfo dataset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageInfo {
    /// Storage type (fixed/removable ROM/RAM)
    pub storage_type: u16,
    /// Filesystem type
    pub filesystem_type: u16,
    /// Access capability (0 = read-write)
    pub access_capability: u16,
    /// Capacity in bytes
    pub max_capacity: u64,
    /// Free space in bytes
    pub free_space: u64,
    /// Free object slots
    pub free_objects: u32,
    /// Description
    pub description: String,
    /// Volume label
    pub volume_label: String,
}

impl StorageInfo {
    /// Decode the dataset
    ///
    /// # Errors
    /// Returns `TruncatedField` if the data ends early
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(bytes);
        Ok(Self {
            storage_type: r.read_u16()?,
            filesystem_type: r.read_u16()?,
            access_capability: r.read_u16()?,
            max_capacity: r.read_u64()?,
            free_space: r.read_u64()?,
            free_objects: r.read_u32()?,
            description: r.read_string()?,
            volume_label: r.read_string()?,
        })
    }

    /// Encode the dataset
    ///
    /// # Errors
    /// Returns `StringTooLong` for oversized strings
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut w = Writer::new();
        w.write_u16(self.storage_type)
            .write_u16(self.filesystem_type)
            .write_u16(self.access_capability)
            .write_u64(self.max_capacity)
            .write_u64(self.free_space)
            .write_u32(self.free_objects);
        w.write_string(&self.description)?;
        w.write_string(&self.volume_label)?;
        Ok(w.into_inner())
    }

    /// Whether the storage accepts writes
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.access_capability == 0
    }
}

/// ObjectInfo dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Storage holding the object
    pub storage_id: StorageId,
    /// Object format
    pub format: ObjectFormat,
    /// Protection status
    pub protection_status: u16,
    /// Size in bytes, saturated at `u32::MAX` for objects of 4 GiB or more
    pub compressed_size: u32,
    /// Thumbnail format
    pub thumb_format: u16,
    /// Thumbnail size in bytes
    pub thumb_compressed_size: u32,
    /// Thumbnail width
    pub thumb_width: u32,
    /// Thumbnail height
    pub thumb_height: u32,
    /// Image width
    pub image_width: u32,
    /// Image height
    pub image_height: u32,
    /// Image bit depth
    pub image_bit_depth: u32,
    /// Parent object, `0` for objects at the storage root
    pub parent: ObjectHandle,
    /// Association type (1 = generic folder)
    pub association_type: u16,
    /// Association description
    pub association_desc: u32,
    /// Sequence number
    pub sequence_number: u32,
    /// File name
    pub filename: String,
    /// Capture date (`YYYYMMDDThhmmss`)
    pub capture_date: String,
    /// Modification date (`YYYYMMDDThhmmss`)
    pub modification_date: String,
    /// Keywords
    pub keywords: String,
}

impl Default for ObjectInfo {
    fn default() -> Self {
        Self {
            storage_id: StorageId::DEVICE_CHOOSES,
            format: ObjectFormat::UNDEFINED,
            protection_status: 0,
            compressed_size: 0,
            thumb_format: 0,
            thumb_compressed_size: 0,
            thumb_width: 0,
            thumb_height: 0,
            image_width: 0,
            image_height: 0,
            image_bit_depth: 0,
            parent: ObjectHandle::INVALID,
            association_type: 0,
            association_desc: 0,
            sequence_number: 0,
            filename: String::new(),
            capture_date: String::new(),
            modification_date: String::new(),
            keywords: String::new(),
        }
    }
}

impl ObjectInfo {
    /// ObjectInfo for a new file, format guessed from the name
    #[must_use]
    pub fn for_file(filename: &str, size: u64) -> Self {
        let mut info = Self {
            format: ObjectFormat::from_filename(filename),
            filename: filename.to_string(),
            ..Self::default()
        };
        info.set_size(size);
        info
    }

    /// ObjectInfo for a new directory
    #[must_use]
    pub fn for_directory(name: &str) -> Self {
        Self {
            format: ObjectFormat::ASSOCIATION,
            association_type: ASSOCIATION_GENERIC_FOLDER,
            filename: name.to_string(),
            ..Self::default()
        }
    }

    /// Set the compressed size, saturating at `u32::MAX`
    pub fn set_size(&mut self, size: u64) {
        self.compressed_size = u32::try_from(size).unwrap_or(u32::MAX);
    }

    /// Whether the object is a directory
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.format.is_association()
    }

    /// Decode the dataset
    ///
    /// # Errors
    /// Returns `TruncatedField` if the data ends early
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(bytes);
        Ok(Self {
            storage_id: StorageId(r.read_u32()?),
            format: ObjectFormat(r.read_u16()?),
            protection_status: r.read_u16()?,
            compressed_size: r.read_u32()?,
            thumb_format: r.read_u16()?,
            thumb_compressed_size: r.read_u32()?,
            thumb_width: r.read_u32()?,
            thumb_height: r.read_u32()?,
            image_width: r.read_u32()?,
            image_height: r.read_u32()?,
            image_bit_depth: r.read_u32()?,
            parent: ObjectHandle(r.read_u32()?),
            association_type: r.read_u16()?,
            association_desc: r.read_u32()?,
            sequence_number: r.read_u32()?,
            filename: r.read_string()?,
            capture_date: r.read_string()?,
            modification_date: r.read_string()?,
            keywords: r.read_string()?,
        })
    }

    /// Encode the dataset
    ///
    /// # Errors
    /// Returns `StringTooLong` for oversized strings
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut w = Writer::with_capacity(64 + self.filename.len() * 2);
        w.write_u32(self.storage_id.0)
            .write_u16(self.format.0)
            .write_u16(self.protection_status)
            .write_u32(self.compressed_size)
            .write_u16(self.thumb_format)
            .write_u32(self.thumb_compressed_size)
            .write_u32(self.thumb_width)
            .write_u32(self.thumb_height)
            .write_u32(self.image_width)
            .write_u32(self.image_height)
            .write_u32(self.image_bit_depth)
            .write_u32(self.parent.0)
            .write_u16(self.association_type)
            .write_u32(self.association_desc)
            .write_u32(self.sequence_number);
        w.write_string(&self.filename)?;
        w.write_string(&self.capture_date)?;
        w.write_string(&self.modification_date)?;
        w.write_string(&self.keywords)?;
        Ok(w.into_inner())
    }
}

/// Identity of an object announced with SendObjectInfo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewObject {
    /// Storage the device placed the object on
    pub storage_id: StorageId,
    /// Parent the device placed the object under
    pub parent: ObjectHandle,
    /// Handle of the new object
    pub handle: ObjectHandle,
}

impl NewObject {
    /// Build from SendObjectInfo response parameters
    ///
    /// # Errors
    /// Returns `MissingResponseParameter` if fewer than three are present
    pub fn from_params(params: &[u32]) -> Result<Self, ProtocolError> {
        let param = |i: usize| {
            params
                .get(i)
                .copied()
                .ok_or(ProtocolError::MissingResponseParameter(i))
        };
        Ok(Self {
            storage_id: StorageId(param(0)?),
            parent: ObjectHandle(param(1)?),
            handle: ObjectHandle(param(2)?),
        })
    }
}
