//! Operation, response, format and property code tables.
//!
//! Codes are opaque 16-bit values on the wire. The newtypes below only give
//! the commonly used ones a name; any other value passes through untouched.

use std::fmt;

macro_rules! code_table {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$cmeta:meta])* $const:ident ($label:literal) = $value:expr ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u16);

        impl $name {
            $( $(#[$cmeta])* pub const $const: Self = Self($value); )*

            /// Symbolic name, if this code is one of the well-known ones
            #[must_use]
            pub fn name(self) -> Option<&'static str> {
                match self {
                    $( Self::$const => Some($label), )*
                    _ => None,
                }
            }
        }

        impl From<u16> for $name {
            fn from(value: u16) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name() {
                    Some(name) => write!(f, "{} (0x{:04X})", name, self.0),
                    None => write!(f, "0x{:04X}", self.0),
                }
            }
        }
    };
}

code_table! {
    /// MTP operation code
    OperationCode {
        /// GetDeviceInfo
        GET_DEVICE_INFO("GetDeviceInfo") = 0x1001,
        /// OpenSession
        OPEN_SESSION("OpenSession") = 0x1002,
        /// CloseSession
        CLOSE_SESSION("CloseSession") = 0x1003,
        /// GetStorageIDs
        GET_STORAGE_IDS("GetStorageIDs") = 0x1004,
        /// GetStorageInfo
        GET_STORAGE_INFO("GetStorageInfo") = 0x1005,
        /// GetNumObjects
        GET_NUM_OBJECTS("GetNumObjects") = 0x1006,
        /// GetObjectHandles
        GET_OBJECT_HANDLES("GetObjectHandles") = 0x1007,
        /// GetObjectInfo
        GET_OBJECT_INFO("GetObjectInfo") = 0x1008,
        /// GetObject
        GET_OBJECT("GetObject") = 0x1009,
        /// GetThumb
        GET_THUMB("GetThumb") = 0x100A,
        /// DeleteObject
        DELETE_OBJECT("DeleteObject") = 0x100B,
        /// SendObjectInfo
        SEND_OBJECT_INFO("SendObjectInfo") = 0x100C,
        /// SendObject
        SEND_OBJECT("SendObject") = 0x100D,
        /// GetDevicePropDesc
        GET_DEVICE_PROP_DESC("GetDevicePropDesc") = 0x1014,
        /// GetDevicePropValue
        GET_DEVICE_PROP_VALUE("GetDevicePropValue") = 0x1015,
        /// SetDevicePropValue
        SET_DEVICE_PROP_VALUE("SetDevicePropValue") = 0x1016,
        /// GetPartialObject
        GET_PARTIAL_OBJECT("GetPartialObject") = 0x101B,
        /// GetObjectPropsSupported
        GET_OBJECT_PROPS_SUPPORTED("GetObjectPropsSupported") = 0x9801,
        /// GetObjectPropDesc
        GET_OBJECT_PROP_DESC("GetObjectPropDesc") = 0x9802,
        /// GetObjectPropValue
        GET_OBJECT_PROP_VALUE("GetObjectPropValue") = 0x9803,
        /// SetObjectPropValue
        SET_OBJECT_PROP_VALUE("SetObjectPropValue") = 0x9804,
    }
}

impl OperationCode {
    /// Whether the operation carries a device-to-host data phase
    #[must_use]
    pub fn expects_data_in(self) -> bool {
        matches!(
            self,
            Self::GET_DEVICE_INFO
                | Self::GET_STORAGE_IDS
                | Self::GET_STORAGE_INFO
                | Self::GET_OBJECT_HANDLES
                | Self::GET_OBJECT_INFO
                | Self::GET_OBJECT
                | Self::GET_THUMB
                | Self::GET_DEVICE_PROP_DESC
                | Self::GET_DEVICE_PROP_VALUE
                | Self::GET_PARTIAL_OBJECT
                | Self::GET_OBJECT_PROPS_SUPPORTED
                | Self::GET_OBJECT_PROP_DESC
                | Self::GET_OBJECT_PROP_VALUE
        )
    }
}

code_table! {
    /// MTP response code
    ResponseCode {
        /// Operation completed
        OK("OK") = 0x2001,
        /// GeneralError
        GENERAL_ERROR("GeneralError") = 0x2002,
        /// SessionNotOpen
        SESSION_NOT_OPEN("SessionNotOpen") = 0x2003,
        /// InvalidTransactionID
        INVALID_TRANSACTION_ID("InvalidTransactionID") = 0x2004,
        /// OperationNotSupported
        OPERATION_NOT_SUPPORTED("OperationNotSupported") = 0x2005,
        /// ParameterNotSupported
        PARAMETER_NOT_SUPPORTED("ParameterNotSupported") = 0x2006,
        /// IncompleteTransfer
        INCOMPLETE_TRANSFER("IncompleteTransfer") = 0x2007,
        /// InvalidStorageID
        INVALID_STORAGE_ID("InvalidStorageID") = 0x2008,
        /// InvalidObjectHandle
        INVALID_OBJECT_HANDLE("InvalidObjectHandle") = 0x2009,
        /// DevicePropNotSupported
        DEVICE_PROP_NOT_SUPPORTED("DevicePropNotSupported") = 0x200A,
        /// InvalidObjectFormatCode
        INVALID_OBJECT_FORMAT_CODE("InvalidObjectFormatCode") = 0x200B,
        /// StoreFull
        STORE_FULL("StoreFull") = 0x200C,
        /// ObjectWriteProtected
        OBJECT_WRITE_PROTECTED("ObjectWriteProtected") = 0x200D,
        /// StoreReadOnly
        STORE_READ_ONLY("StoreReadOnly") = 0x200E,
        /// AccessDenied
        ACCESS_DENIED("AccessDenied") = 0x200F,
        /// NoThumbnailPresent
        NO_THUMBNAIL_PRESENT("NoThumbnailPresent") = 0x2010,
        /// StoreNotAvailable
        STORE_NOT_AVAILABLE("StoreNotAvailable") = 0x2013,
        /// SpecificationByFormatUnsupported
        SPECIFICATION_BY_FORMAT_UNSUPPORTED("SpecificationByFormatUnsupported") = 0x2014,
        /// NoValidObjectInfo
        NO_VALID_OBJECT_INFO("NoValidObjectInfo") = 0x2015,
        /// DeviceBusy
        DEVICE_BUSY("DeviceBusy") = 0x2019,
        /// InvalidParentObject
        INVALID_PARENT_OBJECT("InvalidParentObject") = 0x201A,
        /// InvalidDevicePropFormat
        INVALID_DEVICE_PROP_FORMAT("InvalidDevicePropFormat") = 0x201B,
        /// InvalidDevicePropValue
        INVALID_DEVICE_PROP_VALUE("InvalidDevicePropValue") = 0x201C,
        /// InvalidParameter
        INVALID_PARAMETER("InvalidParameter") = 0x201D,
        /// SessionAlreadyOpen
        SESSION_ALREADY_OPEN("SessionAlreadyOpen") = 0x201E,
        /// TransactionCancelled
        TRANSACTION_CANCELLED("TransactionCancelled") = 0x201F,
        /// InvalidObjectPropCode
        INVALID_OBJECT_PROP_CODE("InvalidObjectPropCode") = 0xA801,
        /// InvalidObjectPropFormat
        INVALID_OBJECT_PROP_FORMAT("InvalidObjectPropFormat") = 0xA802,
        /// InvalidObjectPropValue
        INVALID_OBJECT_PROP_VALUE("InvalidObjectPropValue") = 0xA803,
    }
}

code_table! {
    /// Object format code
    ObjectFormat {
        /// Format filter meaning "no filter" in GetObjectHandles
        ANY("Any") = 0x0000,
        /// Undefined (generic binary file)
        UNDEFINED("Undefined") = 0x3000,
        /// Association (directory)
        ASSOCIATION("Association") = 0x3001,
        /// Plain text
        TEXT("Text") = 0x3004,
        /// HTML
        HTML("HTML") = 0x3005,
        /// WAV audio
        WAV("WAV") = 0x3008,
        /// MP3 audio
        MP3("MP3") = 0x3009,
        /// AVI video
        AVI("AVI") = 0x300A,
        /// MPEG video
        MPEG("MPEG") = 0x300B,
        /// JPEG image
        EXIF_JPEG("EXIF/JPEG") = 0x3801,
        /// BMP image
        BMP("BMP") = 0x3804,
        /// GIF image
        GIF("GIF") = 0x3807,
        /// PNG image
        PNG("PNG") = 0x380B,
        /// TIFF image
        TIFF("TIFF") = 0x380D,
        /// WMA audio
        WMA("WMA") = 0xB901,
        /// OGG audio
        OGG("OGG") = 0xB902,
        /// AAC audio
        AAC("AAC") = 0xB903,
        /// FLAC audio
        FLAC("FLAC") = 0xB906,
        /// WMV video
        WMV("WMV") = 0xB981,
        /// MP4 container
        MP4("MP4") = 0xB982,
        /// 3GP container
        THREE_GP("3GP") = 0xB984,
        /// M3U playlist
        M3U_PLAYLIST("M3UPlaylist") = 0xBA11,
    }
}

impl ObjectFormat {
    /// Guess the format of a file from its extension
    ///
    /// # Example
    ///
    /// ```
    /// use mtp_core::ObjectFormat;
    ///
    /// assert_eq!(ObjectFormat::from_filename("song.MP3"), ObjectFormat::MP3);
    /// assert_eq!(ObjectFormat::from_filename("notes"), ObjectFormat::UNDEFINED);
    /// ```
    #[must_use]
    pub fn from_filename(filename: &str) -> Self {
        let Some((_, ext)) = filename.rsplit_once('.') else {
            return Self::UNDEFINED;
        };
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Self::TEXT,
            "htm" | "html" => Self::HTML,
            "wav" => Self::WAV,
            "mp3" => Self::MP3,
            "avi" => Self::AVI,
            "mpg" | "mpeg" => Self::MPEG,
            "jpg" | "jpeg" => Self::EXIF_JPEG,
            "bmp" => Self::BMP,
            "gif" => Self::GIF,
            "png" => Self::PNG,
            "tif" | "tiff" => Self::TIFF,
            "wma" => Self::WMA,
            "ogg" | "oga" => Self::OGG,
            "aac" | "m4a" => Self::AAC,
            "flac" => Self::FLAC,
            "wmv" => Self::WMV,
            "mp4" | "m4v" => Self::MP4,
            "3gp" => Self::THREE_GP,
            "m3u" => Self::M3U_PLAYLIST,
            _ => Self::UNDEFINED,
        }
    }

    /// Whether objects of this format are directories
    #[must_use]
    pub fn is_association(self) -> bool {
        self == Self::ASSOCIATION
    }
}

code_table! {
    /// Object property code (namespace 0xDCxx)
    ObjectPropertyCode {
        /// StorageID
        STORAGE_ID("StorageID") = 0xDC01,
        /// ObjectFormat
        OBJECT_FORMAT("ObjectFormat") = 0xDC02,
        /// ProtectionStatus
        PROTECTION_STATUS("ProtectionStatus") = 0xDC03,
        /// ObjectSize (u64)
        OBJECT_SIZE("ObjectSize") = 0xDC04,
        /// ObjectFileName
        OBJECT_FILENAME("ObjectFileName") = 0xDC07,
        /// DateCreated
        DATE_CREATED("DateCreated") = 0xDC08,
        /// DateModified
        DATE_MODIFIED("DateModified") = 0xDC09,
        /// ParentObject
        PARENT_OBJECT("ParentObject") = 0xDC0B,
        /// PersistentUniqueObjectIdentifier
        PERSISTENT_UID("PersistentUniqueObjectIdentifier") = 0xDC41,
        /// Name
        NAME("Name") = 0xDC44,
    }
}

code_table! {
    /// Device property code (namespaces 0x50xx and 0xD4xx)
    DevicePropertyCode {
        /// BatteryLevel
        BATTERY_LEVEL("BatteryLevel") = 0x5001,
        /// DateTime
        DATE_TIME("DateTime") = 0x5011,
        /// SynchronizationPartner
        SYNCHRONIZATION_PARTNER("SynchronizationPartner") = 0xD401,
        /// DeviceFriendlyName
        DEVICE_FRIENDLY_NAME("DeviceFriendlyName") = 0xD402,
    }
}

impl DevicePropertyCode {
    /// Whether the code lives in the standard PTP device property range
    #[must_use]
    pub fn is_standard(self) -> bool {
        self.0 & 0xFF00 == 0x5000
    }
}

/// Association type for generic folders, used when creating directories
pub const ASSOCIATION_GENERIC_FOLDER: u16 = 0x0001;
