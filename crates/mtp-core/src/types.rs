//! Device-assigned identifiers.

use std::fmt;

/// Opaque object handle assigned by the device.
///
/// Handles are only meaningful for the session that obtained them and are
/// never cached across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u32);

impl ObjectHandle {
    /// Never a valid object
    pub const INVALID: Self = Self(0);

    /// Root sentinel, used as the parent filter for top-level listings
    pub const ROOT: Self = Self(0xFFFF_FFFF);

    /// Whether this is the root sentinel
    #[must_use]
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl From<u32> for ObjectHandle {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Storage identifier enumerated by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageId(pub u32);

impl StorageId {
    /// Let the device pick a storage for an upload
    pub const DEVICE_CHOOSES: Self = Self(0);

    /// Filter matching every storage
    pub const ALL: Self = Self(0xFFFF_FFFF);
}

impl From<u32> for StorageId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_sentinels() {
        assert!(ObjectHandle::ROOT.is_root());
        assert!(!ObjectHandle(1).is_root());
        assert_eq!(ObjectHandle::ROOT.to_string(), "0xFFFFFFFF");
        assert_eq!(StorageId(0x0001_0001).to_string(), "0x00010001");
    }
}
