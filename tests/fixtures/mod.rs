//! Test fixtures

pub mod virtual_device;

pub use virtual_device::{DeviceHandle, VirtualDevice};
