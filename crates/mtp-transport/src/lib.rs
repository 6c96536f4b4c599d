//! # mtp-transport
//!
//! Transport layer for the mtp-host MTP client.
//!
//! This crate provides:
//! - The synchronous [`Transport`] trait the transaction engine drives
//! - A control channel for out-of-band cancellation of a blocked transfer
//! - [`CancelToken`], passed into every blocking send/receive
//! - USB bulk transport on top of `nusb` (feature `usb`)
//! - A scripted transport for unit tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod mock;
pub mod transport;

#[cfg(feature = "usb")]
pub mod usb;

use std::time::Duration;

pub use cancel::CancelToken;
pub use mock::{ScriptHandle, ScriptedTransport};
pub use transport::{
    ControlChannel, Direction, EndpointStats, Transport, TransportError, TransportResult,
    TransportStats,
};

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How often a blocked transfer wakes up to check its cancel token
    pub poll_interval: Duration,
    /// Maximum bytes requested from the bulk IN endpoint per transfer
    pub max_receive_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            max_receive_size: 256 * 1024,
        }
    }
}
