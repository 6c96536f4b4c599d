//! Transport trait abstraction over USB bulk endpoints.
//!
//! This module defines the `Transport` trait that the transaction engine uses
//! to move raw container bytes to and from a device. Implementations exist for
//! real USB devices (`usb`) and for scripted tests (`mock`); the integration
//! tests add a simulated device on top of the same trait.

use crate::cancel::CancelToken;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Endpoint direction, from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host (bulk IN)
    In,
    /// Host to device (bulk OUT)
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => f.write_str("IN"),
            Self::Out => f.write_str("OUT"),
        }
    }
}

/// Transport layer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transfer did not complete within its timeout
    #[error("Transfer timed out")]
    Timeout,

    /// The device went away
    #[error("Device disconnected")]
    Disconnected,

    /// Endpoint halted; must be cleared before further use
    #[error("Endpoint {0} stalled")]
    Stall(Direction),

    /// The transfer was cancelled through the control channel
    #[error("Transfer aborted")]
    Aborted,

    /// Transport-specific error
    #[error("Transport error: {0}")]
    Other(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Synchronous transport for MTP bulk traffic.
///
/// Every blocking call receives the cancel token of the transaction it serves
/// and must return [`TransportError::Aborted`] within one poll interval after
/// the token is cancelled.
///
/// # Examples
///
/// ```
/// use mtp_transport::{CancelToken, ScriptedTransport, Transport};
/// use std::time::Duration;
///
/// let (mut transport, script) = ScriptedTransport::new(512);
/// script.push_inbound(vec![1, 2, 3]);
///
/// let cancel = CancelToken::new();
/// transport.send(b"hello", Duration::from_secs(1), &cancel).unwrap();
/// let data = transport.receive(512, Duration::from_secs(1), &cancel).unwrap();
/// assert_eq!(data, vec![1, 2, 3]);
/// assert_eq!(script.sent(), vec![b"hello".to_vec()]);
/// ```
pub trait Transport: Send {
    /// Send one buffer on the bulk OUT endpoint.
    ///
    /// An empty buffer sends a zero-length packet.
    ///
    /// # Errors
    /// Returns `TransportError` if the transfer fails, times out or is aborted
    fn send(&mut self, buf: &[u8], timeout: Duration, cancel: &CancelToken)
    -> TransportResult<()>;

    /// Receive at most `max_len` bytes from the bulk IN endpoint.
    ///
    /// # Errors
    /// Returns `TransportError` if the transfer fails, times out or is aborted
    fn receive(
        &mut self,
        max_len: usize,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> TransportResult<Vec<u8>>;

    /// Clear a halt condition on one of the bulk endpoints.
    ///
    /// # Errors
    /// Returns `TransportError` if the clear request fails
    fn clear_halt(&mut self, direction: Direction) -> TransportResult<()>;

    /// Maximum packet size of the bulk endpoints.
    fn max_packet_size(&self) -> usize;

    /// Control path used to cancel a transfer from another thread.
    fn control(&self) -> Arc<dyn ControlChannel>;

    /// Get transport statistics (optional).
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Out-of-band control path, independent of the bulk endpoints.
///
/// Implementations must be callable while another thread is blocked inside
/// [`Transport::send`] or [`Transport::receive`].
pub trait ControlChannel: Send + Sync {
    /// Ask the device to cancel the transaction with the given id.
    ///
    /// # Errors
    /// Returns `TransportError` if the control request fails
    fn request_abort(&self, transaction_id: u32, timeout: Duration) -> TransportResult<()>;
}

/// Bulk traffic counters for one endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStats {
    /// Completed transfers, zero-length packets included
    pub transfers: u64,
    /// Bytes moved by completed transfers
    pub bytes: u64,
    /// Completed transfers that carried no data
    pub zero_length: u64,
    /// Transfers that ended in an endpoint halt
    pub stalls: u64,
    /// Transfers that failed, were cancelled or timed out
    pub failures: u64,
}

/// Traffic counters of a transport, kept per bulk endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Host to device
    pub bulk_out: EndpointStats,
    /// Device to host
    pub bulk_in: EndpointStats,
}

impl TransportStats {
    /// Counters for the endpoint in `direction`
    #[must_use]
    pub fn endpoint(&self, direction: Direction) -> &EndpointStats {
        match direction {
            Direction::Out => &self.bulk_out,
            Direction::In => &self.bulk_in,
        }
    }

    fn endpoint_mut(&mut self, direction: Direction) -> &mut EndpointStats {
        match direction {
            Direction::Out => &mut self.bulk_out,
            Direction::In => &mut self.bulk_in,
        }
    }

    /// Count a completed transfer of `len` bytes
    pub fn record_transfer(&mut self, direction: Direction, len: usize) {
        let endpoint = self.endpoint_mut(direction);
        endpoint.transfers += 1;
        endpoint.bytes += len as u64;
        if len == 0 {
            endpoint.zero_length += 1;
        }
    }

    /// Count a transfer that ended in `err`
    pub fn record_error(&mut self, direction: Direction, err: &TransportError) {
        let endpoint = self.endpoint_mut(direction);
        match err {
            TransportError::Stall(_) => endpoint.stalls += 1,
            _ => endpoint.failures += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_are_kept_per_endpoint() {
        let mut stats = TransportStats::default();
        stats.record_transfer(Direction::Out, 12);
        stats.record_transfer(Direction::Out, 0);
        stats.record_transfer(Direction::In, 512);
        stats.record_error(Direction::In, &TransportError::Stall(Direction::In));
        stats.record_error(Direction::Out, &TransportError::Timeout);

        let out = stats.endpoint(Direction::Out);
        assert_eq!(out.transfers, 2);
        assert_eq!(out.bytes, 12);
        assert_eq!(out.zero_length, 1);
        assert_eq!(out.failures, 1);
        assert_eq!(out.stalls, 0);

        let bulk_in = stats.endpoint(Direction::In);
        assert_eq!(bulk_in.transfers, 1);
        assert_eq!(bulk_in.bytes, 512);
        assert_eq!(bulk_in.zero_length, 0);
        assert_eq!(bulk_in.stalls, 1);
        assert_eq!(bulk_in.failures, 0);
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Timeout.to_string(), "Transfer timed out");
        assert_eq!(
            TransportError::Stall(Direction::In).to_string(),
            "Endpoint IN stalled"
        );
        assert_eq!(TransportError::Aborted.to_string(), "Transfer aborted");

        let err = TransportError::Other("claim failed".to_string());
        assert_eq!(err.to_string(), "Transport error: claim failed");
    }
}
