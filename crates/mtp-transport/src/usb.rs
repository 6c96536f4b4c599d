//! USB bulk transport built on `nusb`.
//!
//! Locates the MTP interface of a device (still-image class, or a
//! vendor-specific interface advertised as "MTP"), claims it and drives its
//! bulk IN/OUT endpoints. Transfers are submitted asynchronously and polled at
//! `TransportConfig::poll_interval`, so a cancelled token or an expired
//! timeout cancels the pending transfer instead of leaving the caller parked.
//!
//! Cancellation of the device-side transaction uses the still-image class
//! "Cancel Request" on the control endpoint, which is safe to issue from any
//! thread.

use crate::TransportConfig;
use crate::cancel::CancelToken;
use crate::transport::{
    ControlChannel, Direction, Transport, TransportError, TransportResult, TransportStats,
};
use nusb::descriptors::TransferType;
use nusb::transfer::{Buffer, Bulk, ControlOut, ControlType, In, Out, Recipient, TransferError};
use nusb::{DeviceInfo, Endpoint, Interface, MaybeFuture};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const CLASS_STILL_IMAGE: u8 = 0x06;
const SUBCLASS_STILL_IMAGE_CAPTURE: u8 = 0x01;
const PROTOCOL_PIMA_15740: u8 = 0x01;
const CLASS_VENDOR_SPECIFIC: u8 = 0xFF;

/// Still-image class request: cancel the current transaction
const REQUEST_CANCEL: u8 = 0x64;
/// Cancellation code carried in the cancel request data stage
const CANCELLATION_CODE: u16 = 0x4001;

/// How long to wait for a cancelled transfer to be reaped
const CANCEL_GRACE: Duration = Duration::from_millis(100);

/// Summary of an MTP-capable USB device
#[derive(Debug, Clone)]
pub struct UsbDeviceSummary {
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
    /// Manufacturer string descriptor
    pub manufacturer: Option<String>,
    /// Product string descriptor
    pub product: Option<String>,
    /// Serial number string descriptor
    pub serial: Option<String>,
    /// Interface number of the MTP interface
    pub interface_number: u8,
}

impl UsbDeviceSummary {
    fn new(info: &DeviceInfo, interface_number: u8) -> Self {
        Self {
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            manufacturer: info.manufacturer_string().map(str::to_string),
            product: info.product_string().map(str::to_string),
            serial: info.serial_number().map(str::to_string),
            interface_number,
        }
    }
}

impl fmt::Display for UsbDeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {} {}",
            self.vendor_id,
            self.product_id,
            self.manufacturer.as_deref().unwrap_or("?"),
            self.product.as_deref().unwrap_or("?"),
        )?;
        if let Some(serial) = &self.serial {
            write!(f, " ({serial})")?;
        }
        Ok(())
    }
}

/// Which device to open when several are attached
#[derive(Debug, Clone, Default)]
pub struct DeviceSelector {
    /// Match only this vendor id
    pub vendor_id: Option<u16>,
    /// Match only this product id
    pub product_id: Option<u16>,
    /// Match only this serial number
    pub serial: Option<String>,
}

impl DeviceSelector {
    fn matches(&self, info: &DeviceInfo) -> bool {
        self.vendor_id.is_none_or(|vid| vid == info.vendor_id())
            && self.product_id.is_none_or(|pid| pid == info.product_id())
            && self
                .serial
                .as_deref()
                .is_none_or(|serial| info.serial_number() == Some(serial))
    }
}

fn mtp_interface(info: &DeviceInfo) -> Option<u8> {
    info.interfaces()
        .find(|iface| {
            let still_image = iface.class() == CLASS_STILL_IMAGE
                && iface.subclass() == SUBCLASS_STILL_IMAGE_CAPTURE
                && iface.protocol() == PROTOCOL_PIMA_15740;
            let vendor_mtp = iface.class() == CLASS_VENDOR_SPECIFIC
                && iface.interface_string().is_some_and(|name| name.contains("MTP"));
            still_image || vendor_mtp
        })
        .map(|iface| iface.interface_number())
}

fn usb_error(err: impl fmt::Display) -> TransportError {
    TransportError::Other(err.to_string())
}

fn map_transfer_error(err: TransferError, direction: Direction) -> TransportError {
    match err {
        TransferError::Stall => TransportError::Stall(direction),
        TransferError::Disconnected => TransportError::Disconnected,
        TransferError::Cancelled => TransportError::Aborted,
        other => TransportError::Other(other.to_string()),
    }
}

/// List attached devices exposing an MTP interface
///
/// # Errors
///
/// Returns `TransportError::Other` if USB enumeration fails
pub fn list_devices() -> TransportResult<Vec<UsbDeviceSummary>> {
    let devices = nusb::list_devices().wait().map_err(usb_error)?;
    Ok(devices
        .filter_map(|info| mtp_interface(&info).map(|n| UsbDeviceSummary::new(&info, n)))
        .collect())
}

/// Bulk transport over a claimed MTP interface
pub struct UsbTransport {
    summary: UsbDeviceSummary,
    bulk_in: Endpoint<Bulk, In>,
    bulk_out: Endpoint<Bulk, Out>,
    control: Arc<UsbControl>,
    max_packet_size: usize,
    config: TransportConfig,
    stats: TransportStats,
}

struct UsbControl {
    interface: Interface,
    interface_number: u8,
}

impl UsbTransport {
    /// Open the first attached MTP device matching `selector`
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Other` if no device matches or the interface
    /// cannot be claimed
    pub fn open(selector: &DeviceSelector, config: TransportConfig) -> TransportResult<Self> {
        let (info, interface_number) = nusb::list_devices()
            .wait()
            .map_err(usb_error)?
            .filter(|info| selector.matches(info))
            .find_map(|info| mtp_interface(&info).map(|n| (info, n)))
            .ok_or_else(|| TransportError::Other("no MTP device found".to_string()))?;

        let summary = UsbDeviceSummary::new(&info, interface_number);
        info!("Opening {} (interface {})", summary, interface_number);

        let device = info.open().wait().map_err(usb_error)?;
        let interface = device
            .detach_and_claim_interface(interface_number)
            .wait()
            .map_err(usb_error)?;

        let (in_address, out_address) = bulk_endpoints(&device, interface_number)?;
        let bulk_in = interface
            .endpoint::<Bulk, In>(in_address)
            .map_err(usb_error)?;
        let bulk_out = interface
            .endpoint::<Bulk, Out>(out_address)
            .map_err(usb_error)?;
        let max_packet_size = bulk_in.max_packet_size();
        debug!(
            "Bulk endpoints IN 0x{:02x} OUT 0x{:02x}, max packet size {}",
            in_address, out_address, max_packet_size
        );

        Ok(Self {
            summary,
            bulk_in,
            bulk_out,
            control: Arc::new(UsbControl {
                interface,
                interface_number,
            }),
            max_packet_size,
            config,
            stats: TransportStats::default(),
        })
    }

    /// Description of the opened device
    #[must_use]
    pub fn device(&self) -> &UsbDeviceSummary {
        &self.summary
    }

    fn reap_cancelled(&mut self, direction: Direction) {
        match direction {
            Direction::In => {
                self.bulk_in.cancel_all();
                while self.bulk_in.pending() > 0 {
                    if self.bulk_in.wait_next_complete(CANCEL_GRACE).is_none() {
                        warn!("Cancelled IN transfer was not reaped");
                        break;
                    }
                }
            }
            Direction::Out => {
                self.bulk_out.cancel_all();
                while self.bulk_out.pending() > 0 {
                    if self.bulk_out.wait_next_complete(CANCEL_GRACE).is_none() {
                        warn!("Cancelled OUT transfer was not reaped");
                        break;
                    }
                }
            }
        }
    }

    fn give_up(
        &mut self,
        direction: Direction,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Option<TransportError> {
        let err = if cancel.is_cancelled() {
            TransportError::Aborted
        } else if Instant::now() >= deadline {
            TransportError::Timeout
        } else {
            return None;
        };
        self.reap_cancelled(direction);
        Some(err)
    }
}

fn bulk_endpoints(device: &nusb::Device, interface_number: u8) -> TransportResult<(u8, u8)> {
    let config = device.active_configuration().map_err(usb_error)?;
    let alt = config
        .interface_alt_settings()
        .find(|alt| alt.interface_number() == interface_number && alt.alternate_setting() == 0)
        .ok_or_else(|| TransportError::Other("MTP interface descriptor missing".to_string()))?;

    let mut bulk_in = None;
    let mut bulk_out = None;
    for endpoint in alt.endpoints() {
        if !matches!(endpoint.transfer_type(), TransferType::Bulk) {
            continue;
        }
        match endpoint.direction() {
            nusb::transfer::Direction::In => {
                bulk_in.get_or_insert(endpoint.address());
            }
            nusb::transfer::Direction::Out => {
                bulk_out.get_or_insert(endpoint.address());
            }
        }
    }

    match (bulk_in, bulk_out) {
        (Some(i), Some(o)) => Ok((i, o)),
        _ => Err(TransportError::Other(
            "MTP interface lacks bulk endpoints".to_string(),
        )),
    }
}

impl Transport for UsbTransport {
    fn send(
        &mut self,
        buf: &[u8],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> TransportResult<()> {
        if cancel.is_cancelled() {
            return Err(TransportError::Aborted);
        }
        self.bulk_out.submit(Buffer::from(buf.to_vec()));

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(completion) = self.bulk_out.wait_next_complete(self.config.poll_interval) {
                return match completion.status {
                    Ok(()) => {
                        self.stats.record_transfer(Direction::Out, buf.len());
                        Ok(())
                    }
                    Err(err) => {
                        let err = map_transfer_error(err, Direction::Out);
                        self.stats.record_error(Direction::Out, &err);
                        Err(err)
                    }
                };
            }
            if let Some(err) = self.give_up(Direction::Out, deadline, cancel) {
                self.stats.record_error(Direction::Out, &err);
                return Err(err);
            }
        }
    }

    fn receive(
        &mut self,
        max_len: usize,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> TransportResult<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(TransportError::Aborted);
        }
        let len = max_len
            .min(self.config.max_receive_size)
            .next_multiple_of(self.max_packet_size.max(1));
        let buffer = self.bulk_in.allocate(len);
        self.bulk_in.submit(buffer);

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(completion) = self.bulk_in.wait_next_complete(self.config.poll_interval) {
                return match completion.status {
                    Ok(()) => {
                        let mut data = completion.buffer.into_vec();
                        data.truncate(completion.actual_len);
                        self.stats.record_transfer(Direction::In, data.len());
                        Ok(data)
                    }
                    Err(err) => {
                        let err = map_transfer_error(err, Direction::In);
                        self.stats.record_error(Direction::In, &err);
                        Err(err)
                    }
                };
            }
            if let Some(err) = self.give_up(Direction::In, deadline, cancel) {
                self.stats.record_error(Direction::In, &err);
                return Err(err);
            }
        }
    }

    fn clear_halt(&mut self, direction: Direction) -> TransportResult<()> {
        debug!("Clearing halt on bulk {}", direction);
        match direction {
            Direction::In => self.bulk_in.clear_halt().wait().map_err(usb_error),
            Direction::Out => self.bulk_out.clear_halt().wait().map_err(usb_error),
        }
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn control(&self) -> Arc<dyn ControlChannel> {
        let control: Arc<UsbControl> = Arc::clone(&self.control);
        control
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

impl ControlChannel for UsbControl {
    fn request_abort(&self, transaction_id: u32, timeout: Duration) -> TransportResult<()> {
        let mut data = [0u8; 6];
        data[..2].copy_from_slice(&CANCELLATION_CODE.to_le_bytes());
        data[2..].copy_from_slice(&transaction_id.to_le_bytes());

        debug!("Sending cancel request for transaction {}", transaction_id);
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: REQUEST_CANCEL,
                    value: 0,
                    index: u16::from(self.interface_number),
                    data: &data,
                },
                timeout,
            )
            .wait()
            .map_err(|err| map_transfer_error(err, Direction::Out))
    }
}
