//! Device discovery and session setup.

use crate::config::Config;
use anyhow::Context;
use console::style;
use mtp_core::Session;
use mtp_transport::TransportConfig;
use mtp_transport::usb::{self, UsbTransport};

/// Print every attached MTP device
///
/// # Errors
/// Returns an error if USB enumeration fails
pub fn list() -> anyhow::Result<()> {
    let devices = usb::list_devices().context("listing USB devices")?;
    if devices.is_empty() {
        println!("No MTP devices found");
        return Ok(());
    }
    for device in devices {
        println!("  {} {}", style("•").cyan(), device);
    }
    Ok(())
}

/// Open the configured device and start a session on it
///
/// # Errors
/// Returns an error if no device matches or OpenSession fails
pub fn connect(config: &Config) -> anyhow::Result<Session> {
    let transport_config = TransportConfig {
        max_receive_size: config.transfer.chunk_size,
        ..TransportConfig::default()
    };
    let transport = UsbTransport::open(&config.selector(), transport_config)
        .context("opening MTP device")?;
    tracing::info!("Connected to {}", transport.device());

    let mut session = Session::new(Box::new(transport), config.session_config());
    session
        .open(config.device.session_id)
        .context("opening MTP session")?;
    Ok(session)
}
