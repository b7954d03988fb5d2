use log::{debug, info};
use serialport::{SerialPort, SerialPortType};
use std::io::{self, Read, Write};
use std::time::Duration;

use super::address::Address;
use crate::error::SmuError;

/// Byte-level link to an instrument
///
/// `read_chunk` returns an `io::ErrorKind::TimedOut` error when nothing
/// arrived within one poll interval; callers treat that as "no data yet".
pub trait Transport: Send {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Human readable description for log messages
    fn describe(&self) -> String;
}

/// RS-232 / USB-CDC link using the `serialport` crate
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialTransport {
    /// Open a serial port at 8N1 without flow control
    pub fn open(
        address: &Address,
        baud_rate: u32,
        poll_interval: Duration,
    ) -> Result<Self, SmuError> {
        let name = match address {
            Address::Serial(port) => port.clone(),
            Address::Usb { .. } => resolve_usb_port(address)?,
            Address::Sim(_) => {
                return Err(SmuError::ConnectionFailed(format!(
                    "{address} is not a serial resource"
                )));
            }
        };

        let port = serialport::new(&name, baud_rate)
            .timeout(poll_interval)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                SmuError::ConnectionFailed(format!("open {name} at {baud_rate} baud: {e}"))
            })?;

        info!("Serial port '{name}' opened at {baud_rate} baud");
        Ok(Self { port, name })
    }
}

impl Transport for SerialTransport {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Find the serial port enumerated for a USB vendor/product (and serial number)
fn resolve_usb_port(address: &Address) -> Result<String, SmuError> {
    let Address::Usb {
        vendor_id,
        product_id,
        serial_number,
    } = address
    else {
        return Err(SmuError::ConnectionFailed(format!("{address} is not a USB resource")));
    };

    let ports = serialport::available_ports()
        .map_err(|e| SmuError::ConnectionFailed(format!("enumerating serial ports: {e}")))?;

    ports
        .into_iter()
        .find(|info| match &info.port_type {
            SerialPortType::UsbPort(usb) => {
                usb.vid == *vendor_id
                    && usb.pid == *product_id
                    && serial_number
                        .as_ref()
                        .is_none_or(|wanted| usb.serial_number.as_deref() == Some(wanted.as_str()))
            }
            _ => false,
        })
        .map(|info| {
            debug!("Resolved {address} to {}", info.port_name);
            info.port_name
        })
        .ok_or_else(|| SmuError::ConnectionFailed(format!("No serial port found for {address}")))
}
