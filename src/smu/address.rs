use std::fmt;

use crate::error::SmuError;

/// Instrument resource identifiers the connection manager can open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// Serial device path, e.g. `/dev/ttyUSB0` or `COM3`
    Serial(String),
    /// USB resource, resolved to a serial port by vendor/product id
    Usb {
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<String>,
    },
    /// In-process simulated instrument
    Sim(String),
}

impl Address {
    /// Classify a resource string
    ///
    /// Accepted forms:
    /// - `sim://<name>`
    /// - `ASRL<path or port number>[::INSTR]`
    /// - a device path containing `ttyS`, `ttyUSB` or `ttyACM`, or `COM<n>`
    /// - `USB<board>::<vid>::<pid>[::<serial>]...` (VISA style, ids in decimal or 0x-hex)
    pub fn parse(raw: &str) -> Result<Address, SmuError> {
        let address = raw.trim().trim_end_matches('\0');

        if let Some(name) = address.strip_prefix("sim://") {
            return Ok(Address::Sim(name.to_string()));
        }

        if let Some(rest) = address.strip_prefix("ASRL") {
            let port = rest.trim_end_matches("::INSTR");
            if port.is_empty() {
                return Err(SmuError::ConnectionFailed(format!(
                    "Missing port in address: {raw}"
                )));
            }
            let port = if port.chars().all(|c| c.is_ascii_digit()) {
                format!("COM{port}")
            } else {
                port.to_string()
            };
            return Ok(Address::Serial(port));
        }

        if address.starts_with("USB") && address.contains("::") {
            return Self::parse_usb(address, raw);
        }

        if is_serial_path(address) {
            return Ok(Address::Serial(address.to_string()));
        }

        Err(SmuError::ConnectionFailed(format!(
            "Unsupported address: {raw}"
        )))
    }

    fn parse_usb(address: &str, raw: &str) -> Result<Address, SmuError> {
        let mut parts = address.split("::").skip(1);
        let invalid = || SmuError::ConnectionFailed(format!("Malformed USB resource: {raw}"));

        let vendor_id = parts.next().and_then(parse_id).ok_or_else(invalid)?;
        let product_id = parts.next().and_then(parse_id).ok_or_else(invalid)?;
        let serial_number = parts
            .next()
            .map(|s| s.trim_end_matches('\0').to_string())
            .filter(|s| !s.is_empty() && s != "INSTR");

        Ok(Address::Usb {
            vendor_id,
            product_id,
            serial_number,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Serial(port) => write!(f, "{port}"),
            Address::Usb {
                vendor_id,
                product_id,
                serial_number,
            } => {
                write!(f, "USB {vendor_id:04x}:{product_id:04x}")?;
                if let Some(serial) = serial_number {
                    write!(f, " ({serial})")?;
                }
                Ok(())
            }
            Address::Sim(name) => write!(f, "sim://{name}"),
        }
    }
}

fn is_serial_path(address: &str) -> bool {
    let is_com_port = address
        .strip_prefix("COM")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));

    is_com_port || ["ttyS", "ttyUSB", "ttyACM"].iter().any(|class| address.contains(class))
}

fn parse_id(field: &str) -> Option<u16> {
    match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serial_forms() {
        assert_eq!(
            Address::parse("ASRL/dev/ttyUSB0::INSTR").unwrap(),
            Address::Serial("/dev/ttyUSB0".into())
        );
        assert_eq!(
            Address::parse("ASRL3::INSTR").unwrap(),
            Address::Serial("COM3".into())
        );
        assert_eq!(
            Address::parse("/dev/ttyS1").unwrap(),
            Address::Serial("/dev/ttyS1".into())
        );
        assert_eq!(Address::parse("COM7").unwrap(), Address::Serial("COM7".into()));
    }

    #[test]
    fn test_parse_usb_resource_with_trailing_nul() {
        let address = Address::parse("USB0::1510::9782::4399155\0::0::INSTR").unwrap();
        assert_eq!(
            address,
            Address::Usb {
                vendor_id: 0x05e6,
                product_id: 0x2636,
                serial_number: Some("4399155".into()),
            }
        );
    }

    #[test]
    fn test_parse_sim() {
        assert_eq!(Address::parse("sim://0").unwrap(), Address::Sim("0".into()));
    }

    #[test]
    fn test_unsupported_addresses() {
        for raw in ["TCPIP0::192.168.0.2::INSTR", "GPIB0::26::INSTR", "", "COM", "USB0::x::y"] {
            assert!(
                matches!(Address::parse(raw), Err(SmuError::ConnectionFailed(_))),
                "{raw} should be rejected"
            );
        }
    }
}
