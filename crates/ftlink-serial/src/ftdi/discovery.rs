//! Device discovery.

use crate::ftdi::driver::FtDriver;
use crate::ftdi::types::DeviceDescriptor;
use log::{debug, warn};

/// List attached devices matching a vendor/product pair.
///
/// Each match is opened just long enough to read its EEPROM identity.  An
/// enumeration failure yields an empty list; a device that cannot be opened
/// or read ends the listing with whatever was gathered before it.
pub async fn available_ports(driver: &dyn FtDriver, vendor_id: u16, product_id: u16) -> Vec<DeviceDescriptor> {
    let nodes = match driver.enumerate().await {
        Ok(nodes) => nodes,
        Err(s) => {
            warn!("Device enumeration failed: {}", s);
            return Vec::new();
        }
    };

    let mut ports = Vec::new();
    for node in nodes.iter().filter(|n| n.matches(vendor_id, product_id)) {
        let handle = match driver.open(node.index).await {
            Ok(handle) => handle,
            Err(s) => {
                warn!("Could not open device {} for discovery: {}", node.index, s);
                break;
            }
        };

        let identity = driver.read_identity(handle).await;
        if let Err(s) = driver.close(handle).await {
            debug!("Closing device {} after discovery: {}", node.index, s);
        }

        match identity {
            Ok(eeprom) => ports.push(DeviceDescriptor {
                manufacturer: eeprom.manufacturer,
                description: eeprom.description,
                serial_number: eeprom.serial_number,
                vendor_id: eeprom.vendor_id,
                product_id: eeprom.product_id,
            }),
            Err(s) => {
                warn!("Could not read identity of device {}: {}", node.index, s);
                break;
            }
        }
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftdi::driver::{DriverStatus, EepromIdentity};
    use crate::ftdi::simulated::{HwOp, SimulatedDriver};
    use crate::ftdi::types::{FTDI_NAME, FTDI_PID, FTDI_VID};

    fn eeprom(serial: &str) -> EepromIdentity {
        EepromIdentity {
            manufacturer: "FTDI".to_string(),
            description: "FT232R USB UART".to_string(),
            serial_number: serial.to_string(),
            vendor_id: FTDI_VID,
            product_id: FTDI_PID,
        }
    }

    #[tokio::test]
    async fn test_lists_only_matching_devices() {
        let d = SimulatedDriver::new();
        d.attach(FTDI_VID, FTDI_PID, 5, eeprom("A1"));
        d.attach(FTDI_VID, 0x6015, 8, eeprom("X"));
        d.attach(FTDI_VID, FTDI_PID, 5, eeprom("B2"));

        let ports = available_ports(d.as_ref(), FTDI_VID, FTDI_PID).await;
        let serials: Vec<_> = ports.iter().map(|p| p.serial_number.as_str()).collect();
        assert_eq!(serials, ["A1", "B2"]);
        assert_eq!(ports[0].port_name(), FTDI_NAME);
        assert_eq!(d.open_handle_count(), 0);
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_empty() {
        let d = SimulatedDriver::with_ft232r();
        d.fail(HwOp::Enumerate, DriverStatus::IoError);
        assert!(available_ports(d.as_ref(), FTDI_VID, FTDI_PID).await.is_empty());
    }

    #[tokio::test]
    async fn test_identity_failure_stops_listing_and_closes() {
        let d = SimulatedDriver::new();
        d.attach(FTDI_VID, FTDI_PID, 5, eeprom("A1"));
        d.fail(HwOp::ReadIdentity, DriverStatus::EepromReadFailed);
        assert!(available_ports(d.as_ref(), FTDI_VID, FTDI_PID).await.is_empty());
        assert_eq!(d.open_handle_count(), 0);
    }

    #[tokio::test]
    async fn test_device_busy_ends_listing() {
        let d = SimulatedDriver::new();
        d.attach(FTDI_VID, FTDI_PID, 5, eeprom("A1"));
        d.attach(FTDI_VID, FTDI_PID, 5, eeprom("B2"));
        // Device 0 is held by another session.
        let held = d.open(0).await.unwrap();

        assert!(available_ports(d.as_ref(), FTDI_VID, FTDI_PID).await.is_empty());
        assert_eq!(d.open_handle_count(), 1);
        d.close(held).await.unwrap();
    }
}
