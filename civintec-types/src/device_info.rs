//! Reader identification

use std::fmt;
use std::net::IpAddr;

use crate::model::DeviceModel;

/// Identification returned by the firmware and MAC queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Reader address from the roster
    pub address: IpAddr,

    /// Reader model
    pub model: DeviceModel,

    /// Firmware version string
    pub firmware_version: String,

    /// MAC address as reported by the reader
    pub mac_address: String,
}

impl DeviceInfo {
    pub fn new(
        address: IpAddr,
        model: DeviceModel,
        firmware_version: String,
        mac_address: String,
    ) -> Self {
        Self {
            address,
            model,
            firmware_version,
            mac_address,
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}, FW: {}, MAC: {}]",
            self.model, self.address, self.firmware_version, self.mac_address
        )
    }
}
