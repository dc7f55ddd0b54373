//! Supported reader models

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reader model, as named in the roster's `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceModel {
    /// CN56 family, spoken to over a shared UDP socket
    #[serde(rename = "CN56")]
    Cn56,

    /// CT9 family, one host-initiated TCP connection per reader
    #[serde(rename = "CT9")]
    Ct9,
}

/// Transport family a model belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    Udp,
    Tcp,
}

impl DeviceModel {
    pub fn family(self) -> DeviceFamily {
        match self {
            Self::Cn56 => DeviceFamily::Udp,
            Self::Ct9 => DeviceFamily::Tcp,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Cn56 => "CN56",
            Self::Ct9 => "CT9",
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
