//! Reader roster configuration
//!
//! The roster is the JSON document listing every reader the host drives and
//! the local addresses the host binds for each transport family:
//!
//! ```json
//! {
//!   "serverConfig": { "ipAddress": "192.168.1.10", "cn56port": 2000, "ct9port": 4001 },
//!   "readersConfig": [
//!     {
//!       "type": "CT9",
//!       "ip": "192.168.1.50",
//!       "port": 4000,
//!       "autoConnectReader": true,
//!       "wiegandMode": {
//!         "cardBlockNumber": 5,
//!         "onAccessSuccessful": { "buzzer": true, "led": true },
//!         "onAccessDeny": { "buzzer": true, "led": false }
//!       }
//!     }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::DeviceModel;

/// Default UDP port of the CN56 family, on both ends
pub const DEFAULT_UDP_PORT: u16 = 2000;

/// Highest Mifare block a reader can be told to auto-read
pub const MAX_CARD_BLOCK: u8 = 63;

/// Highest Mifare 1K sector number
pub const MAX_KEY_SECTOR: u8 = 15;

fn default_udp_port() -> u16 {
    DEFAULT_UDP_PORT
}

/// Complete reader roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    #[serde(rename = "serverConfig")]
    pub server: ServerConfig,

    #[serde(rename = "readersConfig", default)]
    pub readers: Vec<ReaderConfig>,
}

/// Host-side bind addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Local address the host binds for both families
    #[serde(rename = "ipAddress")]
    pub ip_address: IpAddr,

    /// Local UDP port shared by all CN56 readers
    #[serde(rename = "cn56port", default = "default_udp_port")]
    pub cn56_port: u16,

    /// Local TCP port used when dialing CT9 readers (0 picks an ephemeral port)
    #[serde(rename = "ct9port", default)]
    pub ct9_port: u16,
}

/// Settings for one physical reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(rename = "type")]
    pub model: DeviceModel,

    pub ip: IpAddr,

    #[serde(default = "default_udp_port")]
    pub port: u16,

    #[serde(rename = "wiegandMode", default)]
    pub wiegand: WiegandConfig,

    /// Connect as soon as the roster is loaded
    #[serde(rename = "autoConnectReader", default)]
    pub auto_connect: bool,

    /// Retry with backoff after the reader drops the connection
    #[serde(rename = "autoReconnect", default)]
    pub auto_reconnect: bool,
}

/// Wiegand-mode parameters and access feedback profiles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WiegandConfig {
    /// Block read on the card (0 - 63)
    pub card_block_number: u8,

    /// Keypad format byte; the model default is kept when unset
    pub key_format: Option<u8>,

    /// Read the data spread over several blocks (CT9)
    pub multiple_block_mode: bool,

    /// Mifare key loaded before wiegand mode is enabled (CT9)
    pub key: KeyConfig,

    pub on_access_successful: AccessProfile,

    pub on_access_deny: AccessProfile,
}

/// Which access profile applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessOutcome {
    Granted,
    Denied,
}

/// LED and buzzer feedback for one access outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessProfile {
    pub buzzer: bool,
    pub led: bool,
    pub sound_pattern: SoundPattern,
}

/// Buzzer pattern: two on/off pulses repeated `cycle` times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundPattern {
    pub mode: u8,
    pub on1: u8,
    pub off1: u8,
    pub on2: u8,
    pub off2: u8,
    pub cycle: u8,
}

impl Default for SoundPattern {
    fn default() -> Self {
        Self {
            mode: 0x04,
            on1: 0x01,
            off1: 0x01,
            on2: 0x01,
            off2: 0x01,
            cycle: 0x01,
        }
    }
}

/// Mifare key slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    A,
    B,
}

impl KeyType {
    /// Key selector byte of the load-key payload
    pub fn code(self) -> u8 {
        match self {
            Self::A => 0x60,
            Self::B => 0x61,
        }
    }
}

/// Key loaded into the reader before multi-sector reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyConfig {
    pub key_type: KeyType,

    /// Sector the key is stored for; derived from the card block when unset
    pub sector: Option<u8>,

    pub value: [u8; 6],
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            key_type: KeyType::A,
            sector: None,
            value: [0xFF; 6],
        }
    }
}

impl KeyConfig {
    /// Sector holding `block` unless one was configured explicitly
    pub fn sector_for(&self, block: u8) -> u8 {
        self.sector.unwrap_or(block / 4)
    }
}

impl Default for WiegandConfig {
    fn default() -> Self {
        Self {
            card_block_number: 0,
            key_format: None,
            multiple_block_mode: false,
            key: KeyConfig::default(),
            on_access_successful: AccessProfile::default(),
            on_access_deny: AccessProfile::default(),
        }
    }
}

impl WiegandConfig {
    pub fn profile(&self, outcome: AccessOutcome) -> &AccessProfile {
        match outcome {
            AccessOutcome::Granted => &self.on_access_successful,
            AccessOutcome::Denied => &self.on_access_deny,
        }
    }

    /// The reader beeps on card presentation if either profile uses the buzzer
    pub fn buzzer_enabled(&self) -> bool {
        self.on_access_successful.buzzer || self.on_access_deny.buzzer
    }

    pub fn led_enabled(&self) -> bool {
        self.on_access_successful.led || self.on_access_deny.led
    }

    pub fn validate(&self) -> Result<()> {
        if self.card_block_number > MAX_CARD_BLOCK {
            return Err(Error::Validation(format!(
                "cardBlockNumber {} out of range (0 - {})",
                self.card_block_number, MAX_CARD_BLOCK
            )));
        }

        let sector = self.key.sector_for(self.card_block_number);
        if sector > MAX_KEY_SECTOR {
            return Err(Error::Validation(format!(
                "key sector {} out of range (0 - {})",
                sector, MAX_KEY_SECTOR
            )));
        }

        Ok(())
    }
}

impl ReaderConfig {
    /// Reader with default wiegand settings and manual connection
    pub fn new(model: DeviceModel, ip: IpAddr, port: u16) -> Self {
        Self {
            model,
            ip,
            port,
            wiegand: WiegandConfig::default(),
            auto_connect: false,
            auto_reconnect: false,
        }
    }

    pub fn with_wiegand(mut self, wiegand: WiegandConfig) -> Self {
        self.wiegand = wiegand;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::Validation(format!("reader {}: port must not be 0", self.ip)));
        }

        self.wiegand
            .validate()
            .map_err(|e| Error::Validation(format!("reader {}: {}", self.ip, e)))
    }
}

impl Roster {
    /// Parse and validate a roster document
    pub fn from_json(json: &str) -> Result<Self> {
        let roster: Roster = serde_json::from_str(json)?;
        roster.validate()?;
        Ok(roster)
    }

    /// Read, parse and validate a roster file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for reader in &self.readers {
            reader.validate()?;

            if !seen.insert(reader.ip) {
                return Err(Error::Validation(format!("reader {} listed twice", reader.ip)));
            }
        }

        Ok(())
    }

    /// Local address of the shared CN56 socket
    pub fn udp_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.ip_address, self.server.cn56_port)
    }

    /// Local address CT9 connections originate from
    pub fn tcp_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.ip_address, self.server.ct9_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ROSTER: &str = r#"{
        "serverConfig": { "ipAddress": "192.168.1.10", "cn56port": 2000, "ct9port": 4001 },
        "readersConfig": [
            {
                "type": "CN56",
                "ip": "192.168.1.40",
                "port": 2000,
                "wiegandMode": { "cardBlockNumber": 1 }
            },
            {
                "type": "CT9",
                "ip": "192.168.1.50",
                "port": 4000,
                "autoConnectReader": true,
                "wiegandMode": {
                    "cardBlockNumber": 5,
                    "multipleBlockMode": true,
                    "onAccessSuccessful": {
                        "buzzer": true,
                        "led": true,
                        "soundPattern": { "mode": 4, "on1": 3, "off1": 1, "on2": 3, "off2": 1, "cycle": 2 }
                    },
                    "onAccessDeny": { "buzzer": true, "led": false }
                }
            }
        ]
    }"#;

    #[test]
    fn test_roster_parse() {
        let roster = Roster::from_json(ROSTER).unwrap();

        assert_eq!(roster.readers.len(), 2);
        assert_eq!(roster.udp_bind_addr(), "192.168.1.10:2000".parse().unwrap());
        assert_eq!(roster.tcp_bind_addr(), "192.168.1.10:4001".parse().unwrap());

        let ct9 = &roster.readers[1];
        assert_eq!(ct9.model, DeviceModel::Ct9);
        assert!(ct9.auto_connect);
        assert!(!ct9.auto_reconnect);
        assert_eq!(ct9.wiegand.card_block_number, 5);
        assert!(ct9.wiegand.multiple_block_mode);
        assert_eq!(
            ct9.wiegand.on_access_successful.sound_pattern,
            SoundPattern { mode: 4, on1: 3, off1: 1, on2: 3, off2: 1, cycle: 2 }
        );
        assert_eq!(ct9.wiegand.on_access_deny.sound_pattern, SoundPattern::default());
    }

    #[test]
    fn test_roster_defaults() {
        let roster = Roster::from_json(ROSTER).unwrap();
        let cn56 = &roster.readers[0];

        assert!(!cn56.auto_connect);
        assert_eq!(cn56.wiegand.key, KeyConfig::default());
        assert_eq!(cn56.wiegand.key_format, None);
        assert!(!cn56.wiegand.buzzer_enabled());
        assert!(!cn56.wiegand.led_enabled());
    }

    #[test]
    fn test_block_number_out_of_range() {
        let json = ROSTER.replace("\"cardBlockNumber\": 5", "\"cardBlockNumber\": 64");
        let err = Roster::from_json(&json).unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_duplicate_reader() {
        let json = ROSTER.replace("192.168.1.50", "192.168.1.40");
        assert!(matches!(Roster::from_json(&json), Err(Error::Validation(_))));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(Roster::from_json("{"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_key_sector_derivation() {
        let key = KeyConfig::default();
        assert_eq!(key.sector_for(5), 1);
        assert_eq!(key.sector_for(63), 15);

        let explicit = KeyConfig { sector: Some(2), ..KeyConfig::default() };
        assert_eq!(explicit.sector_for(63), 2);
    }

    #[test]
    fn test_profile_selection() {
        let mut wiegand = WiegandConfig::default();
        wiegand.on_access_deny.led = true;

        assert!(!wiegand.profile(AccessOutcome::Granted).led);
        assert!(wiegand.profile(AccessOutcome::Denied).led);
        assert!(wiegand.led_enabled());
    }
}
