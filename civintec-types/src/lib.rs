//! Type definitions for the Civintec reader driver
//!
//! Reader roster configuration and the small value types shared by the
//! protocol and session crates.

pub mod config;
pub mod device_info;
pub mod error;
pub mod model;

pub use config::{
    AccessOutcome, AccessProfile, KeyConfig, KeyType, ReaderConfig, Roster, ServerConfig,
    SoundPattern, WiegandConfig,
};
pub use device_info::DeviceInfo;
pub use error::{Error, Result};
pub use model::{DeviceFamily, DeviceModel};
