//! # civintec
//!
//! Async driver for Civintec proximity-card readers (CN56 over UDP, CT9 over
//! TCP).
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use civintec::{Dispatcher, Roster};
//!
//! #[tokio::main]
//! async fn main() -> civintec::Result<()> {
//!     let roster = Roster::load("readers.json")?;
//!     let dispatcher = Arc::new(Dispatcher::from_roster(&roster).await?);
//!     let mut feed = dispatcher.subscribe();
//!
//!     // Replies reach the sessions through the running dispatcher
//!     dispatcher.spawn();
//!     dispatcher.connect_auto().await;
//!     let reader = dispatcher.session("192.168.1.50".parse().unwrap()).unwrap();
//!
//!     reader.open().await?;
//!     while let Ok(event) = feed.recv().await {
//!         println!("{}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod session;

#[cfg(test)]
mod testing;

// Re-exports
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use event::ReaderEvent;
pub use session::{ReaderSession, ReconnectPolicy, SessionOptions, SessionState, SessionTimings};

// Re-export types
pub use civintec_core::{DoorAction, Frame, FrameVariant, LedColor};
pub use civintec_types::{DeviceInfo, DeviceModel, ReaderConfig, Roster, WiegandConfig};
