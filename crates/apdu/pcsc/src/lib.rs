//! PC/SC transport implementation for APDU operations
//!
//! This crate provides an implementation of the `CardTransport` trait from
//! `satochip-apdu-core` using the PC/SC API for communication with smart cards.
//!
//! # Examples
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::time::Duration;
//!
//! use satochip_apdu_core::{CardExecutor, Command};
//! use satochip_apdu_transport_pcsc::PcscDeviceManager;
//!
//! let manager = PcscDeviceManager::new()?;
//!
//! // Wait up to five seconds for a card to show up
//! let readers = manager.discover(Duration::from_secs(5))?;
//! let Some(reader) = readers.iter().find(|r| r.has_card()) else {
//!     println!("No card found");
//!     return Ok(());
//! };
//!
//! let transport = manager.open_reader(reader.name())?;
//! let mut executor = CardExecutor::new(transport);
//!
//! let select = Command::new_with_data(0x00, 0xA4, 0x04, 0x00, &b"SatoChip"[..]);
//! let response = executor.execute(&select)?;
//! println!("Select status: {:?}", response.status_tuple());
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

mod config;
mod error;
mod manager;
mod reader;
mod transport;

pub use config::{ConnectStrategy, PcscConfig, ShareMode};
pub use error::PcscError;
pub use manager::PcscDeviceManager;
pub use reader::{PcscReader, SlotState};
pub use transport::PcscTransport;

// Re-export some pcsc types for convenience
pub use pcsc::{Protocol, Protocols};
