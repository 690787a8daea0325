//! # boot-protocol
//!
//! A Rust library implementing the framed bootloader protocol used to upgrade
//! a multi-MCU target (FPGA, DSP1, DSP2 and ARM co-processors on a shared bus)
//! from a host machine.
//!
//! This crate contains the transport-independent core:
//!
//! - Frame construction and parsing for every message type, including a
//!   rolling receive buffer that tolerates leading garbage and fragmented
//!   arrivals
//! - CRC16-MODBUS integrity checking for frames and firmware files
//! - Firmware image ingestion and fixed-size chunking
//! - The upgrade session state machine with per-packet acknowledgement,
//!   a 10 second watchdog and a bounded resend policy
//!
//! The host drives each enabled device in the fixed order FPGA → DSP1 →
//! DSP2 → ARM through a command/data/end handshake, bracketed by an upgrade
//! request, a system reset and a final total-end exchange.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use boot_protocol::firmware::{FirmwareImage, FirmwareSet};
//! use boot_protocol::message::DeviceKind;
//! use boot_protocol::session::{FrameSink, Observer, UpgradeSession};
//!
//! struct Console;
//!
//! impl Observer for Console {
//!     fn info(&mut self, message: &str) {
//!         println!("{message}");
//!     }
//!     fn progress(&mut self, device_percent: u32, total_percent: u32) {
//!         println!("device {device_percent}% / total {total_percent}%");
//!     }
//!     fn finished(&mut self, success: bool, message: &str) {
//!         println!("finished (success={success}): {message}");
//!     }
//! }
//!
//! struct Port; // wraps a serial port or TCP stream
//!
//! impl FrameSink for Port {
//!     fn send(&mut self, frame: &[u8], _description: &str) -> std::io::Result<()> {
//!         // write the frame to the link and flush eagerly
//!         let _ = frame;
//!         Ok(())
//!     }
//! }
//!
//! let data = std::fs::read("top.rbf").unwrap();
//! let image = FirmwareImage::from_bytes(DeviceKind::Fpga, data, 1024).unwrap();
//! let set = FirmwareSet::from_images(vec![image]).unwrap();
//!
//! let mut session = UpgradeSession::new(1, set, Port, Console);
//! session.start();
//! // feed inbound frames with `session.handle_frame(..)` and fire
//! // `session.handle_timeout()` when `session.deadline()` elapses
//! ```
//!
//! ## Modules
//!
//! - [`crc`] - CRC16-MODBUS checksum implementation
//! - [`message`] - message type and response flag catalog
//! - [`frame`] - frame construction, extraction and decoding
//! - [`firmware`] - firmware image loading and chunking
//! - [`session`] - the upgrade session state machine

#[macro_use]
extern crate log;

/// CRC16-MODBUS checksum implementation.
pub mod crc;

/// Firmware image loading and chunking.
pub mod firmware;

/// Frame construction, extraction and decoding.
pub mod frame;

/// Message type and response flag catalog.
pub mod message;

/// The upgrade session state machine.
pub mod session;

pub use crc::crc16;
pub use firmware::{FirmwareError, FirmwareImage, FirmwareSet};
pub use frame::{Frame, FrameError, Framer, parse_frame};
pub use message::{DeviceKind, MessageType, ResponseFlag, UpgradeFlags};
pub use session::{FrameSink, Observer, UpgradeSession, UpgradeState};
