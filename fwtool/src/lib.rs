//! # fwtool
//!
//! Host-side firmware upgrade tool for a multi-MCU target carrying FPGA,
//! DSP1, DSP2 and ARM co-processors on a shared bus.
//!
//! The wire protocol and the upgrade state machine live in the
//! `boot-protocol` crate; this crate supplies everything around them:
//!
//! - [`config`] - TOML configuration file and CLI override handling
//! - [`transport`] - serial and TCP transport adapters
//! - [`runner`] - the event loop wiring transport, framer and session
//!
//! ## Example
//!
//! ```text
//! fwtool upgrade --port /dev/ttyUSB0 --baud 115200 --fpga top.rbf
//! fwtool upgrade --tcp 192.168.1.42:5000 --arm app.bin --dsp1 dsp1.bin
//! fwtool upgrade --config fwtool.toml -v
//! ```

/// TOML configuration file and CLI override handling.
pub mod config;

/// The event loop wiring transport, framer and session together.
pub mod runner;

/// Serial and TCP transport adapters.
pub mod transport;

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;
