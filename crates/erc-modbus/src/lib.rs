//! ---
//! erc_section: "02-modbus-protocol"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Modbus-RTU framing, transport and client."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Modbus-RTU protocol support shared by every ERC device driver.
//!
//! The rig talks to all of its field devices (relay bank, valve servos,
//! gear pump, programmable supply, sensors) over half-duplex serial lines
//! using the same four function codes. This crate provides the frame
//! codec, the serial-line abstraction, a generic request/response client
//! and an in-memory simulated slave used by replay mode and the tests.

pub mod client;
pub mod error;
pub mod frame;
pub mod line;
pub mod sim;

pub use client::DeviceClient;
pub use error::{ModbusError, Result};
pub use frame::FunctionCode;
pub use line::{open_serial_line, SerialLine, SharedLine};
pub use sim::SimulatedSlave;
