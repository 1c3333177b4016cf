//! ---
//! erc_section: "02-modbus-protocol"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Modbus-RTU framing, transport and client."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
pub type Result<T> = std::result::Result<T, ModbusError>;

/// Error taxonomy for one Modbus transaction.
///
/// A [`ModbusError::Frame`] is a transport glitch (truncated or corrupted
/// response), not the device's fault; a [`ModbusError::DeviceException`]
/// is the device explicitly rejecting the request. Neither is retried at
/// this layer; retry policy belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ModbusError {
    /// Truncated or CRC-mismatched response.
    #[error("frame error: {0}")]
    Frame(&'static str),
    /// The device reported an exception (function code with the high bit set).
    #[error("device exception 0x{code:02X} from slave {slave}")]
    DeviceException {
        /// Slave address that raised the exception.
        slave: u8,
        /// One-byte Modbus exception code.
        code: u8,
    },
    /// The serial line cannot be opened or has been lost.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
}
