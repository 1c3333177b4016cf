//! ---
//! erc_section: "02-modbus-protocol"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Modbus-RTU framing, transport and client."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serialport::{DataBits, Parity, StopBits};

/// Exclusive handle to one half-duplex serial line.
///
/// The read-after-write transaction pattern requires exclusive possession
/// of the line for the duration of one exchange, so every implementation
/// is driven behind a mutex (see [`SharedLine`]).
pub trait SerialLine: Send {
    /// Drop any stale bytes left over from a previous exchange.
    fn discard_input(&mut self) -> io::Result<()>;
    /// Transmit one request frame.
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;
    /// Receive up to `len` bytes, returning fewer on timeout.
    fn recv(&mut self, len: usize) -> io::Result<Vec<u8>>;
}

/// A serial line shared between a device client and its monitor.
pub type SharedLine = Arc<Mutex<Box<dyn SerialLine>>>;

/// Wrap a line implementation for shared use.
pub fn share(line: impl SerialLine + 'static) -> SharedLine {
    Arc::new(Mutex::new(Box::new(line)))
}

/// Physical serial line (8 data bits, no parity, 1 stop bit).
pub struct SerialPortLine {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialPortLine {
    pub fn open(path: &str, baud: u32, timeout: Duration) -> io::Result<Self> {
        let port = serialport::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(timeout)
            .open()
            .map_err(io::Error::from)?;
        Ok(Self { port })
    }
}

impl SerialLine for SerialPortLine {
    fn discard_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()
    }

    fn recv(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.port.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => break,
                Err(err) => return Err(err),
            }
        }
        buffer.truncate(filled);
        Ok(buffer)
    }
}

/// Open a physical line and wrap it for shared use.
pub fn open_serial_line(path: &str, baud: u32, timeout: Duration) -> io::Result<SharedLine> {
    Ok(share(SerialPortLine::open(path, baud, timeout)?))
}
