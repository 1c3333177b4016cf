//! ---
//! erc_section: "02-modbus-protocol"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Modbus-RTU framing, transport and client."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::frame::crc16;
use crate::line::SerialLine;

/// Process-wide ordering for register writes across all simulated slaves,
/// so tests can assert cross-device command sequencing.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// One recorded register write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Monotonic sequence number shared by every simulated slave.
    pub seq: u64,
    pub address: u16,
    pub values: Vec<u16>,
}

#[derive(Debug, Default)]
struct SlaveState {
    registers: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    /// Writes to `.0` are copied into `.1` (commanded value appearing as
    /// the measured one, e.g. a servo settling instantly).
    mirrors: Vec<(u16, u16)>,
    /// `(mask register, first coil, coil count)`: a write to the mask
    /// register fans its bits out to the coil block.
    coil_mask: Option<(u16, u16, u16)>,
    writes: Vec<WriteRecord>,
    silent: bool,
    corrupt_next: bool,
}

impl SlaveState {
    fn apply_write(&mut self, address: u16, values: &[u16]) {
        self.writes.push(WriteRecord {
            seq: WRITE_SEQ.fetch_add(1, Ordering::SeqCst),
            address,
            values: values.to_vec(),
        });
        for (offset, value) in values.iter().enumerate() {
            let addr = address + offset as u16;
            self.registers.insert(addr, *value);
            for (src, dst) in self.mirrors.clone() {
                if src == addr {
                    self.registers.insert(dst, *value);
                }
            }
            if let Some((mask_reg, first_coil, count)) = self.coil_mask {
                if addr == mask_reg {
                    for bit in 0..count {
                        self.coils
                            .insert(first_coil + bit, value & (1 << bit) != 0);
                    }
                }
            }
        }
    }
}

/// In-memory Modbus-RTU slave that parses real request frames.
///
/// Used by replay mode in place of the physical devices and by the tests;
/// behavioural wiring (mirrors, coil fan-out) approximates a device that
/// settles instantly onto its commanded value.
pub struct SimulatedSlave {
    slave: u8,
    state: Arc<Mutex<SlaveState>>,
    reply: Vec<u8>,
}

/// Shared view of a [`SimulatedSlave`], usable after the slave itself has
/// been boxed into a serial line.
#[derive(Clone)]
pub struct SimulatedSlaveHandle {
    state: Arc<Mutex<SlaveState>>,
}

impl SimulatedSlave {
    pub fn new(slave: u8) -> Self {
        Self {
            slave,
            state: Arc::new(Mutex::new(SlaveState::default())),
            reply: Vec::new(),
        }
    }

    pub fn handle(&self) -> SimulatedSlaveHandle {
        SimulatedSlaveHandle {
            state: self.state.clone(),
        }
    }

    /// Corrupt the next reply by flipping one payload bit.
    pub fn corrupt_next_reply(&mut self) {
        self.state.lock().corrupt_next = true;
    }

    fn execute(&mut self, request: &[u8]) {
        let mut state = self.state.lock();
        if state.silent {
            return;
        }
        let function = request[1];
        let mut reply = match function {
            0x01 => {
                let start = u16::from_be_bytes([request[2], request[3]]);
                let count = u16::from_be_bytes([request[4], request[5]]);
                let byte_count = (usize::from(count) + 7) / 8;
                let mut bytes = vec![0u8; byte_count];
                for i in 0..count {
                    if state.coils.get(&(start + i)).copied().unwrap_or(false) {
                        bytes[usize::from(i) / 8] |= 1 << (i % 8);
                    }
                }
                let mut frame = vec![self.slave, 0x01, byte_count as u8];
                frame.extend_from_slice(&bytes);
                frame
            }
            0x03 => {
                let start = u16::from_be_bytes([request[2], request[3]]);
                let count = u16::from_be_bytes([request[4], request[5]]);
                let mut frame = vec![self.slave, 0x03, (count * 2) as u8];
                for i in 0..count {
                    let value = state.registers.get(&(start + i)).copied().unwrap_or(0);
                    frame.extend_from_slice(&value.to_be_bytes());
                }
                frame
            }
            0x06 => {
                let address = u16::from_be_bytes([request[2], request[3]]);
                let value = u16::from_be_bytes([request[4], request[5]]);
                state.apply_write(address, &[value]);
                // Echo of the request, minus the CRC we re-append below.
                request[..6].to_vec()
            }
            0x10 => {
                let address = u16::from_be_bytes([request[2], request[3]]);
                let count = u16::from_be_bytes([request[4], request[5]]);
                let mut values = Vec::with_capacity(usize::from(count));
                for i in 0..usize::from(count) {
                    values.push(u16::from_be_bytes([request[7 + i * 2], request[8 + i * 2]]));
                }
                state.apply_write(address, &values);
                let mut frame = vec![self.slave, 0x10];
                frame.extend_from_slice(&address.to_be_bytes());
                frame.extend_from_slice(&count.to_be_bytes());
                frame
            }
            other => vec![self.slave, other | 0x80, 0x01],
        };
        let crc = crc16(&reply);
        reply.extend_from_slice(&crc.to_le_bytes());
        if state.corrupt_next {
            state.corrupt_next = false;
            reply[2] ^= 0x01;
        }
        self.reply = reply;
    }
}

impl SerialLine for SimulatedSlave {
    fn discard_input(&mut self) -> io::Result<()> {
        self.reply.clear();
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        if frame.len() < 6 {
            return Ok(());
        }
        let (body, crc_bytes) = frame.split_at(frame.len() - 2);
        let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        // A garbled or misaddressed request gets no reply, like a real bus.
        if crc16(body) != received || body[0] != self.slave {
            return Ok(());
        }
        self.execute(body);
        Ok(())
    }

    fn recv(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let take = len.min(self.reply.len());
        Ok(self.reply.drain(..take).collect())
    }
}

impl SimulatedSlaveHandle {
    pub fn set_register(&self, address: u16, value: u16) {
        self.state.lock().registers.insert(address, value);
    }

    pub fn register(&self, address: u16) -> u16 {
        self.state.lock().registers.get(&address).copied().unwrap_or(0)
    }

    pub fn set_coil(&self, address: u16, on: bool) {
        self.state.lock().coils.insert(address, on);
    }

    pub fn coil(&self, address: u16) -> bool {
        self.state.lock().coils.get(&address).copied().unwrap_or(false)
    }

    /// Copy writes landing on `src` into `dst` as well.
    pub fn add_mirror(&self, src: u16, dst: u16) {
        self.state.lock().mirrors.push((src, dst));
    }

    /// Fan bits written to `mask_register` out to a block of coils.
    pub fn set_coil_mask(&self, mask_register: u16, first_coil: u16, count: u16) {
        self.state.lock().coil_mask = Some((mask_register, first_coil, count));
    }

    /// Stop answering requests entirely (dead device).
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }
}
