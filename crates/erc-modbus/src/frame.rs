//! ---
//! erc_section: "02-modbus-protocol"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Modbus-RTU framing, transport and client."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
use crate::error::{ModbusError, Result};

/// The four function codes the rig's devices use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadHoldingRegisters = 0x03,
    WriteSingleRegister = 0x06,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// CRC16/Modbus: seed 0xFFFF, right shift, XOR 0xA001 on a set low bit.
/// Transmitted little-endian after the payload.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn push_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Build a read request (read coils or read holding registers).
pub fn build_read_request(slave: u8, function: FunctionCode, start: u16, count: u16) -> Vec<u8> {
    debug_assert!(matches!(
        function,
        FunctionCode::ReadCoils | FunctionCode::ReadHoldingRegisters
    ));
    let mut frame = Vec::with_capacity(8);
    frame.push(slave);
    frame.push(function.as_u8());
    frame.extend_from_slice(&start.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    push_crc(&mut frame);
    frame
}

/// Build a write-single-register request.
pub fn build_write_single(slave: u8, address: u16, value: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(slave);
    frame.push(FunctionCode::WriteSingleRegister.as_u8());
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&value.to_be_bytes());
    push_crc(&mut frame);
    frame
}

/// Build a write-multiple-registers request.
pub fn build_write_multiple(slave: u8, address: u16, values: &[u16]) -> Vec<u8> {
    let count = values.len() as u16;
    let mut frame = Vec::with_capacity(9 + values.len() * 2);
    frame.push(slave);
    frame.push(FunctionCode::WriteMultipleRegisters.as_u8());
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    frame.push((values.len() * 2) as u8);
    for value in values {
        frame.extend_from_slice(&value.to_be_bytes());
    }
    push_crc(&mut frame);
    frame
}

/// Expected response length in bytes for a request.
pub fn expected_response_len(function: FunctionCode, count: u16) -> usize {
    match function {
        FunctionCode::ReadCoils => 5 + (usize::from(count) + 7) / 8,
        FunctionCode::ReadHoldingRegisters => 5 + usize::from(count) * 2,
        FunctionCode::WriteSingleRegister | FunctionCode::WriteMultipleRegisters => 8,
    }
}

/// Validate the response envelope (length, CRC, addressing, exception bit)
/// and return the bytes between the function code and the CRC.
fn check_envelope<'a>(slave: u8, function: FunctionCode, response: &'a [u8]) -> Result<&'a [u8]> {
    if response.len() < 5 {
        return Err(ModbusError::Frame("truncated response"));
    }
    let (body, crc_bytes) = response.split_at(response.len() - 2);
    let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    if crc16(body) != received {
        return Err(ModbusError::Frame("crc mismatch"));
    }
    if body[0] != slave {
        return Err(ModbusError::Frame("slave address mismatch"));
    }
    if body[1] == function.as_u8() | 0x80 {
        return Err(ModbusError::DeviceException {
            slave,
            code: body[2],
        });
    }
    if body[1] != function.as_u8() {
        return Err(ModbusError::Frame("function code mismatch"));
    }
    Ok(&body[2..])
}

/// Parse a read-coils response into `count` bits.
pub fn parse_coils_response(slave: u8, count: u16, response: &[u8]) -> Result<Vec<bool>> {
    let payload = check_envelope(slave, FunctionCode::ReadCoils, response)?;
    let byte_count = usize::from(payload[0]);
    if payload.len() != 1 + byte_count || byte_count < (usize::from(count) + 7) / 8 {
        return Err(ModbusError::Frame("coil payload length mismatch"));
    }
    let mut bits = Vec::with_capacity(usize::from(count));
    for i in 0..usize::from(count) {
        let byte = payload[1 + i / 8];
        bits.push(byte & (1 << (i % 8)) != 0);
    }
    Ok(bits)
}

/// Parse a read-holding-registers response into `count` 16-bit values.
pub fn parse_registers_response(slave: u8, count: u16, response: &[u8]) -> Result<Vec<u16>> {
    let payload = check_envelope(slave, FunctionCode::ReadHoldingRegisters, response)?;
    let byte_count = usize::from(payload[0]);
    if payload.len() != 1 + byte_count || byte_count != usize::from(count) * 2 {
        return Err(ModbusError::Frame("register payload length mismatch"));
    }
    let mut values = Vec::with_capacity(usize::from(count));
    for i in 0..usize::from(count) {
        values.push(u16::from_be_bytes([payload[1 + i * 2], payload[2 + i * 2]]));
    }
    Ok(values)
}

/// Parse a write-single-register echo into `(address, value)`.
pub fn parse_write_single_response(slave: u8, response: &[u8]) -> Result<(u16, u16)> {
    let payload = check_envelope(slave, FunctionCode::WriteSingleRegister, response)?;
    if payload.len() != 4 {
        return Err(ModbusError::Frame("write echo length mismatch"));
    }
    Ok((
        u16::from_be_bytes([payload[0], payload[1]]),
        u16::from_be_bytes([payload[2], payload[3]]),
    ))
}

/// Parse a write-multiple-registers acknowledgement into `(address, count)`.
pub fn parse_write_multiple_response(slave: u8, response: &[u8]) -> Result<(u16, u16)> {
    let payload = check_envelope(slave, FunctionCode::WriteMultipleRegisters, response)?;
    if payload.len() != 4 {
        return Err(ModbusError::Frame("write ack length mismatch"));
    }
    Ok((
        u16::from_be_bytes([payload[0], payload[1]]),
        u16::from_be_bytes([payload[2], payload[3]]),
    ))
}
