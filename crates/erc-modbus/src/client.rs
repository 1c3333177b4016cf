//! ---
//! erc_section: "02-modbus-protocol"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Modbus-RTU framing, transport and client."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
use std::io;

use tokio::task;
use tracing::trace;

use crate::error::{ModbusError, Result};
use crate::frame::{
    build_read_request, build_write_multiple, build_write_single, expected_response_len,
    parse_coils_response, parse_registers_response, parse_write_multiple_response,
    parse_write_single_response, FunctionCode,
};
use crate::line::SharedLine;

/// Generic slave-address + function-code transactor.
///
/// One instance per physical device. Every call performs exactly one
/// write-then-read exchange with the line's input buffer cleared first;
/// the blocking serial I/O runs on the tokio blocking pool so it never
/// stalls the caller's task peers.
#[derive(Clone)]
pub struct DeviceClient {
    slave: u8,
    line: SharedLine,
}

impl DeviceClient {
    pub fn new(slave: u8, line: SharedLine) -> Self {
        Self { slave, line }
    }

    pub fn slave(&self) -> u8 {
        self.slave
    }

    /// Read `count` coil bits starting at `address`.
    pub async fn read_coils(&self, address: u16, count: u16) -> Result<Vec<bool>> {
        let request = build_read_request(self.slave, FunctionCode::ReadCoils, address, count);
        let slave = self.slave;
        let response = self
            .transact(request, expected_response_len(FunctionCode::ReadCoils, count))
            .await?;
        parse_coils_response(slave, count, &response)
    }

    /// Read `count` holding registers starting at `address`.
    pub async fn read_registers(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        let request =
            build_read_request(self.slave, FunctionCode::ReadHoldingRegisters, address, count);
        let slave = self.slave;
        let response = self
            .transact(
                request,
                expected_response_len(FunctionCode::ReadHoldingRegisters, count),
            )
            .await?;
        parse_registers_response(slave, count, &response)
    }

    /// Write a single holding register; returns the echoed `(address, value)`.
    pub async fn write_register(&self, address: u16, value: u16) -> Result<(u16, u16)> {
        let request = build_write_single(self.slave, address, value);
        let slave = self.slave;
        let response = self
            .transact(
                request,
                expected_response_len(FunctionCode::WriteSingleRegister, 1),
            )
            .await?;
        parse_write_single_response(slave, &response)
    }

    /// Write multiple holding registers; returns the acknowledged `(address, count)`.
    pub async fn write_registers(&self, address: u16, values: Vec<u16>) -> Result<(u16, u16)> {
        let request = build_write_multiple(self.slave, address, &values);
        let slave = self.slave;
        let response = self
            .transact(
                request,
                expected_response_len(FunctionCode::WriteMultipleRegisters, values.len() as u16),
            )
            .await?;
        parse_write_multiple_response(slave, &response)
    }

    async fn transact(&self, request: Vec<u8>, expected_len: usize) -> Result<Vec<u8>> {
        let line = self.line.clone();
        let slave = self.slave;
        task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut line = line.lock();
            line.discard_input()?;
            line.send(&request)?;
            let response = line.recv(expected_len)?;
            trace!(slave, tx = request.len(), rx = response.len(), "modbus exchange");
            Ok(response)
        })
        .await
        .map_err(|err| {
            ModbusError::Connection(io::Error::new(io::ErrorKind::Other, err.to_string()))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::share;
    use crate::sim::SimulatedSlave;

    #[tokio::test]
    async fn write_then_read_register() {
        let line = share(SimulatedSlave::new(1));
        let client = DeviceClient::new(1, line);
        let echo = client.write_register(0x0010, 4242).await.expect("write");
        assert_eq!(echo, (0x0010, 4242));
        let values = client.read_registers(0x0010, 1).await.expect("read");
        assert_eq!(values, vec![4242]);
    }

    #[tokio::test]
    async fn write_multiple_then_read_back() {
        let line = share(SimulatedSlave::new(1));
        let client = DeviceClient::new(1, line);
        let ack = client
            .write_registers(1100, vec![1, 0, 0])
            .await
            .expect("write multiple");
        assert_eq!(ack, (1100, 3));
        let values = client.read_registers(1100, 3).await.expect("read");
        assert_eq!(values, vec![1, 0, 0]);
    }

    #[tokio::test]
    async fn wrong_slave_yields_frame_error() {
        let line = share(SimulatedSlave::new(2));
        let client = DeviceClient::new(1, line);
        let result = client.read_registers(0, 1).await;
        assert!(matches!(result, Err(ModbusError::Frame(_))));
    }

    #[tokio::test]
    async fn corrupted_reply_yields_frame_error() {
        let mut slave = SimulatedSlave::new(1);
        slave.corrupt_next_reply();
        let client = DeviceClient::new(1, share(slave));
        let result = client.read_registers(0, 1).await;
        assert!(matches!(result, Err(ModbusError::Frame(_))));
    }
}
