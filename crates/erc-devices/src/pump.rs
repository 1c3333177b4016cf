//! ---
//! erc_section: "03-device-drivers"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Device drivers, shared state arena and polling monitors."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Gear pump circulating electrolyte through the reactor bank. Rotate rate
//! tracks the active reactor count; run/stop is a three-register command
//! block rather than a single bit.

use erc_modbus::{DeviceClient, Result};

pub const ROTATE_RATE_SETPOINT_REGISTER: u16 = 0x04B2;
pub const ROTATE_RATE_MEASURED_REGISTER: u16 = 0x04BE;
pub const FLOW_MEASURED_REGISTER: u16 = 0x04C6;
pub const RUN_COMMAND_BASE: u16 = 1100;

/// Fixed-point scale of the flow register (centilitres per minute).
const FLOW_SCALE: f64 = 100.0;

#[derive(Clone)]
pub struct GearPump {
    client: DeviceClient,
}

impl GearPump {
    pub fn new(client: DeviceClient) -> Self {
        Self { client }
    }

    /// Command the rotate rate in rpm.
    pub async fn set_rotate_rate(&self, rpm: u16) -> Result<()> {
        self.client
            .write_register(ROTATE_RATE_SETPOINT_REGISTER, rpm)
            .await?;
        Ok(())
    }

    /// Measured rotate rate in rpm.
    pub async fn read_rotate_rate(&self) -> Result<u16> {
        let values = self
            .client
            .read_registers(ROTATE_RATE_MEASURED_REGISTER, 1)
            .await?;
        Ok(values[0])
    }

    /// Measured flow in litres per minute.
    pub async fn read_flow(&self) -> Result<f64> {
        let values = self.client.read_registers(FLOW_MEASURED_REGISTER, 1).await?;
        Ok(f64::from(values[0]) / FLOW_SCALE)
    }

    pub async fn start(&self) -> Result<()> {
        self.client
            .write_registers(RUN_COMMAND_BASE, vec![1, 0, 0])
            .await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.client
            .write_registers(RUN_COMMAND_BASE, vec![0, 0, 1])
            .await?;
        Ok(())
    }

    /// Whether the run bit of the command block is set.
    pub async fn read_running(&self) -> Result<bool> {
        let values = self.client.read_registers(RUN_COMMAND_BASE, 1).await?;
        Ok(values[0] == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erc_modbus::line::share;
    use erc_modbus::SimulatedSlave;

    #[tokio::test]
    async fn rotate_rate_set_then_measured() {
        let slave = SimulatedSlave::new(1);
        let handle = slave.handle();
        handle.add_mirror(ROTATE_RATE_SETPOINT_REGISTER, ROTATE_RATE_MEASURED_REGISTER);
        let pump = GearPump::new(DeviceClient::new(1, share(slave)));

        pump.set_rotate_rate(1340).await.expect("set rate");
        assert_eq!(pump.read_rotate_rate().await.expect("read rate"), 1340);
    }

    #[tokio::test]
    async fn run_stop_command_blocks() {
        let slave = SimulatedSlave::new(1);
        let handle = slave.handle();
        let pump = GearPump::new(DeviceClient::new(1, share(slave)));

        pump.start().await.expect("start");
        assert!(pump.read_running().await.expect("running"));
        pump.stop().await.expect("stop");
        assert!(!pump.read_running().await.expect("stopped"));

        let writes = handle.writes();
        assert_eq!(writes[0].values, vec![1, 0, 0]);
        assert_eq!(writes[1].values, vec![0, 0, 1]);
    }

    #[tokio::test]
    async fn flow_is_centilitres_on_the_wire() {
        let slave = SimulatedSlave::new(1);
        slave.handle().set_register(FLOW_MEASURED_REGISTER, 350);
        let pump = GearPump::new(DeviceClient::new(1, share(slave)));
        let flow = pump.read_flow().await.expect("read flow");
        assert!((flow - 3.5).abs() < f64::EPSILON);
    }
}
