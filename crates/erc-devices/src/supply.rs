//! ---
//! erc_section: "03-device-drivers"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Device drivers, shared state arena and polling monitors."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Programmable DC supply feeding the reactor bus. Registers carry
//! centivolts / centiamps; the driver exposes volts and amps.

use erc_modbus::{DeviceClient, Result};

pub const VOLTAGE_SETPOINT_REGISTER: u16 = 0x0000;
pub const MEASURED_VOLTAGE_REGISTER: u16 = 0x0001;
pub const MEASURED_CURRENT_REGISTER: u16 = 0x0002;
pub const OUTPUT_ENABLE_REGISTER: u16 = 0x0003;

/// Fixed-point scale of the voltage and current registers.
const CENTI: f64 = 100.0;

#[derive(Clone)]
pub struct PowerSupply {
    client: DeviceClient,
}

impl PowerSupply {
    pub fn new(client: DeviceClient) -> Self {
        Self { client }
    }

    /// Command the output voltage, in whole volts.
    pub async fn set_voltage(&self, volts: u16) -> Result<()> {
        self.client
            .write_register(VOLTAGE_SETPOINT_REGISTER, volts.saturating_mul(100))
            .await?;
        Ok(())
    }

    /// Measured output voltage in volts.
    pub async fn read_voltage(&self) -> Result<f64> {
        let values = self
            .client
            .read_registers(MEASURED_VOLTAGE_REGISTER, 1)
            .await?;
        Ok(f64::from(values[0]) / CENTI)
    }

    /// Measured output current in amps.
    pub async fn read_current(&self) -> Result<f64> {
        let values = self
            .client
            .read_registers(MEASURED_CURRENT_REGISTER, 1)
            .await?;
        Ok(f64::from(values[0]) / CENTI)
    }

    pub async fn set_output(&self, on: bool) -> Result<()> {
        self.client
            .write_register(OUTPUT_ENABLE_REGISTER, u16::from(on))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erc_modbus::line::share;
    use erc_modbus::SimulatedSlave;

    #[tokio::test]
    async fn voltage_scaling_round_trip() {
        let slave = SimulatedSlave::new(1);
        let handle = slave.handle();
        // Setpoint writes appear on the measured register, settled.
        handle.add_mirror(VOLTAGE_SETPOINT_REGISTER, MEASURED_VOLTAGE_REGISTER);
        let supply = PowerSupply::new(DeviceClient::new(1, share(slave)));

        supply.set_voltage(60).await.expect("set voltage");
        assert_eq!(handle.register(VOLTAGE_SETPOINT_REGISTER), 6000);
        let measured = supply.read_voltage().await.expect("read voltage");
        assert!((measured - 60.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn current_is_centiamps_on_the_wire() {
        let slave = SimulatedSlave::new(1);
        let handle = slave.handle();
        handle.set_register(MEASURED_CURRENT_REGISTER, 1250);
        let supply = PowerSupply::new(DeviceClient::new(1, share(slave)));
        let amps = supply.read_current().await.expect("read current");
        assert!((amps - 12.5).abs() < f64::EPSILON);
    }
}
