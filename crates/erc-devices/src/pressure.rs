//! ---
//! erc_section: "03-device-drivers"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Device drivers, shared state arena and polling monitors."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Reactor-inlet pressure transmitter. One output register, millibar
//! fixed-point.

use erc_modbus::{DeviceClient, Result};

const OUTPUT_REGISTER: u16 = 0x0004;

/// Register value is pressure in bar times this scale.
const PRESSURE_SCALE: f64 = 1000.0;

#[derive(Clone)]
pub struct PressureSensor {
    client: DeviceClient,
}

impl PressureSensor {
    pub fn new(client: DeviceClient) -> Self {
        Self { client }
    }

    /// Measured inlet pressure in bar.
    pub async fn read_bar(&self) -> Result<f64> {
        let values = self.client.read_registers(OUTPUT_REGISTER, 1).await?;
        Ok(f64::from(values[0]) / PRESSURE_SCALE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erc_modbus::line::share;
    use erc_modbus::SimulatedSlave;

    #[tokio::test]
    async fn raw_reading_scales_to_bar() {
        let slave = SimulatedSlave::new(1);
        slave.handle().set_register(OUTPUT_REGISTER, 1520);
        let sensor = PressureSensor::new(DeviceClient::new(1, share(slave)));
        let bar = sensor.read_bar().await.expect("read");
        assert!((bar - 1.52).abs() < f64::EPSILON);
    }
}
