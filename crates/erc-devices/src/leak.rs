//! ---
//! erc_section: "03-device-drivers"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Device drivers, shared state arena and polling monitors."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Electrolyte leak detector under the reactor tray: a single status coil,
//! polled fast because a wet tray cannot wait a full second.

use erc_modbus::{DeviceClient, Result};

const STATUS_COIL: u16 = 0;

#[derive(Clone)]
pub struct LeakSensor {
    client: DeviceClient,
}

impl LeakSensor {
    pub fn new(client: DeviceClient) -> Self {
        Self { client }
    }

    /// True when liquid is detected.
    pub async fn read_leaking(&self) -> Result<bool> {
        let bits = self.client.read_coils(STATUS_COIL, 1).await?;
        Ok(bits[0])
    }
}
