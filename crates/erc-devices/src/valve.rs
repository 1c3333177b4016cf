//! ---
//! erc_section: "03-device-drivers"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Device drivers, shared state arena and polling monitors."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Servo-actuated reactor inlet valves. All ten servos share one RS-485
//! bus, addressed by servo id 1..=10; each is its own Modbus slave behind
//! the common line. Positions are 12-bit; a continuous actuator settles
//! asymptotically, so open/closed are confirmed against thresholds rather
//! than exact positions.

use erc_modbus::{DeviceClient, Result, SharedLine};

pub const TORQUE_ENABLE_REGISTER: u16 = 64;
pub const GOAL_POSITION_REGISTER: u16 = 116;
pub const PRESENT_LOAD_REGISTER: u16 = 126;
pub const PRESENT_POSITION_REGISTER: u16 = 132;

/// Commanded fully-open / fully-closed positions (12-bit range).
pub const OPEN_POSITION: u16 = 4095;
pub const CLOSED_POSITION: u16 = 0;

/// Confirmation thresholds for a settling actuator.
pub const OPEN_THRESHOLD: u16 = 3900;
pub const CLOSED_THRESHOLD: u16 = 200;

pub fn position_is_open(position: u16) -> bool {
    position > OPEN_THRESHOLD
}

pub fn position_is_closed(position: u16) -> bool {
    position < CLOSED_THRESHOLD
}

#[derive(Clone)]
pub struct ValveServo {
    servo_id: u8,
    client: DeviceClient,
}

impl ValveServo {
    /// One servo on the shared bus line; `servo_id` is its slave address.
    pub fn new(servo_id: u8, line: SharedLine) -> Self {
        Self {
            servo_id,
            client: DeviceClient::new(servo_id, line),
        }
    }

    pub fn servo_id(&self) -> u8 {
        self.servo_id
    }

    pub async fn command_open(&self) -> Result<()> {
        self.client
            .write_register(GOAL_POSITION_REGISTER, OPEN_POSITION)
            .await?;
        Ok(())
    }

    pub async fn command_close(&self) -> Result<()> {
        self.client
            .write_register(GOAL_POSITION_REGISTER, CLOSED_POSITION)
            .await?;
        Ok(())
    }

    pub async fn set_torque(&self, enabled: bool) -> Result<()> {
        self.client
            .write_register(TORQUE_ENABLE_REGISTER, u16::from(enabled))
            .await?;
        Ok(())
    }

    pub async fn read_position(&self) -> Result<u16> {
        let values = self
            .client
            .read_registers(PRESENT_POSITION_REGISTER, 1)
            .await?;
        Ok(values[0])
    }

    pub async fn read_load(&self) -> Result<u16> {
        let values = self.client.read_registers(PRESENT_LOAD_REGISTER, 1).await?;
        Ok(values[0])
    }

    pub async fn read_torque(&self) -> Result<bool> {
        let values = self
            .client
            .read_registers(TORQUE_ENABLE_REGISTER, 1)
            .await?;
        Ok(values[0] != 0)
    }
}
