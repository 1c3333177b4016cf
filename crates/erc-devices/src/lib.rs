//! ---
//! erc_section: "03-device-drivers"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Device drivers, shared state arena and polling monitors."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Device layer of the rig: thin register-map wrappers over the generic
//! Modbus client (one per physical device), the lock-guarded device-state
//! arena shared with the sequencer and the panel, and the independent
//! polling monitors that keep the arena fresh.
//!
//! Register addresses and scaling factors are fixed per device model and
//! live here as constants; nothing is discovered at runtime.

pub mod leak;
pub mod monitor;
pub mod pressure;
pub mod pump;
pub mod relay;
pub mod state;
pub mod supply;
pub mod valve;

pub use leak::LeakSensor;
pub use monitor::{spawn_monitor, FAILURE_ESCALATION_THRESHOLD};
pub use pressure::PressureSensor;
pub use pump::GearPump;
pub use relay::RelayBank;
pub use state::{
    DeviceArena, DeviceEvent, DeviceId, DeviceRecord, LeakReading, PressureReading, PumpReading,
    RelayReading, ServoReading, StateCell, SupplyReading,
};
pub use supply::PowerSupply;
pub use valve::ValveServo;
