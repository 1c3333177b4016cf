//! ---
//! erc_section: "06-core-orchestration"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Plant sequencing and rig orchestration."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Device assembly: opens one serial line per device (live mode) or wires
//! up in-memory simulated slaves (replay mode), and spawns the per-device
//! polling monitors over the shared state arena.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use erc_common::config::DevicesConfig;
use erc_devices::state::SERVO_COUNT;
use erc_devices::{
    pump, relay, spawn_monitor, supply, valve, DeviceArena, DeviceEvent, DeviceId, GearPump,
    LeakReading, LeakSensor, PowerSupply, PressureReading, PressureSensor, PumpReading, RelayBank,
    RelayReading, ServoReading, SupplyReading, ValveServo,
};
use erc_modbus::line::share;
use erc_modbus::sim::SimulatedSlaveHandle;
use erc_modbus::{open_serial_line, DeviceClient, SimulatedSlave};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Per-transaction serial timeout; a device that has not answered within
/// this window will not answer at all.
const SERIAL_TIMEOUT: Duration = Duration::from_millis(200);

/// Every driver on the rig plus the shared state arena.
pub struct RigDevices {
    pub relay: RelayBank,
    pub supply: PowerSupply,
    pub pump: GearPump,
    pub pressure: PressureSensor,
    pub leak: LeakSensor,
    /// Ten inlet valves, servo id 1..=10.
    pub valves: Vec<ValveServo>,
    pub arena: Arc<DeviceArena>,
}

/// Handles into the simulated slaves of a replay-mode rig, used to seed
/// sensor values and audit command traffic.
pub struct SimRig {
    pub relay: SimulatedSlaveHandle,
    pub supply: SimulatedSlaveHandle,
    pub pump: SimulatedSlaveHandle,
    pub pressure: SimulatedSlaveHandle,
    pub leak: SimulatedSlaveHandle,
    pub servos: Vec<SimulatedSlaveHandle>,
}

impl RigDevices {
    /// Open the configured serial lines and build every driver. Each line
    /// is owned by exactly one client/monitor pair.
    pub fn connect(config: &DevicesConfig) -> Result<Self> {
        let relay_line = open_serial_line(&config.relay.port, config.relay.baud, SERIAL_TIMEOUT)
            .with_context(|| format!("opening relay line {}", config.relay.port))?;
        let supply_line = open_serial_line(&config.supply.port, config.supply.baud, SERIAL_TIMEOUT)
            .with_context(|| format!("opening supply line {}", config.supply.port))?;
        let pump_line = open_serial_line(&config.pump.port, config.pump.baud, SERIAL_TIMEOUT)
            .with_context(|| format!("opening pump line {}", config.pump.port))?;
        let pressure_line =
            open_serial_line(&config.pressure.port, config.pressure.baud, SERIAL_TIMEOUT)
                .with_context(|| format!("opening pressure line {}", config.pressure.port))?;
        let leak_line = open_serial_line(&config.leak.port, config.leak.baud, SERIAL_TIMEOUT)
            .with_context(|| format!("opening leak line {}", config.leak.port))?;
        let servo_line =
            open_serial_line(&config.servo_bus.port, config.servo_bus.baud, SERIAL_TIMEOUT)
                .with_context(|| format!("opening servo bus {}", config.servo_bus.port))?;

        let valves = (1..=SERVO_COUNT as u8)
            .map(|id| ValveServo::new(id, servo_line.clone()))
            .collect();

        Ok(Self {
            relay: RelayBank::new(DeviceClient::new(config.relay.slave, relay_line)),
            supply: PowerSupply::new(DeviceClient::new(config.supply.slave, supply_line)),
            pump: GearPump::new(DeviceClient::new(config.pump.slave, pump_line)),
            pressure: PressureSensor::new(DeviceClient::new(config.pressure.slave, pressure_line)),
            leak: LeakSensor::new(DeviceClient::new(config.leak.slave, leak_line)),
            valves,
            arena: DeviceArena::new(),
        })
    }

    /// Build a rig over in-memory slaves that settle instantly onto their
    /// commanded values: setpoints mirror to measured registers, the relay
    /// mask fans out to its coils.
    pub fn simulated() -> (Self, SimRig) {
        let relay_slave = SimulatedSlave::new(1);
        let relay_handle = relay_slave.handle();
        relay_handle.set_coil_mask(
            relay::COMMAND_MASK_REGISTER,
            relay::CHANNEL_COIL_BASE,
            relay::CHANNEL_COUNT,
        );

        let supply_slave = SimulatedSlave::new(1);
        let supply_handle = supply_slave.handle();
        supply_handle.add_mirror(
            supply::VOLTAGE_SETPOINT_REGISTER,
            supply::MEASURED_VOLTAGE_REGISTER,
        );

        let pump_slave = SimulatedSlave::new(1);
        let pump_handle = pump_slave.handle();
        pump_handle.add_mirror(
            pump::ROTATE_RATE_SETPOINT_REGISTER,
            pump::ROTATE_RATE_MEASURED_REGISTER,
        );

        let pressure_slave = SimulatedSlave::new(1);
        let pressure_handle = pressure_slave.handle();
        let leak_slave = SimulatedSlave::new(1);
        let leak_handle = leak_slave.handle();

        let mut valves = Vec::with_capacity(SERVO_COUNT);
        let mut servo_handles = Vec::with_capacity(SERVO_COUNT);
        for id in 1..=SERVO_COUNT as u8 {
            let servo_slave = SimulatedSlave::new(id);
            let handle = servo_slave.handle();
            handle.add_mirror(valve::GOAL_POSITION_REGISTER, valve::PRESENT_POSITION_REGISTER);
            servo_handles.push(handle);
            valves.push(ValveServo::new(id, share(servo_slave)));
        }

        let devices = Self {
            relay: RelayBank::new(DeviceClient::new(1, share(relay_slave))),
            supply: PowerSupply::new(DeviceClient::new(1, share(supply_slave))),
            pump: GearPump::new(DeviceClient::new(1, share(pump_slave))),
            pressure: PressureSensor::new(DeviceClient::new(1, share(pressure_slave))),
            leak: LeakSensor::new(DeviceClient::new(1, share(leak_slave))),
            valves,
            arena: DeviceArena::new(),
        };
        let sim = SimRig {
            relay: relay_handle,
            supply: supply_handle,
            pump: pump_handle,
            pressure: pressure_handle,
            leak: leak_handle,
            servos: servo_handles,
        };
        (devices, sim)
    }

    /// Spawn one polling monitor per device at its configured cadence.
    pub fn spawn_monitors(
        &self,
        config: &DevicesConfig,
        events: broadcast::Sender<DeviceEvent>,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        let relay = self.relay.clone();
        tasks.push(spawn_monitor(
            DeviceId::Relay,
            config.relay.poll_interval,
            self.arena.relay.clone(),
            events.clone(),
            shutdown.subscribe(),
            move || {
                let relay = relay.clone();
                async move {
                    let channels = relay.read_channels().await?;
                    Ok(RelayReading { channels })
                }
            },
        ));

        let supply = self.supply.clone();
        tasks.push(spawn_monitor(
            DeviceId::Supply,
            config.supply.poll_interval,
            self.arena.supply.clone(),
            events.clone(),
            shutdown.subscribe(),
            move || {
                let supply = supply.clone();
                async move {
                    let voltage_v = supply.read_voltage().await?;
                    let current_a = supply.read_current().await?;
                    Ok(SupplyReading { voltage_v, current_a })
                }
            },
        ));

        let pump = self.pump.clone();
        tasks.push(spawn_monitor(
            DeviceId::Pump,
            config.pump.poll_interval,
            self.arena.pump.clone(),
            events.clone(),
            shutdown.subscribe(),
            move || {
                let pump = pump.clone();
                async move {
                    let rotate_rate_rpm = pump.read_rotate_rate().await?;
                    let flow_lpm = pump.read_flow().await?;
                    let running = pump.read_running().await?;
                    Ok(PumpReading {
                        rotate_rate_rpm,
                        flow_lpm,
                        running,
                    })
                }
            },
        ));

        let pressure = self.pressure.clone();
        tasks.push(spawn_monitor(
            DeviceId::Pressure,
            config.pressure.poll_interval,
            self.arena.pressure.clone(),
            events.clone(),
            shutdown.subscribe(),
            move || {
                let pressure = pressure.clone();
                async move {
                    let bar = pressure.read_bar().await?;
                    Ok(PressureReading { bar })
                }
            },
        ));

        let leak = self.leak.clone();
        tasks.push(spawn_monitor(
            DeviceId::Leak,
            config.leak.poll_interval,
            self.arena.leak.clone(),
            events.clone(),
            shutdown.subscribe(),
            move || {
                let leak = leak.clone();
                async move {
                    let leaking = leak.read_leaking().await?;
                    Ok(LeakReading { leaking })
                }
            },
        ));

        for valve in &self.valves {
            let id = valve.servo_id();
            let valve = valve.clone();
            tasks.push(spawn_monitor(
                DeviceId::Servo(id),
                config.servo_bus.poll_interval,
                self.arena.servo(id).clone(),
                events.clone(),
                shutdown.subscribe(),
                move || {
                    let valve = valve.clone();
                    async move {
                        let position = valve.read_position().await?;
                        let load = valve.read_load().await?;
                        let torque_enabled = valve.read_torque().await?;
                        Ok(ServoReading {
                            position,
                            load,
                            torque_enabled,
                        })
                    }
                },
            ));
        }

        tasks
    }
}
