//! ---
//! erc_section: "03-device-drivers"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Device drivers, shared state arena and polling monitors."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Shared device state: one independently lock-guarded record per device,
//! written only by that device's monitor, read (copy-on-read) by the
//! sequencer and the panel. A failed poll leaves the previous reading in
//! place; staleness shows through `last_updated` and `last_error`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::relay::CHANNEL_COUNT;

/// Valve servos on the shared bus, addressed 1..=SERVO_COUNT.
pub const SERVO_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceId {
    Relay,
    Supply,
    Pump,
    Pressure,
    Leak,
    Servo(u8),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Relay => write!(f, "relay"),
            DeviceId::Supply => write!(f, "supply"),
            DeviceId::Pump => write!(f, "pump"),
            DeviceId::Pressure => write!(f, "pressure"),
            DeviceId::Leak => write!(f, "leak"),
            DeviceId::Servo(id) => write!(f, "servo-{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RelayReading {
    pub channels: [bool; CHANNEL_COUNT as usize],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SupplyReading {
    pub voltage_v: f64,
    pub current_a: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PumpReading {
    pub rotate_rate_rpm: u16,
    pub flow_lpm: f64,
    pub running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PressureReading {
    pub bar: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LeakReading {
    pub leaking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ServoReading {
    pub position: u16,
    pub load: u16,
    pub torque_enabled: bool,
}

/// Last-known state of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord<T> {
    pub reading: Option<T>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl<T> Default for DeviceRecord<T> {
    fn default() -> Self {
        Self {
            reading: None,
            last_updated: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

/// Lock-guarded holder of one device's record. Monitors write, everyone
/// else snapshots.
#[derive(Debug, Default)]
pub struct StateCell<T> {
    inner: RwLock<DeviceRecord<T>>,
}

impl<T: Clone> StateCell<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(DeviceRecord::default()),
        }
    }

    /// Replace the reading atomically and clear the failure streak.
    pub fn record_success(&self, reading: T) {
        let mut record = self.inner.write();
        record.reading = Some(reading);
        record.last_updated = Some(Utc::now());
        record.last_error = None;
        record.consecutive_failures = 0;
    }

    /// Note a failed poll, keeping the previous reading. Returns the new
    /// consecutive-failure count.
    pub fn record_failure(&self, error: String) -> u32 {
        let mut record = self.inner.write();
        record.last_error = Some(error);
        record.consecutive_failures += 1;
        record.consecutive_failures
    }

    pub fn snapshot(&self) -> DeviceRecord<T> {
        self.inner.read().clone()
    }

    pub fn reading(&self) -> Option<T> {
        self.inner.read().reading.clone()
    }
}

/// The full device-state table, one cell per device.
#[derive(Debug)]
pub struct DeviceArena {
    pub relay: Arc<StateCell<RelayReading>>,
    pub supply: Arc<StateCell<SupplyReading>>,
    pub pump: Arc<StateCell<PumpReading>>,
    pub pressure: Arc<StateCell<PressureReading>>,
    pub leak: Arc<StateCell<LeakReading>>,
    pub servos: [Arc<StateCell<ServoReading>>; SERVO_COUNT],
}

impl DeviceArena {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            relay: Arc::new(StateCell::new()),
            supply: Arc::new(StateCell::new()),
            pump: Arc::new(StateCell::new()),
            pressure: Arc::new(StateCell::new()),
            leak: Arc::new(StateCell::new()),
            servos: std::array::from_fn(|_| Arc::new(StateCell::new())),
        })
    }

    /// Cell for servo `servo_id` (1-based bus address).
    pub fn servo(&self, servo_id: u8) -> &Arc<StateCell<ServoReading>> {
        &self.servos[usize::from(servo_id) - 1]
    }
}

/// Notification published by monitors for sequencer and panel consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device's record was refreshed with a new reading.
    Updated { device: DeviceId },
    /// The device has failed several polls in a row.
    ConnectionHealth {
        device: DeviceId,
        consecutive_failures: u32,
    },
}
