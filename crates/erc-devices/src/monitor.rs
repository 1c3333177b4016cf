//! ---
//! erc_section: "03-device-drivers"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Device drivers, shared state arena and polling monitors."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Per-device polling loops. Each monitor runs on its own task at its own
//! cadence; a failed poll is logged and the next tick is the retry. A
//! streak of failed polls escalates to a connection-health event.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use erc_modbus::ModbusError;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::state::{DeviceEvent, DeviceId, StateCell};

/// Consecutive failed polls before a [`DeviceEvent::ConnectionHealth`]
/// event is published.
pub const FAILURE_ESCALATION_THRESHOLD: u32 = 3;

/// Spawn the polling loop for one device.
///
/// `poll` issues the device's standard read transaction(s) and produces a
/// fresh reading. On success the cell is replaced atomically; on failure
/// it is left untouched so the sequencer and panel keep a stale-but-usable
/// value. No retry happens within a tick.
pub fn spawn_monitor<T, F, Fut>(
    device: DeviceId,
    poll_interval: Duration,
    cell: Arc<StateCell<T>>,
    events: broadcast::Sender<DeviceEvent>,
    mut shutdown: broadcast::Receiver<()>,
    mut poll: F,
) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ModbusError>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(%device, "monitor shutdown");
                    break;
                }
                _ = ticker.tick() => {
                    match poll().await {
                        Ok(reading) => {
                            cell.record_success(reading);
                            let _ = events.send(DeviceEvent::Updated { device });
                        }
                        Err(err) => {
                            let failures = cell.record_failure(err.to_string());
                            warn!(%device, error = %err, failures, "device poll failed, keeping last reading");
                            if failures == FAILURE_ESCALATION_THRESHOLD {
                                let _ = events.send(DeviceEvent::ConnectionHealth {
                                    device,
                                    consecutive_failures: failures,
                                });
                            }
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leak::LeakSensor;
    use crate::state::LeakReading;
    use erc_modbus::line::share;
    use erc_modbus::{DeviceClient, SimulatedSlave};

    #[tokio::test]
    async fn monitor_refreshes_the_cell() {
        let slave = SimulatedSlave::new(1);
        let handle = slave.handle();
        handle.set_coil(0, true);
        let sensor = LeakSensor::new(DeviceClient::new(1, share(slave)));

        let cell = Arc::new(StateCell::new());
        let (events, mut event_rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = spawn_monitor(
            DeviceId::Leak,
            Duration::from_millis(10),
            cell.clone(),
            events,
            shutdown_rx,
            move || {
                let sensor = sensor.clone();
                async move {
                    let leaking = sensor.read_leaking().await?;
                    Ok(LeakReading { leaking })
                }
            },
        );

        let event = event_rx.recv().await.expect("first event");
        assert_eq!(event, DeviceEvent::Updated { device: DeviceId::Leak });
        assert_eq!(cell.reading(), Some(LeakReading { leaking: true }));

        shutdown_tx.send(()).expect("shutdown");
        task.await.expect("join");
    }

    #[tokio::test]
    async fn dead_device_escalates_after_three_failures() {
        let slave = SimulatedSlave::new(1);
        let handle = slave.handle();
        handle.set_silent(true);
        let sensor = LeakSensor::new(DeviceClient::new(1, share(slave)));

        let cell = Arc::new(StateCell::new());
        cell.record_success(LeakReading { leaking: false });
        let (events, mut event_rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = spawn_monitor(
            DeviceId::Leak,
            Duration::from_millis(10),
            cell.clone(),
            events,
            shutdown_rx,
            move || {
                let sensor = sensor.clone();
                async move {
                    let leaking = sensor.read_leaking().await?;
                    Ok(LeakReading { leaking })
                }
            },
        );

        let event = event_rx.recv().await.expect("health event");
        assert_eq!(
            event,
            DeviceEvent::ConnectionHealth {
                device: DeviceId::Leak,
                consecutive_failures: FAILURE_ESCALATION_THRESHOLD,
            }
        );
        // The reading from before the outage is still there.
        assert_eq!(cell.reading(), Some(LeakReading { leaking: false }));

        shutdown_tx.send(()).expect("shutdown");
        task.await.expect("join");
    }
}
