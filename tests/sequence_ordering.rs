//! ---
//! erc_section: "08-testing"
//! erc_subsection: "integration-tests"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Integration and validation tests for the ERC stack."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Cross-device command ordering: the simulated slaves stamp every
//! register write with a process-wide sequence number, making the
//! sequencer's phase ordering observable on the wire.

use std::collections::BTreeSet;
use std::time::Duration;

use erc_common::config::DevicesConfig;
use erc_core::{PlantSequencer, RigDevices, SimRig, Transition};
use erc_devices::DeviceEvent;
use erc_modbus::sim::SimulatedSlaveHandle;
use tokio::sync::broadcast;

struct Rig {
    sequencer: PlantSequencer,
    sim: SimRig,
    shutdown: broadcast::Sender<()>,
}

fn start_rig() -> Rig {
    let (devices, sim) = RigDevices::simulated();
    let mut config = DevicesConfig::default();
    let fast = Duration::from_millis(5);
    config.relay.poll_interval = fast;
    config.supply.poll_interval = fast;
    config.pump.poll_interval = fast;
    config.pressure.poll_interval = fast;
    config.leak.poll_interval = fast;
    config.servo_bus.poll_interval = fast;
    let (events, _) = broadcast::channel::<DeviceEvent>(256);
    let (shutdown, _) = broadcast::channel(1);
    let _monitors = devices.spawn_monitors(&config, events, &shutdown);
    let sequencer = PlantSequencer::new(
        devices.relay,
        devices.supply,
        devices.pump,
        devices.valves,
        devices.arena,
    )
    .with_confirm_poll(Duration::from_millis(5));
    Rig {
        sequencer,
        sim,
        shutdown,
    }
}

fn set_of(ids: &[usize]) -> BTreeSet<usize> {
    ids.iter().copied().collect()
}

fn first_write_after(handle: &SimulatedSlaveHandle, after: u64) -> u64 {
    handle
        .writes()
        .iter()
        .map(|w| w.seq)
        .filter(|&seq| seq >= after)
        .min()
        .expect("expected a write after the marker")
}

#[tokio::test]
async fn deactivation_orders_relay_supply_pump_valve_torque() {
    let rig = start_rig();
    rig.sequencer
        .apply(&Transition::between(&BTreeSet::new(), &set_of(&[0, 1, 2])))
        .await
        .expect("bring three reactors up");

    // Marker: everything from here on belongs to the deactivation.
    let marker = rig
        .sim
        .relay
        .writes()
        .iter()
        .chain(rig.sim.pump.writes().iter())
        .map(|w| w.seq)
        .max()
        .expect("setup writes")
        + 1;

    rig.sequencer
        .apply(&Transition::between(&set_of(&[0, 1, 2]), &set_of(&[0])))
        .await
        .expect("drop to one reactor");

    let relay_off = first_write_after(&rig.sim.relay, marker);
    let supply_down = first_write_after(&rig.sim.supply, marker);
    let pump_down = first_write_after(&rig.sim.pump, marker);
    let valve_close = first_write_after(&rig.sim.servos[1], marker)
        .min(first_write_after(&rig.sim.servos[2], marker));

    assert!(relay_off < supply_down, "relays must open first");
    assert!(supply_down < pump_down, "voltage steps down before flow");
    assert!(pump_down < valve_close, "flow steps down before valves close");

    let _ = rig.shutdown.send(());
}

#[tokio::test]
async fn activation_energizes_relays_last() {
    let rig = start_rig();
    rig.sequencer
        .apply(&Transition::between(&BTreeSet::new(), &set_of(&[4, 7])))
        .await
        .expect("activation");

    let valve_open = first_write_after(&rig.sim.servos[4], 0);
    let pump_up = first_write_after(&rig.sim.pump, 0);
    let supply_up = first_write_after(&rig.sim.supply, 0);
    let relay_on = first_write_after(&rig.sim.relay, 0);

    assert!(valve_open < pump_up, "valves open before the pump spins up");
    assert!(pump_up < supply_up, "flow before voltage");
    assert!(supply_up < relay_on, "relays energize last");

    // Only the scheduled reactors are energized.
    assert!(rig.sim.relay.coil(4) && rig.sim.relay.coil(7));
    assert!(!rig.sim.relay.coil(0));

    let _ = rig.shutdown.send(());
}
