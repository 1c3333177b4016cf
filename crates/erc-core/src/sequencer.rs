//! ---
//! erc_section: "06-core-orchestration"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Plant sequencing and rig orchestration."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! The plant sequencer walks the physical rig between reactor
//! configurations one confirmed step at a time.
//!
//! Shutting reactors down cuts relays first and closes valves last (fail
//! toward de-energized); starting up opens valves and establishes flow and
//! voltage before any relay re-energizes (fail toward no-flow-no-power,
//! never power a dry reactor). Each wait polls the shared device state
//! until the monitors observe the commanded value, re-issuing the command
//! periodically; a wait that never confirms raises an actuation timeout
//! instead of spinning forever.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use erc_devices::relay::{channels_for_mask, mask_for_reactors};
use erc_devices::valve::{position_is_closed, position_is_open};
use erc_devices::{DeviceArena, DeviceId, GearPump, PowerSupply, RelayBank, ValveServo};
use erc_scheduler::{pump_rotate_rate, supply_voltage, RATE_TOLERANCE, VOLTAGE_TOLERANCE};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Cadence of the confirmation polls within a `Wait*` phase.
pub const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// The command is re-issued on every Nth unconfirmed poll, so a lost
/// frame and a slow-settling actuator share one recovery path.
pub const REISSUE_EVERY: u32 = 5;

/// Unconfirmed polls before the wait gives up (30 s at the default
/// cadence).
pub const MAX_CONFIRM_POLLS: u32 = 150;

#[derive(Debug, Error)]
pub enum SequencerError {
    /// A device never reached its commanded state within the wait bound.
    #[error("{device} did not confirm during {phase}")]
    ActuationTimeout { device: DeviceId, phase: Phase },
    /// The operator stopped the transition; observed at a phase boundary.
    #[error("transition aborted at a phase boundary")]
    Aborted,
}

/// Sequencer phases, published for the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    SetRelays,
    WaitRelays,
    SetSupplyVoltage,
    WaitSupply,
    SetPumpRate,
    WaitPump,
    OpenValves,
    WaitValvesOpen,
    CloseValves,
    WaitValvesClosed,
    ReleaseTorque,
    WaitTorqueReleased,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::SetRelays => "set-relays",
            Phase::WaitRelays => "wait-relays",
            Phase::SetSupplyVoltage => "set-supply-voltage",
            Phase::WaitSupply => "wait-supply",
            Phase::SetPumpRate => "set-pump-rate",
            Phase::WaitPump => "wait-pump",
            Phase::OpenValves => "open-valves",
            Phase::WaitValvesOpen => "wait-valves-open",
            Phase::CloseValves => "close-valves",
            Phase::WaitValvesClosed => "wait-valves-closed",
            Phase::ReleaseTorque => "release-torque",
            Phase::WaitTorqueReleased => "wait-torque-released",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Diff between two active sets, the unit of work for one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub old_active: BTreeSet<usize>,
    pub new_active: BTreeSet<usize>,
    pub to_activate: BTreeSet<usize>,
    pub to_deactivate: BTreeSet<usize>,
}

impl Transition {
    pub fn between(old: &BTreeSet<usize>, new: &BTreeSet<usize>) -> Self {
        Self {
            old_active: old.clone(),
            new_active: new.clone(),
            to_activate: new.difference(old).copied().collect(),
            to_deactivate: old.difference(new).copied().collect(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.to_activate.is_empty() && self.to_deactivate.is_empty()
    }
}

/// The orchestration state machine. Only one transition is in flight at a
/// time; the owner awaits [`PlantSequencer::apply`] to completion before
/// feeding it the next tick's target.
pub struct PlantSequencer {
    relay: RelayBank,
    supply: PowerSupply,
    pump: GearPump,
    valves: Vec<ValveServo>,
    arena: Arc<DeviceArena>,
    phase: watch::Sender<Phase>,
    abort: Arc<AtomicBool>,
    confirm_poll: Duration,
}

impl PlantSequencer {
    pub fn new(
        relay: RelayBank,
        supply: PowerSupply,
        pump: GearPump,
        valves: Vec<ValveServo>,
        arena: Arc<DeviceArena>,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            relay,
            supply,
            pump,
            valves,
            arena,
            phase,
            abort: Arc::new(AtomicBool::new(false)),
            confirm_poll: CONFIRM_POLL_INTERVAL,
        }
    }

    /// Override the confirmation poll cadence (tests, bench rigs).
    pub fn with_confirm_poll(mut self, interval: Duration) -> Self {
        self.confirm_poll = interval;
        self
    }

    pub fn phase_receiver(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Shared stop flag: setting it aborts the in-flight transition at its
    /// next phase boundary. The current wait is allowed to finish.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    pub fn request_stop(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Return the published phase to idle (after a reset).
    pub fn mark_idle(&self) {
        self.set_phase(Phase::Idle);
    }

    /// Drive the plant through one transition. Phases run strictly in
    /// order; an abort request is honored between phases, never inside a
    /// transaction.
    pub async fn apply(&self, transition: &Transition) -> Result<(), SequencerError> {
        if transition.is_noop() {
            return Ok(());
        }
        info!(
            from = transition.old_active.len(),
            to = transition.new_active.len(),
            activating = ?transition.to_activate,
            deactivating = ?transition.to_deactivate,
            "plant transition"
        );
        if transition.new_active.len() < transition.old_active.len() {
            self.run_deactivation(transition).await?;
        } else {
            self.run_activation(transition).await?;
        }
        self.set_phase(Phase::Done);
        Ok(())
    }

    async fn run_deactivation(&self, transition: &Transition) -> Result<(), SequencerError> {
        let count = transition.new_active.len();
        self.check_abort()?;
        self.step_relays(mask_for_reactors(&transition.new_active))
            .await?;
        self.check_abort()?;
        self.step_supply(supply_voltage(count)).await?;
        self.check_abort()?;
        self.step_pump(pump_rotate_rate(count)).await?;
        self.check_abort()?;
        self.step_valves(&transition.to_deactivate, false).await?;
        self.check_abort()?;
        self.step_torque_release(&transition.to_deactivate).await?;
        Ok(())
    }

    async fn run_activation(&self, transition: &Transition) -> Result<(), SequencerError> {
        let count = transition.new_active.len();
        self.check_abort()?;
        self.step_valves(&transition.to_activate, true).await?;
        self.check_abort()?;
        self.step_pump(pump_rotate_rate(count)).await?;
        self.check_abort()?;
        self.step_torque_release(&transition.to_activate).await?;
        self.check_abort()?;
        self.step_supply(supply_voltage(count)).await?;
        self.check_abort()?;
        self.step_relays(mask_for_reactors(&transition.new_active))
            .await?;
        Ok(())
    }

    async fn step_relays(&self, mask: u16) -> Result<(), SequencerError> {
        self.set_phase(Phase::SetRelays);
        let want = channels_for_mask(mask);
        let relay = self.relay.clone();
        let issue = move || {
            let relay = relay.clone();
            async move { relay.write_mask(mask).await }
        };
        self.issue_logged(DeviceId::Relay, issue.clone()).await;
        self.set_phase(Phase::WaitRelays);
        let arena = self.arena.clone();
        self.wait_confirmed(
            Phase::WaitRelays,
            DeviceId::Relay,
            move || {
                arena
                    .relay
                    .reading()
                    .map(|r| r.channels == want)
                    .unwrap_or(false)
            },
            issue,
        )
        .await
    }

    async fn step_supply(&self, volts: u16) -> Result<(), SequencerError> {
        self.set_phase(Phase::SetSupplyVoltage);
        let supply = self.supply.clone();
        let issue = move || {
            let supply = supply.clone();
            async move {
                supply.set_voltage(volts).await?;
                supply.set_output(volts > 0).await
            }
        };
        self.issue_logged(DeviceId::Supply, issue.clone()).await;
        self.set_phase(Phase::WaitSupply);
        let arena = self.arena.clone();
        self.wait_confirmed(
            Phase::WaitSupply,
            DeviceId::Supply,
            move || {
                // Strict bound: adjacent ladder steps differ by exactly one
                // tolerance, and the stale reading from the previous count
                // must not confirm the new one.
                arena
                    .supply
                    .reading()
                    .map(|r| (r.voltage_v - f64::from(volts)).abs() < f64::from(VOLTAGE_TOLERANCE))
                    .unwrap_or(false)
            },
            issue,
        )
        .await
    }

    async fn step_pump(&self, rpm: u16) -> Result<(), SequencerError> {
        self.set_phase(Phase::SetPumpRate);
        let pump = self.pump.clone();
        let issue = move || {
            let pump = pump.clone();
            async move {
                pump.set_rotate_rate(rpm).await?;
                if rpm > 0 {
                    pump.start().await
                } else {
                    pump.stop().await
                }
            }
        };
        self.issue_logged(DeviceId::Pump, issue.clone()).await;
        self.set_phase(Phase::WaitPump);
        let arena = self.arena.clone();
        self.wait_confirmed(
            Phase::WaitPump,
            DeviceId::Pump,
            move || {
                arena
                    .pump
                    .reading()
                    .map(|r| r.rotate_rate_rpm.abs_diff(rpm) <= RATE_TOLERANCE && r.running == (rpm > 0))
                    .unwrap_or(false)
            },
            issue,
        )
        .await
    }

    /// Move a group of valves fully open (`open`) or fully closed, with
    /// torque enabled for the travel.
    async fn step_valves(
        &self,
        reactors: &BTreeSet<usize>,
        open: bool,
    ) -> Result<(), SequencerError> {
        if reactors.is_empty() {
            return Ok(());
        }
        let (set_phase, wait_phase) = if open {
            (Phase::OpenValves, Phase::WaitValvesOpen)
        } else {
            (Phase::CloseValves, Phase::WaitValvesClosed)
        };
        self.set_phase(set_phase);
        let valves = self.valves_for(reactors);
        let device = DeviceId::Servo(valves[0].servo_id());
        let issue = {
            let valves = valves.clone();
            move || {
                let valves = valves.clone();
                async move {
                    for valve in &valves {
                        valve.set_torque(true).await?;
                        if open {
                            valve.command_open().await?;
                        } else {
                            valve.command_close().await?;
                        }
                    }
                    Ok(())
                }
            }
        };
        self.issue_logged(device, issue.clone()).await;
        self.set_phase(wait_phase);
        let arena = self.arena.clone();
        let ids: Vec<u8> = valves.iter().map(|v| v.servo_id()).collect();
        self.wait_confirmed(
            wait_phase,
            device,
            move || {
                ids.iter().all(|&id| {
                    arena
                        .servo(id)
                        .reading()
                        .map(|r| {
                            if open {
                                position_is_open(r.position)
                            } else {
                                position_is_closed(r.position)
                            }
                        })
                        .unwrap_or(false)
                })
            },
            issue,
        )
        .await
    }

    async fn step_torque_release(&self, reactors: &BTreeSet<usize>) -> Result<(), SequencerError> {
        if reactors.is_empty() {
            return Ok(());
        }
        self.set_phase(Phase::ReleaseTorque);
        let valves = self.valves_for(reactors);
        let device = DeviceId::Servo(valves[0].servo_id());
        let issue = {
            let valves = valves.clone();
            move || {
                let valves = valves.clone();
                async move {
                    for valve in &valves {
                        valve.set_torque(false).await?;
                    }
                    Ok(())
                }
            }
        };
        self.issue_logged(device, issue.clone()).await;
        self.set_phase(Phase::WaitTorqueReleased);
        let arena = self.arena.clone();
        let ids: Vec<u8> = valves.iter().map(|v| v.servo_id()).collect();
        self.wait_confirmed(
            Phase::WaitTorqueReleased,
            device,
            move || {
                ids.iter().all(|&id| {
                    arena
                        .servo(id)
                        .reading()
                        .map(|r| !r.torque_enabled)
                        .unwrap_or(false)
                })
            },
            issue,
        )
        .await
    }

    /// Reactor index `i` is plumbed to servo id `i + 1`.
    fn valves_for(&self, reactors: &BTreeSet<usize>) -> Vec<ValveServo> {
        self.valves
            .iter()
            .filter(|valve| reactors.contains(&(usize::from(valve.servo_id()) - 1)))
            .cloned()
            .collect()
    }

    /// First issue of a command. A send failure is not fatal; the wait
    /// loop re-issues on the confirmation cadence.
    async fn issue_logged<R, RFut>(&self, device: DeviceId, mut issue: R)
    where
        R: FnMut() -> RFut,
        RFut: Future<Output = erc_modbus::Result<()>>,
    {
        if let Err(err) = issue().await {
            warn!(%device, error = %err, "command send failed, deferring to confirmation re-issue");
        }
    }

    /// Poll until `confirmed` observes the commanded state, re-issuing the
    /// command every [`REISSUE_EVERY`]th unconfirmed poll, up to
    /// [`MAX_CONFIRM_POLLS`] polls.
    async fn wait_confirmed<C, R, RFut>(
        &self,
        phase: Phase,
        device: DeviceId,
        mut confirmed: C,
        mut reissue: R,
    ) -> Result<(), SequencerError>
    where
        C: FnMut() -> bool,
        R: FnMut() -> RFut,
        RFut: Future<Output = erc_modbus::Result<()>>,
    {
        for poll in 1..=MAX_CONFIRM_POLLS {
            if confirmed() {
                return Ok(());
            }
            if poll % REISSUE_EVERY == 0 {
                if let Err(err) = reissue().await {
                    warn!(%device, %phase, error = %err, "re-issue failed");
                }
            }
            tokio::time::sleep(self.confirm_poll).await;
        }
        Err(SequencerError::ActuationTimeout { device, phase })
    }

    fn check_abort(&self) -> Result<(), SequencerError> {
        if self.abort.swap(false, Ordering::SeqCst) {
            return Err(SequencerError::Aborted);
        }
        Ok(())
    }

    // `send_replace` rather than `send`: the value must stick even while
    // nobody is subscribed, so a late receiver sees the current phase.
    fn set_phase(&self, phase: Phase) {
        debug!(%phase, "sequencer phase");
        self.phase.send_replace(phase);
    }
}
