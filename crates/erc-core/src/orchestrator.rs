//! ---
//! erc_section: "06-core-orchestration"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Plant sequencing and rig orchestration."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Rig orchestrator: runs the offline scale-factor search, spawns the
//! device monitors, and drives the scheduler tick loop through the plant
//! sequencer. The panel talks to it through a command channel and a watch
//! channel of state snapshots; it never blocks the orchestrator.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use erc_common::config::{AppConfig, Mode};
use erc_common::time::interval_duration;
use erc_devices::DeviceEvent;
use erc_replay::PowerTrace;
use erc_scheduler::{search_scale_factor, ReactorScheduler};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::rig::RigDevices;
use crate::sequencer::{Phase, PlantSequencer, SequencerError, Transition};

/// Replay mode compresses one scheduling interval into this long.
const REPLAY_TICK: Duration = Duration::from_millis(50);

/// Read-only view of the run, refreshed once per tick.
#[derive(Debug, Clone, Serialize)]
pub struct PanelSnapshot {
    pub phase: Phase,
    pub active_set: BTreeSet<usize>,
    /// Active-count history, one entry per committed tick.
    pub active_count_history: Vec<usize>,
    /// Latest normalized power reading, percent of effective max power.
    pub power_percentage: f64,
    pub tick: u64,
    pub scale_factor: f64,
    pub total_energy_consumed_kwh: f64,
    pub running: bool,
    /// True once a replay trace has been consumed to its end.
    pub finished: bool,
}

impl PanelSnapshot {
    fn initial(scale_factor: f64) -> Self {
        Self {
            phase: Phase::Idle,
            active_set: BTreeSet::new(),
            active_count_history: Vec::new(),
            power_percentage: 0.0,
            tick: 0,
            scale_factor,
            total_energy_consumed_kwh: 0.0,
            running: true,
            finished: false,
        }
    }
}

/// Operator commands accepted between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    /// Resume ticking after a stop.
    Start,
    /// Pause ticking; an in-flight transition aborts at its next phase
    /// boundary.
    Stop,
    /// Discard scheduling state and return to the idle phase.
    Reset,
}

pub struct RigOrchestrator {
    config: Arc<AppConfig>,
    devices: RigDevices,
    confirm_poll: Option<Duration>,
}

impl RigOrchestrator {
    /// Assemble the rig for the configured mode.
    pub fn new(config: AppConfig) -> Result<Self> {
        let devices = match config.mode {
            Mode::Live => RigDevices::connect(&config.devices)
                .context("failed to open the rig's serial lines")?,
            Mode::Replay => RigDevices::simulated().0,
        };
        Ok(Self::with_devices(config, devices))
    }

    /// Assemble over pre-built devices (tests inject a simulated rig here).
    pub fn with_devices(config: AppConfig, devices: RigDevices) -> Self {
        Self {
            config: Arc::new(config),
            devices,
            confirm_poll: None,
        }
    }

    /// Override the sequencer confirmation cadence (tests).
    pub fn confirm_poll(mut self, interval: Duration) -> Self {
        self.confirm_poll = Some(interval);
        self
    }

    /// Load the configured trace and start the run.
    pub async fn start(self) -> Result<OrchestratorHandle> {
        let trace = PowerTrace::from_csv(
            &self.config.trace.path,
            self.config.scheduler.interval_minutes,
            &self.config.trace.timestamp_column,
            &self.config.trace.power_column,
        )?;
        self.start_with_trace(trace).await
    }

    /// Start the run over an already-loaded power trace: search the scale
    /// factor, spawn monitors and the tick loop, and hand back the panel
    /// handle.
    pub async fn start_with_trace(self, trace: PowerTrace) -> Result<OrchestratorHandle> {
        let raw_max_power = trace.max_power_kw();
        if trace.is_empty() || raw_max_power <= 0.0 {
            bail!("power trace has no usable samples");
        }
        let interval_minutes = self.config.scheduler.interval_minutes;
        let scale_factor = match self.config.scheduler.scale_factor {
            Some(pinned) => {
                info!(scale_factor = pinned, "scale factor pinned by configuration");
                pinned
            }
            None => {
                let search = search_scale_factor(trace.samples(), raw_max_power, interval_minutes);
                info!(
                    scale_factor = search.scale_factor,
                    efficiency = search.efficiency,
                    "scale factor selected by search"
                );
                search.scale_factor
            }
        };
        let max_power_kw = raw_max_power / scale_factor;

        let (shutdown, _) = broadcast::channel(16);
        let (events, _) = broadcast::channel(256);
        let mut tasks = self
            .devices
            .spawn_monitors(&self.config.devices, events.clone(), &shutdown);

        let mut sequencer = PlantSequencer::new(
            self.devices.relay,
            self.devices.supply,
            self.devices.pump,
            self.devices.valves,
            self.devices.arena,
        );
        if let Some(interval) = self.confirm_poll {
            sequencer = sequencer.with_confirm_poll(interval);
        }
        let abort = sequencer.abort_flag();
        let phase_rx = sequencer.phase_receiver();

        let (commands, command_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = watch::channel(PanelSnapshot::initial(scale_factor));

        let loop_task = TickLoop {
            mode: self.config.mode,
            interval_minutes,
            max_power_kw,
            scale_factor,
            trace,
            sequencer,
            phase_rx,
            snapshots: snapshot_tx,
            commands: command_rx,
            shutdown: shutdown.subscribe(),
        };
        tasks.push(tokio::spawn(loop_task.run()));

        info!(mode = ?self.config.mode, "orchestrator started");
        Ok(OrchestratorHandle {
            shutdown,
            commands,
            snapshots: snapshot_rx,
            events,
            abort,
            tasks,
        })
    }
}

/// Handle returned from startup, the panel's only way in.
pub struct OrchestratorHandle {
    shutdown: broadcast::Sender<()>,
    commands: mpsc::Sender<PanelCommand>,
    snapshots: watch::Receiver<PanelSnapshot>,
    events: broadcast::Sender<DeviceEvent>,
    abort: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl OrchestratorHandle {
    pub fn snapshot(&self) -> PanelSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn snapshots(&self) -> watch::Receiver<PanelSnapshot> {
        self.snapshots.clone()
    }

    pub fn device_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub async fn start(&self) -> Result<()> {
        self.send(PanelCommand::Start).await
    }

    /// Stop ticking. The abort flag is raised immediately so an in-flight
    /// transition bails at its next phase boundary rather than after the
    /// whole sequence.
    pub async fn stop(&self) -> Result<()> {
        self.abort.store(true, Ordering::SeqCst);
        self.send(PanelCommand::Stop).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.send(PanelCommand::Reset).await
    }

    async fn send(&self, command: PanelCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .context("orchestrator command channel closed")
    }

    /// Tear the run down. Monitors and the tick loop exit at their next
    /// select point; dropping the last driver clone then closes each
    /// serial line exactly once.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            task.await.context("orchestrator task panicked")?;
        }
        info!("orchestrator shutdown complete");
        Ok(())
    }
}

struct TickLoop {
    mode: Mode,
    interval_minutes: u32,
    max_power_kw: f64,
    scale_factor: f64,
    trace: PowerTrace,
    sequencer: PlantSequencer,
    phase_rx: watch::Receiver<Phase>,
    snapshots: watch::Sender<PanelSnapshot>,
    commands: mpsc::Receiver<PanelCommand>,
    shutdown: broadcast::Receiver<()>,
}

impl TickLoop {
    async fn run(mut self) {
        let tick_period = match self.mode {
            Mode::Replay => REPLAY_TICK,
            Mode::Live => interval_duration(self.interval_minutes),
        };
        let mut ticker = tokio::time::interval(tick_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut scheduler = ReactorScheduler::new(self.interval_minutes, self.max_power_kw);
        let mut samples = self.trace.samples().to_vec().into_iter();
        let mut running = true;
        let mut finished = false;
        let mut tick: u64 = 0;
        let mut power_percentage = 0.0;

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    debug!("tick loop shutdown");
                    break;
                }
                Some(command) = self.commands.recv() => {
                    match command {
                        PanelCommand::Start => {
                            running = !finished;
                            self.sequencer.abort_flag().store(false, Ordering::SeqCst);
                            info!(running, "operator start");
                        }
                        PanelCommand::Stop => {
                            running = false;
                            // Consume a stop raised while idle so it does
                            // not abort the next transition.
                            self.sequencer.abort_flag().store(false, Ordering::SeqCst);
                            info!("operator stop");
                        }
                        PanelCommand::Reset => {
                            scheduler = ReactorScheduler::new(self.interval_minutes, self.max_power_kw);
                            samples = self.trace.samples().to_vec().into_iter();
                            running = false;
                            finished = false;
                            tick = 0;
                            power_percentage = 0.0;
                            self.sequencer.abort_flag().store(false, Ordering::SeqCst);
                            self.sequencer.mark_idle();
                            info!("operator reset");
                        }
                    }
                    self.publish(&scheduler, power_percentage, tick, running, finished);
                }
                _ = ticker.tick(), if running => {
                    let Some(kw) = samples.next() else {
                        finished = true;
                        running = false;
                        info!(
                            ticks = tick,
                            total_energy_consumed_kwh = scheduler.total_energy_consumed_kwh(),
                            "power trace consumed"
                        );
                        self.publish(&scheduler, power_percentage, tick, running, finished);
                        continue;
                    };
                    tick += 1;
                    power_percentage = kw / self.max_power_kw * 100.0;
                    let target = ReactorScheduler::target_count(power_percentage);
                    let planned = scheduler.plan(target);
                    let transition = Transition::between(scheduler.active_set(), &planned);
                    // The ledger only moves once the plant has confirmed the
                    // transition; a failed tick leaves the schedule where the
                    // devices actually are.
                    match self.sequencer.apply(&transition).await {
                        Ok(()) => {
                            scheduler.commit(planned);
                        }
                        Err(SequencerError::Aborted) => {
                            info!(tick, "transition aborted, pausing ticks");
                            running = false;
                        }
                        Err(err @ SequencerError::ActuationTimeout { .. }) => {
                            error!(tick, error = %err, "plant transition failed, pausing ticks");
                            running = false;
                        }
                    }
                    self.publish(&scheduler, power_percentage, tick, running, finished);
                }
            }
        }
    }

    fn publish(
        &self,
        scheduler: &ReactorScheduler,
        power_percentage: f64,
        tick: u64,
        running: bool,
        finished: bool,
    ) {
        let snapshot = PanelSnapshot {
            phase: *self.phase_rx.borrow(),
            active_set: scheduler.active_set().clone(),
            active_count_history: scheduler.history().to_vec(),
            power_percentage,
            tick,
            scale_factor: self.scale_factor,
            total_energy_consumed_kwh: scheduler.total_energy_consumed_kwh(),
            running,
            finished,
        };
        let _ = self.snapshots.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_trace_is_rejected() {
        let mut config = AppConfig::default();
        config.mode = Mode::Replay;
        let (devices, _sim) = RigDevices::simulated();
        let orchestrator = RigOrchestrator::with_devices(config, devices);
        let result = orchestrator
            .start_with_trace(PowerTrace::from_samples(20, Vec::new()))
            .await;
        assert!(result.is_err());
    }
}
