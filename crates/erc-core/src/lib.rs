//! ---
//! erc_section: "06-core-orchestration"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Plant sequencing and rig orchestration."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Core orchestration of the rig: the plant sequencer that walks the
//! physical devices between reactor configurations with confirmed steps,
//! the device assembly for live and replay modes, and the orchestrator
//! that ties scheduling ticks, monitors and the sequencer together behind
//! a panel-facing handle.

pub mod orchestrator;
pub mod rig;
pub mod sequencer;

pub use orchestrator::{OrchestratorHandle, PanelCommand, PanelSnapshot, RigOrchestrator};
pub use rig::{RigDevices, SimRig};
pub use sequencer::{Phase, PlantSequencer, SequencerError, Transition};
