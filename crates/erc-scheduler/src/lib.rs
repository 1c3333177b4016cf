//! ---
//! erc_section: "04-scheduling"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Reactor activation scheduling and efficiency search."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Reactor scheduling for the rig: map a normalized power reading to a
//! target reactor count, pick which reactors to (de)activate under the
//! runtime-fairness rule, account consumed energy, and (offline) search
//! the scale-factor space against a historical trace.

pub mod scheduler;
pub mod search;
pub mod setpoints;

pub use scheduler::{ReactorScheduler, REACTOR_COUNT};
pub use search::{search_scale_factor, ScaleFactorResult};
pub use setpoints::{pump_rotate_rate, supply_voltage, RATE_TOLERANCE, VOLTAGE_TOLERANCE};
