//! ---
//! erc_section: "01-core-functionality"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Shared primitives and utilities for the rig controller."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
use std::time::Duration;

/// Convert a per-interval power draw (kW) into energy (kWh).
pub fn interval_kwh(power_kw: f64, interval_minutes: u32) -> f64 {
    power_kw * (f64::from(interval_minutes) / 60.0)
}

/// Scheduling interval expressed as a wall-clock duration.
pub fn interval_duration(interval_minutes: u32) -> Duration {
    Duration::from_secs(u64::from(interval_minutes) * 60)
}
