//! ---
//! erc_section: "04-scheduling"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Reactor activation scheduling and efficiency search."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
use tracing::debug;

use crate::scheduler::ReactorScheduler;

/// Number of evenly spaced candidates across the search interval,
/// endpoints included.
const SEARCH_POINTS: usize = 50;
const SEARCH_MIN: f64 = 1.0;
const SEARCH_MAX: f64 = 2.0;

/// Outcome of the offline scale-factor search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactorResult {
    /// Divisor applied to the rated max power.
    pub scale_factor: f64,
    /// Utilization efficiency achieved at that divisor.
    pub efficiency: f64,
}

/// Evaluate one scale-factor candidate against the historical trace.
///
/// The trace is in kW; `raw_max_power / x` becomes the trial's full-power
/// rating, readings are normalized against it, and a private scratch
/// scheduler consumes the whole trace.
fn efficiency_for(
    x: f64,
    trace_kw: &[f64],
    raw_max_power_kw: f64,
    interval_minutes: u32,
) -> f64 {
    let max_power = raw_max_power_kw / x;
    let mut scheduler = ReactorScheduler::new(interval_minutes, max_power);
    scheduler.schedule(trace_kw.iter().map(|kw| (kw / max_power) * 100.0));

    let total_generated_kwh: f64 = trace_kw
        .iter()
        .map(|kw| kw * (f64::from(interval_minutes) / 60.0))
        .sum();
    scheduler.efficiency(total_generated_kwh)
}

/// One-time offline sweep over 50 evenly spaced scale factors in
/// `[1.0, 2.0]`, run at startup before live scheduling begins.
///
/// Deterministic: the sweep ascends and a strict improvement is required
/// to displace the incumbent, so the first candidate reaching the best
/// efficiency wins. An all-zero trace yields x = 1.0 at efficiency 0.
pub fn search_scale_factor(
    trace_kw: &[f64],
    raw_max_power_kw: f64,
    interval_minutes: u32,
) -> ScaleFactorResult {
    let step = (SEARCH_MAX - SEARCH_MIN) / (SEARCH_POINTS - 1) as f64;
    let mut best = ScaleFactorResult {
        scale_factor: SEARCH_MIN,
        efficiency: f64::NEG_INFINITY,
    };
    for i in 0..SEARCH_POINTS {
        let x = SEARCH_MIN + step * i as f64;
        let efficiency = efficiency_for(x, trace_kw, raw_max_power_kw, interval_minutes);
        if efficiency > best.efficiency {
            best = ScaleFactorResult {
                scale_factor: x,
                efficiency,
            };
        }
    }
    debug!(
        scale_factor = best.scale_factor,
        efficiency = best.efficiency,
        "scale-factor search complete"
    );
    best
}
