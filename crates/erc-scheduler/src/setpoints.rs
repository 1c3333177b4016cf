//! ---
//! erc_section: "04-scheduling"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Reactor activation scheduling and efficiency search."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Fixed setpoint ladders: the pump flow and supply voltage that go with
//! each active-reactor count. Calibrated on the rig; not configurable.

use crate::scheduler::REACTOR_COUNT;

/// Gear pump rotate rate (rpm) per active reactor count.
const PUMP_ROTATE_RATES: [u16; REACTOR_COUNT + 1] = [
    0, 1340, 1452, 1588, 1753, 1860, 2000, 2190, 2320, 2484, 2600,
];

/// Supply voltage (V) per active reactor count.
const SUPPLY_VOLTAGES: [u16; REACTOR_COUNT + 1] = [0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100];

/// Confirmation tolerance on the measured rotate rate (rpm).
pub const RATE_TOLERANCE: u16 = 10;

/// Confirmation tolerance on the measured voltage (V). Equals the ladder
/// step, so confirmation bounds on it must be strict.
pub const VOLTAGE_TOLERANCE: u16 = 10;

/// Rotate-rate setpoint for `active_count` reactors.
pub fn pump_rotate_rate(active_count: usize) -> u16 {
    PUMP_ROTATE_RATES[active_count.min(REACTOR_COUNT)]
}

/// Voltage setpoint for `active_count` reactors.
pub fn supply_voltage(active_count: usize) -> u16 {
    SUPPLY_VOLTAGES[active_count.min(REACTOR_COUNT)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladders_are_monotonic() {
        for k in 1..=REACTOR_COUNT {
            assert!(pump_rotate_rate(k) > pump_rotate_rate(k - 1));
            assert!(supply_voltage(k) > supply_voltage(k - 1));
        }
    }

    #[test]
    fn zero_reactors_means_idle_plant() {
        assert_eq!(pump_rotate_rate(0), 0);
        assert_eq!(supply_voltage(0), 0);
    }

    #[test]
    fn saturates_at_full_bank() {
        assert_eq!(pump_rotate_rate(25), 2600);
        assert_eq!(supply_voltage(25), 100);
    }
}
