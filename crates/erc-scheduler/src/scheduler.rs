//! ---
//! erc_section: "04-scheduling"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Reactor activation scheduling and efficiency search."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use erc_common::time::interval_kwh;
use serde::Serialize;

/// The rig carries a fixed bank of ten parallel reactors.
pub const REACTOR_COUNT: usize = 10;

/// Fraction of `max_power` one active reactor draws.
const REACTOR_DRAW_FRACTION: f64 = 0.1;

/// Per-run scheduling state: the fairness ledger, the active set and the
/// energy account. Constructed once per run (or per efficiency-search
/// trial), mutated once per tick, discarded on reset.
#[derive(Debug, Clone, Serialize)]
pub struct ReactorScheduler {
    interval_minutes: u32,
    max_power_kw: f64,
    /// Cumulative active minutes per reactor, the wear-leveling ledger.
    reactor_minutes: [u64; REACTOR_COUNT],
    active: BTreeSet<usize>,
    total_energy_consumed_kwh: f64,
    /// Active-count history, one entry per tick, for the panel.
    history: Vec<usize>,
}

impl ReactorScheduler {
    pub fn new(interval_minutes: u32, max_power_kw: f64) -> Self {
        Self {
            interval_minutes,
            max_power_kw,
            reactor_minutes: [0; REACTOR_COUNT],
            active: BTreeSet::new(),
            total_energy_consumed_kwh: 0.0,
            history: Vec::new(),
        }
    }

    /// Map a normalized power percentage onto a target reactor count:
    /// a ten-step ladder, one reactor per 10%, saturating at the full bank.
    pub fn target_count(power_percentage: f64) -> usize {
        if power_percentage < 0.0 {
            return 0;
        }
        ((power_percentage / 10.0).floor() as usize).min(REACTOR_COUNT)
    }

    /// The active set one tick at `target_count` would produce under the
    /// fairness rule, leaving the ledger untouched. The caller commits it
    /// with [`ReactorScheduler::commit`] once the plant has followed.
    ///
    /// Deactivation rests the most-used reactors first; activation brings
    /// up the least-used first. Ties break on ascending reactor index.
    pub fn plan(&self, target_count: usize) -> BTreeSet<usize> {
        let target_count = target_count.min(REACTOR_COUNT);
        let mut active = self.active.clone();
        if target_count < active.len() {
            let mut by_most_used: Vec<usize> = active.iter().copied().collect();
            by_most_used.sort_by_key(|&idx| (std::cmp::Reverse(self.reactor_minutes[idx]), idx));
            for idx in by_most_used.into_iter().take(active.len() - target_count) {
                active.remove(&idx);
            }
        } else if target_count > active.len() {
            let mut by_least_used: Vec<usize> = (0..REACTOR_COUNT).collect();
            by_least_used.sort_by_key(|&idx| (self.reactor_minutes[idx], idx));
            for idx in by_least_used {
                if active.len() >= target_count {
                    break;
                }
                active.insert(idx);
            }
        }
        active
    }

    /// Commit a planned set: adopt it as the active set, charge one
    /// interval of runtime and energy to its reactors, and record the
    /// tick in the history.
    pub fn commit(&mut self, active: BTreeSet<usize>) {
        self.active = active;
        self.total_energy_consumed_kwh += interval_kwh(
            self.active.len() as f64 * (REACTOR_DRAW_FRACTION * self.max_power_kw),
            self.interval_minutes,
        );
        for &idx in &self.active {
            self.reactor_minutes[idx] += u64::from(self.interval_minutes);
        }
        self.history.push(self.active.len());
    }

    /// Apply one tick: plan for `target_count` and commit immediately.
    /// Returns the resulting active set.
    pub fn update(&mut self, target_count: usize) -> &BTreeSet<usize> {
        let planned = self.plan(target_count);
        self.commit(planned);
        &self.active
    }

    /// Feed a whole trace of normalized readings through the scheduler.
    pub fn schedule(&mut self, power_percentages: impl IntoIterator<Item = f64>) {
        for reading in power_percentages {
            let target = Self::target_count(reading);
            self.update(target);
        }
    }

    /// Consumed-over-generated ratio; 0 when nothing was generated.
    pub fn efficiency(&self, total_generated_kwh: f64) -> f64 {
        if total_generated_kwh == 0.0 {
            return 0.0;
        }
        self.total_energy_consumed_kwh / total_generated_kwh
    }

    pub fn active_set(&self) -> &BTreeSet<usize> {
        &self.active
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn reactor_minutes(&self) -> &[u64; REACTOR_COUNT] {
        &self.reactor_minutes
    }

    pub fn total_energy_consumed_kwh(&self) -> f64 {
        self.total_energy_consumed_kwh
    }

    pub fn history(&self) -> &[usize] {
        &self.history
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    pub fn max_power_kw(&self) -> f64 {
        self.max_power_kw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_count_ladder_boundaries() {
        assert_eq!(ReactorScheduler::target_count(0.0), 0);
        assert_eq!(ReactorScheduler::target_count(9.9), 0);
        assert_eq!(ReactorScheduler::target_count(10.0), 1);
        assert_eq!(ReactorScheduler::target_count(19.99), 1);
        assert_eq!(ReactorScheduler::target_count(99.99), 9);
        assert_eq!(ReactorScheduler::target_count(100.0), 10);
        assert_eq!(ReactorScheduler::target_count(250.0), 10);
        assert_eq!(ReactorScheduler::target_count(-5.0), 0);
    }

    #[test]
    fn target_count_is_monotonic() {
        let mut previous = 0;
        for step in 0..=1000 {
            let p = f64::from(step) / 10.0;
            let count = ReactorScheduler::target_count(p);
            assert!(count >= previous, "ladder decreased at {}%", p);
            previous = count;
        }
    }

    #[test]
    fn active_set_size_matches_target() {
        let mut scheduler = ReactorScheduler::new(20, 100.0);
        for &target in &[3usize, 7, 2, 10, 0, 5] {
            scheduler.update(target);
            assert_eq!(scheduler.active_count(), target);
        }
    }

    #[test]
    fn activation_prefers_least_used() {
        let mut scheduler = ReactorScheduler::new(5, 100.0);
        // Run reactors 0..5 for one tick so they accumulate minutes.
        scheduler.update(5);
        assert_eq!(
            scheduler.active_set().iter().copied().collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
        // Dropping to zero and asking for one must pick an unused reactor.
        scheduler.update(0);
        scheduler.update(1);
        let chosen = *scheduler.active_set().iter().next().expect("one active");
        assert_eq!(chosen, 5, "rested reactor should start first");
    }

    #[test]
    fn deactivation_rests_most_used() {
        let mut scheduler = ReactorScheduler::new(10, 100.0);
        scheduler.update(2); // 0 and 1 gain 10 minutes
        scheduler.update(3); // 2 joins; 0,1 at 20, 2 at 10
        scheduler.update(2); // one of the most-used must go: index 0 on tie
        assert!(!scheduler.active_set().contains(&0));
        assert!(scheduler.active_set().contains(&1));
        assert!(scheduler.active_set().contains(&2));
    }

    #[test]
    fn energy_accumulates_per_reference_scenario() {
        // Trace [5, 15, 25, 95]% at max_power 100 kW, 20-minute intervals:
        // targets [0, 1, 2, 9], energy (0+1+2+9) * 10 kW * (1/3 h) = 40 kWh.
        let mut scheduler = ReactorScheduler::new(20, 100.0);
        let mut targets = Vec::new();
        for &p in &[5.0, 15.0, 25.0, 95.0] {
            let target = ReactorScheduler::target_count(p);
            targets.push(target);
            scheduler.update(target);
        }
        assert_eq!(targets, vec![0, 1, 2, 9]);
        assert!((scheduler.total_energy_consumed_kwh() - 40.0).abs() < 1e-9);
        assert_eq!(scheduler.history(), &[0, 1, 2, 9]);
    }

    #[test]
    fn plan_alone_leaves_the_ledger_untouched() {
        let mut scheduler = ReactorScheduler::new(20, 100.0);
        scheduler.update(2);
        let energy_before = scheduler.total_energy_consumed_kwh();

        let planned = scheduler.plan(5);
        assert_eq!(planned.len(), 5);
        assert_eq!(scheduler.active_count(), 2);
        assert_eq!(scheduler.history(), &[2]);
        assert!((scheduler.total_energy_consumed_kwh() - energy_before).abs() < 1e-12);

        scheduler.commit(planned);
        assert_eq!(scheduler.active_count(), 5);
        assert_eq!(scheduler.history(), &[2, 5]);
        assert!(scheduler.total_energy_consumed_kwh() > energy_before);
    }

    #[test]
    fn energy_is_monotonic() {
        let mut scheduler = ReactorScheduler::new(1, 50.0);
        let mut last = 0.0;
        for target in [10, 5, 0, 3, 0, 0] {
            scheduler.update(target);
            assert!(scheduler.total_energy_consumed_kwh() >= last);
            last = scheduler.total_energy_consumed_kwh();
        }
    }

    #[test]
    fn efficiency_zero_denominator() {
        let scheduler = ReactorScheduler::new(20, 100.0);
        assert_eq!(scheduler.efficiency(0.0), 0.0);
    }
}
