//! Per-iteration observers and the verbose switch.
//!
//! Observers receive a snapshot after every iteration and cannot change the
//! course of a solve. Any `FnMut(&Stats)` closure is an observer.

use std::env;
use std::sync::OnceLock;

use crate::newton::NewtonStats;

/// Whether verbose diagnostics were requested through `NONSMOOTH_VERBOSE`.
///
/// The variable is read once per process. Any value other than `0`/`false`
/// enables the iteration tables.
pub fn diagnostics_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| match env::var("NONSMOOTH_VERBOSE") {
        Ok(v) => v != "0" && v.to_lowercase() != "false",
        Err(_) => false,
    })
}

/// Snapshot of one IPM iteration.
#[derive(Debug, Clone, Copy)]
pub struct IpmIterationStats {
    pub iteration: usize,
    pub pinfeas: f64,
    pub dinfeas: f64,
    pub relgap: f64,
    pub u1_dot_r1: f64,
    pub u2_dot_r2: f64,
    pub complem_1: f64,
    pub complem_2: f64,
    pub full_error: f64,
    pub barr_param: f64,
    pub alpha_primal: f64,
    pub alpha_dual: f64,
    pub sigma: f64,
    pub nesterov_todd_scaling: bool,
}

/// Cone sub-blocks of the updated iterate, in the scaled variables.
#[derive(Debug, Clone, Copy)]
pub struct IpmIterate<'a> {
    pub iteration: usize,
    pub velocity_1: &'a [f64],
    pub velocity_2: &'a [f64],
    pub reaction_1: &'a [f64],
    pub reaction_2: &'a [f64],
}

pub trait IpmObserver {
    fn on_iteration(&mut self, stats: &IpmIterationStats);

    /// Called after every accepted update.
    fn on_iterate(&mut self, _iterate: &IpmIterate<'_>) {}
}

impl<F: FnMut(&IpmIterationStats)> IpmObserver for F {
    fn on_iteration(&mut self, stats: &IpmIterationStats) {
        self(stats)
    }
}

pub trait NewtonObserver {
    fn on_iteration(&mut self, stats: &NewtonStats);
}

impl<F: FnMut(&NewtonStats)> NewtonObserver for F {
    fn on_iteration(&mut self, stats: &NewtonStats) {
        self(stats)
    }
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl IpmObserver for NoopObserver {
    fn on_iteration(&mut self, _stats: &IpmIterationStats) {}
}

impl NewtonObserver for NoopObserver {
    fn on_iteration(&mut self, _stats: &NewtonStats) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_observer() {
        let mut seen = Vec::new();
        {
            let mut obs = |s: &IpmIterationStats| seen.push(s.iteration);
            let stats = IpmIterationStats {
                iteration: 3,
                pinfeas: 0.0,
                dinfeas: 0.0,
                relgap: 0.0,
                u1_dot_r1: 0.0,
                u2_dot_r2: 0.0,
                complem_1: 0.0,
                complem_2: 0.0,
                full_error: 0.0,
                barr_param: 0.0,
                alpha_primal: 1.0,
                alpha_dual: 1.0,
                sigma: 0.1,
                nesterov_todd_scaling: false,
            };
            IpmObserver::on_iteration(&mut obs, &stats);
        }
        assert_eq!(seen, vec![3]);
    }
}
