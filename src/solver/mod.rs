pub mod dopri5;
pub mod euler;
pub mod rk4;

use serde::Serialize;

use crate::config::{SolverMethod, SolverSettings};
use crate::error::TciResult;
use crate::model::{PkPdSystem, State};

pub use rk4::rk4_step;

/// Why an integration stopped before reaching t1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminationReason {
    /// Accepted + rejected steps exceeded the budget.
    StepBudget,
    /// The adaptive controller demanded a step below h_min.
    StepUnderflow,
    /// The caller-supplied deadline passed.
    Deadline,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::StepBudget => write!(f, "step budget exceeded"),
            TerminationReason::StepUnderflow => write!(f, "step size fell below h_min"),
            TerminationReason::Deadline => write!(f, "deadline exceeded"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SolverStats {
    pub method: &'static str,
    pub total_steps: usize,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub min_step: f64,
    pub max_step: f64,
    pub function_evaluations: usize,
}

impl SolverStats {
    pub fn new(method: &'static str) -> Self {
        Self {
            method,
            total_steps: 0,
            accepted_steps: 0,
            rejected_steps: 0,
            min_step: f64::INFINITY,
            max_step: 0.0,
            function_evaluations: 0,
        }
    }

    pub fn record_accepted(&mut self, h: f64) {
        self.total_steps += 1;
        self.accepted_steps += 1;
        self.min_step = self.min_step.min(h);
        self.max_step = self.max_step.max(h);
    }

    pub fn record_rejected(&mut self) {
        self.total_steps += 1;
        self.rejected_steps += 1;
    }

    /// Fold another segment's stats into this one.
    pub fn merge(&mut self, other: &SolverStats) {
        self.total_steps += other.total_steps;
        self.accepted_steps += other.accepted_steps;
        self.rejected_steps += other.rejected_steps;
        self.min_step = self.min_step.min(other.min_step);
        self.max_step = self.max_step.max(other.max_step);
        self.function_evaluations += other.function_evaluations;
    }
}

/// Dense output of one solver call over [t0, t1]. `times[0] == t0` and the
/// initial state is included; when `terminated` is set the trajectory is
/// partial and `reason` says why.
#[derive(Debug, Clone)]
pub struct Solution {
    pub times: Vec<f64>,
    pub states: Vec<State>,
    pub stats: SolverStats,
    pub terminated: bool,
    pub reason: Option<TerminationReason>,
}

/// Integrate the PK/PD system over [t0, t1] at a constant infusion rate
/// (mg/min). The simulator splits dose schedules into such intervals.
pub fn solve(
    system: &PkPdSystem,
    rate_mg_min: f64,
    y0: State,
    t0: f64,
    t1: f64,
    settings: &SolverSettings,
) -> TciResult<Solution> {
    settings.validate()?;
    match settings.method {
        SolverMethod::Euler => euler::solve(system, rate_mg_min, y0, t0, t1, settings),
        SolverMethod::Rk4 => rk4::solve(system, rate_mg_min, y0, t0, t1, settings),
        SolverMethod::Dopri5 => dopri5::solve(system, rate_mg_min, y0, t0, t1, settings),
    }
}

/// Number of fixed steps covering [t0, t1]; the last step is shortened to
/// land exactly on t1.
pub(crate) fn fixed_step_count(t0: f64, t1: f64, h: f64) -> usize {
    let span = t1 - t0;
    if span <= 0.0 {
        return 0;
    }
    ((span / h - 1e-9).ceil().max(1.0)) as usize
}

/// Physical states cannot go negative; applied after accepted steps only so
/// the adaptive error estimate stays unbiased.
pub(crate) fn clamp_non_negative(y: &mut State) {
    for component in y.iter_mut() {
        if *component < 0.0 {
            *component = 0.0;
        }
    }
}

pub(crate) fn deadline_passed(settings: &SolverSettings) -> bool {
    settings
        .deadline
        .map(|d| std::time::Instant::now() >= d)
        .unwrap_or(false)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverMethod;
    use crate::model::PkPdSystem;

    #[test]
    fn test_clamp() {
        let mut y = [1.0, -1e-9, 0.0, -0.5];
        clamp_non_negative(&mut y);
        assert_eq!(y, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_dispatch_reports_method_name() {
        let params = test_support::isolated_decay_params();
        let system = PkPdSystem::new(&params);
        for method in [SolverMethod::Euler, SolverMethod::Rk4, SolverMethod::Dopri5] {
            let settings = SolverSettings {
                method,
                ..SolverSettings::default()
            };
            let solution = solve(&system, 0.0, [1.0, 0.0, 0.0, 0.0], 0.0, 1.0, &settings).unwrap();
            assert_eq!(solution.stats.method, method.name());
            assert!(!solution.terminated);
            assert_eq!(solution.times[0], 0.0);
            assert_eq!(*solution.times.last().unwrap(), 1.0);
        }
    }
}
