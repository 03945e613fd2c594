use log::debug;
use serde::Serialize;

use crate::config::SolverSettings;
use crate::dosing::InfusionSchedule;
use crate::error::{TciError, TciResult};
use crate::model::{PkParameters, PkPdSystem, State};
use crate::solver::{self, SolverStats, TerminationReason};

/// One recorded output point.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TimePoint {
    /// Minutes since anesthesia start.
    pub t: f64,
    /// Predicted plasma concentration (ug/mL).
    pub cp: f64,
    /// Predicted effect-site concentration (ug/mL).
    pub ce: f64,
}

/// Complete simulated trajectory, strictly time-ordered with t0 = 0.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub points: Vec<TimePoint>,
    /// Raw states (a1, a2, a3, ce) matching `points` index-wise.
    pub states: Vec<State>,
    pub max_cp: f64,
    pub max_ce: f64,
    pub final_cp: f64,
    pub final_ce: f64,
    pub stats: SolverStats,
    pub terminated: bool,
    pub termination_reason: Option<TerminationReason>,
}

impl SimulationResult {
    pub fn ce_at_end(&self) -> f64 {
        self.final_ce
    }

    /// Time of the effect-site concentration maximum.
    pub fn time_of_max_ce(&self) -> Option<f64> {
        self.points
            .iter()
            .max_by(|a, b| a.ce.partial_cmp(&b.ce).unwrap_or(std::cmp::Ordering::Equal))
            .map(|p| p.t)
    }
}

/// Drives the solver over a dose schedule: bolus impulses become state
/// jumps on interval boundaries, each subinterval runs at one constant
/// rate.
pub struct Simulator {
    params: PkParameters,
    system: PkPdSystem,
}

impl Simulator {
    pub fn new(params: PkParameters) -> Self {
        Self {
            params,
            system: PkPdSystem::new(&params),
        }
    }

    pub fn params(&self) -> &PkParameters {
        &self.params
    }

    pub fn simulate(
        &self,
        schedule: &InfusionSchedule,
        duration: f64,
        settings: &SolverSettings,
    ) -> TciResult<SimulationResult> {
        if !(duration > 0.0) {
            return Err(TciError::InvalidDose(format!(
                "duration {} min must be positive",
                duration
            )));
        }
        self.params.validate()?;
        settings.validate()?;

        // Effect site starts at zero regardless of an initial bolus.
        let mut y: State = [schedule.bolus_at(0.0), 0.0, 0.0, 0.0];

        let mut boundaries = schedule.partition_times(duration);
        boundaries.push(duration);

        let mut times: Vec<f64> = Vec::new();
        let mut states: Vec<State> = Vec::new();
        let mut stats = SolverStats::new(settings.method.name());
        let mut terminated = false;
        let mut reason = None;

        let mut t_start = 0.0;
        for &t_stop in &boundaries {
            if t_start > 0.0 {
                // Bolus jumps are applied before the first post-bolus
                // output point; the recorded boundary state is post-jump.
                y[0] += schedule.bolus_at(t_start);
            }

            let rate = schedule.rate_mg_min(t_start);
            let segment = solver::solve(&self.system, rate, y, t_start, t_stop, settings)?;
            debug!(
                "segment [{:.3}, {:.3}] min at {:.4} mg/min: {} accepted steps",
                t_start, t_stop, rate, segment.stats.accepted_steps
            );

            // Drop the previous segment end so the post-jump state is the
            // one recorded point at this boundary.
            times.pop();
            states.pop();
            times.extend_from_slice(&segment.times);
            states.extend_from_slice(&segment.states);
            stats.merge(&segment.stats);

            y = *segment
                .states
                .last()
                .ok_or_else(|| TciError::InternalInvariant("empty solver segment".to_string()))?;

            if segment.terminated {
                terminated = true;
                reason = segment.reason;
                break;
            }
            t_start = t_stop;
        }

        // A caller-supplied deadline opts into partial results; divergence
        // only passes through when partial results were requested.
        if terminated
            && !settings.allow_partial
            && reason != Some(TerminationReason::Deadline)
        {
            return Err(TciError::SolverDiverged(
                reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "integration stopped early".to_string()),
            ));
        }

        for pair in times.windows(2) {
            if pair[1] <= pair[0] {
                return Err(TciError::InternalInvariant(format!(
                    "recorded times not strictly increasing: {} then {}",
                    pair[0], pair[1]
                )));
            }
        }

        let points: Vec<TimePoint> = times
            .iter()
            .zip(states.iter())
            .map(|(&t, state)| TimePoint {
                t,
                cp: self.system.plasma_concentration(state),
                ce: state[3],
            })
            .collect();

        let max_cp = points.iter().map(|p| p.cp).fold(0.0, f64::max);
        let max_ce = points.iter().map(|p| p.ce).fold(0.0, f64::max);
        let last = *points
            .last()
            .ok_or_else(|| TciError::InternalInvariant("empty trajectory".to_string()))?;

        Ok(SimulationResult {
            final_cp: last.cp,
            final_ce: last.ce,
            points,
            states,
            max_cp,
            max_ce,
            stats,
            terminated,
            termination_reason: reason,
        })
    }
}
