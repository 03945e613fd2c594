use log::{debug, info};
use serde::Serialize;

use crate::config::{ControlSettings, SolverSettings};
use crate::error::{TciError, TciResult};
use crate::model::{PkParameters, PkPdSystem, State};
use crate::protocol::performance::{self, PerformanceReport};
use crate::simulation::{SimulationResult, TimePoint};
use crate::solver::{self, rk4_step, SolverStats};

/// One step-down event.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateAdjustment {
    pub time: f64,
    pub old_rate_mg_kg_h: f64,
    pub new_rate_mg_kg_h: f64,
    pub ce: f64,
    pub reduction_percent: f64,
    pub index: usize,
    /// Ce relative to the target at the moment of adjustment.
    pub ce_over_target: f64,
}

/// Output of a controlled maintenance run.
#[derive(Debug, Clone)]
pub struct ControlledRun {
    pub trajectory: SimulationResult,
    pub adjustments: Vec<RateAdjustment>,
    pub performance: PerformanceReport,
    pub final_rate_mg_kg_h: f64,
}

/// Run the maintenance simulation with the threshold-triggered step-down
/// rule active: when Ce reaches the upper threshold outside the lockout
/// interval, the continuous rate is cut by the reduction factor (never
/// below the minimum). Rate changes take effect on the next step.
///
/// The controller integrates with fixed-step RK4, the clinical default.
pub fn run_controlled(
    params: &PkParameters,
    weight_kg: f64,
    bolus_mg: f64,
    initial_rate_mg_kg_h: f64,
    target_ce: f64,
    control: &ControlSettings,
    solver_settings: &SolverSettings,
) -> TciResult<ControlledRun> {
    if !(weight_kg > 0.0) {
        return Err(TciError::InvalidPatient(format!(
            "weight {} kg must be positive",
            weight_kg
        )));
    }
    if !(target_ce > 0.0) {
        return Err(TciError::InvalidDose(format!(
            "target Ce {} must be positive",
            target_ce
        )));
    }
    if !(initial_rate_mg_kg_h >= 0.0) {
        return Err(TciError::InvalidDose(format!(
            "initial rate {} must be non-negative",
            initial_rate_mg_kg_h
        )));
    }
    params.validate()?;
    control.validate()?;
    solver_settings.validate()?;

    let system = PkPdSystem::new(params);
    let h = solver_settings.time_step;
    let duration = control.duration;
    let threshold = target_ce * control.upper_threshold_ratio;
    let n_steps = ((duration / h - 1e-9).ceil().max(1.0)) as usize;

    let mut y: State = [bolus_mg, 0.0, 0.0, 0.0];
    let mut t = 0.0;
    let mut current_rate = initial_rate_mg_kg_h;
    let mut last_adjustment_time = f64::NEG_INFINITY;
    let mut adjustments: Vec<RateAdjustment> = Vec::new();

    let mut times = vec![0.0];
    let mut states = vec![y];
    let mut stats = SolverStats::new("rk4");

    for i in 1..=n_steps {
        let t_next = if i == n_steps { duration } else { i as f64 * h };
        let step = t_next - t;
        let rate_mg_min = current_rate * weight_kg / 60.0;
        y = rk4_step(&system, t, &y, step, rate_mg_min);
        solver::clamp_non_negative(&mut y);
        t = t_next;
        stats.function_evaluations += 4;
        stats.record_accepted(step);
        times.push(t);
        states.push(y);

        let ce = y[3];
        if ce >= threshold
            && t - last_adjustment_time >= control.adjustment_interval
            && current_rate > control.minimum_rate
        {
            let new_rate = (current_rate * control.reduction_factor).max(control.minimum_rate);
            let adjustment = RateAdjustment {
                time: t,
                old_rate_mg_kg_h: current_rate,
                new_rate_mg_kg_h: new_rate,
                ce,
                reduction_percent: 100.0 * (current_rate - new_rate) / current_rate,
                index: adjustments.len() + 1,
                ce_over_target: ce / target_ce,
            };
            debug!(
                "step-down #{} at {:.1} min: {:.2} -> {:.2} mg/kg/h (Ce {:.3})",
                adjustment.index, t, current_rate, new_rate, ce
            );
            adjustments.push(adjustment);
            current_rate = new_rate;
            last_adjustment_time = t;
        }
    }

    let points: Vec<TimePoint> = times
        .iter()
        .zip(states.iter())
        .map(|(&t, state)| TimePoint {
            t,
            cp: system.plasma_concentration(state),
            ce: state[3],
        })
        .collect();

    let max_cp = points.iter().map(|p| p.cp).fold(0.0, f64::max);
    let max_ce = points.iter().map(|p| p.ce).fold(0.0, f64::max);
    let last = *points
        .last()
        .ok_or_else(|| TciError::InternalInvariant("empty controlled trajectory".to_string()))?;

    let performance = performance::evaluate(
        &points,
        target_ce,
        control.maintenance_start,
        control.convergence_threshold,
    );
    info!(
        "controlled run: {} adjustments, final rate {:.2} mg/kg/h, composite score {:.1}",
        adjustments.len(),
        current_rate,
        performance.composite_score
    );

    let trajectory = SimulationResult {
        final_cp: last.cp,
        final_ce: last.ce,
        points,
        states,
        max_cp,
        max_ce,
        stats,
        terminated: false,
        termination_reason: None,
    };

    Ok(ControlledRun {
        trajectory,
        adjustments,
        performance,
        final_rate_mg_kg_h: current_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::derive_pk_parameters;
    use crate::patient::{AsaClass, Patient, Sex};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn standard_patient() -> Patient {
        Patient::new(
            "std",
            45.0,
            70.0,
            170.0,
            Sex::Male,
            AsaClass::Class1To2,
            NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        )
        .unwrap()
    }

    fn controlled_run(initial_rate: f64, target: f64) -> ControlledRun {
        let patient = standard_patient();
        let params = derive_pk_parameters(&patient).unwrap();
        run_controlled(
            &params,
            patient.weight,
            10.0,
            initial_rate,
            target,
            &ControlSettings::default(),
            &SolverSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_step_down_fires_above_threshold() {
        // A deliberately hot rate: Ce will cross 1.2x the target.
        let run = controlled_run(2.0, 0.8);
        assert!(!run.adjustments.is_empty());

        for adjustment in &run.adjustments {
            assert!(adjustment.ce >= 0.8 * 1.2 - 1e-9);
            assert!(adjustment.new_rate_mg_kg_h >= 0.1 - 1e-12);
            if adjustment.old_rate_mg_kg_h * 0.70 >= 0.1 {
                assert_relative_eq!(
                    adjustment.new_rate_mg_kg_h,
                    adjustment.old_rate_mg_kg_h * 0.70,
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_lockout_between_adjustments() {
        let run = controlled_run(2.0, 0.8);
        for pair in run.adjustments.windows(2) {
            assert!(
                pair[1].time - pair[0].time >= 5.0 - 1e-9,
                "adjustments {:.2} and {:.2} violate the 5 min lockout",
                pair[0].time,
                pair[1].time
            );
        }
    }

    #[test]
    fn test_rate_never_below_minimum() {
        let run = controlled_run(2.0, 0.3);
        assert!(run.final_rate_mg_kg_h >= 0.1 - 1e-12);
        for adjustment in &run.adjustments {
            assert!(adjustment.new_rate_mg_kg_h >= 0.1 - 1e-12);
        }
    }

    #[test]
    fn test_quiet_run_makes_no_adjustments() {
        // Minimal infusion far below the target band.
        let run = controlled_run(0.1, 2.0);
        assert!(run.adjustments.is_empty());
        assert_relative_eq!(run.final_rate_mg_kg_h, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_adjustment_indices_sequential() {
        let run = controlled_run(2.5, 0.7);
        for (i, adjustment) in run.adjustments.iter().enumerate() {
            assert_eq!(adjustment.index, i + 1);
            assert!(adjustment.ce_over_target >= 1.2 - 1e-9);
            assert!(adjustment.reduction_percent > 0.0);
        }
    }
}
