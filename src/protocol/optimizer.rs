use log::{debug, info, warn};
use serde::Serialize;

use crate::config::SolverSettings;
use crate::dosing::{DoseEvent, InfusionSchedule};
use crate::error::{TciError, TciResult};
use crate::model::PkParameters;
use crate::simulation::Simulator;

/// Continuous-rate search window (mg/kg/h).
pub const RATE_MIN: f64 = 0.1;
pub const RATE_MAX: f64 = 6.0;
const COARSE_STEP: f64 = 0.1;
const FINE_STEP: f64 = 0.02;
const FINE_HALF_WINDOW: f64 = 0.3;
/// Best error above this fraction of the target marks the search infeasible.
const FEASIBILITY_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateEvaluation {
    pub rate_mg_kg_h: f64,
    pub ce_at_target_time: f64,
    pub absolute_error: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProtocolResult {
    pub rate_mg_kg_h: f64,
    pub predicted_ce: f64,
    pub target_ce: f64,
    pub target_time: f64,
    pub bolus_mg: f64,
    /// Every rate evaluated, coarse stage first.
    pub evaluations: Vec<RateEvaluation>,
    /// Set when even the best rate misses the target by more than 5%.
    pub infeasible: bool,
}

/// Two-stage grid search for the constant continuous rate whose simulated
/// effect-site concentration at `target_time` is closest to `target_ce`.
/// Ties go to the smaller rate.
pub fn optimize(
    params: &PkParameters,
    weight_kg: f64,
    bolus_mg: f64,
    target_ce: f64,
    target_time: f64,
    settings: &SolverSettings,
) -> TciResult<ProtocolResult> {
    if !(target_ce > 0.0) {
        return Err(TciError::InvalidDose(format!(
            "target Ce {} must be positive",
            target_ce
        )));
    }
    if !(target_time > 0.0) {
        return Err(TciError::InvalidDose(format!(
            "target time {} min must be positive",
            target_time
        )));
    }

    let simulator = Simulator::new(*params);
    let mut evaluations = Vec::new();

    let mut evaluate = |rate: f64| -> TciResult<RateEvaluation> {
        let schedule = InfusionSchedule::with_weight(
            vec![DoseEvent {
                time: 0.0,
                bolus_mg,
                rate_mg_kg_h: rate,
            }],
            weight_kg,
        )?;
        let result = simulator.simulate(&schedule, target_time, settings)?;
        let evaluation = RateEvaluation {
            rate_mg_kg_h: rate,
            ce_at_target_time: result.final_ce,
            absolute_error: (result.final_ce - target_ce).abs(),
        };
        debug!(
            "rate {:.2} mg/kg/h -> Ce({:.1}) = {:.4}",
            rate, target_time, evaluation.ce_at_target_time
        );
        evaluations.push(evaluation);
        Ok(evaluation)
    };

    // Stage 1: coarse sweep of the full window. Rates are built from
    // integer grid indices so the endpoints land exactly on 0.1 and 6.0.
    let coarse_first = (RATE_MIN / COARSE_STEP).round() as usize;
    let coarse_last = (RATE_MAX / COARSE_STEP).round() as usize;
    let mut best: Option<RateEvaluation> = None;
    for i in coarse_first..=coarse_last {
        let rate = i as f64 * COARSE_STEP;
        let candidate = evaluate(rate)?;
        if best.map_or(true, |b| candidate.absolute_error < b.absolute_error) {
            best = Some(candidate);
        }
    }
    let mut best = best.ok_or_else(|| {
        TciError::InternalInvariant("empty coarse optimization grid".to_string())
    })?;

    // Stage 2: fine sweep around the coarse winner.
    let fine_low = (best.rate_mg_kg_h - FINE_HALF_WINDOW).max(RATE_MIN);
    let fine_high = (best.rate_mg_kg_h + FINE_HALF_WINDOW).min(RATE_MAX);
    let fine_count = ((fine_high - fine_low) / FINE_STEP).round() as usize;
    for i in 0..=fine_count {
        let rate = (fine_low + i as f64 * FINE_STEP).min(RATE_MAX);
        let candidate = evaluate(rate)?;
        if candidate.absolute_error < best.absolute_error {
            best = candidate;
        }
    }

    let infeasible = best.absolute_error > FEASIBILITY_TOLERANCE * target_ce;
    if infeasible {
        warn!(
            "no rate in [{}, {}] reaches Ce {:.2} at {:.0} min (best miss {:.4})",
            RATE_MIN, RATE_MAX, target_ce, target_time, best.absolute_error
        );
    } else {
        info!(
            "optimized rate {:.2} mg/kg/h, predicted Ce({:.0} min) = {:.4}",
            best.rate_mg_kg_h, target_time, best.ce_at_target_time
        );
    }

    Ok(ProtocolResult {
        rate_mg_kg_h: best.rate_mg_kg_h,
        predicted_ce: best.ce_at_target_time,
        target_ce,
        target_time,
        bolus_mg,
        evaluations,
        infeasible,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::derive_pk_parameters;
    use crate::patient::{AsaClass, Patient, Sex};
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

    #[test]
    fn test_optimizer_hits_standard_target() {
        let patient = standard_patient();
        let params = derive_pk_parameters(&patient).unwrap();
        let result = optimize(
            &params,
            patient.weight,
            10.0,
            1.0,
            20.0,
            &SolverSettings::default(),
        )
        .unwrap();

        assert!(!result.infeasible);
        assert!(result.rate_mg_kg_h >= RATE_MIN && result.rate_mg_kg_h <= RATE_MAX);
        let relative_miss = (result.predicted_ce - 1.0).abs() / 1.0;
        assert!(
            relative_miss < 0.03,
            "predicted Ce {:.4}, miss {:.4}",
            result.predicted_ce,
            relative_miss
        );
        // Coarse sweep (60) plus fine sweep around the winner.
        assert!(result.evaluations.len() > 60);
    }

    #[test]
    fn test_unreachable_target_flagged_infeasible() {
        let patient = standard_patient();
        let params = derive_pk_parameters(&patient).unwrap();
        // No bolus and a huge target: even 6 mg/kg/h cannot get there by 10 min.
        let result = optimize(
            &params,
            patient.weight,
            0.0,
            20.0,
            10.0,
            &SolverSettings::default(),
        )
        .unwrap();

        assert!(result.infeasible);
        // Best effort is still returned and it pushes as hard as allowed.
        assert!(result.rate_mg_kg_h > 5.0);
    }

    #[test]
    fn test_invalid_goal_rejected() {
        let patient = standard_patient();
        let params = derive_pk_parameters(&patient).unwrap();
        assert!(optimize(&params, 70.0, 10.0, 0.0, 20.0, &SolverSettings::default()).is_err());
        assert!(optimize(&params, 70.0, 10.0, 1.0, -5.0, &SolverSettings::default()).is_err());
    }
}
