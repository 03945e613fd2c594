use super::{clamp_non_negative, deadline_passed, Solution, SolverStats, TerminationReason};
use crate::config::SolverSettings;
use crate::error::TciResult;
use crate::model::{PkPdSystem, State};

// Dormand-Prince 5(4) tableau.
const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
const A: [[f64; 6]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
        0.0,
        0.0,
    ],
    [
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
        0.0,
    ],
    [
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
];
/// Fifth-order weights (identical to the last A row; FSAL).
const B5: [f64; 7] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
    0.0,
];
/// Difference between the 5th- and embedded 4th-order weights.
const E: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

const SAFETY: f64 = 0.9;
const FACTOR_MIN: f64 = 0.2;
const FACTOR_MAX: f64 = 10.0;

/// Adaptive Dormand-Prince 5(4) with FSAL and PI-free step control.
pub fn solve(
    system: &PkPdSystem,
    rate_mg_min: f64,
    y0: State,
    t0: f64,
    t1: f64,
    settings: &SolverSettings,
) -> TciResult<Solution> {
    let mut stats = SolverStats::new("dopri5");
    let mut times = vec![t0];
    let mut states = vec![y0];
    let mut t = t0;
    let mut y = y0;

    let mut h = settings
        .time_step
        .clamp(settings.h_min, settings.h_max)
        .min((t1 - t0).max(settings.h_min));
    let mut k1 = system.derivatives(t, &y, rate_mg_min);
    stats.function_evaluations += 1;

    let partial = |times: Vec<f64>, states: Vec<State>, stats: SolverStats, reason| Solution {
        times,
        states,
        stats,
        terminated: true,
        reason: Some(reason),
    };

    while t < t1 - 1e-12 {
        if stats.total_steps >= settings.max_steps {
            return Ok(partial(times, states, stats, TerminationReason::StepBudget));
        }
        if deadline_passed(settings) {
            return Ok(partial(times, states, stats, TerminationReason::Deadline));
        }

        let h_try = h.min(t1 - t);
        let mut k = [[0.0; 4]; 7];
        k[0] = k1;
        for stage in 1..7 {
            let mut y_stage = y;
            for (j, k_j) in k.iter().enumerate().take(stage) {
                let a = A[stage][j];
                if a != 0.0 {
                    for i in 0..4 {
                        y_stage[i] += h_try * a * k_j[i];
                    }
                }
            }
            k[stage] = system.derivatives(t + C[stage] * h_try, &y_stage, rate_mg_min);
        }
        stats.function_evaluations += 6;

        let mut y_new = y;
        let mut err = [0.0; 4];
        for i in 0..4 {
            for (stage, k_stage) in k.iter().enumerate() {
                y_new[i] += h_try * B5[stage] * k_stage[i];
                err[i] += h_try * E[stage] * k_stage[i];
            }
        }

        let mut norm_sq = 0.0;
        for i in 0..4 {
            let scale = settings.atol + settings.rtol * y[i].abs().max(y_new[i].abs());
            let ratio = err[i] / scale;
            norm_sq += ratio * ratio;
        }
        let error_norm = (norm_sq / 4.0).sqrt();

        let factor = (SAFETY * error_norm.max(1e-10).powf(-0.2)).clamp(FACTOR_MIN, FACTOR_MAX);

        if error_norm <= 1.0 {
            t += h_try;
            if t1 - t < 1e-12 {
                t = t1;
            }
            let unclamped = y_new;
            y = y_new;
            clamp_non_negative(&mut y);
            stats.record_accepted(h_try);
            times.push(t);
            states.push(y);
            if y == unclamped {
                // FSAL: the seventh stage is the first stage of the next step.
                k1 = k[6];
            } else {
                k1 = system.derivatives(t, &y, rate_mg_min);
                stats.function_evaluations += 1;
            }
            h = (h * factor).clamp(settings.h_min, settings.h_max);
        } else {
            stats.record_rejected();
            if h_try <= settings.h_min * (1.0 + 1e-9) {
                return Ok(partial(times, states, stats, TerminationReason::StepUnderflow));
            }
            h = (h_try * factor).max(settings.h_min);
        }
    }

    Ok(Solution {
        times,
        states,
        stats,
        terminated: false,
        reason: None,
    })
}
