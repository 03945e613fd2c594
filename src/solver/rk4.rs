use super::{clamp_non_negative, deadline_passed, Solution, SolverStats, TerminationReason};
use crate::config::SolverSettings;
use crate::error::TciResult;
use crate::model::{PkPdSystem, State};

/// One classical RK4 step of size h at constant rate. Shared with the
/// step-down controller, which advances the integrator itself.
pub fn rk4_step(system: &PkPdSystem, t: f64, y: &State, h: f64, rate_mg_min: f64) -> State {
    let k1 = system.derivatives(t, y, rate_mg_min);
    let k2 = system.derivatives(t + h / 2.0, &advance(y, h / 2.0, &k1), rate_mg_min);
    let k3 = system.derivatives(t + h / 2.0, &advance(y, h / 2.0, &k2), rate_mg_min);
    let k4 = system.derivatives(t + h, &advance(y, h, &k3), rate_mg_min);

    let mut next = *y;
    for i in 0..next.len() {
        next[i] += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
    }
    next
}

fn advance(y: &State, h: f64, slope: &State) -> State {
    let mut out = *y;
    for i in 0..out.len() {
        out[i] += h * slope[i];
    }
    out
}

/// Classical Runge-Kutta, order 4, fixed step.
pub fn solve(
    system: &PkPdSystem,
    rate_mg_min: f64,
    y0: State,
    t0: f64,
    t1: f64,
    settings: &SolverSettings,
) -> TciResult<Solution> {
    let h = settings.time_step;
    let n_steps = super::fixed_step_count(t0, t1, h);
    let mut stats = SolverStats::new("rk4");
    let mut times = vec![t0];
    let mut states = vec![y0];
    let mut t = t0;
    let mut y = y0;

    for i in 1..=n_steps {
        if deadline_passed(settings) {
            return Ok(Solution {
                times,
                states,
                stats,
                terminated: true,
                reason: Some(TerminationReason::Deadline),
            });
        }

        let t_next = if i == n_steps { t1 } else { t0 + i as f64 * h };
        let step = t_next - t;
        y = rk4_step(system, t, &y, step, rate_mg_min);
        clamp_non_negative(&mut y);
        t = t_next;
        stats.function_evaluations += 4;
        stats.record_accepted(step);
        times.push(t);
        states.push(y);
    }

    Ok(Solution {
        times,
        states,
        stats,
        terminated: false,
        reason: None,
    })
}
