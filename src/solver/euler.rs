use super::{clamp_non_negative, deadline_passed, Solution, SolverStats, TerminationReason};
use crate::config::SolverSettings;
use crate::error::TciResult;
use crate::model::{PkPdSystem, State};

/// Explicit Euler, order 1, fixed step.
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
    let mut stats = SolverStats::new("euler");
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
        let dydt = system.derivatives(t, &y, rate_mg_min);
        stats.function_evaluations += 1;
        for k in 0..y.len() {
            y[k] += step * dydt[k];
        }
        clamp_non_negative(&mut y);
        t = t_next;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::test_support::isolated_decay_params;

    #[test]
    fn test_first_order_convergence() {
        let params = isolated_decay_params();
        let system = PkPdSystem::new(&params);
        let y0 = [1.0, 0.0, 0.0, 0.0];
        let exact = (-1.0f64).exp();

        let error_at = |h: f64| {
            let settings = SolverSettings {
                time_step: h,
                ..SolverSettings::default()
            };
            let solution = solve(&system, 0.0, y0, 0.0, 1.0, &settings).unwrap();
            (solution.states.last().unwrap()[0] - exact).abs()
        };

        let ratio = error_at(0.01) / error_at(0.005);
        assert!(
            (1.8..2.2).contains(&ratio),
            "halving h should halve the error, got ratio {}",
            ratio
        );
    }

    #[test]
    fn test_final_time_hit_exactly() {
        let params = isolated_decay_params();
        let system = PkPdSystem::new(&params);
        let settings = SolverSettings {
            time_step: 0.3,
            ..SolverSettings::default()
        };
        let solution = solve(&system, 0.0, [1.0, 0.0, 0.0, 0.0], 0.0, 1.0, &settings).unwrap();
        assert_eq!(*solution.times.last().unwrap(), 1.0);
        for pair in solution.times.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }
}
