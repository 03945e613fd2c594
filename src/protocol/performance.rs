use serde::Serialize;

use crate::simulation::TimePoint;

/// Quality metrics of a controlled maintenance run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PerformanceReport {
    /// % of maintenance-window points within 10% of the target.
    pub target_accuracy: f64,
    /// Mean |Ce - target| over the maintenance window.
    pub average_deviation: f64,
    /// 100 minus 1000x the mean point-to-point |dCe| over the window.
    pub stability_index: f64,
    /// First time within the convergence band, None if never reached.
    pub convergence_time: Option<f64>,
    pub overshoot_percent: f64,
    /// % of maintenance-window points below 90% of the target.
    pub undershoot_percent: f64,
    pub composite_score: f64,
}

/// Score a trajectory against a target Ce. The maintenance window is
/// everything at or after `maintenance_start`.
pub fn evaluate(
    points: &[TimePoint],
    target_ce: f64,
    maintenance_start: f64,
    convergence_threshold: f64,
) -> PerformanceReport {
    let window: Vec<&TimePoint> = points
        .iter()
        .filter(|p| p.t >= maintenance_start)
        .collect();

    let (target_accuracy, average_deviation, stability_index, undershoot_percent) =
        if window.is_empty() {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let n = window.len() as f64;
            let within_band = window
                .iter()
                .filter(|p| (p.ce - target_ce).abs() <= 0.1 * target_ce)
                .count() as f64;
            let deviation_sum: f64 = window.iter().map(|p| (p.ce - target_ce).abs()).sum();
            let undershoot = window.iter().filter(|p| p.ce < 0.9 * target_ce).count() as f64;

            let stability = if window.len() < 2 {
                100.0
            } else {
                let jitter_sum: f64 = window
                    .windows(2)
                    .map(|pair| (pair[1].ce - pair[0].ce).abs())
                    .sum();
                let mean_jitter = jitter_sum / (window.len() - 1) as f64;
                (100.0 - 1000.0 * mean_jitter).max(0.0)
            };

            (
                100.0 * within_band / n,
                deviation_sum / n,
                stability,
                100.0 * undershoot / n,
            )
        };

    let convergence_time = points
        .iter()
        .find(|p| (p.ce - target_ce).abs() <= convergence_threshold * target_ce)
        .map(|p| p.t);

    let max_ce = points.iter().map(|p| p.ce).fold(0.0, f64::max);
    let overshoot_percent = if max_ce > 1.1 * target_ce {
        100.0 * (max_ce - target_ce) / target_ce
    } else {
        0.0
    };

    let convergence_score = match convergence_time {
        Some(t) if t < 30.0 => 100.0,
        Some(t) => (100.0 - 2.0 * (t - 30.0)).max(0.0),
        None => 0.0,
    };

    let composite_score = (0.4 * target_accuracy
        + 0.3 * stability_index
        + 0.3 * convergence_score
        - 2.0 * (overshoot_percent - 10.0).max(0.0))
    .max(0.0);

    PerformanceReport {
        target_accuracy,
        average_deviation,
        stability_index,
        convergence_time,
        overshoot_percent,
        undershoot_percent,
        composite_score,
    }
}
