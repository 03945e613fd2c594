use serde::{Deserialize, Serialize};

use crate::error::{TciError, TciResult};
use crate::patient::Patient;

pub const MAX_BOLUS_MG: f64 = 100.0;
pub const MAX_RATE_MG_KG_H: f64 = 20.0;

/// One entry of a dosing protocol. The continuous rate takes effect at
/// `time` and persists until the next event; the bolus is an instantaneous
/// jump of the central compartment at `time`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DoseEvent {
    /// Minutes since anesthesia start.
    pub time: f64,
    /// Bolus amount (mg), 0 for rate-only events.
    pub bolus_mg: f64,
    /// Continuous rate (mg/kg/h).
    pub rate_mg_kg_h: f64,
}

impl DoseEvent {
    pub fn bolus(time: f64, bolus_mg: f64) -> Self {
        Self {
            time,
            bolus_mg,
            rate_mg_kg_h: 0.0,
        }
    }

    pub fn infusion(time: f64, rate_mg_kg_h: f64) -> Self {
        Self {
            time,
            bolus_mg: 0.0,
            rate_mg_kg_h,
        }
    }
}

/// An ordered dose schedule bound to a patient weight, exposing the
/// piecewise-constant rate signal and the bolus impulses.
///
/// Boluses are deliberately not modelled as tall narrow rate rectangles;
/// the simulator applies them as state jumps at the event times.
#[derive(Debug, Clone)]
pub struct InfusionSchedule {
    events: Vec<DoseEvent>,
    weight_kg: f64,
}

impl InfusionSchedule {
    pub fn new(events: Vec<DoseEvent>, patient: &Patient) -> TciResult<Self> {
        Self::with_weight(events, patient.weight)
    }

    pub fn with_weight(events: Vec<DoseEvent>, weight_kg: f64) -> TciResult<Self> {
        if !(weight_kg > 0.0) {
            return Err(TciError::InvalidDose(format!(
                "weight {} kg must be positive",
                weight_kg
            )));
        }
        let mut previous_time = f64::NEG_INFINITY;
        for event in &events {
            if !event.time.is_finite() || event.time < 0.0 {
                return Err(TciError::InvalidDose(format!(
                    "event time {} must be non-negative",
                    event.time
                )));
            }
            if event.time < previous_time {
                return Err(TciError::InvalidDose(format!(
                    "event times must be monotone non-decreasing (got {} after {})",
                    event.time, previous_time
                )));
            }
            previous_time = event.time;

            if !(0.0..=MAX_BOLUS_MG).contains(&event.bolus_mg) {
                return Err(TciError::InvalidDose(format!(
                    "bolus {} mg outside [0, {}]",
                    event.bolus_mg, MAX_BOLUS_MG
                )));
            }
            if !(0.0..=MAX_RATE_MG_KG_H).contains(&event.rate_mg_kg_h) {
                return Err(TciError::InvalidDose(format!(
                    "continuous rate {} mg/kg/h outside [0, {}]",
                    event.rate_mg_kg_h, MAX_RATE_MG_KG_H
                )));
            }
        }
        Ok(Self { events, weight_kg })
    }

    pub fn events(&self) -> &[DoseEvent] {
        &self.events
    }

    pub fn weight_kg(&self) -> f64 {
        self.weight_kg
    }

    /// Continuous rate in effect at time t, converted to mg/min.
    pub fn rate_mg_min(&self, t: f64) -> f64 {
        self.events
            .iter()
            .rev()
            .find(|event| event.time <= t)
            .map(|event| event.rate_mg_kg_h * self.weight_kg / 60.0)
            .unwrap_or(0.0)
    }

    /// The (time, mg) bolus impulses with positive amounts.
    pub fn boluses(&self) -> Vec<(f64, f64)> {
        self.events
            .iter()
            .filter(|event| event.bolus_mg > 0.0)
            .map(|event| (event.time, event.bolus_mg))
            .collect()
    }

    /// Total bolus applied exactly at time t.
    pub fn bolus_at(&self, t: f64) -> f64 {
        self.events
            .iter()
            .filter(|event| event.time == t && event.bolus_mg > 0.0)
            .map(|event| event.bolus_mg)
            .sum()
    }

    /// Event times strictly inside (0, t_end): the integration interval is
    /// split there so each solver call sees one constant rate and boluses
    /// land as jumps on the boundaries.
    pub fn partition_times(&self, t_end: f64) -> Vec<f64> {
        let mut times: Vec<f64> = self
            .events
            .iter()
            .map(|event| event.time)
            .filter(|&t| t > 0.0 && t < t_end)
            .collect();
        times.dedup();
        times
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rate_lookup_last_event_wins() {
        let schedule = InfusionSchedule::with_weight(
            vec![
                DoseEvent {
                    time: 0.0,
                    bolus_mg: 10.0,
                    rate_mg_kg_h: 1.2,
                },
                DoseEvent::infusion(30.0, 0.6),
            ],
            70.0,
        )
        .unwrap();

        assert_relative_eq!(schedule.rate_mg_min(0.0), 1.2 * 70.0 / 60.0, epsilon = 1e-12);
        assert_relative_eq!(schedule.rate_mg_min(29.9), 1.2 * 70.0 / 60.0, epsilon = 1e-12);
        assert_relative_eq!(schedule.rate_mg_min(30.0), 0.6 * 70.0 / 60.0, epsilon = 1e-12);
        assert_relative_eq!(schedule.rate_mg_min(120.0), 0.6 * 70.0 / 60.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rate_zero_before_first_event() {
        let schedule =
            InfusionSchedule::with_weight(vec![DoseEvent::infusion(10.0, 1.0)], 70.0).unwrap();
        assert_eq!(schedule.rate_mg_min(5.0), 0.0);
    }

    #[test]
    fn test_boluses_and_partition() {
        let schedule = InfusionSchedule::with_weight(
            vec![
                DoseEvent::bolus(0.0, 10.0),
                DoseEvent::infusion(0.0, 1.0),
                DoseEvent::bolus(45.0, 5.0),
            ],
            70.0,
        )
        .unwrap();

        assert_eq!(schedule.boluses(), vec![(0.0, 10.0), (45.0, 5.0)]);
        assert_eq!(schedule.bolus_at(0.0), 10.0);
        assert_eq!(schedule.bolus_at(45.0), 5.0);
        assert_eq!(schedule.bolus_at(1.0), 0.0);
        // t = 0 is not an internal boundary; 45 is.
        assert_eq!(schedule.partition_times(180.0), vec![45.0]);
        assert_eq!(schedule.partition_times(40.0), Vec::<f64>::new());
    }

    #[test]
    fn test_non_monotone_schedule_rejected() {
        let result = InfusionSchedule::with_weight(
            vec![DoseEvent::infusion(10.0, 1.0), DoseEvent::infusion(5.0, 0.5)],
            70.0,
        );
        assert!(matches!(result, Err(TciError::InvalidDose(_))));
    }

    #[test]
    fn test_limits_enforced() {
        assert!(
            InfusionSchedule::with_weight(vec![DoseEvent::bolus(0.0, 150.0)], 70.0).is_err()
        );
        assert!(
            InfusionSchedule::with_weight(vec![DoseEvent::infusion(0.0, 25.0)], 70.0).is_err()
        );
        assert!(
            InfusionSchedule::with_weight(vec![DoseEvent::bolus(-1.0, 5.0)], 70.0).is_err()
        );
    }
}
