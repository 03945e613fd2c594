use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

use crate::error::{TciError, TciResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SolverMethod {
    Euler,
    Rk4,
    Dopri5,
}

impl SolverMethod {
    pub fn name(self) -> &'static str {
        match self {
            SolverMethod::Euler => "euler",
            SolverMethod::Rk4 => "rk4",
            SolverMethod::Dopri5 => "dopri5",
        }
    }
}

/// Integration settings shared by all solver variants.
///
/// Defaults are the clinical settings: fixed-step RK4 at h = 0.1 min.
/// The adaptive tolerances keep the loose published values; they are
/// exposed rather than silently tightened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub method: SolverMethod,
    /// Fixed step size (min) for Euler/RK4, initial step for DoPri5.
    pub time_step: f64,
    pub atol: f64,
    pub rtol: f64,
    pub h_min: f64,
    pub h_max: f64,
    pub max_steps: usize,
    /// Return a flagged partial trajectory instead of an error when the
    /// step budget runs out or the step size underflows.
    pub allow_partial: bool,
    /// Optional wall-clock deadline checked at each accepted step.
    #[serde(skip)]
    pub deadline: Option<Instant>,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            method: SolverMethod::Rk4,
            time_step: 0.1,
            atol: 1e-4,
            rtol: 1e-2,
            h_min: 1e-3,
            h_max: 1.0,
            max_steps: 500_000,
            allow_partial: false,
            deadline: None,
        }
    }
}

impl SolverSettings {
    /// Fine mode: h = 0.01 min.
    pub fn fine(mut self) -> Self {
        self.time_step = 0.01;
        self
    }

    pub fn validate(&self) -> TciResult<()> {
        if !(self.time_step > 0.0) {
            return Err(TciError::Parameter("time_step must be positive".to_string()));
        }
        if !(self.atol > 0.0) || !(self.rtol > 0.0) {
            return Err(TciError::Parameter("atol and rtol must be positive".to_string()));
        }
        if !(self.h_min > 0.0) || self.h_max < self.h_min {
            return Err(TciError::Parameter(
                "step bounds must satisfy 0 < h_min <= h_max".to_string(),
            ));
        }
        if self.max_steps == 0 {
            return Err(TciError::Parameter("max_steps must be nonzero".to_string()));
        }
        Ok(())
    }
}

/// Step-down controller and evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    /// Controlled-run duration (min).
    pub duration: f64,
    /// Ce threshold as a multiple of the target.
    pub upper_threshold_ratio: f64,
    /// Multiplicative rate reduction applied at each adjustment.
    pub reduction_factor: f64,
    /// Minimum inter-adjustment interval (min).
    pub adjustment_interval: f64,
    /// Floor for the continuous rate (mg/kg/h).
    pub minimum_rate: f64,
    /// Relative band counted as converged by the evaluator.
    pub convergence_threshold: f64,
    /// Start of the maintenance window used by the evaluator (min).
    pub maintenance_start: f64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            duration: 180.0,
            upper_threshold_ratio: 1.2,
            reduction_factor: 0.70,
            adjustment_interval: 5.0,
            minimum_rate: 0.1,
            convergence_threshold: 0.05,
            maintenance_start: 60.0,
        }
    }
}

impl ControlSettings {
    pub fn validate(&self) -> TciResult<()> {
        if !(self.duration > 0.0) {
            return Err(TciError::Parameter("duration must be positive".to_string()));
        }
        if self.upper_threshold_ratio <= 1.0 {
            return Err(TciError::Parameter(
                "upper_threshold_ratio must exceed 1.0".to_string(),
            ));
        }
        if !(self.reduction_factor > 0.0 && self.reduction_factor < 1.0) {
            return Err(TciError::Parameter(
                "reduction_factor must lie in (0, 1)".to_string(),
            ));
        }
        if !(self.adjustment_interval >= 0.0) || !(self.minimum_rate >= 0.0) {
            return Err(TciError::Parameter(
                "adjustment_interval and minimum_rate must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level settings bundle, loadable from a JSON file for the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub solver: SolverSettings,
    pub control: ControlSettings,
}

impl RunConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> TciResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TciResult<()> {
        self.solver.validate()?;
        self.control.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_clinical_settings() {
        let s = SolverSettings::default();
        assert_eq!(s.method, SolverMethod::Rk4);
        assert_eq!(s.time_step, 0.1);
        assert_eq!(s.atol, 1e-4);
        assert_eq!(s.rtol, 1e-2);
        assert_eq!(s.max_steps, 500_000);

        let c = ControlSettings::default();
        assert_eq!(c.duration, 180.0);
        assert_eq!(c.upper_threshold_ratio, 1.2);
        assert_eq!(c.reduction_factor, 0.70);
        assert_eq!(c.adjustment_interval, 5.0);
        assert_eq!(c.minimum_rate, 0.1);
    }

    #[test]
    fn test_validation_rejects_bad_settings() {
        let mut s = SolverSettings::default();
        s.time_step = 0.0;
        assert!(s.validate().is_err());

        let mut c = ControlSettings::default();
        c.reduction_factor = 1.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_run_config_roundtrip() {
        let json = r#"{"solver": {"method": "dopri5", "time_step": 0.05}, "control": {"duration": 120.0}}"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.solver.method, SolverMethod::Dopri5);
        assert_eq!(config.solver.time_step, 0.05);
        assert_eq!(config.control.duration, 120.0);
        // Unspecified fields keep their defaults.
        assert_eq!(config.control.reduction_factor, 0.70);
        config.validate().unwrap();
    }
}
