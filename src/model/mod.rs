pub mod ke0;
pub mod masui;

use serde::Serialize;

use crate::error::{TciError, TciResult};

pub use ke0::Ke0Estimate;
pub use masui::derive_pk_parameters;

/// State vector (a1, a2, a3, ce): compartment amounts in mg plus
/// effect-site concentration in ug/mL.
pub type State = [f64; 4];

pub const V1_MIN_L: f64 = 1.0;
pub const V1_MAX_L: f64 = 50.0;
pub const KE0_MIN: f64 = 0.01;
pub const KE0_MAX: f64 = 2.0;

/// Individual macroconstants of the Masui three-compartment model plus the
/// selected ke0. Immutable once derived; safe to share across simulations.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PkParameters {
    /// Central volume (L).
    pub v1: f64,
    /// Shallow peripheral volume (L).
    pub v2: f64,
    /// Deep peripheral volume (L).
    pub v3: f64,
    /// Elimination clearance (L/min).
    pub cl: f64,
    /// Inter-compartmental clearance 1<->2 (L/min).
    pub q2: f64,
    /// Inter-compartmental clearance 1<->3 (L/min).
    pub q3: f64,
    /// Selected effect-site equilibration constant (1/min).
    pub ke0: f64,
    /// Both ke0 branches and which one was selected.
    pub ke0_estimate: Ke0Estimate,
}

impl PkParameters {
    pub fn k10(&self) -> f64 {
        self.cl / self.v1
    }

    pub fn k12(&self) -> f64 {
        self.q2 / self.v1
    }

    pub fn k21(&self) -> f64 {
        self.q2 / self.v2
    }

    pub fn k13(&self) -> f64 {
        self.q3 / self.v1
    }

    pub fn k31(&self) -> f64 {
        self.q3 / self.v3
    }

    pub fn validate(&self) -> TciResult<()> {
        let macros = [
            ("V1", self.v1),
            ("V2", self.v2),
            ("V3", self.v3),
            ("CL", self.cl),
            ("Q2", self.q2),
            ("Q3", self.q3),
            ("ke0", self.ke0),
        ];
        for (name, value) in macros {
            if !value.is_finite() || value <= 0.0 {
                return Err(TciError::Parameter(format!(
                    "{} = {} is not strictly positive",
                    name, value
                )));
            }
        }
        if self.v1 < V1_MIN_L || self.v1 > V1_MAX_L {
            return Err(TciError::Parameter(format!(
                "V1 = {:.3} L outside physiologic window [{}, {}]",
                self.v1, V1_MIN_L, V1_MAX_L
            )));
        }
        if self.ke0 < KE0_MIN || self.ke0 > KE0_MAX {
            return Err(TciError::Parameter(format!(
                "ke0 = {:.4} /min outside physiologic window [{}, {}]",
                self.ke0, KE0_MIN, KE0_MAX
            )));
        }
        Ok(())
    }
}

/// Right-hand side of the four-state PK/PD system. Stateless given the
/// parameters; derivatives never mutate shared data.
#[derive(Debug, Clone, Copy)]
pub struct PkPdSystem {
    k10: f64,
    k12: f64,
    k21: f64,
    k13: f64,
    k31: f64,
    ke0: f64,
    v1: f64,
}

impl PkPdSystem {
    pub fn new(params: &PkParameters) -> Self {
        Self {
            k10: params.k10(),
            k12: params.k12(),
            k21: params.k21(),
            k13: params.k13(),
            k31: params.k31(),
            ke0: params.ke0,
            v1: params.v1,
        }
    }

    /// f(t, y, rate) with rate in mg/min. The system is autonomous; t is
    /// accepted to match the solver contract.
    pub fn derivatives(&self, _t: f64, y: &State, rate_mg_min: f64) -> State {
        let (a1, a2, a3, ce) = (y[0], y[1], y[2], y[3]);
        let cp = a1 / self.v1;
        [
            rate_mg_min - (self.k10 + self.k12 + self.k13) * a1 + self.k21 * a2 + self.k31 * a3,
            self.k12 * a1 - self.k21 * a2,
            self.k13 * a1 - self.k31 * a3,
            self.ke0 * (cp - ce),
        ]
    }

    pub fn plasma_concentration(&self, y: &State) -> f64 {
        y[0] / self.v1
    }

    pub fn v1(&self) -> f64 {
        self.v1
    }
}
