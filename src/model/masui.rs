//! Masui 2022 population PK model for remimazolam: patient covariates to
//! individual macroconstants, scaled on adjusted body weight.

use log::debug;

use super::ke0;
use super::{Ke0Estimate, PkParameters};
use crate::error::TciResult;
use crate::patient::Patient;

/// Standard adjusted body weight (kg) of the reference individual.
const STD_ABW_KG: f64 = 67.3;
/// Standard age (years) of the reference individual.
const STD_AGE_Y: f64 = 54.0;

const THETA_V1: f64 = 3.57;
const THETA_V2: f64 = 11.3;
const THETA_V3: f64 = 27.2;
const THETA_V3_AGE: f64 = 0.308;
const THETA_CL: f64 = 1.03;
const THETA_CL_SEX: f64 = 0.146;
const THETA_CL_ASA: f64 = -0.184;
const THETA_Q2: f64 = 1.10;
const THETA_Q3: f64 = 0.401;

/// Derive individual PK parameters and the ke0 estimate for a patient.
///
/// Volumes scale linearly with ABW/67.3, clearances with its 0.75 power.
pub fn derive_pk_parameters(patient: &Patient) -> TciResult<PkParameters> {
    patient.validate()?;

    let abw = patient.abw();
    let size = abw / STD_ABW_KG;
    let size_cl = size.powf(0.75);
    let sex = patient.sex.as_covariate();
    let asa = patient.asa_ps.as_covariate();

    let v1 = THETA_V1 * size;
    let v2 = THETA_V2 * size;
    let v3 = (THETA_V3 + THETA_V3_AGE * (patient.age - STD_AGE_Y)) * size;
    let cl = (THETA_CL + THETA_CL_SEX * sex + THETA_CL_ASA * asa) * size_cl;
    let q2 = THETA_Q2 * size_cl;
    let q3 = THETA_Q3 * size_cl;

    let ke0_estimate = estimate_ke0(patient, v1, v2, v3, cl, q2, q3);

    let params = PkParameters {
        v1,
        v2,
        v3,
        cl,
        q2,
        q3,
        ke0: ke0_estimate.selected(),
        ke0_estimate,
    };
    params.validate()?;

    debug!(
        "derived PK for {}: V1={:.3} V2={:.3} V3={:.3} CL={:.4} Q2={:.4} Q3={:.4} ke0={:.4}",
        patient.id, params.v1, params.v2, params.v3, params.cl, params.q2, params.q3, params.ke0
    );
    Ok(params)
}

fn estimate_ke0(patient: &Patient, v1: f64, v2: f64, v3: f64, cl: f64, q2: f64, q3: f64) -> Ke0Estimate {
    let k10 = cl / v1;
    let k12 = q2 / v1;
    let k21 = q2 / v2;
    let k13 = q3 / v1;
    let k31 = q3 / v3;
    ke0::estimate(patient, k10, k12, k21, k13, k31)
}
