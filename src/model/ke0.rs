//! Effect-site equilibration constant for remimazolam, Masui & Hagihira 2022.
//!
//! Two estimators form a fallback pair: a closed-form covariate regression
//! that is always available, and a numerical branch that solves the
//! peak-time equation (effect-site concentration after a unit bolus peaks
//! at t = 2.6 min) with Brent's method. The numerical value is preferred;
//! the regression is used when the bracket or the iteration fails.

use log::warn;
use serde::Serialize;

use crate::patient::Patient;

/// Effect-site peak time after a unit bolus (min).
const T_PEAK_MIN: f64 = 2.6;
/// Search bracket for the numerical ke0 (1/min).
const KE0_BRACKET: (f64, f64) = (0.15, 0.26);
const BRENT_TOL: f64 = 1e-12;
const BRENT_MAX_ITER: usize = 100;

/// Both ke0 branches. `numerical` is None when the root-find failed and the
/// regression value was selected instead.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Ke0Estimate {
    pub regression: f64,
    pub numerical: Option<f64>,
}

impl Ke0Estimate {
    pub fn selected(&self) -> f64 {
        self.numerical.unwrap_or(self.regression)
    }

    pub fn fell_back(&self) -> bool {
        self.numerical.is_none()
    }
}

/// Estimate ke0 for a patient given the individual microconstants.
pub fn estimate(patient: &Patient, k10: f64, k12: f64, k21: f64, k13: f64, k31: f64) -> Ke0Estimate {
    let regression = ke0_regression(
        patient.age,
        patient.weight,
        patient.height,
        patient.sex.as_covariate(),
        patient.asa_ps.as_covariate(),
    );
    let numerical = ke0_numerical(k10, k12, k21, k13, k31);
    if numerical.is_none() {
        warn!(
            "ke0 root-find failed for {}; falling back to regression value {:.4}",
            patient.id, regression
        );
    }
    Ke0Estimate {
        regression,
        numerical,
    }
}

// Univariate covariate polynomials of the published regression.

fn f_age(age: f64) -> f64 {
    let d = age - 55.0;
    0.228 - 2.72e-5 * age + 2.96e-7 * d.powi(2) - 4.34e-9 * d.powi(3) + 5.05e-11 * d.powi(4)
}

fn f_tbw(tbw: f64) -> f64 {
    let d = tbw - 90.0;
    0.196 + 3.53e-4 * tbw - 7.91e-7 * d.powi(2)
}

fn f_height(height: f64) -> f64 {
    let d = height - 167.5;
    0.148 + 4.73e-4 * height - 1.43e-6 * d.powi(2)
}

fn f_sex(sex: f64) -> f64 {
    0.237 - 2.16e-2 * sex
}

fn f_asaps(asaps: f64) -> f64 {
    0.214 + 2.41e-2 * asaps
}

/// Closed-form regression branch: centered covariate terms entering a
/// 15-term interaction polynomial.
pub fn ke0_regression(age: f64, tbw: f64, height: f64, sex: f64, asaps: f64) -> f64 {
    let fa = f_age(age);
    let fw = f_tbw(tbw);
    let fh = f_height(height);
    let fs = f_sex(sex);
    let fp = f_asaps(asaps);

    let f2a = fa - 0.227;
    let f2w = fw - 0.227;
    let f2h = fh - 0.226;
    let f2s = fs - 0.226;
    let f2p = fp - 0.226;

    -0.906 + fa + fw + fh + fs + fp
        - 4.50 * f2a * f2w
        - 4.51 * f2a * f2h
        + 2.46 * f2a * f2s
        + 3.35 * f2a * f2p
        - 12.6 * f2w * f2h
        + 0.394 * f2w * f2s
        + 2.06 * f2w * f2p
        + 0.390 * f2h * f2s
        + 2.07 * f2h * f2p
        + 5.03 * f2s * f2p
        + 99.8 * f2a * f2w * f2h
        + 5.11 * f2w * f2h * f2s
        - 39.4 * f2w * f2h * f2p
        - 5.00 * f2w * f2s * f2p
        - 5.04 * f2h * f2s * f2p
}

/// Numerical branch: ke0 in [0.15, 0.26] for which the effect-site
/// concentration after a unit bolus peaks at exactly t = 2.6 min.
pub fn ke0_numerical(k10: f64, k12: f64, k21: f64, k13: f64, k31: f64) -> Option<f64> {
    let (alpha, beta, gamma) = plasma_exponents(k10, k12, k21, k13, k31)?;
    let coefficients = plasma_coefficients(k21, k31, alpha, beta, gamma);

    // dCe/dt under a unit impulse, up to a positive factor:
    //   g(ke0) = sum_i X_i * (ke0 e^{-ke0 tp} - lambda_i e^{-lambda_i tp}) / (ke0 - lambda_i)
    let g = |ke0: f64| -> f64 {
        let u = (-ke0 * T_PEAK_MIN).exp();
        coefficients
            .iter()
            .map(|&(x_i, lambda)| {
                x_i * (ke0 * u - lambda * (-lambda * T_PEAK_MIN).exp()) / (ke0 - lambda)
            })
            .sum()
    };

    brent(g, KE0_BRACKET.0, KE0_BRACKET.1, BRENT_TOL, BRENT_MAX_ITER)
}

/// Hybrid rate constants (alpha, beta, gamma): the three real roots of
/// lambda^3 - a2 lambda^2 + a1 lambda - a0 = 0, sorted descending.
/// Solved exactly by the trigonometric method; a mammillary model always
/// yields three distinct positive roots.
fn plasma_exponents(k10: f64, k12: f64, k21: f64, k13: f64, k31: f64) -> Option<(f64, f64, f64)> {
    let a2 = k10 + k12 + k13 + k21 + k31;
    let a1 = k10 * k21 + k10 * k31 + k12 * k31 + k13 * k21 + k21 * k31;
    let a0 = k10 * k21 * k31;

    let s = a2 / 3.0;
    let p = a1 - a2 * a2 / 3.0;
    let q = a1 * s - 2.0 * s * s * s - a0;
    if p >= 0.0 {
        return None;
    }

    let m = 2.0 * (-p / 3.0).sqrt();
    let cos_arg = (3.0 * q / (p * m)).clamp(-1.0, 1.0);
    let theta = cos_arg.acos();

    let mut roots = [0.0; 3];
    for (k, root) in roots.iter_mut().enumerate() {
        *root = m * ((theta + 2.0 * std::f64::consts::PI * k as f64) / 3.0).cos() + s;
    }
    roots.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    if roots[2] <= 0.0 || roots[0] - roots[1] < 1e-12 || roots[1] - roots[2] < 1e-12 {
        return None;
    }
    Some((roots[0], roots[1], roots[2]))
}

/// Partial-fraction coefficients of the unit-bolus plasma curve,
/// Cp(t) ~ A e^{-alpha t} + B e^{-beta t} + C e^{-gamma t}. Normalized to
/// A + B + C = 1; the scale cancels in the peak-time equation.
fn plasma_coefficients(k21: f64, k31: f64, alpha: f64, beta: f64, gamma: f64) -> [(f64, f64); 3] {
    let a = (k21 - alpha) * (k31 - alpha) / ((alpha - beta) * (alpha - gamma));
    let b = (k21 - beta) * (k31 - beta) / ((beta - alpha) * (beta - gamma));
    let c = (k21 - gamma) * (k31 - gamma) / ((gamma - alpha) * (gamma - beta));
    [(a, alpha), (b, beta), (c, gamma)]
}

/// Brent's method on [a, b]. Returns None when the bracket does not
/// straddle a sign change or the iteration budget runs out.
fn brent<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, tol: f64, max_iter: usize) -> Option<f64> {
    let (mut a, mut b) = (a, b);
    let mut fa = f(a);
    let mut fb = f(b);
    if !fa.is_finite() || !fb.is_finite() || fa * fb > 0.0 {
        return None;
    }
    if fa.abs() < fb.abs() {
        std::mem::swap(&mut a, &mut b);
        std::mem::swap(&mut fa, &mut fb);
    }

    let mut c = a;
    let mut fc = fa;
    let mut d = b - a;
    let mut e = d;

    for _ in 0..max_iter {
        if fc.abs() < fb.abs() {
            // b must remain the best estimate.
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol1 = 2.0 * f64::EPSILON * b.abs() + 0.5 * tol;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol1 || fb == 0.0 {
            return Some(b);
        }

        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            // Inverse quadratic interpolation, or secant when a == c.
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * xm * s, 1.0 - s)
            } else {
                let q0 = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * q0 * (q0 - r) - (b - a) * (r - 1.0)),
                    (q0 - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let min1 = 3.0 * xm * q - (tol1 * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }

        a = b;
        fa = fb;
        b += if d.abs() > tol1 {
            d
        } else {
            tol1.copysign(xm)
        };
        fb = f(b);
        if (fb > 0.0) == (fc > 0.0) {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::masui::derive_pk_parameters;
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

    #[test]
    fn test_regression_standard_male() {
        let ke0 = ke0_regression(45.0, 70.0, 170.0, 0.0, 0.0);
        // Near the published typical value for remimazolam.
        assert!(ke0 > 0.21 && ke0 < 0.24, "ke0 = {}", ke0);
    }

    #[test]
    fn test_regression_responds_to_covariates() {
        let base = ke0_regression(45.0, 70.0, 170.0, 0.0, 0.0);
        let female = ke0_regression(45.0, 70.0, 170.0, 1.0, 0.0);
        let sick = ke0_regression(45.0, 70.0, 170.0, 0.0, 1.0);
        assert!(female < base);
        assert!(sick > base);
    }

    #[test]
    fn test_plasma_exponents_satisfy_cubic_identities() {
        let (k10, k12, k21, k13, k31) = (0.2885, 0.3081, 0.0973, 0.1123, 0.0164);
        let (alpha, beta, gamma) = plasma_exponents(k10, k12, k21, k13, k31).unwrap();

        assert!(alpha > beta && beta > gamma && gamma > 0.0);
        let a2 = k10 + k12 + k13 + k21 + k31;
        let a1 = k10 * k21 + k10 * k31 + k12 * k31 + k13 * k21 + k21 * k31;
        let a0 = k10 * k21 * k31;
        assert_relative_eq!(alpha + beta + gamma, a2, epsilon = 1e-10);
        assert_relative_eq!(
            alpha * beta + alpha * gamma + beta * gamma,
            a1,
            epsilon = 1e-10
        );
        assert_relative_eq!(alpha * beta * gamma, a0, epsilon = 1e-10);
    }

    #[test]
    fn test_plasma_coefficients_sum_to_one() {
        let (k10, k12, k21, k13, k31) = (0.2885, 0.3081, 0.0973, 0.1123, 0.0164);
        let (alpha, beta, gamma) = plasma_exponents(k10, k12, k21, k13, k31).unwrap();
        let coeffs = plasma_coefficients(k21, k31, alpha, beta, gamma);
        let sum: f64 = coeffs.iter().map(|&(x, _)| x).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-10);
        // The fast coefficient dominates a bolus curve.
        assert!(coeffs[0].0 > coeffs[1].0 && coeffs[0].0 > coeffs[2].0);
    }

    #[test]
    fn test_numerical_matches_regression_for_standard_patient() {
        let params = derive_pk_parameters(&standard_patient()).unwrap();
        let estimate = params.ke0_estimate;

        let numerical = estimate.numerical.expect("root-find must succeed");
        assert!(numerical > KE0_BRACKET.0 && numerical < KE0_BRACKET.1);
        assert!(!estimate.fell_back());
        assert_relative_eq!(estimate.selected(), numerical, epsilon = 1e-15);

        let relative_gap = (numerical - estimate.regression).abs() / estimate.regression;
        assert!(relative_gap < 0.05, "gap = {:.4}", relative_gap);
    }

    #[test]
    fn test_brent_on_known_root() {
        // x^2 - 2 on [1, 2].
        let root = brent(|x| x * x - 2.0, 1.0, 2.0, 1e-12, 100).unwrap();
        assert_relative_eq!(root, std::f64::consts::SQRT_2, epsilon = 1e-10);
    }

    #[test]
    fn test_brent_rejects_unbracketed_interval() {
        assert!(brent(|x| x * x + 1.0, -1.0, 1.0, 1e-12, 100).is_none());
    }
}
