//! Mass-variance table: sigma(M) at z=0 from a top-hat-filtered integral of
//! an Eisenstein & Hu (1998) no-wiggle power spectrum, sigma_8 normalized,
//! cubic-splined in ln M.

use crate::common::constants::{HLITTLE, OMEGA_B, OMEGA_M, POWER_INDEX, SIGMA_8};
use crate::cosmo;
use crate::domain::{BubbleError, ComputeResult};
use crate::numerics::{simpson, CubicSpline};
use std::f64::consts::PI;

/// Eisenstein & Hu (1998) zero-baryon-oscillation transfer function.
fn transfer(k: f64) -> f64 {
    let omh2 = OMEGA_M * HLITTLE * HLITTLE;
    let obh2 = OMEGA_B * HLITTLE * HLITTLE;
    let f_baryon = OMEGA_B / OMEGA_M;

    let sound_horizon = 44.5 * (9.83 / omh2).ln() / (1.0 + 10.0 * obh2.powf(0.75)).sqrt();
    let alpha_gamma = 1.0 - 0.328 * (431.0 * omh2).ln() * f_baryon
        + 0.38 * (22.3 * omh2).ln() * f_baryon * f_baryon;
    let gamma_eff = OMEGA_M
        * HLITTLE
        * (alpha_gamma + (1.0 - alpha_gamma) / (1.0 + (0.43 * k * sound_horizon).powi(4)));

    let theta_cmb: f64 = 2.728 / 2.7;
    let q = k * theta_cmb * theta_cmb / gamma_eff;
    let l = (2.0 * std::f64::consts::E + 1.8 * q).ln();
    let c = 14.2 + 731.0 / (1.0 + 62.5 * q);
    l / (l + c * q * q)
}

fn tophat_window(kr: f64) -> f64 {
    if kr < 1.0e-4 {
        1.0
    } else {
        3.0 * (kr.sin() - kr * kr.cos()) / (kr * kr * kr)
    }
}

/// Unnormalized sigma^2 for a top-hat of radius `radius` Mpc.
fn sigma_sq_unnormalized(radius: f64) -> f64 {
    // integrate k^3 P(k) W^2(kR) dln k; the spectrum support is well inside
    // the k range for any radius the box can resolve
    let ln_k_min = (1.0e-5_f64).ln();
    let ln_k_max = (1.0e3_f64).ln();
    simpson(ln_k_min, ln_k_max, 600, |ln_k| {
        let k = ln_k.exp();
        let t = transfer(k);
        let window = tophat_window(k * radius);
        k.powf(3.0 + POWER_INDEX) * t * t * window * window
    }) / (2.0 * PI * PI)
}

#[derive(Debug, Clone)]
pub struct SigmaTable {
    spline: CubicSpline,
    m_lo: f64,
    m_hi: f64,
}

impl SigmaTable {
    /// Table over [m_lo, m_hi] Msun; evaluation clamps to the span, so the
    /// span must cover every mass the run can query (M_MIN down-weighted by
    /// the WDM floor up to the largest filter mass).
    pub fn new(m_lo: f64, m_hi: f64) -> ComputeResult<Self> {
        if !(m_lo > 0.0) || !(m_hi > m_lo) {
            return Err(BubbleError::internal(
                "SYS.SIGMA_TABLE_RANGE",
                format!("invalid sigma table mass range [{m_lo}, {m_hi}]"),
            ));
        }
        let eight_mpc_over_h = 8.0 / HLITTLE;
        let norm = SIGMA_8 * SIGMA_8 / sigma_sq_unnormalized(eight_mpc_over_h);

        let node_count = 250;
        let ln_lo = m_lo.ln();
        let ln_hi = m_hi.ln();
        let step = (ln_hi - ln_lo) / (node_count - 1) as f64;
        let mut ln_masses = Vec::with_capacity(node_count);
        let mut sigmas = Vec::with_capacity(node_count);
        for i in 0..node_count {
            let ln_m = ln_lo + step * i as f64;
            let radius = cosmo::mtor(ln_m.exp());
            ln_masses.push(ln_m);
            sigmas.push((norm * sigma_sq_unnormalized(radius)).sqrt());
        }

        let spline = CubicSpline::new(ln_masses, sigmas).map_err(|source| {
            BubbleError::internal(
                "SYS.SIGMA_TABLE_SPLINE",
                format!("failed to build sigma(M) spline: {source}"),
            )
        })?;
        Ok(Self { spline, m_lo, m_hi })
    }

    pub fn sigma(&self, mass: f64) -> f64 {
        self.spline.eval(mass.ln())
    }

    /// d sigma / d ln M at `mass` (negative: variance falls with mass).
    pub fn dsigma_dlnm(&self, mass: f64) -> f64 {
        self.spline.eval_deriv(mass.ln())
    }

    pub fn mass_range(&self) -> (f64, f64) {
        (self.m_lo, self.m_hi)
    }
}

#[cfg(test)]
mod tests {
    use super::{sigma_sq_unnormalized, SigmaTable};
    use crate::common::constants::{HLITTLE, SIGMA_8};
    use crate::cosmo;

    #[test]
    fn sigma_decreases_with_mass() {
        let table = SigmaTable::new(1.0e7, 1.0e16).expect("table");
        let mut previous = table.sigma(1.0e7);
        for mass in [1.0e9, 1.0e11, 1.0e13, 1.0e15] {
            let current = table.sigma(mass);
            assert!(current < previous, "sigma must fall with mass (M={mass})");
            assert!(table.dsigma_dlnm(mass) < 0.0);
            previous = current;
        }
    }

    #[test]
    fn normalization_recovers_sigma8() {
        let m8 = cosmo::rtom(8.0 / HLITTLE);
        let table = SigmaTable::new(1.0e7, 1.0e17).expect("table");
        let actual = table.sigma(m8);
        assert!(
            (actual / SIGMA_8 - 1.0).abs() < 5.0e-3,
            "sigma(M_8) = {actual}, expected {SIGMA_8}"
        );
    }

    #[test]
    fn unnormalized_integral_is_positive_and_finite() {
        for radius in [0.1, 1.0, 8.0, 50.0] {
            let value = sigma_sq_unnormalized(radius);
            assert!(value.is_finite() && value > 0.0, "radius {radius}");
        }
    }
}
