//! Splined recombination rate per baryon.
//!
//! The rate folds sub-grid density structure through the MHR00
//! (Miralda-Escude, Haehnelt & Rees 2000) volume-weighted density PDF with a
//! self-shielding cutoff: gas denser than the shielding threshold stays
//! neutral and does not contribute case-B recombinations. The table is built
//! once per run over (z, log10 Gamma12) and bilinearly interpolated.

use crate::common::constants::ALPHA_B;
use crate::cosmo;
use crate::domain::{BubbleError, ComputeResult};
use crate::numerics::simpson;

const Z_LO: f64 = 2.0;
const Z_HI: f64 = 40.0;
const Z_NODES: usize = 30;
const LG_GAMMA_LO: f64 = -6.0;
const LG_GAMMA_HI: f64 = 2.0;
const LG_GAMMA_NODES: usize = 25;

/// MHR00 high-z slope of the density PDF.
const PDF_BETA: f64 = 2.5;

/// Volume-weighted density PDF shape, unnormalized.
fn pdf_shape(delta: f64, delta0: f64, c0: f64) -> f64 {
    let u = delta.powf(-2.0 / 3.0) - c0;
    let width = 2.0 * delta0 / 3.0;
    delta.powf(-PDF_BETA) * (-0.5 * u * u / (width * width)).exp()
}

fn pdf_moment(delta0: f64, c0: f64, power: f64) -> f64 {
    // integrate Delta^power P(Delta) dDelta in ln Delta
    simpson((1.0e-4_f64).ln(), (1.0e4_f64).ln(), 400, |ln_delta| {
        let delta = ln_delta.exp();
        delta.powf(power + 1.0) * pdf_shape(delta, delta0, c0)
    })
}

/// Fix the PDF's C0 parameter so the mass mean <Delta> equals 1; the mean is
/// monotonically decreasing in C0, so bisection suffices.
fn solve_c0(delta0: f64) -> f64 {
    let mean = |c0: f64| pdf_moment(delta0, c0, 1.0) / pdf_moment(delta0, c0, 0.0);
    let mut lo = 0.01;
    let mut hi = 3.0;
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        if mean(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Self-shielding overdensity threshold for ionizing background strength
/// `gamma12` (units of 1e-12 s^-1) at redshift z.
fn delta_self_shielding(z: f64, gamma12: f64) -> f64 {
    36.0 * gamma12.powf(2.0 / 3.0) * ((1.0 + z) / 8.0).powi(-3)
}

#[derive(Debug, Clone)]
pub struct RecombinationRateTable {
    z_nodes: Vec<f64>,
    lg_gamma_nodes: Vec<f64>,
    /// Row-major over (z, lg_gamma): recombinations per baryon per second.
    rates: Vec<f64>,
}

impl RecombinationRateTable {
    pub fn new() -> ComputeResult<Self> {
        let z_nodes: Vec<f64> = (0..Z_NODES)
            .map(|i| Z_LO + (Z_HI - Z_LO) * i as f64 / (Z_NODES - 1) as f64)
            .collect();
        let lg_gamma_nodes: Vec<f64> = (0..LG_GAMMA_NODES)
            .map(|i| {
                LG_GAMMA_LO + (LG_GAMMA_HI - LG_GAMMA_LO) * i as f64 / (LG_GAMMA_NODES - 1) as f64
            })
            .collect();

        let mut rates = Vec::with_capacity(Z_NODES * LG_GAMMA_NODES);
        for &z in &z_nodes {
            let delta0 = 7.61 / (1.0 + z);
            let c0 = solve_c0(delta0);
            let norm = pdf_moment(delta0, c0, 0.0);
            let n_hydrogen = cosmo::hydrogen_number_density_0() * (1.0 + z).powi(3);

            for &lg_gamma in &lg_gamma_nodes {
                let gamma12 = 10.0_f64.powf(lg_gamma);
                let delta_max = delta_self_shielding(z, gamma12).min(1.0e4);
                let clumping = if delta_max <= 1.0e-4 {
                    0.0
                } else {
                    simpson((1.0e-4_f64).ln(), delta_max.ln(), 300, |ln_delta| {
                        let delta = ln_delta.exp();
                        delta.powi(3) * pdf_shape(delta, delta0, c0)
                    }) / norm
                };
                let rate = ALPHA_B * n_hydrogen * clumping;
                if !rate.is_finite() {
                    return Err(BubbleError::internal(
                        "SYS.RECOMB_TABLE",
                        format!("non-finite recombination rate at z={z}, lg_gamma={lg_gamma}"),
                    ));
                }
                rates.push(rate);
            }
        }

        Ok(Self {
            z_nodes,
            lg_gamma_nodes,
            rates,
        })
    }

    /// Recombinations per baryon per second at effective redshift z under
    /// ionizing background `gamma12`; arguments clamp to the tabulated span.
    pub fn rate(&self, z: f64, gamma12: f64) -> f64 {
        let lg_gamma = gamma12.max(1.0e-30).log10();
        let (zi, zt) = Self::locate(&self.z_nodes, z);
        let (gi, gt) = Self::locate(&self.lg_gamma_nodes, lg_gamma);
        let cols = self.lg_gamma_nodes.len();
        let at = |i: usize, j: usize| self.rates[i * cols + j];
        let low = at(zi, gi) * (1.0 - gt) + at(zi, gi + 1) * gt;
        let high = at(zi + 1, gi) * (1.0 - gt) + at(zi + 1, gi + 1) * gt;
        low * (1.0 - zt) + high * zt
    }

    fn locate(nodes: &[f64], value: f64) -> (usize, f64) {
        let last = nodes.len() - 2;
        if value <= nodes[0] {
            return (0, 0.0);
        }
        if value >= nodes[nodes.len() - 1] {
            return (last, 1.0);
        }
        let mut index = 0;
        while index < last && nodes[index + 1] < value {
            index += 1;
        }
        let t = (value - nodes[index]) / (nodes[index + 1] - nodes[index]);
        (index, t)
    }
}

#[cfg(test)]
mod tests {
    use super::{delta_self_shielding, solve_c0, RecombinationRateTable};

    #[test]
    fn pdf_normalization_fixes_unit_mean() {
        let delta0 = 7.61 / 8.0;
        let c0 = solve_c0(delta0);
        let mean = super::pdf_moment(delta0, c0, 1.0) / super::pdf_moment(delta0, c0, 0.0);
        assert!((mean - 1.0).abs() < 1.0e-6, "mean = {mean}");
    }

    #[test]
    fn rate_increases_with_ionizing_background() {
        let table = RecombinationRateTable::new().expect("table");
        let weak = table.rate(7.0, 1.0e-3);
        let strong = table.rate(7.0, 1.0);
        assert!(
            strong > weak,
            "stronger background shields less gas: weak={weak}, strong={strong}"
        );
    }

    #[test]
    fn rate_is_finite_and_nonnegative_across_the_table() {
        let table = RecombinationRateTable::new().expect("table");
        for z in [2.0, 6.0, 12.0, 25.0, 40.0] {
            for gamma12 in [0.0, 1.0e-5, 1.0e-2, 1.0, 50.0] {
                let rate = table.rate(z, gamma12);
                assert!(rate.is_finite() && rate >= 0.0, "z={z}, gamma={gamma12}");
            }
        }
    }

    #[test]
    fn self_shielding_threshold_scales_with_background() {
        let low = delta_self_shielding(7.0, 0.01);
        let high = delta_self_shielding(7.0, 1.0);
        assert!(high > low);
    }
}
