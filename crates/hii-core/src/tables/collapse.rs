//! Collapsed-fraction evaluation: Sheth-Tormen box means and the
//! extended-Press-Schechter conditional collapse fraction splined over
//! density at each filter scale.

use super::sigma::SigmaTable;
use crate::common::config::EfficiencyModel;
use crate::common::constants::{
    DELTAC, FRACT_FLOAT_ERR, M_PIVOT, SHETH_A, SHETH_LITTLE_A, SHETH_P,
};
use crate::cosmo;
use crate::domain::{BubbleError, ComputeResult};
use crate::numerics::{CubicSpline, GaussLegendre};
use std::f64::consts::PI;

/// Largest halo mass entering the mean collapse-fraction integrals, Msun.
pub const M_MAX_INTEGRAL: f64 = 1.0e16;

/// Per-halo-mass source weighting applied inside the collapse integrals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceWeight {
    Unity,
    /// (M / pivot)^alpha luminosity-mass power law.
    PowerLaw { pivot: f64, alpha: f64 },
    /// Double-power-law stellar and escape fractions with an exponential
    /// star-formation drop below `m_drop`, relative to the 1e10 Msun pivot.
    StarFormation {
        f_star10: f64,
        alpha_star: f64,
        f_esc10: f64,
        alpha_esc: f64,
        m_drop: f64,
    },
}

impl SourceWeight {
    pub fn apply(&self, mass: f64) -> f64 {
        match *self {
            Self::Unity => 1.0,
            Self::PowerLaw { pivot, alpha } => (mass / pivot).powf(alpha),
            Self::StarFormation {
                f_star10,
                alpha_star,
                f_esc10,
                alpha_esc,
                m_drop,
            } => {
                let f_star = (f_star10 * (mass / M_PIVOT).powf(alpha_star)).min(1.0);
                let f_esc = (f_esc10 * (mass / M_PIVOT).powf(alpha_esc)).min(1.0);
                f_star * f_esc / (f_star10 * f_esc10) * (-m_drop / mass).exp()
            }
        }
    }

    /// Weight used for the conditional spline of the given efficiency model,
    /// reproducing the shipped branch selection: the power-law spline serves
    /// `|alpha| < FRACT_FLOAT_ERR`, while non-zero alpha falls back to the
    /// erfc asymptotic path (`None`).
    pub fn for_conditional(efficiency: &EfficiencyModel, m_min: f64) -> Option<Self> {
        match *efficiency {
            EfficiencyModel::StarFormation {
                f_star10,
                alpha_star,
                f_esc10,
                alpha_esc,
                m_drop,
            } => Some(Self::StarFormation {
                f_star10,
                alpha_star,
                f_esc10,
                alpha_esc,
                m_drop,
            }),
            EfficiencyModel::Constant { alpha, .. } => {
                if alpha.abs() < FRACT_FLOAT_ERR {
                    Some(Self::PowerLaw {
                        pivot: m_min,
                        alpha,
                    })
                } else {
                    None
                }
            }
        }
    }
}

/// Sheth-Tormen multiplicity function f(sigma) at collapse threshold
/// `deltac_z` (already growth-corrected).
fn sheth_tormen_multiplicity(sigma: f64, deltac_z: f64) -> f64 {
    let nu_sq = deltac_z * deltac_z / (sigma * sigma);
    SHETH_A
        * (2.0 * SHETH_LITTLE_A / PI).sqrt()
        * (1.0 + (1.0 / (SHETH_LITTLE_A * nu_sq)).powf(SHETH_P))
        * deltac_z
        / sigma
        * (-0.5 * SHETH_LITTLE_A * nu_sq).exp()
}

/// Mean Sheth-Tormen collapse fraction above `m_min` at redshift z, with the
/// given per-mass source weight.
pub fn mean_collapse_fraction(
    sigma_table: &SigmaTable,
    quad: &GaussLegendre,
    z: f64,
    m_min: f64,
    weight: SourceWeight,
) -> f64 {
    let deltac_z = DELTAC / cosmo::growth_factor(z);
    quad.integrate(m_min.ln(), M_MAX_INTEGRAL.ln(), |ln_m| {
        let mass = ln_m.exp();
        let sigma = sigma_table.sigma(mass);
        let dlnsigma_dlnm = sigma_table.dsigma_dlnm(mass) / sigma;
        sheth_tormen_multiplicity(sigma, deltac_z) * dlnsigma_dlnm.abs() * weight.apply(mass)
    })
}

/// Mean collapse fraction for a run's efficiency model, with the shipped
/// branch selection between the power-law and plain Sheth-Tormen means.
pub fn mean_collapse_fraction_for_model(
    sigma_table: &SigmaTable,
    quad: &GaussLegendre,
    efficiency: &EfficiencyModel,
    z: f64,
    m_min: f64,
) -> f64 {
    let weight = match *efficiency {
        EfficiencyModel::StarFormation {
            f_star10,
            alpha_star,
            f_esc10,
            alpha_esc,
            m_drop,
        } => SourceWeight::StarFormation {
            f_star10,
            alpha_star,
            f_esc10,
            alpha_esc,
            m_drop,
        },
        EfficiencyModel::Constant { alpha, .. } => {
            if alpha.abs() < FRACT_FLOAT_ERR {
                SourceWeight::PowerLaw {
                    pivot: m_min,
                    alpha,
                }
            } else {
                SourceWeight::Unity
            }
        }
    };
    mean_collapse_fraction(sigma_table, quad, z, m_min, weight)
}

/// Conditional (extended-Press-Schechter) collapse fraction in a region of
/// smoothed overdensity `delta` at filter mass `m_scale`, integrated by
/// quadrature over halo masses in [m_min, m_scale] with the given weight.
pub fn conditional_collapse_fraction(
    sigma_table: &SigmaTable,
    quad: &GaussLegendre,
    z: f64,
    delta: f64,
    m_min: f64,
    m_scale: f64,
    weight: SourceWeight,
) -> f64 {
    if delta >= DELTAC {
        return 1.0;
    }
    if m_scale <= m_min {
        return 0.0;
    }
    let growth = cosmo::growth_factor(z);
    let barrier = (DELTAC - delta) / growth;
    let sigma_scale_sq = {
        let s = sigma_table.sigma(m_scale);
        s * s
    };

    let fraction = quad.integrate(m_min.ln(), m_scale.ln(), |ln_m| {
        let mass = ln_m.exp();
        let sigma = sigma_table.sigma(mass);
        let variance_excess = sigma * sigma - sigma_scale_sq;
        if variance_excess <= 0.0 {
            return 0.0;
        }
        let dvariance_dlnm = (2.0 * sigma * sigma_table.dsigma_dlnm(mass)).abs();
        barrier / (2.0 * PI).sqrt() * variance_excess.powf(-1.5)
            * (-0.5 * barrier * barrier / variance_excess).exp()
            * dvariance_dlnm
            * weight.apply(mass)
    });
    fraction.clamp(0.0, 1.0)
}

/// Per-radius conditional collapse-fraction spline over density, the
/// in-memory analog of the per-scale spline the filter loop rebuilds.
#[derive(Debug, Clone)]
pub struct ConditionalFcollTable {
    spline: CubicSpline,
}

impl ConditionalFcollTable {
    pub fn build(
        sigma_table: &SigmaTable,
        quad: &GaussLegendre,
        z: f64,
        m_min: f64,
        m_scale: f64,
        weight: SourceWeight,
    ) -> ComputeResult<Self> {
        let node_count = 120;
        let delta_lo = -1.0 + FRACT_FLOAT_ERR;
        let delta_hi = DELTAC - 1.0e-4;
        let step = (delta_hi - delta_lo) / (node_count - 1) as f64;
        let mut deltas = Vec::with_capacity(node_count);
        let mut fractions = Vec::with_capacity(node_count);
        for i in 0..node_count {
            let delta = delta_lo + step * i as f64;
            deltas.push(delta);
            fractions.push(conditional_collapse_fraction(
                sigma_table,
                quad,
                z,
                delta,
                m_min,
                m_scale,
                weight,
            ));
        }
        let spline = CubicSpline::new(deltas, fractions).map_err(|source| {
            BubbleError::internal(
                "SYS.FCOLL_SPLINE",
                format!("failed to build conditional collapse spline: {source}"),
            )
        })?;
        Ok(Self { spline })
    }

    /// Collapse fraction at smoothed overdensity `delta` (< DELTAC; the
    /// evaluator saturates denser cells to 1 before consulting the spline).
    pub fn eval(&self, delta: f64) -> f64 {
        self.spline.eval(delta).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        conditional_collapse_fraction, mean_collapse_fraction, ConditionalFcollTable, SourceWeight,
    };
    use crate::common::constants::DELTAC;
    use crate::cosmo;
    use crate::numerics::{erfc, GaussLegendre};
    use crate::tables::sigma::SigmaTable;

    fn table() -> SigmaTable {
        SigmaTable::new(1.0e6, 1.0e17).expect("sigma table")
    }

    #[test]
    fn unweighted_conditional_matches_closed_form_erfc() {
        let sigma_table = table();
        let quad = GaussLegendre::new(120);
        let z = 9.0;
        let m_min = 1.0e8;
        let m_scale = 1.0e12;

        let sigma_min = sigma_table.sigma(m_min);
        let sigma_scale = sigma_table.sigma(m_scale);
        let denom = (2.0 * (sigma_min * sigma_min - sigma_scale * sigma_scale)).sqrt();
        let growth = cosmo::growth_factor(z);

        for delta in [-0.5, 0.0, 0.4, 1.2] {
            let quadrature = conditional_collapse_fraction(
                &sigma_table,
                &quad,
                z,
                delta,
                m_min,
                m_scale,
                SourceWeight::Unity,
            );
            let closed_form = erfc((DELTAC - delta) / growth / denom);
            assert!(
                (quadrature - closed_form).abs() < 0.02 * closed_form.max(1.0e-6),
                "delta={delta}: quadrature {quadrature} vs erfc {closed_form}"
            );
        }
    }

    #[test]
    fn conditional_fraction_saturates_above_the_collapse_threshold() {
        let sigma_table = table();
        let quad = GaussLegendre::new(60);
        let value = conditional_collapse_fraction(
            &sigma_table,
            &quad,
            8.0,
            DELTAC + 0.5,
            1.0e8,
            1.0e12,
            SourceWeight::Unity,
        );
        assert_eq!(value, 1.0);
    }

    #[test]
    fn conditional_fraction_grows_with_density() {
        let sigma_table = table();
        let quad = GaussLegendre::new(60);
        let spline = ConditionalFcollTable::build(
            &sigma_table,
            &quad,
            9.0,
            1.0e8,
            1.0e12,
            SourceWeight::Unity,
        )
        .expect("spline");
        let mut previous = spline.eval(-0.9);
        for delta in [-0.5, 0.0, 0.5, 1.0, 1.5] {
            let current = spline.eval(delta);
            assert!(
                current >= previous,
                "fcoll must be monotonic in density (delta={delta})"
            );
            previous = current;
        }
    }

    #[test]
    fn mean_collapse_fraction_grows_toward_lower_redshift() {
        let sigma_table = table();
        let quad = GaussLegendre::new(120);
        let early = mean_collapse_fraction(&sigma_table, &quad, 20.0, 1.0e8, SourceWeight::Unity);
        let late = mean_collapse_fraction(&sigma_table, &quad, 7.0, 1.0e8, SourceWeight::Unity);
        assert!(late > early, "early {early}, late {late}");
        assert!(early > 0.0 && late < 1.0);
    }

    #[test]
    fn zero_exponent_power_law_reduces_to_unity_weight() {
        let sigma_table = table();
        let quad = GaussLegendre::new(120);
        let plain = mean_collapse_fraction(&sigma_table, &quad, 9.0, 1.0e8, SourceWeight::Unity);
        let power_law = mean_collapse_fraction(
            &sigma_table,
            &quad,
            9.0,
            1.0e8,
            SourceWeight::PowerLaw {
                pivot: 1.0e8,
                alpha: 0.0,
            },
        );
        assert!((plain - power_law).abs() < 1.0e-12);
    }
}
