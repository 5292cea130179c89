//! Per-cell collapse-fraction evaluation at one filter scale.
//!
//! Three modes: the conditional spline (constant-efficiency and
//! star-formation parameterizations), the erfc asymptotic formula, and the
//! direct halo-field ratio. The box average of the raw values feeds the
//! Sheth-Tormen normalization applied by the engine.

use crate::common::config::EfficiencyModel;
use crate::common::constants::{DELTAC, HII_ROUND_ERR};
use crate::cosmo;
use crate::domain::{BubbleError, ComputeResult};
use crate::tables::CollapseTables;
use rayon::prelude::*;
use std::f64::consts::PI;

/// Raw (un-normalized) collapse fractions for one filter scale.
#[derive(Debug, Clone)]
pub struct FcollField {
    pub values: Vec<f64>,
    pub box_mean: f64,
}

/// The dark-ages fast path: the mean collapse fraction is numerically unable
/// to ionize anything, so the whole volume is reported uniformly neutral and
/// no filtering runs at all.
pub fn is_dark_ages(mean_f_coll_st: f64, zeta: f64) -> bool {
    mean_f_coll_st * zeta < HII_ROUND_ERR
}

/// Evaluates the collapse fraction of every cell at the given scale.
///
/// `m_coll_filtered` switches on halo-field mode; otherwise the analytic
/// conditional mass function serves the cells, with the path selection
/// described on [`crate::tables::SourceWeight::for_conditional`].
#[allow(clippy::too_many_arguments)]
pub fn evaluate_box(
    tables: &CollapseTables,
    efficiency: &EfficiencyModel,
    z: f64,
    m_min: f64,
    radius: f64,
    mass_of_scale: f64,
    pixel_volume: f64,
    delta_filtered: &[f64],
    m_coll_filtered: Option<&[f64]>,
) -> ComputeResult<FcollField> {
    let values: Vec<f64> = match m_coll_filtered {
        Some(m_coll) => {
            if m_coll.len() != delta_filtered.len() {
                return Err(BubbleError::internal(
                    "SYS.FCOLL_SHAPE",
                    format!(
                        "halo field has {} cells but density has {}",
                        m_coll.len(),
                        delta_filtered.len()
                    ),
                ));
            }
            // ratio of collapsed mass to total mass inside the filter volume,
            // corrected from the sphere volume to the cell volume
            let volume_correction = 4.0 / 3.0 * PI * radius.powi(3) / pixel_volume;
            m_coll
                .par_iter()
                .zip(delta_filtered)
                .map(|(&mass, &delta)| {
                    let density_over_mean = 1.0 + delta;
                    mass / (mass_of_scale * density_over_mean) * volume_correction
                })
                .collect()
        }
        None => {
            let conditional = tables.conditional_table(efficiency, z, m_min, mass_of_scale)?;
            match conditional {
                Some(spline) => delta_filtered
                    .par_iter()
                    .map(|&delta| {
                        if delta < DELTAC {
                            spline.eval(delta)
                        } else {
                            // the entire cell sits inside collapsed structure
                            1.0
                        }
                    })
                    .collect(),
                None => {
                    let growth = cosmo::growth_factor(z);
                    let sigma_min = tables.sigma().sigma(m_min);
                    let sigma_scale = tables.sigma().sigma(mass_of_scale);
                    // the snapped last step can push the filter mass below
                    // M_MIN; a zero denominator sends the argument to
                    // infinity and the erfc to zero
                    let erfc_denom = (2.0
                        * (sigma_min * sigma_min - sigma_scale * sigma_scale).max(0.0))
                    .sqrt();
                    delta_filtered
                        .par_iter()
                        .map(|&delta| {
                            if delta < DELTAC {
                                tables.splined_erfc((DELTAC - delta) / growth / erfc_denom)
                            } else {
                                1.0
                            }
                        })
                        .collect()
                }
            }
        }
    };

    let box_mean = values.par_iter().sum::<f64>() / values.len() as f64;
    Ok(FcollField { values, box_mean })
}
