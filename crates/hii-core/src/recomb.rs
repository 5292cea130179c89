//! Cumulative recombination tracking across redshift steps.
//!
//! After the radius loop the unfiltered density and recombination fields are
//! brought back to real space and each cell accrues recombinations at the
//! splined rate evaluated at its density-corrected effective redshift.
//! Recombinations only accrue in the ionized fraction of a cell.

use crate::domain::{BubbleError, ComputeResult};
use crate::engine::ResolvedRun;
use crate::fields::{ScalarField3D, SpectralGrid};
use crate::tables::CollapseTables;
use rayon::prelude::*;

#[allow(clippy::too_many_arguments)]
pub fn accumulate(
    grid: &SpectralGrid,
    tables: &CollapseTables,
    run: &ResolvedRun,
    filter: crate::common::config::FilterKind,
    n_rec_field: &ScalarField3D,
    delta_field: &ScalarField3D,
    gamma12: &[f64],
    xh: &[f64],
) -> ComputeResult<Vec<f64>> {
    let rate_table = tables.recombination().ok_or_else(|| {
        BubbleError::internal(
            "SYS.RECOMB_TABLE_MISSING",
            "recombination update requested without a rate table",
        )
    })?;

    // unfiltered read-back of the spectral baselines
    let n_rec = n_rec_field.smoothed_real_copy(grid, filter, None)?;
    let delta = delta_field.smoothed_real_copy(grid, filter, None)?;
    if n_rec.len() != xh.len() || delta.len() != xh.len() || gamma12.len() != xh.len() {
        return Err(BubbleError::internal(
            "SYS.RECOMB_SHAPE",
            "recombination update fields disagree in size",
        ));
    }

    let z = run.redshift;
    let updated = (0..xh.len())
        .into_par_iter()
        .map(|index| {
            let density_over_mean = 1.0 + delta[index];
            // local expansion correction: denser gas behaves as if at an
            // earlier effective redshift
            let z_eff = (1.0 + z) * density_over_mean.powf(1.0 / 3.0) - 1.0;
            let delta_n_rec = rate_table.rate(z_eff, gamma12[index])
                * run.fabs_dtdz
                * run.zstep
                * (1.0 - xh[index]);
            n_rec[index] + delta_n_rec
        })
        .collect();
    Ok(updated)
}
