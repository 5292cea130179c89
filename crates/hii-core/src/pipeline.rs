//! One full redshift invocation against the box directory: read inputs and
//! prior state, run the engine, persist the updated state. All file traffic
//! happens here, at the run boundaries — never inside the radius loop.

use crate::boxio::{self, BoxCatalog};
use crate::common::config::RunParams;
use crate::domain::ComputeResult;
use crate::engine::{self, IonizationEngine, RedshiftFields};
use crate::fcoll;
use crate::tables::CollapseTables;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub redshift: f64,
    pub global_neutral_fraction: f64,
    pub neutral_fraction_box: PathBuf,
    pub dark_ages: bool,
}

pub fn run_redshift(
    params: &RunParams,
    redshift: f64,
    prev_redshift: Option<f64>,
) -> ComputeResult<RunSummary> {
    let run = engine::resolve_run(params, redshift, prev_redshift)?;
    info!(
        redshift,
        prev_redshift = run.prev_redshift,
        zeta = run.zeta,
        m_min = run.m_min,
        mfp = run.mfp,
        "resolved redshift invocation"
    );

    let tables = CollapseTables::new(run.m_min, params.inhomogeneous_recombinations)?;
    let catalog = BoxCatalog::new(params);
    let n = params.cell_count();

    // decide the dark-ages fast path before touching the density box
    let mean_f_coll_st = tables.mean_collapse_fraction(&params.efficiency, redshift, run.m_min);
    if fcoll::is_dark_ages(mean_f_coll_st, run.zeta) {
        info!(
            mean_f_coll_st,
            zeta = run.zeta,
            "dark ages: writing a uniform neutral box and terminating early"
        );
        let (xh, global) = if params.use_xray_preionization {
            let xe = boxio::read_box(&catalog.electron_fraction(redshift), n)?;
            let xh: Vec<f64> = xe.iter().map(|&x| (1.0 - x).max(0.0)).collect();
            let global = xh.iter().sum::<f64>() / n as f64;
            (xh, global)
        } else {
            let global = 1.0 - crate::cosmo::ionized_fraction_at_equilibrium(redshift);
            (vec![global; n], global)
        };
        let path = catalog.neutral_fraction(&run, global);
        boxio::write_box(&path, &xh)?;
        return Ok(RunSummary {
            redshift,
            global_neutral_fraction: global,
            neutral_fraction_box: path,
            dark_ages: true,
        });
    }

    let delta = boxio::read_box(&catalog.density(redshift), n)?;
    let collapsed_mass = if params.use_halo_field {
        Some(boxio::read_halo_grid(
            &catalog.halo_list(redshift),
            run.m_min,
            params.grid_dim,
        )?)
    } else {
        None
    };
    let electron_fraction = if params.use_xray_preionization {
        Some(boxio::read_box(&catalog.electron_fraction(redshift), n)?)
    } else {
        None
    };
    let (n_rec_prior, z_re_prior) = if params.inhomogeneous_recombinations {
        let n_rec = match boxio::read_box_if_present(&catalog.n_rec(run.prev_redshift, run.mfp), n)?
        {
            Some(values) => values,
            None => {
                info!("earliest redshift call: initializing the recombination count to zero");
                vec![0.0; n]
            }
        };
        let z_re = match boxio::read_box_if_present(&catalog.z_re(run.prev_redshift, run.mfp), n)? {
            Some(values) => values,
            None => vec![-1.0; n],
        };
        (Some(n_rec), Some(z_re))
    } else {
        (None, None)
    };

    let engine = IonizationEngine::new(params, run, &tables)?;
    let outcome = engine.run(RedshiftFields {
        delta,
        collapsed_mass,
        electron_fraction,
        n_rec_prior,
        z_re_prior,
    })?;

    if let Some(n_rec) = &outcome.n_rec {
        boxio::write_box(&catalog.n_rec(redshift, run.mfp), n_rec)?;
    }
    if let Some(z_re) = &outcome.z_re {
        boxio::write_box(&catalog.z_re(redshift, run.mfp), z_re)?;
    }
    if let Some(gamma12) = &outcome.gamma12 {
        boxio::write_box(&catalog.gamma12(redshift, run.mfp), gamma12)?;
    }

    let path = catalog.neutral_fraction(&run, outcome.global_neutral_fraction);
    boxio::write_box(&path, &outcome.neutral_fraction)?;
    info!(
        global_neutral_fraction = outcome.global_neutral_fraction,
        box_path = %path.display(),
        "neutral-fraction box written"
    );

    Ok(RunSummary {
        redshift,
        global_neutral_fraction: outcome.global_neutral_fraction,
        neutral_fraction_box: path,
        dark_ages: outcome.dark_ages,
    })
}
