//! The excursion-set ionization engine: drives the filter-radius loop,
//! applies the per-cell ionization criterion, and keeps the first-crossing
//! bookkeeping (`z_re`, `Gamma12`) consistent with the strict large-to-small
//! scale ordering.

use crate::common::config::{BubbleAlgorithm, EfficiencyModel, RunParams};
use crate::common::constants::{
    ALPHA_UVB, CM_PER_MPC, FRACT_FLOAT_ERR, SIGMA_HI, TINY,
};
use crate::cosmo;
use crate::domain::{BubbleError, ComputeResult};
use crate::fcoll;
use crate::fields::{FieldKind, ScalarField3D, SpectralGrid};
use crate::recomb;
use crate::scales::ScaleLadder;
use crate::tables::CollapseTables;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Poisson;
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Scalars fixed for one redshift invocation, derived from the run
/// parameters before any field is allocated.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRun {
    pub redshift: f64,
    pub prev_redshift: f64,
    pub zstep: f64,
    /// Effective photons-per-baryon ionizing efficiency.
    pub zeta: f64,
    /// Minimum source halo mass, Msun. Immutable after resolution.
    pub m_min: f64,
    /// Maximum bubble scale (ionizing mean free path), Mpc.
    pub mfp: f64,
    pub growth: f64,
    /// Star-formation timescale t_STAR * t_H(z), seconds.
    pub t_ast: f64,
    pub fabs_dtdz: f64,
    pub pixel_volume: f64,
    pub pixel_mass: f64,
}

/// Resolves and validates the per-invocation scalars. Every configuration
/// error surfaces here, before any allocation.
pub fn resolve_run(
    params: &RunParams,
    redshift: f64,
    prev_redshift: Option<f64>,
) -> ComputeResult<ResolvedRun> {
    params.validate()?;
    if !(redshift > 0.0) {
        return Err(BubbleError::config(
            "INPUT.REDSHIFT",
            format!("redshift must be positive, got {redshift}"),
        ));
    }

    let prev = if params.inhomogeneous_recombinations {
        let prev = prev_redshift.ok_or_else(|| {
            BubbleError::config(
                "INPUT.PREV_REDSHIFT",
                "recombination tracking requires the previous redshift",
            )
        })?;
        if prev <= redshift {
            return Err(BubbleError::config(
                "INPUT.REDSHIFT_ORDER",
                format!("previous redshift {prev} must be larger than the current {redshift}"),
            ));
        }
        prev
    } else {
        prev_redshift.unwrap_or(redshift + 0.2)
    };

    let mut m_min = if params.ion_tvir_min > 0.0 {
        // mean molecular weight: neutral primordial gas below 1e4 K,
        // ionized above
        let mu = if params.ion_tvir_min < 9.999_99e3 {
            1.22
        } else {
            0.6
        };
        cosmo::tvir_to_mass(redshift, params.ion_tvir_min, mu)
    } else {
        params.ion_m_min
    };
    if let EfficiencyModel::StarFormation { m_drop, .. } = params.efficiency {
        if m_drop != 0.0 {
            m_min = m_drop / 10.0;
        }
    }
    if params.wdm_pressure_cutoff {
        let jeans = cosmo::wdm_jeans_mass();
        if m_min < jeans {
            warn!(
                m_min,
                jeans, "source mass floor raised to the WDM effective Jeans mass"
            );
            m_min = jeans;
        }
    }

    Ok(ResolvedRun {
        redshift,
        prev_redshift: prev,
        zstep: prev - redshift,
        zeta: params.efficiency.zeta(),
        m_min,
        mfp: params.r_bubble_max,
        growth: cosmo::growth_factor(redshift),
        t_ast: params.t_star * cosmo::t_hubble(redshift),
        fabs_dtdz: cosmo::dtdz(redshift).abs(),
        pixel_volume: params.cell_len().powi(3),
        pixel_mass: cosmo::cell_mass(params.box_len, params.grid_dim),
    })
}

/// Input fields for one redshift invocation, already in real space.
/// Presence must match the run's flags; prior-state fields default to the
/// sentinel values on the first (highest-redshift) invocation.
#[derive(Debug, Clone, Default)]
pub struct RedshiftFields {
    pub delta: Vec<f64>,
    pub collapsed_mass: Option<Vec<f64>>,
    pub electron_fraction: Option<Vec<f64>>,
    pub n_rec_prior: Option<Vec<f64>>,
    pub z_re_prior: Option<Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct IonizationOutcome {
    pub neutral_fraction: Vec<f64>,
    pub global_neutral_fraction: f64,
    pub z_re: Option<Vec<f64>>,
    pub gamma12: Option<Vec<f64>>,
    pub n_rec: Option<Vec<f64>>,
    /// Whole run short-circuited: uniform output, no filtering ran.
    pub dark_ages: bool,
    /// Mean filter radius at which cells first crossed the barrier, Mpc.
    pub mean_gamma_radius: Option<f64>,
}

pub struct IonizationEngine<'a> {
    params: &'a RunParams,
    run: ResolvedRun,
    tables: &'a CollapseTables,
    grid: SpectralGrid,
}

impl<'a> IonizationEngine<'a> {
    pub fn new(
        params: &'a RunParams,
        run: ResolvedRun,
        tables: &'a CollapseTables,
    ) -> ComputeResult<Self> {
        let grid = SpectralGrid::new(params.grid_dim, params.box_len)?;
        Ok(Self {
            params,
            run,
            tables,
            grid,
        })
    }

    pub fn grid(&self) -> &SpectralGrid {
        &self.grid
    }

    pub fn resolved(&self) -> &ResolvedRun {
        &self.run
    }

    /// Runs the full excursion-set pass for one redshift.
    pub fn run(&self, fields: RedshiftFields) -> ComputeResult<IonizationOutcome> {
        let n = self.grid.cell_count();
        self.check_field_presence(&fields, n)?;

        let z = self.run.redshift;
        let mean_f_coll_st =
            self.tables
                .mean_collapse_fraction(&self.params.efficiency, z, self.run.m_min);
        info!(
            redshift = z,
            m_min = self.run.m_min,
            mean_f_coll_st,
            "mean Sheth-Tormen collapse fraction"
        );

        if fcoll::is_dark_ages(mean_f_coll_st, self.run.zeta) {
            info!(
                mean_f_coll_st,
                zeta = self.run.zeta,
                "collapse fraction too small to ionize anything; declaring the volume neutral"
            );
            return Ok(self.dark_ages_outcome(&fields, n));
        }

        // spectral baselines, cloned and filtered per radius
        let mut delta_field = ScalarField3D::from_real(FieldKind::Density, fields.delta);
        delta_field.forward_transform(&self.grid)?;
        let m_coll_field = match fields.collapsed_mass {
            Some(samples) => {
                let mut field = ScalarField3D::from_real(FieldKind::CollapsedMass, samples);
                field.forward_transform(&self.grid)?;
                Some(field)
            }
            None => None,
        };
        let xe_field = match fields.electron_fraction {
            Some(samples) => {
                let mut field = ScalarField3D::from_real(FieldKind::ElectronFraction, samples);
                field.forward_transform(&self.grid)?;
                Some(field)
            }
            None => None,
        };
        let n_rec_field = match fields.n_rec_prior {
            Some(samples) => {
                let mut field = ScalarField3D::from_real(FieldKind::RecombinationCount, samples);
                field.forward_transform(&self.grid)?;
                Some(field)
            }
            None => None,
        };

        let inhomo = self.params.inhomogeneous_recombinations;
        let mut xh = vec![1.0_f64; n];
        let mut z_re = if inhomo { fields.z_re_prior } else { None };
        let mut gamma12 = if inhomo { Some(vec![0.0_f64; n]) } else { None };
        let mut rng = StdRng::seed_from_u64(self.params.rng_seed);

        let ladder = ScaleLadder::new(self.params, self.run.mfp, self.run.m_min);
        let cell_scale = ladder.cell_scale();
        let mut gamma_radius_sum = 0.0;
        let mut gamma_radius_count = 0_u64;

        for step in ladder {
            // the snapped last step needs no kernel when it sits exactly at
            // the cell scale
            let kernel_radius = if step.is_last && step.radius <= cell_scale {
                None
            } else {
                Some(step.radius)
            };
            debug!(radius = step.radius, is_last = step.is_last, "filter step");

            let delta_f =
                delta_field.smoothed_real_copy(&self.grid, self.params.filter, kernel_radius)?;
            let m_coll_f = match &m_coll_field {
                Some(field) => Some(field.smoothed_real_copy(
                    &self.grid,
                    self.params.filter,
                    kernel_radius,
                )?),
                None => None,
            };
            let xe_f = match &xe_field {
                Some(field) => Some(field.smoothed_real_copy(
                    &self.grid,
                    self.params.filter,
                    kernel_radius,
                )?),
                None => None,
            };
            let n_rec_f = match &n_rec_field {
                Some(field) => Some(field.smoothed_real_copy(
                    &self.grid,
                    self.params.filter,
                    kernel_radius,
                )?),
                None => None,
            };

            let mass_of_scale = cosmo::rtom(step.radius);
            let fcoll_field = fcoll::evaluate_box(
                self.tables,
                &self.params.efficiency,
                z,
                self.run.m_min,
                step.radius,
                mass_of_scale,
                self.run.pixel_volume,
                &delta_f,
                m_coll_f.as_deref(),
            )?;

            // normalize the conditional collapse fraction against the mean
            // mass function; the discrete halo field needs no correction
            let st_over_ps = if m_coll_f.is_some() {
                1.0
            } else if fcoll_field.box_mean > 0.0 {
                mean_f_coll_st / fcoll_field.box_mean
            } else {
                0.0
            };
            debug!(
                radius = step.radius,
                box_mean = fcoll_field.box_mean,
                st_over_ps,
                "collapse-fraction normalization"
            );

            // photon-starved ionizing background at the crossing scale;
            // invalid after reionization completes
            let gamma_prefactor = (1.0 + z).powi(2)
                * (step.radius * CM_PER_MPC)
                * SIGMA_HI
                * ALPHA_UVB
                / (ALPHA_UVB + 2.75)
                * cosmo::baryon_number_density_0()
                * self.run.zeta
                / 1.0e-12;

            self.sweep_cells(CellSweep {
                step_radius: step.radius,
                is_last: step.is_last,
                delta_f: &delta_f,
                fcoll_values: &fcoll_field.values,
                n_rec_f: n_rec_f.as_deref(),
                xe_f: xe_f.as_deref(),
                st_over_ps,
                gamma_prefactor,
                halo_mode: m_coll_f.is_some(),
                xh: &mut xh,
                z_re: z_re.as_deref_mut(),
                gamma12: gamma12.as_deref_mut(),
                rng: &mut rng,
                gamma_radius_sum: &mut gamma_radius_sum,
                gamma_radius_count: &mut gamma_radius_count,
            })?;
        }

        let global_neutral_fraction = xh.par_iter().sum::<f64>() / n as f64;
        let mean_gamma_radius = (gamma_radius_count > 0)
            .then(|| gamma_radius_sum / gamma_radius_count as f64);
        if let Some(mean_radius) = mean_gamma_radius {
            info!(
                mean_radius,
                "mean filter radius used for the recorded ionizing background"
            );
        }

        let n_rec = match (&n_rec_field, &gamma12) {
            (Some(field), Some(gamma)) => Some(recomb::accumulate(
                &self.grid,
                self.tables,
                &self.run,
                self.params.filter,
                field,
                &delta_field,
                gamma,
                &xh,
            )?),
            _ => None,
        };

        Ok(IonizationOutcome {
            neutral_fraction: xh,
            global_neutral_fraction,
            z_re,
            gamma12,
            n_rec,
            dark_ages: false,
            mean_gamma_radius,
        })
    }

    fn check_field_presence(&self, fields: &RedshiftFields, n: usize) -> ComputeResult<()> {
        let expect = |name: &str, present: bool, wanted: bool| -> ComputeResult<()> {
            if present != wanted {
                return Err(BubbleError::internal(
                    "SYS.FIELD_PRESENCE",
                    format!(
                        "field '{name}' presence ({present}) does not match the run flags ({wanted})"
                    ),
                ));
            }
            Ok(())
        };
        if fields.delta.len() != n {
            return Err(BubbleError::internal(
                "SYS.FIELD_SHAPE",
                format!("density field has {} cells, expected {n}", fields.delta.len()),
            ));
        }
        expect(
            "collapsed_mass",
            fields.collapsed_mass.is_some(),
            self.params.use_halo_field,
        )?;
        expect(
            "electron_fraction",
            fields.electron_fraction.is_some(),
            self.params.use_xray_preionization,
        )?;
        expect(
            "n_rec_prior",
            fields.n_rec_prior.is_some(),
            self.params.inhomogeneous_recombinations,
        )?;
        expect(
            "z_re_prior",
            fields.z_re_prior.is_some(),
            self.params.inhomogeneous_recombinations,
        )?;
        Ok(())
    }

    fn dark_ages_outcome(&self, fields: &RedshiftFields, n: usize) -> IonizationOutcome {
        let (xh, global) = match &fields.electron_fraction {
            Some(xe) => {
                let xh: Vec<f64> = xe.iter().map(|&x| (1.0 - x).max(0.0)).collect();
                let global = xh.iter().sum::<f64>() / n as f64;
                (xh, global)
            }
            None => {
                let global =
                    1.0 - cosmo::ionized_fraction_at_equilibrium(self.run.redshift);
                (vec![global; n], global)
            }
        };
        IonizationOutcome {
            neutral_fraction: xh,
            global_neutral_fraction: global,
            z_re: None,
            gamma12: None,
            n_rec: None,
            dark_ages: true,
            mean_gamma_radius: None,
        }
    }

    /// Per-cell criterion sweep at one filter scale. The sweep is the single
    /// owner of every output field; sphere painting writes non-local cells,
    /// which keeps this pass sequential by construction.
    fn sweep_cells(&self, sweep: CellSweep<'_>) -> ComputeResult<()> {
        let CellSweep {
            step_radius,
            is_last,
            delta_f,
            fcoll_values,
            n_rec_f,
            xe_f,
            st_over_ps,
            gamma_prefactor,
            halo_mode,
            xh,
            mut z_re,
            mut gamma12,
            rng,
            gamma_radius_sum,
            gamma_radius_count,
        } = sweep;

        let dim = self.grid.dim();
        let cell_len = self.params.cell_len();
        let radius_cells = step_radius / cell_len;
        let z = self.run.redshift;
        let zeta = self.run.zeta;

        for index in 0..xh.len() {
            let density_over_mean = 1.0 + delta_f[index];
            let f_coll = st_over_ps * fcoll_values[index];
            // recombinations per baryon inside the filter volume
            let rec = n_rec_f
                .map(|field| field[index] / density_over_mean)
                .unwrap_or(0.0);
            // residual neutral fraction left by X-ray pre-ionization
            let xhi_from_xrays = xe_f.map(|field| 1.0 - field[index]).unwrap_or(1.0);

            if f_coll * zeta > xhi_from_xrays * (1.0 + rec) {
                // first crossing happens at the largest scale; record the
                // background and reionization redshift exactly once
                if let Some(gamma) = gamma12.as_deref_mut() {
                    if xh[index] > FRACT_FLOAT_ERR {
                        gamma[index] = gamma_prefactor * (f_coll / self.run.t_ast);
                        *gamma_radius_sum += step_radius;
                        *gamma_radius_count += 1;
                    }
                }
                if let Some(z_re) = z_re.as_deref_mut() {
                    if z_re[index] < 0.0 {
                        z_re[index] = z;
                    }
                }
                match self.params.bubble_algorithm {
                    BubbleAlgorithm::CellCenter => xh[index] = 0.0,
                    BubbleAlgorithm::Sphere => {
                        paint_ionized_sphere(xh, dim, radius_cells, cell_coords(index, dim));
                    }
                }
            } else if is_last && xh[index] > TINY {
                // partial ionization on the finest scale; sub-grid Poisson
                // scatter only where the expected source count is small
                let mut f_coll = f_coll;
                if !halo_mode {
                    let expected_sources =
                        f_coll * self.run.pixel_mass * density_over_mean / self.run.m_min;
                    if expected_sources < self.params.n_poisson {
                        let drawn = poisson_draw(rng, expected_sources)?;
                        f_coll = drawn as f64 * self.run.m_min
                            / (self.run.pixel_mass * density_over_mean);
                    }
                }
                xh[index] = (xhi_from_xrays - f_coll * zeta).clamp(0.0, 1.0);
            }
        }
        Ok(())
    }
}

struct CellSweep<'s> {
    step_radius: f64,
    is_last: bool,
    delta_f: &'s [f64],
    fcoll_values: &'s [f64],
    n_rec_f: Option<&'s [f64]>,
    xe_f: Option<&'s [f64]>,
    st_over_ps: f64,
    gamma_prefactor: f64,
    halo_mode: bool,
    xh: &'s mut [f64],
    z_re: Option<&'s mut [f64]>,
    gamma12: Option<&'s mut [f64]>,
    rng: &'s mut StdRng,
    gamma_radius_sum: &'s mut f64,
    gamma_radius_count: &'s mut u64,
}

fn poisson_draw(rng: &mut StdRng, mean: f64) -> ComputeResult<u64> {
    if mean <= 0.0 {
        return Ok(0);
    }
    let distribution = Poisson::new(mean).map_err(|source| {
        BubbleError::computation(
            "RUN.POISSON",
            format!("invalid Poisson mean {mean}: {source}"),
        )
    })?;
    Ok(rng.sample(distribution) as u64)
}

pub(crate) fn cell_coords(index: usize, dim: usize) -> (usize, usize, usize) {
    let z = index % dim;
    let y = (index / dim) % dim;
    let x = index / (dim * dim);
    (x, y, z)
}

/// Flags every cell within `radius_cells` of the center as fully ionized,
/// with periodic wrap-around. Union semantics: re-painting an already
/// ionized cell is a no-op.
pub fn paint_ionized_sphere(
    xh: &mut [f64],
    dim: usize,
    radius_cells: f64,
    center: (usize, usize, usize),
) {
    let reach = radius_cells.floor() as i64;
    let radius_sq = radius_cells * radius_cells;
    let dim_i = dim as i64;
    for dx in -reach..=reach {
        for dy in -reach..=reach {
            for dz in -reach..=reach {
                let dist_sq = (dx * dx + dy * dy + dz * dz) as f64;
                if dist_sq > radius_sq {
                    continue;
                }
                let x = (center.0 as i64 + dx).rem_euclid(dim_i) as usize;
                let y = (center.1 as i64 + dy).rem_euclid(dim_i) as usize;
                let z = (center.2 as i64 + dz).rem_euclid(dim_i) as usize;
                xh[(x * dim + y) * dim + z] = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{cell_coords, paint_ionized_sphere, resolve_run};
    use crate::common::config::{EfficiencyModel, RunParams};

    #[test]
    fn sphere_painting_is_idempotent_and_wraps() {
        let dim = 8;
        let mut xh = vec![1.0; dim * dim * dim];
        paint_ionized_sphere(&mut xh, dim, 1.5, (0, 0, 0));
        let after_first = xh.clone();

        // the wrap reaches the far face
        assert_eq!(xh[(7 * dim + 0) * dim + 0], 0.0);
        assert_eq!(xh[(0 * dim + 0) * dim + 7], 0.0);

        paint_ionized_sphere(&mut xh, dim, 1.5, (0, 0, 0));
        assert_eq!(xh, after_first, "re-painting must not change anything");
    }

    #[test]
    fn cell_coords_invert_the_linear_index() {
        let dim = 5;
        for index in [0, 7, 63, 124] {
            let (x, y, z) = cell_coords(index, dim);
            assert_eq!((x * dim + y) * dim + z, index);
        }
    }

    #[test]
    fn recombination_runs_demand_an_ordered_redshift_pair() {
        let params = RunParams {
            inhomogeneous_recombinations: true,
            ..RunParams::default()
        };
        let error = resolve_run(&params, 8.0, Some(7.5)).expect_err("descending pair");
        assert_eq!(error.placeholder(), "INPUT.REDSHIFT_ORDER");

        let error = resolve_run(&params, 8.0, None).expect_err("missing previous");
        assert_eq!(error.placeholder(), "INPUT.PREV_REDSHIFT");

        resolve_run(&params, 8.0, Some(8.2)).expect("valid pair");
    }

    #[test]
    fn star_formation_drop_mass_overrides_the_virial_floor() {
        let params = RunParams {
            efficiency: EfficiencyModel::StarFormation {
                f_star10: 0.05,
                alpha_star: 0.5,
                f_esc10: 0.1,
                alpha_esc: -0.5,
                m_drop: 1.0e9,
            },
            ..RunParams::default()
        };
        let run = resolve_run(&params, 9.0, None).expect("resolve");
        assert_eq!(run.m_min, 1.0e8);
    }

    #[test]
    fn resolved_timescales_are_physical() {
        let run = resolve_run(&RunParams::default(), 9.0, None).expect("resolve");
        assert!(run.t_ast > 0.0);
        assert!(run.fabs_dtdz > 0.0);
        assert!(run.pixel_mass > 0.0);
        assert!((run.zstep - 0.2).abs() < 1.0e-12);
    }
}
