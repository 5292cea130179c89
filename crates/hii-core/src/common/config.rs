//! Run configuration: the immutable flag set and physics parameters that the
//! legacy build resolved from compile-time headers plus argv.
//!
//! `RunParams` is deserialized once (JSON params file and/or CLI overrides),
//! validated before any field allocation, and passed by reference through the
//! pipeline. Components never consult global state.

use crate::common::constants;
use crate::domain::{BubbleError, ComputeResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Low-pass kernel applied in spectral space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Real-space top-hat sphere of radius R.
    RealTopHat,
    /// Sharp cut in k at the volume-equivalent wavenumber.
    SharpK,
    /// Gaussian with volume-equating width.
    Gaussian,
}

impl FilterKind {
    /// Integer tag used in output box filenames.
    pub const fn tag(self) -> u8 {
        match self {
            Self::RealTopHat => 0,
            Self::SharpK => 1,
            Self::Gaussian => 2,
        }
    }
}

/// How cells crossing the ionization criterion are flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BubbleAlgorithm {
    /// Paint the full sphere of radius R around the crossing cell
    /// (periodic wrap, idempotent union).
    Sphere,
    /// Flag only the crossing cell itself.
    CellCenter,
}

/// Ionizing-efficiency parameterization. The two families are mutually
/// exclusive; the resolver rejects a run that configures both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "model")]
pub enum EfficiencyModel {
    /// Constant zeta, optionally with a luminosity-mass power-law exponent.
    ///
    /// Branch selection note: the shipped pipeline routes `|alpha| <
    /// FRACT_FLOAT_ERR` through the power-law conditional spline and any
    /// non-zero `alpha` through the erfc asymptotic path, which ignores the
    /// exponent. That selection is preserved here as the compatibility
    /// contract.
    Constant { zeta: f64, alpha: f64 },
    /// Double-power-law stellar and escape fractions with a low-mass
    /// star-formation drop-off.
    StarFormation {
        f_star10: f64,
        alpha_star: f64,
        f_esc10: f64,
        alpha_esc: f64,
        /// Halo mass below which star formation is suppressed, Msun.
        m_drop: f64,
    },
}

impl EfficiencyModel {
    /// Effective photons-per-baryon efficiency entering the criterion.
    pub fn zeta(&self) -> f64 {
        match *self {
            Self::Constant { zeta, .. } => zeta,
            Self::StarFormation {
                f_star10, f_esc10, ..
            } => constants::N_GAMMA_UV * f_star10 * f_esc10,
        }
    }
}

impl Default for EfficiencyModel {
    fn default() -> Self {
        Self::Constant {
            zeta: constants::HII_EFF_FACTOR,
            alpha: 0.0,
        }
    }
}

/// Complete run configuration. Field-presence flags resolve once here; every
/// component receives them through this struct rather than re-deriving them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParams {
    /// Grid cells per side of the ionization box.
    pub grid_dim: usize,
    /// Comoving box side length, Mpc.
    pub box_len: f64,
    /// Use a discrete halo field instead of the analytic collapse fraction.
    pub use_halo_field: bool,
    /// Fold in pre-ionization by X-rays from a prior spin-temperature step.
    pub use_xray_preionization: bool,
    /// Track inhomogeneous recombinations across redshift steps.
    pub inhomogeneous_recombinations: bool,
    pub filter: FilterKind,
    pub bubble_algorithm: BubbleAlgorithm,
    pub efficiency: EfficiencyModel,
    /// Geometric ladder step ratio, > 1.
    pub delta_r_factor: f64,
    pub r_bubble_min: f64,
    /// Maximum bubble scale (ionizing mean free path), Mpc.
    pub r_bubble_max: f64,
    /// Minimum virial temperature of sources, K; <= 0 disables it.
    pub ion_tvir_min: f64,
    /// Direct minimum source mass, Msun; <= 0 disables it.
    pub ion_m_min: f64,
    /// Expected-count ceiling for the sub-grid Poisson correction.
    pub n_poisson: f64,
    /// Star-formation timescale in Hubble times.
    pub t_star: f64,
    /// Apply the warm-dark-matter Jeans-mass floor to the source mass.
    pub wdm_pressure_cutoff: bool,
    /// Seed for the sub-grid Poisson draws; a fixed seed makes the partial
    /// ionization step reproducible.
    pub rng_seed: u64,
    /// Directory holding the input/output box files.
    pub boxes_dir: PathBuf,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            grid_dim: 256,
            box_len: 300.0,
            use_halo_field: false,
            use_xray_preionization: false,
            inhomogeneous_recombinations: false,
            filter: FilterKind::SharpK,
            bubble_algorithm: BubbleAlgorithm::CellCenter,
            efficiency: EfficiencyModel::default(),
            delta_r_factor: constants::DELTA_R_HII_FACTOR,
            r_bubble_min: constants::R_BUBBLE_MIN,
            r_bubble_max: constants::R_BUBBLE_MAX,
            ion_tvir_min: constants::ION_TVIR_MIN,
            ion_m_min: constants::ION_M_MIN,
            n_poisson: constants::N_POISSON,
            t_star: constants::T_STAR,
            wdm_pressure_cutoff: false,
            rng_seed: 0,
            boxes_dir: PathBuf::from("Boxes"),
        }
    }
}

impl RunParams {
    pub fn from_json_file(path: &Path) -> ComputeResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| {
            BubbleError::io(
                "IO.PARAMS_READ",
                format!("failed to read params file '{}': {}", path.display(), source),
            )
        })?;
        serde_json::from_str(&content).map_err(|source| {
            BubbleError::config(
                "INPUT.PARAMS_PARSE",
                format!(
                    "failed to parse params file '{}': {}",
                    path.display(),
                    source
                ),
            )
        })
    }

    /// Cell edge length, Mpc.
    pub fn cell_len(&self) -> f64 {
        self.box_len / self.grid_dim as f64
    }

    pub fn cell_count(&self) -> usize {
        self.grid_dim * self.grid_dim * self.grid_dim
    }

    /// Effective cell scale entering the ladder floor. The sphere-painting
    /// algorithm on a discrete halo field is noise-sensitive on sub-Mpc
    /// cells, where the factor reverts to 1.
    pub fn cell_length_factor(&self) -> f64 {
        if self.use_halo_field
            && self.bubble_algorithm == BubbleAlgorithm::Sphere
            && self.cell_len() < 1.0
        {
            1.0
        } else {
            constants::L_FACTOR
        }
    }

    /// Rejects contradictory configurations before any field is allocated.
    pub fn validate(&self) -> ComputeResult<()> {
        if self.grid_dim < 2 {
            return Err(BubbleError::config(
                "INPUT.GRID_DIM",
                format!("grid_dim must be at least 2, got {}", self.grid_dim),
            ));
        }
        if !(self.box_len > 0.0) {
            return Err(BubbleError::config(
                "INPUT.BOX_LEN",
                format!("box_len must be positive, got {}", self.box_len),
            ));
        }
        if !(self.delta_r_factor > 1.0) {
            return Err(BubbleError::config(
                "INPUT.DELTA_R_FACTOR",
                format!(
                    "ladder step ratio must exceed 1, got {}",
                    self.delta_r_factor
                ),
            ));
        }
        if self.ion_tvir_min > 0.0 && self.ion_m_min > 0.0 {
            return Err(BubbleError::config(
                "INPUT.SOURCE_MASS_MODEL",
                "ion_tvir_min and ion_m_min are mutually exclusive; disable one by setting it non-positive",
            ));
        }
        if self.ion_tvir_min <= 0.0 && self.ion_m_min <= 0.0 {
            return Err(BubbleError::config(
                "INPUT.SOURCE_MASS_MODEL",
                "one of ion_tvir_min or ion_m_min must be enabled (positive)",
            ));
        }
        if let EfficiencyModel::Constant { zeta, .. } = self.efficiency {
            if !(zeta > 0.0) {
                return Err(BubbleError::config(
                    "INPUT.EFFICIENCY",
                    format!("ionizing efficiency must be positive, got {}", zeta),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BubbleAlgorithm, EfficiencyModel, FilterKind, RunParams};

    #[test]
    fn default_params_pass_validation() {
        RunParams::default().validate().expect("defaults are valid");
    }

    #[test]
    fn contradictory_source_mass_models_are_rejected() {
        let params = RunParams {
            ion_tvir_min: 1.0e4,
            ion_m_min: 1.0e8,
            ..RunParams::default()
        };
        let error = params.validate().expect_err("both thresholds enabled");
        assert_eq!(error.placeholder(), "INPUT.SOURCE_MASS_MODEL");
    }

    #[test]
    fn sub_mpc_halo_sphere_runs_drop_the_cell_length_factor() {
        let mut params = RunParams {
            grid_dim: 512,
            box_len: 300.0,
            use_halo_field: true,
            bubble_algorithm: BubbleAlgorithm::Sphere,
            ..RunParams::default()
        };
        assert_eq!(params.cell_length_factor(), 1.0);

        params.bubble_algorithm = BubbleAlgorithm::CellCenter;
        assert!(params.cell_length_factor() < 1.0);
    }

    #[test]
    fn params_round_trip_through_json() {
        let params = RunParams {
            filter: FilterKind::Gaussian,
            efficiency: EfficiencyModel::StarFormation {
                f_star10: 0.05,
                alpha_star: 0.5,
                f_esc10: 0.1,
                alpha_esc: -0.5,
                m_drop: 1.0e8,
            },
            ..RunParams::default()
        };
        let text = serde_json::to_string(&params).expect("serialize");
        let back: RunParams = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, params);
    }
}
