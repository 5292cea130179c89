//! Physical constants and run defaults.
//!
//! Values that the legacy parameter headers fixed at compile time live here;
//! anything a run may override sits in [`crate::common::config::RunParams`].

/// Linear critical overdensity for spherical collapse.
pub const DELTAC: f64 = 1.68;

/// Generic single-precision comparison tolerance carried over from the
/// original float pipeline; also gates the power-law branch selection.
pub const FRACT_FLOAT_ERR: f64 = 1.0e-7;

/// Threshold below which a neutral fraction counts as fully ionized.
pub const TINY: f64 = 1.0e-30;

/// Dark-ages short-circuit threshold on `mean_f_coll_st * zeta`.
pub const HII_ROUND_ERR: f64 = 1.0e-3;

/// (4 pi / 3)^(-1/3): converts a cell edge length to the radius of the
/// sphere with the same volume.
pub const L_FACTOR: f64 = 0.620_350_491;

/// Geometric step ratio of the filter-radius ladder.
pub const DELTA_R_HII_FACTOR: f64 = 1.1;

/// Default maximum bubble scale (ionizing-photon mean free path), Mpc.
pub const R_BUBBLE_MAX: f64 = 50.0;

/// Default minimum bubble scale, Mpc.
pub const R_BUBBLE_MIN: f64 = L_FACTOR;

/// Default constant ionizing efficiency zeta.
pub const HII_EFF_FACTOR: f64 = 31.5;

/// Default minimum virial temperature of ionizing halos, K.
pub const ION_TVIR_MIN: f64 = 1.0e4;

/// Default direct minimum source mass, Msun; negative disables it in favor
/// of the virial-temperature threshold.
pub const ION_M_MIN: f64 = -1.0;

/// Poisson sub-grid correction threshold: expected halo counts below this
/// receive a stochastic draw on the last filter step.
pub const N_POISSON: f64 = 5.0;

/// Star-formation timescale in units of the Hubble time.
pub const T_STAR: f64 = 0.5;

/// Spectral index of the ionizing background near the HI edge.
pub const ALPHA_UVB: f64 = 5.0;

/// HI photoionization cross section at the Lyman edge, cm^2.
pub const SIGMA_HI: f64 = 6.3e-18;

/// Ionizing photons produced per stellar baryon.
pub const N_GAMMA_UV: f64 = 5000.0;

/// Case-B recombination coefficient at 1e4 K, cm^3 s^-1.
pub const ALPHA_B: f64 = 2.6e-13;

pub const CM_PER_MPC: f64 = 3.086e24;

/// Defaults of the double-power-law source parameterization.
pub const STELLAR_BARYON_FRAC: f64 = 0.05;
pub const STELLAR_BARYON_PL: f64 = 0.5;
pub const ESC_FRAC: f64 = 0.1;
pub const ESC_PL: f64 = -0.5;
/// log10 of the halo mass below which star formation drops off, Msun.
pub const MASS_DROP_LOG10: f64 = 8.0;
/// Pivot mass of the double power law, Msun.
pub const M_PIVOT: f64 = 1.0e10;

/// Sheth-Tormen mass-function parameters.
pub const SHETH_A: f64 = 0.353;
pub const SHETH_LITTLE_A: f64 = 0.73;
pub const SHETH_P: f64 = 0.175;

/// Warm-dark-matter particle mass, keV, and effective degrees of freedom;
/// only consulted when the run enables the WDM pressure cutoff.
pub const M_WDM_KEV: f64 = 2.0;
pub const G_X_WDM: f64 = 1.5;

/// Fiducial flat-LCDM cosmology.
pub const OMEGA_M: f64 = 0.308;
pub const OMEGA_L: f64 = 0.692;
pub const OMEGA_B: f64 = 0.0484;
pub const HLITTLE: f64 = 0.678;
pub const SIGMA_8: f64 = 0.815;
pub const POWER_INDEX: f64 = 0.968;
pub const Y_HE: f64 = 0.245;

/// H0 in s^-1 per unit hlittle.
pub const HO_PER_HLITTLE: f64 = 3.2407e-18;

/// Critical density, Msun Mpc^-3 h^-2.
pub const RHO_CRIT_MSUN_MPC3: f64 = 2.775e11;

/// Critical density, g cm^-3 h^-2.
pub const RHO_CRIT_CGS: f64 = 1.8788e-29;

/// Proton mass, g.
pub const M_PROTON_G: f64 = 1.6726e-24;
