//! Background cosmology: expansion rate, growth factor, characteristic
//! timescales, and the mass-scale conversions the excursion-set machinery
//! consumes.
//!
//! Everything here is a pure function of redshift and the fiducial flat-LCDM
//! parameters in [`crate::common::constants`].

use crate::common::constants::{
    G_X_WDM, HLITTLE, HO_PER_HLITTLE, L_FACTOR, M_PROTON_G, M_WDM_KEV, OMEGA_B, OMEGA_L, OMEGA_M,
    RHO_CRIT_CGS, RHO_CRIT_MSUN_MPC3, Y_HE,
};
use std::f64::consts::PI;

/// H0 in s^-1.
pub fn hubble_0() -> f64 {
    HLITTLE * HO_PER_HLITTLE
}

/// H(z) in s^-1 for flat matter + lambda.
pub fn hubble(z: f64) -> f64 {
    hubble_0() * (OMEGA_L + OMEGA_M * (1.0 + z).powi(3)).sqrt()
}

/// Matter-dominated Hubble time 2/(3 H) at redshift z, seconds.
pub fn t_hubble(z: f64) -> f64 {
    2.0 / (3.0 * hubble_0() * OMEGA_M.sqrt() * (1.0 + z).powf(1.5))
}

/// dt/dz in seconds (negative: time runs forward as z decreases).
pub fn dtdz(z: f64) -> f64 {
    -1.0 / ((1.0 + z) * hubble(z))
}

/// Matter density parameter at redshift z.
pub fn omega_m_z(z: f64) -> f64 {
    let cube = OMEGA_M * (1.0 + z).powi(3);
    cube / (cube + OMEGA_L)
}

/// Linear growth factor normalized to D(0) * (1+z) form, via the
/// Carroll, Press & Turner (1992) closed-form fit.
pub fn growth_factor(z: f64) -> f64 {
    fn g(omega: f64) -> f64 {
        2.5 * omega
            / (1.0 / 70.0 + omega * (209.0 - omega) / 140.0 + omega.powf(4.0 / 7.0))
    }
    g(omega_m_z(z)) / (g(OMEGA_M) * (1.0 + z))
}

/// Comoving matter density, Msun Mpc^-3.
pub fn mean_matter_density() -> f64 {
    OMEGA_M * RHO_CRIT_MSUN_MPC3 * HLITTLE * HLITTLE
}

/// Mass enclosed by a real-space top-hat of radius r Mpc at mean density.
pub fn rtom(radius: f64) -> f64 {
    4.0 / 3.0 * PI * radius.powi(3) * mean_matter_density()
}

/// Top-hat radius enclosing mass m Msun at mean density.
pub fn mtor(mass: f64) -> f64 {
    (3.0 * mass / (4.0 * PI * mean_matter_density())).powf(1.0 / 3.0)
}

/// Mass of one grid cell expressed through its volume-equivalent sphere.
pub fn cell_mass(box_len: f64, grid_dim: usize) -> f64 {
    rtom(L_FACTOR * box_len / grid_dim as f64)
}

/// Virial overdensity relative to critical, Bryan & Norman (1998) fit.
fn delta_vir(z: f64) -> f64 {
    let d = omega_m_z(z) - 1.0;
    18.0 * PI * PI + 82.0 * d - 39.0 * d * d
}

/// Halo mass in Msun whose virial temperature equals `tvir` K at redshift z,
/// for mean molecular weight `mu` (1.22 neutral, 0.6 ionized primordial gas).
pub fn tvir_to_mass(z: f64, tvir: f64, mu: f64) -> f64 {
    let temperature_scale = 1.98e4
        * (mu / 0.6)
        * ((1.0 + z) / 10.0)
        * (OMEGA_M / omega_m_z(z) * delta_vir(z) / (18.0 * PI * PI)).powf(1.0 / 3.0);
    1.0e8 / HLITTLE * (tvir / temperature_scale).powf(1.5)
}

/// Effective Jeans mass from warm-dark-matter pressure support, Msun.
pub fn wdm_jeans_mass() -> f64 {
    let z_eq = 3600.0 * (OMEGA_M - OMEGA_B) * HLITTLE * HLITTLE / 0.15;
    let fudge = 60.0;
    fudge
        * 3.06e8
        * (1.5 / G_X_WDM)
        * ((OMEGA_M - OMEGA_B) * HLITTLE * HLITTLE / 0.15).sqrt()
        * M_WDM_KEV.powi(-4)
        * (z_eq / 3000.0).powf(1.5)
}

/// Comoving baryon number density today, cm^-3 (hydrogen plus helium nuclei).
pub fn baryon_number_density_0() -> f64 {
    let rho_b = OMEGA_B * RHO_CRIT_CGS * HLITTLE * HLITTLE;
    let hydrogen = rho_b * (1.0 - Y_HE) / M_PROTON_G;
    let helium = rho_b * Y_HE / (4.0 * M_PROTON_G);
    hydrogen + helium
}

/// Comoving hydrogen number density today, cm^-3.
pub fn hydrogen_number_density_0() -> f64 {
    OMEGA_B * RHO_CRIT_CGS * HLITTLE * HLITTLE * (1.0 - Y_HE) / M_PROTON_G
}

/// Residual ionized fraction at recombination equilibrium.
///
/// A freeze-out fit: fully ionized well before recombination, dropping
/// through z ~ 1100 to the frozen residual ~2e-4 that holds through the
/// dark ages. Only the uniform dark-ages output consumes this.
pub fn ionized_fraction_at_equilibrium(z: f64) -> f64 {
    let frozen = 1.2e-5 * OMEGA_M.sqrt() / (OMEGA_B * HLITTLE);
    let step = 0.5 * (1.0 + ((z - 1080.0) / 80.0).tanh());
    (frozen + (1.0 - frozen) * step).min(1.0)
}
