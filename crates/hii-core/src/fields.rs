//! Real-space/spectral dual representation of the 3D scalar fields and the
//! low-pass filtering applied during the excursion-set scan.
//!
//! The 3D real-to-complex transform is composed from 1D primitives: a real
//! transform along the contiguous z axis and complex transforms along y and
//! x. The packed half-spectrum holds dim * dim * (dim/2 + 1) coefficients.
//! Amplitude convention: the forward transform divides by dim^3 so that the
//! (unnormalized) inverse restores the original samples.

use crate::common::config::FilterKind;
use crate::domain::{BubbleError, ComputeResult};
use num_complex::Complex;
use rayon::prelude::*;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

/// Volume-equating prefactor of the sharp-k cutoff.
const SHARP_K_FACTOR: f64 = 0.413_566_994;
/// Volume-equating prefactor of the Gaussian kernel width.
const GAUSSIAN_FACTOR: f64 = 0.643;

impl FilterKind {
    /// Kernel value at wavenumber magnitude `k_mag` for smoothing radius
    /// `radius`.
    pub fn kernel(self, k_mag: f64, radius: f64) -> f64 {
        let kr = k_mag * radius;
        match self {
            Self::RealTopHat => {
                if kr < 1.0e-4 {
                    1.0
                } else {
                    3.0 * (kr.sin() - kr * kr.cos()) / (kr * kr * kr)
                }
            }
            Self::SharpK => {
                if SHARP_K_FACTOR * kr > 1.0 {
                    0.0
                } else {
                    1.0
                }
            }
            Self::Gaussian => {
                let scaled = GAUSSIAN_FACTOR * kr;
                (-0.5 * scaled * scaled).exp()
            }
        }
    }
}

/// Which physical field a grid holds; selects the post-inverse sanity clamp.
/// Spectral ringing can push smoothed values outside their physical range,
/// and the downstream criterion divides by 1 + delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Density,
    CollapsedMass,
    ElectronFraction,
    RecombinationCount,
}

impl FieldKind {
    pub fn clamp(self, value: f64) -> f64 {
        match self {
            Self::Density => value.max(-1.0 + crate::common::constants::FRACT_FLOAT_ERR),
            Self::CollapsedMass | Self::RecombinationCount => value.max(0.0),
            Self::ElectronFraction => value.clamp(0.0, 0.999),
        }
    }
}

/// FFT plan cache for one grid geometry, built once per run.
pub struct SpectralGrid {
    dim: usize,
    box_len: f64,
    r2c: Arc<dyn RealToComplex<f64>>,
    c2r: Arc<dyn ComplexToReal<f64>>,
    line_forward: Arc<dyn Fft<f64>>,
    line_inverse: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for SpectralGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralGrid")
            .field("dim", &self.dim)
            .field("box_len", &self.box_len)
            .finish()
    }
}

impl SpectralGrid {
    pub fn new(dim: usize, box_len: f64) -> ComputeResult<Self> {
        if dim < 2 {
            return Err(BubbleError::config(
                "INPUT.GRID_DIM",
                format!("spectral grid needs at least 2 cells per side, got {dim}"),
            ));
        }
        if !(box_len > 0.0) {
            return Err(BubbleError::config(
                "INPUT.BOX_LEN",
                format!("box length must be positive, got {box_len}"),
            ));
        }
        let mut real_planner = RealFftPlanner::<f64>::new();
        let mut complex_planner = FftPlanner::<f64>::new();
        Ok(Self {
            dim,
            box_len,
            r2c: real_planner.plan_fft_forward(dim),
            c2r: real_planner.plan_fft_inverse(dim),
            line_forward: complex_planner.plan_fft_forward(dim),
            line_inverse: complex_planner.plan_fft_inverse(dim),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn box_len(&self) -> f64 {
        self.box_len
    }

    pub fn cell_count(&self) -> usize {
        self.dim * self.dim * self.dim
    }

    /// Packed half-spectrum length along z.
    fn spectral_z_len(&self) -> usize {
        self.dim / 2 + 1
    }

    pub fn spectral_len(&self) -> usize {
        self.dim * self.dim * self.spectral_z_len()
    }

    /// Forward 3D r2c transform with the 1/dim^3 amplitude normalization.
    fn forward(&self, real: &[f64]) -> ComputeResult<Vec<Complex<f64>>> {
        let dim = self.dim;
        let nz = self.spectral_z_len();
        let mut spectral = vec![Complex::new(0.0, 0.0); self.spectral_len()];

        // z rows are contiguous in both layouts
        real.par_chunks(dim)
            .zip(spectral.par_chunks_mut(nz))
            .try_for_each_init(
                || vec![0.0; dim],
                |scratch, (row_in, row_out)| {
                    scratch.copy_from_slice(row_in);
                    self.r2c
                        .process(scratch, row_out)
                        .map_err(|source| fft_error("forward z row", &source))
                },
            )?;

        // complex transform along y within each x slab
        spectral
            .par_chunks_mut(dim * nz)
            .for_each_init(
                || vec![Complex::new(0.0, 0.0); dim],
                |scratch, slab| {
                    for kz in 0..nz {
                        for y in 0..dim {
                            scratch[y] = slab[y * nz + kz];
                        }
                        self.line_forward.process(scratch);
                        for y in 0..dim {
                            slab[y * nz + kz] = scratch[y];
                        }
                    }
                },
            );

        // complex transform along x; columns stride across slabs
        let slab_len = dim * nz;
        let mut scratch = vec![Complex::new(0.0, 0.0); dim];
        for column in 0..slab_len {
            for x in 0..dim {
                scratch[x] = spectral[x * slab_len + column];
            }
            self.line_forward.process(&mut scratch);
            for x in 0..dim {
                spectral[x * slab_len + column] = scratch[x];
            }
        }

        let norm = 1.0 / self.cell_count() as f64;
        spectral.par_iter_mut().for_each(|value| *value *= norm);
        Ok(spectral)
    }

    /// Inverse 3D c2r transform; consumes the spectrum (the passes run in
    /// place). No scaling is applied here — the forward normalization
    /// already accounts for the full round trip.
    fn inverse(&self, mut spectral: Vec<Complex<f64>>) -> ComputeResult<Vec<f64>> {
        let dim = self.dim;
        let nz = self.spectral_z_len();
        let slab_len = dim * nz;

        let mut scratch = vec![Complex::new(0.0, 0.0); dim];
        for column in 0..slab_len {
            for x in 0..dim {
                scratch[x] = spectral[x * slab_len + column];
            }
            self.line_inverse.process(&mut scratch);
            for x in 0..dim {
                spectral[x * slab_len + column] = scratch[x];
            }
        }

        spectral
            .par_chunks_mut(slab_len)
            .for_each_init(
                || vec![Complex::new(0.0, 0.0); dim],
                |scratch, slab| {
                    for kz in 0..nz {
                        for y in 0..dim {
                            scratch[y] = slab[y * nz + kz];
                        }
                        self.line_inverse.process(scratch);
                        for y in 0..dim {
                            slab[y * nz + kz] = scratch[y];
                        }
                    }
                },
            );

        let mut real = vec![0.0; self.cell_count()];
        let even = dim % 2 == 0;
        spectral
            .par_chunks_mut(nz)
            .zip(real.par_chunks_mut(dim))
            .try_for_each(|(row_in, row_out)| {
                // the packed format requires purely real DC/Nyquist entries;
                // round-off from the y/x passes leaves a tiny imaginary part
                row_in[0].im = 0.0;
                if even {
                    row_in[nz - 1].im = 0.0;
                }
                self.c2r
                    .process(row_in, row_out)
                    .map_err(|source| fft_error("inverse z row", &source))
            })?;
        Ok(real)
    }

    /// Multiplies the spectrum by the filter kernel at the given radius.
    fn apply_filter(&self, spectral: &mut [Complex<f64>], filter: FilterKind, radius: f64) {
        let dim = self.dim;
        let nz = self.spectral_z_len();
        let delta_k = 2.0 * PI / self.box_len;
        let wrap = |index: usize| -> f64 {
            if index > dim / 2 {
                index as f64 - dim as f64
            } else {
                index as f64
            }
        };

        spectral
            .par_chunks_mut(dim * nz)
            .enumerate()
            .for_each(|(x, slab)| {
                let kx = delta_k * wrap(x);
                for y in 0..dim {
                    let ky = delta_k * wrap(y);
                    for kz in 0..nz {
                        let kz_val = delta_k * kz as f64;
                        let k_mag = (kx * kx + ky * ky + kz_val * kz_val).sqrt();
                        slab[y * nz + kz] *= filter.kernel(k_mag, radius);
                    }
                }
            });
    }
}

fn fft_error(stage: &str, source: &realfft::FftError) -> BubbleError {
    BubbleError::computation("RUN.FFT", format!("{stage} transform failed: {source}"))
}

#[derive(Debug, Clone)]
enum Representation {
    Real(Vec<f64>),
    Spectral(Vec<Complex<f64>>),
}

/// One 3D scalar field with enforced representation validity: filtering is
/// only possible in spectral form, sample access only in real form.
#[derive(Debug, Clone)]
pub struct ScalarField3D {
    kind: FieldKind,
    data: Representation,
}

impl ScalarField3D {
    pub fn from_real(kind: FieldKind, samples: Vec<f64>) -> Self {
        Self {
            kind,
            data: Representation::Real(samples),
        }
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn real(&self) -> ComputeResult<&[f64]> {
        match &self.data {
            Representation::Real(samples) => Ok(samples),
            Representation::Spectral(_) => Err(BubbleError::internal(
                "SYS.FIELD_STATE",
                "field is in spectral form; inverse-transform before reading samples",
            )),
        }
    }

    pub fn forward_transform(&mut self, grid: &SpectralGrid) -> ComputeResult<()> {
        let samples = match &self.data {
            Representation::Real(samples) => samples,
            Representation::Spectral(_) => {
                return Err(BubbleError::internal(
                    "SYS.FIELD_STATE",
                    "field is already in spectral form",
                ));
            }
        };
        if samples.len() != grid.cell_count() {
            return Err(BubbleError::internal(
                "SYS.FIELD_SHAPE",
                format!(
                    "field has {} samples but the grid holds {}",
                    samples.len(),
                    grid.cell_count()
                ),
            ));
        }
        let spectral = grid.forward(samples)?;
        self.data = Representation::Spectral(spectral);
        Ok(())
    }

    pub fn smooth(
        &mut self,
        grid: &SpectralGrid,
        filter: FilterKind,
        radius: f64,
    ) -> ComputeResult<()> {
        match &mut self.data {
            Representation::Spectral(spectral) => {
                grid.apply_filter(spectral, filter, radius);
                Ok(())
            }
            Representation::Real(_) => Err(BubbleError::internal(
                "SYS.FIELD_STATE",
                "field is in real form; forward-transform before filtering",
            )),
        }
    }

    /// Inverse transform with the field's sanity clamp applied.
    pub fn inverse_transform(&mut self, grid: &SpectralGrid) -> ComputeResult<()> {
        let spectral = match std::mem::replace(&mut self.data, Representation::Real(Vec::new())) {
            Representation::Spectral(spectral) => spectral,
            real @ Representation::Real(_) => {
                self.data = real;
                return Err(BubbleError::internal(
                    "SYS.FIELD_STATE",
                    "field is already in real form",
                ));
            }
        };
        let mut samples = grid.inverse(spectral)?;
        let kind = self.kind;
        samples
            .par_iter_mut()
            .for_each(|value| *value = kind.clamp(*value));
        self.data = Representation::Real(samples);
        Ok(())
    }

    /// Real-space samples of a filtered copy of this (spectral) field,
    /// leaving the unfiltered baseline untouched. `radius` of `None` skips
    /// the kernel (used on the snapped last step and for the unfiltered
    /// recombination read-back).
    pub fn smoothed_real_copy(
        &self,
        grid: &SpectralGrid,
        filter: FilterKind,
        radius: Option<f64>,
    ) -> ComputeResult<Vec<f64>> {
        let spectral = match &self.data {
            Representation::Spectral(spectral) => spectral.clone(),
            Representation::Real(_) => {
                return Err(BubbleError::internal(
                    "SYS.FIELD_STATE",
                    "field is in real form; forward-transform before filtering",
                ));
            }
        };
        let mut copy = Self {
            kind: self.kind,
            data: Representation::Spectral(spectral),
        };
        if let Some(radius) = radius {
            copy.smooth(grid, filter, radius)?;
        }
        copy.inverse_transform(grid)?;
        match copy.data {
            Representation::Real(samples) => Ok(samples),
            Representation::Spectral(_) => unreachable!("inverse_transform leaves real data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldKind, FilterKind, ScalarField3D, SpectralGrid};

    fn wavy_field(dim: usize) -> Vec<f64> {
        let mut samples = Vec::with_capacity(dim * dim * dim);
        for x in 0..dim {
            for y in 0..dim {
                for z in 0..dim {
                    let phase = (x * 7 + y * 3 + z) as f64;
                    samples.push((phase * 0.37).sin() * 0.4 + (phase * 0.11).cos() * 0.2);
                }
            }
        }
        samples
    }

    #[test]
    fn forward_then_inverse_reproduces_the_field() {
        let dim = 16;
        let grid = SpectralGrid::new(dim, 100.0).expect("grid");
        let original = wavy_field(dim);
        let mut field = ScalarField3D::from_real(FieldKind::Density, original.clone());

        field.forward_transform(&grid).expect("forward");
        field.inverse_transform(&grid).expect("inverse");

        let restored = field.real().expect("real samples");
        for (index, (&a, &b)) in original.iter().zip(restored).enumerate() {
            assert!(
                (a - b).abs() < 1.0e-10,
                "round trip diverged at {index}: {a} vs {b}"
            );
        }
    }

    #[test]
    fn round_trip_holds_for_odd_grid_sides() {
        let dim = 9;
        let grid = SpectralGrid::new(dim, 50.0).expect("grid");
        let original = wavy_field(dim);
        let mut field = ScalarField3D::from_real(FieldKind::Density, original.clone());
        field.forward_transform(&grid).expect("forward");
        field.inverse_transform(&grid).expect("inverse");
        let restored = field.real().expect("real samples");
        for (&a, &b) in original.iter().zip(restored) {
            assert!((a - b).abs() < 1.0e-10);
        }
    }

    #[test]
    fn smoothing_preserves_the_mean_and_reduces_variance() {
        let dim = 16;
        let grid = SpectralGrid::new(dim, 100.0).expect("grid");
        let original = wavy_field(dim);
        let mean_in = original.iter().sum::<f64>() / original.len() as f64;

        let mut field = ScalarField3D::from_real(FieldKind::Density, original.clone());
        field.forward_transform(&grid).expect("forward");
        let smoothed = field
            .smoothed_real_copy(&grid, FilterKind::RealTopHat, Some(20.0))
            .expect("smoothed copy");

        let mean_out = smoothed.iter().sum::<f64>() / smoothed.len() as f64;
        assert!((mean_in - mean_out).abs() < 1.0e-10);

        let var = |xs: &[f64], mean: f64| {
            xs.iter().map(|&x| (x - mean) * (x - mean)).sum::<f64>() / xs.len() as f64
        };
        assert!(var(&smoothed, mean_out) < var(&original, mean_in));
    }

    #[test]
    fn smoothed_copy_leaves_the_baseline_spectral() {
        let dim = 8;
        let grid = SpectralGrid::new(dim, 40.0).expect("grid");
        let mut field = ScalarField3D::from_real(FieldKind::Density, wavy_field(dim));
        field.forward_transform(&grid).expect("forward");

        let first = field
            .smoothed_real_copy(&grid, FilterKind::SharpK, Some(10.0))
            .expect("first copy");
        let second = field
            .smoothed_real_copy(&grid, FilterKind::SharpK, Some(10.0))
            .expect("second copy");
        assert_eq!(first, second, "baseline must not accumulate filtering");
    }

    #[test]
    fn filter_kernels_are_identity_at_zero_wavenumber() {
        for filter in [
            FilterKind::RealTopHat,
            FilterKind::SharpK,
            FilterKind::Gaussian,
        ] {
            assert!((filter.kernel(0.0, 5.0) - 1.0).abs() < 1.0e-12);
        }
    }

    #[test]
    fn sharp_k_kernel_cuts_above_the_volume_equivalent_scale() {
        let filter = FilterKind::SharpK;
        assert_eq!(filter.kernel(10.0, 10.0), 0.0);
        assert_eq!(filter.kernel(0.01, 10.0), 1.0);
    }

    #[test]
    fn electron_fraction_clamp_bounds_both_sides() {
        assert_eq!(FieldKind::ElectronFraction.clamp(-0.2), 0.0);
        assert_eq!(FieldKind::ElectronFraction.clamp(1.3), 0.999);
        assert!(FieldKind::Density.clamp(-2.0) > -1.0);
        assert_eq!(FieldKind::RecombinationCount.clamp(-4.0), 0.0);
    }

    #[test]
    fn representation_misuse_is_reported() {
        let grid = SpectralGrid::new(8, 40.0).expect("grid");
        let mut field = ScalarField3D::from_real(FieldKind::Density, wavy_field(8));
        assert!(field.smooth(&grid, FilterKind::Gaussian, 3.0).is_err());
        field.forward_transform(&grid).expect("forward");
        assert!(field.real().is_err());
        assert!(field.forward_transform(&grid).is_err());
    }
}
