//! Binary box-file interface: one little-endian f32 per grid cell, x slowest
//! and z fastest, grid dimension and box length encoded in the filename.
//! Prior-state boxes are optional on the first (highest-redshift) invocation
//! and default to the sentinel values.

use crate::common::config::{BubbleAlgorithm, EfficiencyModel, RunParams};
use crate::domain::{BubbleError, ComputeResult};
use crate::engine::ResolvedRun;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub fn read_box(path: &Path, expected_cells: usize) -> ComputeResult<Vec<f64>> {
    let bytes = fs::read(path).map_err(|source| {
        BubbleError::io(
            "IO.BOX_READ",
            format!("unable to open box file '{}': {}", path.display(), source),
        )
    })?;
    decode_box(path, &bytes, expected_cells)
}

/// Prior-state read: a missing file is not an error, a short one is.
pub fn read_box_if_present(path: &Path, expected_cells: usize) -> ComputeResult<Option<Vec<f64>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(source) if source.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(BubbleError::io(
                "IO.BOX_READ",
                format!("unable to open box file '{}': {}", path.display(), source),
            ));
        }
    };
    decode_box(path, &bytes, expected_cells).map(Some)
}

fn decode_box(path: &Path, bytes: &[u8], expected_cells: usize) -> ComputeResult<Vec<f64>> {
    if bytes.len() != expected_cells * 4 {
        return Err(BubbleError::io(
            "IO.BOX_SHORT_READ",
            format!(
                "box file '{}' holds {} bytes, expected {} ({} cells)",
                path.display(),
                bytes.len(),
                expected_cells * 4,
                expected_cells
            ),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64)
        .collect())
}

pub fn write_box(path: &Path, values: &[f64]) -> ComputeResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| {
            BubbleError::io(
                "IO.BOX_DIR",
                format!(
                    "unable to create box directory '{}': {}",
                    parent.display(),
                    source
                ),
            )
        })?;
    }
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &value in values {
        bytes.extend_from_slice(&(value as f32).to_le_bytes());
    }
    fs::write(path, bytes).map_err(|source| {
        BubbleError::io(
            "IO.BOX_WRITE",
            format!("unable to write box file '{}': {}", path.display(), source),
        )
    })
}

/// Ingests a halo list (whitespace-delimited `mass x y z` records with
/// positions normalized to [0, 1]) into a collapsed-mass grid. The list is
/// mass-ordered; ingestion stops at the first halo below `m_min`.
pub fn read_halo_grid(path: &Path, m_min: f64, dim: usize) -> ComputeResult<Vec<f64>> {
    let content = fs::read_to_string(path).map_err(|source| {
        BubbleError::io(
            "IO.HALO_LIST",
            format!("unable to open halo list '{}': {}", path.display(), source),
        )
    })?;

    let mut grid = vec![0.0_f64; dim * dim * dim];
    let mut tokens = content.split_whitespace();
    loop {
        let Some(mass_token) = tokens.next() else {
            break;
        };
        let parse = |token: &str| -> ComputeResult<f64> {
            token.parse::<f64>().map_err(|source| {
                BubbleError::io(
                    "IO.HALO_LIST_PARSE",
                    format!(
                        "malformed halo record in '{}': '{}' ({})",
                        path.display(),
                        token,
                        source
                    ),
                )
            })
        };
        let mass = parse(mass_token)?;
        let (Some(xt), Some(yt), Some(zt)) = (tokens.next(), tokens.next(), tokens.next()) else {
            return Err(BubbleError::io(
                "IO.HALO_LIST_PARSE",
                format!("truncated halo record at the end of '{}'", path.display()),
            ));
        };
        if mass < m_min {
            break;
        }
        let to_cell = |fraction: f64| -> usize {
            ((fraction * dim as f64) as usize).min(dim - 1)
        };
        let x = to_cell(parse(xt)?);
        let y = to_cell(parse(yt)?);
        let z = to_cell(parse(zt)?);
        grid[(x * dim + y) * dim + z] += mass;
    }
    Ok(grid)
}

/// Filename catalog following the legacy box-naming convention: redshift as
/// a zero-padded %06.2f tag, filter/mean-free-path markers on the evolved
/// state boxes, and the efficiency parameters on the neutral-fraction box.
#[derive(Debug, Clone, Copy)]
pub struct BoxCatalog<'a> {
    params: &'a RunParams,
}

impl<'a> BoxCatalog<'a> {
    pub fn new(params: &'a RunParams) -> Self {
        Self { params }
    }

    fn z_tag(z: f64) -> String {
        format!("{z:06.2}")
    }

    fn geometry_tag(&self) -> String {
        format!("{}_{:.0}Mpc", self.params.grid_dim, self.params.box_len)
    }

    fn state_tag(&self, z: f64, mfp: f64) -> String {
        format!(
            "z{}_HIIfilter{}_RHIImax{:.0}_{}",
            Self::z_tag(z),
            self.params.filter.tag(),
            mfp,
            self.geometry_tag()
        )
    }

    pub fn density(&self, z: f64) -> PathBuf {
        self.params.boxes_dir.join(format!(
            "updated_smoothed_deltax_z{}_{}",
            Self::z_tag(z),
            self.geometry_tag()
        ))
    }

    pub fn electron_fraction(&self, z: f64) -> PathBuf {
        self.params.boxes_dir.join("Ts_evolution").join(format!(
            "xeneutral_zprime{}_{}",
            Self::z_tag(z),
            self.geometry_tag()
        ))
    }

    pub fn halo_list(&self, z: f64) -> PathBuf {
        self.params.boxes_dir.join(format!(
            "updated_halos_z{}_{}",
            Self::z_tag(z),
            self.geometry_tag()
        ))
    }

    pub fn n_rec(&self, z: f64, mfp: f64) -> PathBuf {
        self.params
            .boxes_dir
            .join(format!("Nrec_{}", self.state_tag(z, mfp)))
    }

    pub fn z_re(&self, z: f64, mfp: f64) -> PathBuf {
        self.params
            .boxes_dir
            .join(format!("z_first_ionization_{}", self.state_tag(z, mfp)))
    }

    pub fn gamma12(&self, z: f64, mfp: f64) -> PathBuf {
        self.params
            .boxes_dir
            .join(format!("Gamma12aveHII_{}", self.state_tag(z, mfp)))
    }

    pub fn neutral_fraction(&self, run: &ResolvedRun, global_xh: f64) -> PathBuf {
        let algorithm_prefix = match self.params.bubble_algorithm {
            BubbleAlgorithm::CellCenter => "",
            BubbleAlgorithm::Sphere => "sphere_",
        };
        let halo_tag = if self.params.use_halo_field {
            ""
        } else {
            "nohalos_"
        };
        let name = match self.params.efficiency {
            EfficiencyModel::Constant { zeta, alpha } => format!(
                "{}xH_{}z{}_nf{:.6}_eff{:.1}_effPLindex{:.1}_HIIfilter{}_Mmin{:.1e}_RHIImax{:.0}_{}",
                algorithm_prefix,
                halo_tag,
                Self::z_tag(run.redshift),
                global_xh,
                zeta,
                alpha,
                self.params.filter.tag(),
                run.m_min,
                run.mfp,
                self.geometry_tag()
            ),
            EfficiencyModel::StarFormation {
                f_star10,
                alpha_star,
                f_esc10,
                alpha_esc,
                m_drop,
            } => format!(
                "{}xH_{}z{}_nf{:.6}_Fstar{:.4}_starPL{:.4}_Fesc{:.4}_escPL{:.4}_Mdrop{:.2e}_HIIfilter{}_RHIImax{:.0}_{}",
                algorithm_prefix,
                halo_tag,
                Self::z_tag(run.redshift),
                global_xh,
                f_star10,
                alpha_star,
                f_esc10,
                alpha_esc,
                m_drop,
                self.params.filter.tag(),
                run.mfp,
                self.geometry_tag()
            ),
        };
        self.params.boxes_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::{read_box, read_box_if_present, read_halo_grid, write_box, BoxCatalog};
    use crate::common::config::RunParams;
    use crate::engine::resolve_run;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn box_round_trip_preserves_values_at_f32_precision() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("box");
        let values = vec![0.0, -0.5, 1.25, 3.5e8];

        write_box(&path, &values).expect("write");
        let back = read_box(&path, values.len()).expect("read");
        for (&a, &b) in values.iter().zip(&back) {
            assert!((a - b).abs() <= a.abs() * 1.0e-7);
        }
    }

    #[test]
    fn short_boxes_are_fatal_but_missing_prior_state_is_not() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("truncated");
        fs::write(&path, [0_u8; 10]).expect("seed file");

        let error = read_box(&path, 8).expect_err("short read");
        assert_eq!(error.placeholder(), "IO.BOX_SHORT_READ");
        let error = read_box_if_present(&path, 8).expect_err("short read");
        assert_eq!(error.placeholder(), "IO.BOX_SHORT_READ");

        let absent = temp.path().join("absent");
        assert!(read_box_if_present(&absent, 8).expect("ok").is_none());
    }

    #[test]
    fn halo_ingestion_stops_below_the_mass_threshold() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("halos");
        fs::write(
            &path,
            "5.0e9 0.1 0.1 0.1\n2.0e9 0.1 0.1 0.1\n5.0e7 0.9 0.9 0.9\n3.0e9 0.5 0.5 0.5\n",
        )
        .expect("seed list");

        let dim = 4;
        let grid = read_halo_grid(&path, 1.0e8, dim).expect("ingest");
        let total: f64 = grid.iter().sum();
        // the two leading halos land in the same cell; everything after the
        // first sub-threshold record is ignored
        assert!((total - 7.0e9).abs() < 1.0);
        assert!((grid[0] - 7.0e9).abs() < 1.0);
    }

    #[test]
    fn filenames_carry_redshift_geometry_and_efficiency() {
        let params = RunParams {
            grid_dim: 128,
            box_len: 200.0,
            ..RunParams::default()
        };
        let run = resolve_run(&params, 7.5, None).expect("resolve");
        let catalog = BoxCatalog::new(&params);

        let density = catalog.density(7.5);
        let name = density.file_name().and_then(|n| n.to_str()).expect("name");
        assert_eq!(name, "updated_smoothed_deltax_z007.50_128_200Mpc");

        let xh = catalog.neutral_fraction(&run, 0.423);
        let name = xh.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("xH_nohalos_z007.50_nf0.423000_eff31.5"));
        assert!(name.ends_with("_128_200Mpc"));
    }
}
