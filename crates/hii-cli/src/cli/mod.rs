use clap::Parser;
use hii_core::common::constants;
use hii_core::{BubbleError, ComputeResult, EfficiencyModel, RunParams};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub fn run_from_env() -> i32 {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{err}");
                return 0;
            }
            _ => {
                let error = CliError::Usage(err.to_string()).as_bubble_error();
                eprintln!("{}", error.diagnostic_line());
                return error.exit_code();
            }
        },
    };

    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            let error = error.as_bubble_error();
            eprintln!("{}", error.diagnostic_line());
            if let Some(summary_line) = error.fatal_exit_line() {
                eprintln!("{summary_line}");
            }
            error.exit_code()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(#[from] BubbleError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    fn as_bubble_error(&self) -> BubbleError {
        match self {
            Self::Usage(message) => BubbleError::config("INPUT.CLI_USAGE", message.clone()),
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => BubbleError::internal("SYS.CLI", format!("{error:#}")),
        }
    }
}

/// Generates the ionization field of one redshift slice from the evolved
/// density box, writing the neutral-fraction box (and, with recombination
/// tracking, the updated N_rec / z_re / Gamma12 state) back to the box
/// directory.
#[derive(Debug, Parser)]
#[command(name = "find-hii-bubbles", version, allow_negative_numbers = true)]
pub struct Cli {
    /// Redshift of the ionization box
    pub redshift: f64,
    /// Previous (higher) redshift; required when recombination tracking is
    /// enabled
    pub prev_redshift: Option<f64>,
    /// Worker threads for the data-parallel grid loops
    #[arg(short = 'p', long = "threads")]
    pub threads: Option<usize>,
    /// JSON run-parameter file (flags below override its scalar entries)
    #[arg(long)]
    pub params: Option<PathBuf>,
    /// Directory holding the box files
    #[arg(long)]
    pub boxes_dir: Option<PathBuf>,
    /// Constant ionizing efficiency zeta
    #[arg(long)]
    pub zeta: Option<f64>,
    /// Minimum virial temperature of sources, K
    #[arg(long)]
    pub tvir_min: Option<f64>,
    /// Ionizing-photon mean free path in the ionized IGM, Mpc
    #[arg(long)]
    pub mfp: Option<f64>,
    /// Power-law exponent of the efficiency-mass scaling
    #[arg(long)]
    pub alpha: Option<f64>,
    /// Stellar baryon fraction at the 1e10 Msun pivot
    #[arg(long)]
    pub f_star10: Option<f64>,
    /// Stellar baryon fraction power-law exponent
    #[arg(long)]
    pub alpha_star: Option<f64>,
    /// Escape fraction at the 1e10 Msun pivot
    #[arg(long)]
    pub f_esc10: Option<f64>,
    /// Escape fraction power-law exponent
    #[arg(long)]
    pub alpha_esc: Option<f64>,
    /// log10 of the star-formation drop-off mass, Msun
    #[arg(long)]
    pub log10_m_drop: Option<f64>,
    /// Seed for the sub-grid Poisson draws
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Cli {
    fn wants_star_formation(&self) -> bool {
        self.f_star10.is_some()
            || self.alpha_star.is_some()
            || self.f_esc10.is_some()
            || self.alpha_esc.is_some()
            || self.log10_m_drop.is_some()
    }
}

pub fn run(cli: Cli) -> Result<i32, CliError> {
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|source| {
                anyhow::anyhow!("failed to size the worker pool to {threads}: {source}")
            })?;
    }

    let params = resolve_params(&cli)?;
    info!(
        redshift = cli.redshift,
        prev_redshift = cli.prev_redshift,
        grid_dim = params.grid_dim,
        box_len = params.box_len,
        "starting redshift invocation"
    );

    let summary = hii_core::run_redshift(&params, cli.redshift, cli.prev_redshift)?;
    println!(
        "neutral fraction is {:.6}{}",
        summary.global_neutral_fraction,
        if summary.dark_ages {
            " (dark-ages fast path)"
        } else {
            ""
        }
    );
    println!(
        "neutral-fraction box written to {}",
        summary.neutral_fraction_box.display()
    );
    Ok(0)
}

/// Merges the params file with the CLI overrides, rejecting contradictory
/// efficiency parameterizations before anything is allocated.
pub fn resolve_params(cli: &Cli) -> ComputeResult<RunParams> {
    let mut params = match &cli.params {
        Some(path) => RunParams::from_json_file(path)?,
        None => RunParams::default(),
    };

    if cli.alpha.is_some() && cli.wants_star_formation() {
        return Err(BubbleError::config(
            "INPUT.EFFICIENCY_MODEL",
            "the power-law exponent and the star-formation parameterization are mutually exclusive",
        ));
    }

    if let Some(dir) = &cli.boxes_dir {
        params.boxes_dir = dir.clone();
    }
    if let Some(seed) = cli.seed {
        params.rng_seed = seed;
    }
    if let Some(tvir_min) = cli.tvir_min {
        params.ion_tvir_min = tvir_min;
        if tvir_min > 0.0 {
            params.ion_m_min = -1.0;
        }
    }
    if let Some(mfp) = cli.mfp {
        params.r_bubble_max = mfp;
    }

    if cli.wants_star_formation() {
        params.efficiency = EfficiencyModel::StarFormation {
            f_star10: cli.f_star10.unwrap_or(constants::STELLAR_BARYON_FRAC),
            alpha_star: cli.alpha_star.unwrap_or(constants::STELLAR_BARYON_PL),
            f_esc10: cli.f_esc10.unwrap_or(constants::ESC_FRAC),
            alpha_esc: cli.alpha_esc.unwrap_or(constants::ESC_PL),
            m_drop: 10.0_f64.powf(cli.log10_m_drop.unwrap_or(constants::MASS_DROP_LOG10)),
        };
    } else if cli.zeta.is_some() || cli.alpha.is_some() {
        let (default_zeta, default_alpha) = match params.efficiency {
            EfficiencyModel::Constant { zeta, alpha } => (zeta, alpha),
            EfficiencyModel::StarFormation { .. } => (constants::HII_EFF_FACTOR, 0.0),
        };
        params.efficiency = EfficiencyModel::Constant {
            zeta: cli.zeta.unwrap_or(default_zeta),
            alpha: cli.alpha.unwrap_or(default_alpha),
        };
    }

    params.validate()?;
    Ok(params)
}
