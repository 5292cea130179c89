//! Excursion-set reionization engine.
//!
//! Computes the ionization state of a cosmological simulation volume at a
//! given redshift: collapsed-mass density is smoothed at progressively
//! smaller filter scales, and a cell is declared ionized once the smoothed
//! ionizing-photon budget exceeds the smoothed neutral-hydrogen budget at
//! some scale. The resulting neutral-fraction box feeds downstream 21-cm
//! signal analysis.

pub mod boxio;
pub mod common;
pub mod cosmo;
pub mod domain;
pub mod engine;
pub mod fcoll;
pub mod fields;
pub mod numerics;
pub mod pipeline;
pub mod recomb;
pub mod scales;
pub mod tables;

pub use common::config::{BubbleAlgorithm, EfficiencyModel, FilterKind, RunParams};
pub use domain::{BubbleError, BubbleErrorCategory, ComputeResult};
pub use engine::{IonizationEngine, IonizationOutcome, RedshiftFields, ResolvedRun};
pub use pipeline::{run_redshift, RunSummary};
