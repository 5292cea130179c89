//! Interpolation-table context for one run.
//!
//! All shared lookup state — sigma(M), the splined erfc, the recombination
//! rate — lives in one [`CollapseTables`] value constructed once per redshift
//! invocation and passed by reference into the evaluator and scheduler.

pub mod collapse;
pub mod recomb_rate;
pub mod sigma;

pub use collapse::{
    conditional_collapse_fraction, mean_collapse_fraction, mean_collapse_fraction_for_model,
    ConditionalFcollTable, SourceWeight,
};
pub use recomb_rate::RecombinationRateTable;
pub use sigma::SigmaTable;

use crate::common::config::EfficiencyModel;
use crate::domain::{BubbleError, ComputeResult};
use crate::numerics::{erfc, CubicSpline, GaussLegendre};

/// Upper end of the splined erfc argument range; beyond it the function is
/// numerically zero at single precision.
const ERFC_ARG_MAX: f64 = 6.0;

/// erfc splined over its useful argument range.
#[derive(Debug, Clone)]
pub struct ErfcTable {
    spline: CubicSpline,
}

impl ErfcTable {
    fn new() -> ComputeResult<Self> {
        let node_count = 250;
        let step = ERFC_ARG_MAX / (node_count - 1) as f64;
        let xs: Vec<f64> = (0..node_count).map(|i| step * i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| erfc(x)).collect();
        let spline = CubicSpline::new(xs, ys).map_err(|source| {
            BubbleError::internal(
                "SYS.ERFC_TABLE",
                format!("failed to build erfc spline: {source}"),
            )
        })?;
        Ok(Self { spline })
    }

    pub fn eval(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 1.0;
        }
        if x >= ERFC_ARG_MAX {
            return 0.0;
        }
        self.spline.eval(x)
    }
}

/// Owned lookup context for one redshift invocation.
#[derive(Debug, Clone)]
pub struct CollapseTables {
    sigma: SigmaTable,
    erfc: ErfcTable,
    recombination: Option<RecombinationRateTable>,
    quad: GaussLegendre,
}

impl CollapseTables {
    /// Builds every table the run needs. `m_min` anchors the sigma(M) span;
    /// the recombination table is only constructed when the run tracks
    /// inhomogeneous recombinations.
    pub fn new(m_min: f64, with_recombination: bool) -> ComputeResult<Self> {
        let sigma = SigmaTable::new(m_min * 0.1, collapse::M_MAX_INTEGRAL * 10.0)?;
        let erfc = ErfcTable::new()?;
        let recombination = if with_recombination {
            Some(RecombinationRateTable::new()?)
        } else {
            None
        };
        Ok(Self {
            sigma,
            erfc,
            recombination,
            quad: GaussLegendre::new(80),
        })
    }

    pub fn sigma(&self) -> &SigmaTable {
        &self.sigma
    }

    pub fn splined_erfc(&self, x: f64) -> f64 {
        self.erfc.eval(x)
    }

    pub fn recombination(&self) -> Option<&RecombinationRateTable> {
        self.recombination.as_ref()
    }

    /// Box-mean Sheth-Tormen collapse fraction for the run's efficiency
    /// model (shipped power-law branch selection included).
    pub fn mean_collapse_fraction(
        &self,
        efficiency: &EfficiencyModel,
        z: f64,
        m_min: f64,
    ) -> f64 {
        mean_collapse_fraction_for_model(&self.sigma, &self.quad, efficiency, z, m_min)
    }

    /// Conditional collapse-fraction spline for one filter scale, or `None`
    /// when the efficiency model routes through the erfc asymptotic path.
    pub fn conditional_table(
        &self,
        efficiency: &EfficiencyModel,
        z: f64,
        m_min: f64,
        m_scale: f64,
    ) -> ComputeResult<Option<ConditionalFcollTable>> {
        match SourceWeight::for_conditional(efficiency, m_min) {
            Some(weight) => Ok(Some(ConditionalFcollTable::build(
                &self.sigma,
                &self.quad,
                z,
                m_min,
                m_scale,
                weight,
            )?)),
            None => Ok(None),
        }
    }

    pub fn quadrature(&self) -> &GaussLegendre {
        &self.quad
    }
}

#[cfg(test)]
mod tests {
    use super::CollapseTables;
    use crate::common::config::EfficiencyModel;

    #[test]
    fn erfc_table_tracks_the_direct_evaluation() {
        let tables = CollapseTables::new(1.0e8, false).expect("tables");
        for x in [0.0, 0.3, 1.7, 4.2, 8.0] {
            let splined = tables.splined_erfc(x);
            let direct = crate::numerics::erfc(x).max(0.0);
            let direct = if x >= 6.0 { 0.0 } else { direct };
            assert!(
                (splined - direct).abs() < 1.0e-6,
                "x={x}: splined {splined}, direct {direct}"
            );
        }
    }

    #[test]
    fn recombination_table_is_built_only_on_request() {
        let without = CollapseTables::new(1.0e8, false).expect("tables");
        assert!(without.recombination().is_none());
        let with = CollapseTables::new(1.0e8, true).expect("tables");
        assert!(with.recombination().is_some());
    }

    #[test]
    fn nonzero_alpha_routes_to_the_erfc_path() {
        let tables = CollapseTables::new(1.0e8, false).expect("tables");
        let erfc_path = tables
            .conditional_table(
                &EfficiencyModel::Constant {
                    zeta: 30.0,
                    alpha: 0.9,
                },
                9.0,
                1.0e8,
                1.0e12,
            )
            .expect("table build");
        assert!(erfc_path.is_none(), "non-zero alpha must skip the spline");

        let spline_path = tables
            .conditional_table(
                &EfficiencyModel::Constant {
                    zeta: 30.0,
                    alpha: 0.0,
                },
                9.0,
                1.0e8,
                1.0e12,
            )
            .expect("table build");
        assert!(spline_path.is_some());
    }
}
