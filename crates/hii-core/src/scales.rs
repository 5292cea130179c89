//! Filter-radius ladder for the excursion-set scan.
//!
//! Radii are strictly decreasing. The ladder is generated by multiplying the
//! floor value upward past the maximum and stepping back down — never by
//! dividing down from the maximum — so neighboring redshift steps sample
//! identical radii and no aliasing differences creep in between them.

use crate::common::config::RunParams;
use crate::cosmo;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterStep {
    /// Smoothing radius, Mpc.
    pub radius: f64,
    /// Set on the final (finest) step; the radius is then snapped exactly to
    /// the ladder floor regardless of rounding drift in the geometric ladder.
    pub is_last: bool,
}

#[derive(Debug, Clone)]
pub struct ScaleLadder {
    current: f64,
    step_ratio: f64,
    cell_scale: f64,
    r_bubble_min: f64,
    floor: f64,
    m_min: f64,
    done: bool,
}

impl ScaleLadder {
    /// `mfp` is the maximum bubble scale (ionizing mean free path); `m_min`
    /// terminates the ladder early once no halo can fill a filter scale.
    pub fn new(params: &RunParams, mfp: f64, m_min: f64) -> Self {
        let cell_scale = params.cell_length_factor() * params.box_len / params.grid_dim as f64;
        let r_max = mfp.min(crate::common::constants::L_FACTOR * params.box_len);

        let mut radius = params.r_bubble_min.max(cell_scale);
        while radius < r_max {
            radius *= params.delta_r_factor;
        }
        radius /= params.delta_r_factor;

        Self {
            current: radius,
            step_ratio: params.delta_r_factor,
            cell_scale,
            r_bubble_min: params.r_bubble_min,
            floor: cell_scale.max(params.r_bubble_min),
            m_min,
            done: false,
        }
    }

    /// Ladder floor: the finest scale that is always evaluated exactly once.
    pub fn floor(&self) -> f64 {
        self.floor
    }

    /// Cell scale used to decide whether the snapped last step still needs a
    /// filter pass.
    pub fn cell_scale(&self) -> f64 {
        self.cell_scale
    }
}

impl Iterator for ScaleLadder {
    type Item = FilterStep;

    fn next(&mut self) -> Option<FilterStep> {
        if self.done {
            return None;
        }
        // no halo fits inside this filter scale: nothing left to test
        if self.m_min >= cosmo::rtom(self.current) {
            self.done = true;
            return None;
        }
        let stepped = self.current / self.step_ratio;
        if stepped <= self.cell_scale || stepped <= self.r_bubble_min {
            self.done = true;
            return Some(FilterStep {
                radius: self.floor,
                is_last: true,
            });
        }
        let radius = self.current;
        self.current = stepped;
        Some(FilterStep {
            radius,
            is_last: false,
        })
    }
}
