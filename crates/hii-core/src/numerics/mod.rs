pub mod erf;
pub mod quadrature;
pub mod spline;

pub use erf::erfc;
pub use quadrature::{simpson, GaussLegendre};
pub use spline::{CubicSpline, SplineError};
