use std::f64::consts::PI;

/// Gauss-Legendre nodes and weights on [-1, 1], computed by Newton iteration
/// on the Legendre polynomial roots.
#[derive(Debug, Clone)]
pub struct GaussLegendre {
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl GaussLegendre {
    pub fn new(order: usize) -> Self {
        assert!(order >= 2, "quadrature order must be at least 2");
        let mut nodes = vec![0.0; order];
        let mut weights = vec![0.0; order];
        let midpoints = order.div_ceil(2);

        for i in 0..midpoints {
            // Chebyshev-root starting guess converges in a handful of steps.
            let mut root = (PI * (i as f64 + 0.75) / (order as f64 + 0.5)).cos();
            let mut deriv = 0.0;
            for _ in 0..100 {
                let mut p0 = 1.0;
                let mut p1 = root;
                for k in 2..=order {
                    let kf = k as f64;
                    let p2 = ((2.0 * kf - 1.0) * root * p1 - (kf - 1.0) * p0) / kf;
                    p0 = p1;
                    p1 = p2;
                }
                deriv = order as f64 * (root * p1 - p0) / (root * root - 1.0);
                let step = p1 / deriv;
                root -= step;
                if step.abs() < 1.0e-15 {
                    break;
                }
            }
            nodes[i] = -root;
            nodes[order - 1 - i] = root;
            let w = 2.0 / ((1.0 - root * root) * deriv * deriv);
            weights[i] = w;
            weights[order - 1 - i] = w;
        }

        Self { nodes, weights }
    }

    /// Integrate `f` over [a, b].
    pub fn integrate(&self, a: f64, b: f64, mut f: impl FnMut(f64) -> f64) -> f64 {
        let mid = 0.5 * (a + b);
        let half = 0.5 * (b - a);
        self.nodes
            .iter()
            .zip(&self.weights)
            .map(|(&node, &weight)| weight * f(mid + half * node))
            .sum::<f64>()
            * half
    }
}

/// Composite Simpson integration over [a, b] with `intervals` (rounded up to
/// even) subdivisions; used where the integrand is cheap and smooth.
pub fn simpson(a: f64, b: f64, intervals: usize, mut f: impl FnMut(f64) -> f64) -> f64 {
    let n = intervals.max(2).next_multiple_of(2);
    let h = (b - a) / n as f64;
    let mut sum = f(a) + f(b);
    for i in 1..n {
        let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * f(a + h * i as f64);
    }
    sum * h / 3.0
}
