//! Levenberg–Marquardt fit of an axis-aligned 2-D Gaussian.
//!
//! Model, with `x` the column and `y` the row index of the window:
//!
//! ```text
//! f(x, y) = A * exp(-((x - x0)^2 / (2 sx^2) + (y - y0)^2 / (2 sy^2))) + c
//! ```

use nalgebra::{Matrix6, Vector6};
use ndarray::ArrayView2;
use tracing::trace;

use crate::error::{AppResult, DaqError};

const INITIAL_LAMBDA: f64 = 1e-3;
const MAX_LAMBDA: f64 = 1e16;
const COST_TOLERANCE: f64 = 1e-12;
const STEP_TOLERANCE: f64 = 1e-10;

/// Fitted Gaussian parameters in window coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianParams {
    /// Peak height above the offset
    pub amplitude: f64,
    /// Centre column
    pub x0: f64,
    /// Centre row
    pub y0: f64,
    /// Width along columns
    pub sigma_x: f64,
    /// Width along rows
    pub sigma_y: f64,
    /// Constant background
    pub offset: f64,
}

impl GaussianParams {
    fn to_vector(self) -> Vector6<f64> {
        Vector6::new(
            self.amplitude,
            self.x0,
            self.y0,
            self.sigma_x,
            self.sigma_y,
            self.offset,
        )
    }

    fn from_vector(p: &Vector6<f64>) -> Self {
        Self {
            amplitude: p[0],
            x0: p[1],
            y0: p[2],
            sigma_x: p[3],
            sigma_y: p[4],
            offset: p[5],
        }
    }

    /// Model value at column `x`, row `y`.
    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        let dx = x - self.x0;
        let dy = y - self.y0;
        let e = (-(dx * dx / (2.0 * self.sigma_x * self.sigma_x)
            + dy * dy / (2.0 * self.sigma_y * self.sigma_y)))
            .exp();
        self.amplitude * e + self.offset
    }

    fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|v| v.is_finite())
    }
}

/// Moment-based starting point: minimum as offset, argmax as centre.
pub fn initial_guess(window: ArrayView2<'_, f64>) -> GaussianParams {
    let (rows, cols) = window.dim();
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut argmax = (0, 0);
    for ((r, c), &v) in window.indexed_iter() {
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
            argmax = (r, c);
        }
    }

    let (mut total, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for ((r, c), &v) in window.indexed_iter() {
        let w = v - min;
        let dx = c as f64 - argmax.1 as f64;
        let dy = r as f64 - argmax.0 as f64;
        total += w;
        sxx += w * dx * dx;
        syy += w * dy * dy;
    }

    let limit = (rows.max(cols) as f64 / 2.0).max(0.5);
    let sigma = |second_moment: f64| {
        if total > 0.0 {
            (second_moment / total).sqrt().clamp(0.5, limit)
        } else {
            1.0_f64.min(limit)
        }
    };

    GaussianParams {
        amplitude: max - min,
        x0: argmax.1 as f64,
        y0: argmax.0 as f64,
        sigma_x: sigma(sxx),
        sigma_y: sigma(syy),
        offset: min,
    }
}

fn cost(window: ArrayView2<'_, f64>, p: &GaussianParams) -> f64 {
    window
        .indexed_iter()
        .map(|((r, c), &v)| {
            let res = p.evaluate(c as f64, r as f64) - v;
            res * res
        })
        .sum()
}

/// Gauss-Newton normal equations `(J^T J, J^T r)` at `p`.
fn normal_equations(
    window: ArrayView2<'_, f64>,
    p: &GaussianParams,
) -> (Matrix6<f64>, Vector6<f64>) {
    let mut h = Matrix6::<f64>::zeros();
    let mut g = Vector6::<f64>::zeros();
    let sx2 = p.sigma_x * p.sigma_x;
    let sy2 = p.sigma_y * p.sigma_y;

    for ((r, c), &v) in window.indexed_iter() {
        let dx = c as f64 - p.x0;
        let dy = r as f64 - p.y0;
        let e = (-(dx * dx / (2.0 * sx2) + dy * dy / (2.0 * sy2))).exp();
        let ae = p.amplitude * e;
        let residual = ae + p.offset - v;

        let j = Vector6::new(
            e,
            ae * dx / sx2,
            ae * dy / sy2,
            ae * dx * dx / (sx2 * p.sigma_x),
            ae * dy * dy / (sy2 * p.sigma_y),
            1.0,
        );
        h += j * j.transpose();
        g += j * residual;
    }
    (h, g)
}

/// Fit the model to `window`, starting from [`initial_guess`].
///
/// Fails with `FitDivergence` if the iteration budget runs out or the
/// parameters stop being finite.
pub fn fit_gaussian_2d(
    window: ArrayView2<'_, f64>,
    max_iterations: usize,
) -> AppResult<GaussianParams> {
    if window.is_empty() {
        return Err(DaqError::InvalidArgument("empty fit window".to_string()));
    }

    let mut params = initial_guess(window);
    let mut current = cost(window, &params);
    let mut lambda = INITIAL_LAMBDA;

    for iteration in 0..max_iterations {
        let (h, g) = normal_equations(window, &params);

        let mut damped = h;
        for i in 0..6 {
            damped[(i, i)] += lambda * h[(i, i)].max(1e-12);
        }

        let Some(step) = damped.cholesky().map(|chol| chol.solve(&(-g))) else {
            lambda *= 10.0;
            if lambda > MAX_LAMBDA {
                return Err(DaqError::FitDivergence {
                    iterations: iteration + 1,
                });
            }
            continue;
        };

        let candidate = GaussianParams::from_vector(&(params.to_vector() + step));
        if !candidate.is_finite() {
            return Err(DaqError::FitDivergence {
                iterations: iteration + 1,
            });
        }

        let trial = if candidate.sigma_x > 0.0 && candidate.sigma_y > 0.0 {
            cost(window, &candidate)
        } else {
            f64::INFINITY
        };

        if trial < current {
            let improvement = current - trial;
            let small_step =
                step.norm() <= STEP_TOLERANCE * (params.to_vector().norm() + STEP_TOLERANCE);
            params = candidate;
            current = trial;
            lambda = (lambda / 10.0).max(1e-15);
            trace!(iteration, cost = current, lambda, "LM step accepted");

            if improvement <= COST_TOLERANCE * current.max(f64::MIN_POSITIVE) || small_step {
                return Ok(params);
            }
        } else {
            lambda *= 10.0;
            if lambda > MAX_LAMBDA {
                // no descent direction left: local minimum
                return Ok(params);
            }
        }
    }

    Err(DaqError::FitDivergence {
        iterations: max_iterations,
    })
}
