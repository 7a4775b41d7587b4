//! Least-squares building blocks.
//!
//! Two problems come up repeatedly:
//!
//! - simple linear regression `y = intercept + slope·x` (the log-log seed
//!   for the power-law solver and the sensitivity supplement)
//! - a small damped least-squares solve for each Levenberg–Marquardt step
//!
//! The parameter dimension is tiny (2 columns), so SVD is both robust and
//! cheap. (Nalgebra's `QR::solve` is intended for square systems and will
//! panic for tall matrices.)

use nalgebra::{DMatrix, DVector};

/// Closed-form simple linear regression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination of the regression itself.
    pub r_squared: f64,
}

/// Fit `y = intercept + slope·x` by ordinary least squares.
///
/// Returns `None` when fewer than 2 points are given, any value is
/// non-finite, or the x variance is degenerate.
pub fn linear_regression(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    let n = x.len();
    if n < 2 || n != y.len() {
        return None;
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return None;
    }

    let xbar = x.iter().sum::<f64>() / n as f64;
    let ybar = y.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let dx = xi - xbar;
        let dy = yi - ybar;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= 1e-300 {
        return None;
    }

    let slope = cov / var_x;
    let intercept = ybar - slope * xbar;
    let r_squared = if var_y <= 1e-300 {
        1.0
    } else {
        (cov * cov) / (var_x * var_y)
    };

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if the strict solve fails:
    // near-saturated response data can make the Jacobian columns almost
    // collinear.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}
