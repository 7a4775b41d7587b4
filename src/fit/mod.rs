//! Calibration-curve fitting against concentration.
//!
//! The primary model is the power law `metric = a · C^b`, solved by
//! Levenberg-Marquardt iteration on the untransformed data, seeded from
//! a log-log regression. The optional sensitivity supplement is a plain
//! linear regression of response against concentration.

mod power_law;
mod sensitivity;

pub use power_law::{fit_power_law, log_linear_fallback, sample_curve};
pub use sensitivity::fit_sensitivity;
