//! Mathematical utilities: interpolation, simple regression, and the
//! damped least-squares step used by the power-law solver.

pub mod interp;
pub mod ols;

pub use interp::*;
pub use ols::*;
