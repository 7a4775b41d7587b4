//! Shared domain types: the table model, configuration, and result
//! value objects.

mod types;

pub use types::*;
