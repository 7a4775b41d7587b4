//! Error taxonomy and per-scope issue collection.
//!
//! Errors are raised at the granularity where they occur (run, channel,
//! cycle, or fit) and collected into [`Issue`]s rather than aborting the
//! whole analysis: one bad channel or cycle must not block results for
//! the others.

use thiserror::Error;

use crate::domain::{ChannelId, MetricKind};

/// All failure modes of the analysis core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Bad scale/range inputs (zero unit factors, empty visible range,
    /// mismatched cycle/concentration lists, invalid channel selection).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Normalization reference time outside the series time range.
    #[error("reference time {reference_time} outside series range [{start}, {end}]")]
    Range {
        reference_time: f64,
        start: f64,
        end: f64,
    },

    /// Normalization reference value too close to zero to divide by.
    #[error("normalization reference for ch{channel} is {value:e}, too close to zero")]
    DegenerateNormalization { channel: ChannelId, value: f64 },

    /// A cycle window holds fewer than 2 samples, so threshold crossings
    /// cannot be interpolated.
    #[error("cycle {cycle} {window} window holds {samples} sample(s) for ch{channel}; need at least 2")]
    InsufficientData {
        channel: ChannelId,
        cycle: usize,
        window: &'static str,
        samples: usize,
    },

    /// Fitting preconditions unmet (too few points, or non-positive
    /// concentration/metric values for which the power law is undefined).
    #[error("invalid fit input for ch{channel} {metric}: {reason}")]
    InvalidFitInput {
        channel: ChannelId,
        metric: MetricKind,
        reason: String,
    },

    /// The nonlinear solver failed to converge; the caller may fall back
    /// to the log-linear parameters flagged as approximate.
    #[error("power-law fit for ch{channel} {metric} did not converge within {iterations} iterations")]
    FitConvergence {
        channel: ChannelId,
        metric: MetricKind,
        iterations: usize,
    },

    /// Channel indices disagree between sub-results during aggregation.
    #[error("inconsistent channel set: {0}")]
    InconsistentChannelSet(String),
}

/// Where in the analysis an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The whole run (e.g. a bad visible range).
    Run,
    Channel(ChannelId),
    Cycle { channel: ChannelId, cycle: usize },
    Fit { channel: ChannelId, metric: MetricKind },
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Run => write!(f, "run"),
            Scope::Channel(ch) => write!(f, "ch{ch}"),
            Scope::Cycle { channel, cycle } => write!(f, "ch{channel} cycle {cycle}"),
            Scope::Fit { channel, metric } => write!(f, "ch{channel} {metric} fit"),
        }
    }
}

/// A collected (scope, error) pair. The host presents these per
/// channel/cycle instead of failing the entire analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub scope: Scope,
    pub error: AnalysisError,
}

impl Issue {
    pub fn new(scope: Scope, error: AnalysisError) -> Self {
        Self { scope, error }
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.scope, self.error)
    }
}
