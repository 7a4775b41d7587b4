//! `gas-curves` library crate.
//!
//! Response-recovery analysis engine for multi-channel gas-sensor
//! exposure curves. The crate is a pure transformation from a parsed
//! time series plus user configuration to per-cycle/per-channel metrics,
//! power-law fits, and export-ready tables:
//!
//! - the host ingestion layer parses CSV and hands us a [`domain::TimeSeries`]
//! - the host export layer serializes the [`report::AnalysisBundle`] tables
//! - everything in between lives here and is testable without a GUI
//!
//! The stages are independent pure functions (`transform` → `normalize` |
//! `extract` → `fit` → `report`); [`pipeline::run_analysis`] chains them and
//! collects per-channel/per-cycle errors instead of aborting the run.

pub mod domain;
pub mod error;
pub mod extract;
pub mod fit;
pub mod math;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod transform;
