//! Region/unit transformer: the first pipeline stage.
//!
//! Applies the optional time-zero shift, converts time and channel units,
//! then restricts the table to the visible time range and the selected
//! channels. The output is a fresh [`TimeSeries`]; the raw input is never
//! mutated, so the same raw table can be re-transformed with different
//! configurations.

use std::collections::BTreeMap;

use crate::domain::{TimeSeries, UnitConfig, VisibleRange};
use crate::error::AnalysisError;
use crate::math::window_indices;

/// Transform `raw` per the unit configuration, then cut it to the visible
/// range and channel selection.
///
/// # Errors
/// `ConfigurationError` when:
/// - `time_scale` is zero or non-finite
/// - a selected channel's scale factor is zero or non-finite
/// - a selected channel is absent from the input
/// - no channel is selected
/// - `start_time >= end_time`, or the visible range excludes every row
pub fn transform(
    raw: &TimeSeries,
    cfg: &UnitConfig,
    range: &VisibleRange,
) -> Result<TimeSeries, AnalysisError> {
    if !cfg.time_scale.is_finite() || cfg.time_scale == 0.0 {
        return Err(AnalysisError::Configuration(format!(
            "time scale factor must be finite and nonzero, got {}",
            cfg.time_scale
        )));
    }
    if range.selected_channels.is_empty() {
        return Err(AnalysisError::Configuration(
            "no channels selected".into(),
        ));
    }
    if !(range.start_time.is_finite() && range.end_time.is_finite())
        || range.start_time >= range.end_time
    {
        return Err(AnalysisError::Configuration(format!(
            "visible range must satisfy start < end, got [{}, {}]",
            range.start_time, range.end_time
        )));
    }
    for &id in &range.selected_channels {
        if raw.channel(id).is_none() {
            return Err(AnalysisError::Configuration(format!(
                "selected channel ch{id} is not present in the input table"
            )));
        }
        let scale = cfg.scale_for(id);
        if !scale.is_finite() || scale == 0.0 {
            return Err(AnalysisError::Configuration(format!(
                "scale factor for ch{id} must be finite and nonzero, got {scale}"
            )));
        }
    }

    // Zero-shift first, then scale, so the shift is expressed in raw units
    // exactly as the acquisition file records them.
    let t0 = if cfg.time_zero_shift { raw.time()[0] } else { 0.0 };
    let time: Vec<f64> = raw
        .time()
        .iter()
        .map(|&t| (t - t0) / cfg.time_scale)
        .collect();

    let rows = window_indices(&time, range.start_time, range.end_time);
    if rows.is_empty() {
        return Err(AnalysisError::Configuration(format!(
            "visible range [{}, {}] excludes all rows",
            range.start_time, range.end_time
        )));
    }

    let mut channels = BTreeMap::new();
    for &id in &range.selected_channels {
        // Presence was validated above.
        let Some(src) = raw.channel(id) else { continue };
        let scale = cfg.scale_for(id);
        let values: Vec<f64> = src[rows.clone()].iter().map(|&v| v * scale).collect();
        channels.insert(id, values);
    }

    TimeSeries::new(time[rows].to_vec(), channels)
}
