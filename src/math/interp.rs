//! Time-axis lookups on a strictly increasing sample grid.
//!
//! Crossing times and reference values are linearly interpolated between
//! the two bracketing samples rather than snapped to the nearest sample,
//! which avoids time-resolution-dependent bias in the reported metrics.

/// Index of the sample nearest to `t`. Ties between two equidistant
/// samples resolve to the earlier index, keeping results deterministic.
///
/// # Panics
/// Panics if `time` is empty. Callers hold a validated series.
pub fn nearest_index(time: &[f64], t: f64) -> usize {
    let hi = time.partition_point(|&x| x < t);
    if hi == 0 {
        return 0;
    }
    if hi == time.len() {
        return time.len() - 1;
    }
    let lo = hi - 1;
    if (t - time[lo]) <= (time[hi] - t) {
        lo
    } else {
        hi
    }
}

/// Value at time `t` by linear interpolation between the bracketing
/// samples (exact match when `t` falls on a sample). `None` when `t` is
/// outside `[time[0], time[last]]`.
pub fn value_at(time: &[f64], values: &[f64], t: f64) -> Option<f64> {
    let n = time.len();
    if n == 0 || t < time[0] || t > time[n - 1] {
        return None;
    }
    let hi = time.partition_point(|&x| x < t);
    if hi < n && time[hi] == t {
        return Some(values[hi]);
    }
    // t is strictly between time[hi-1] and time[hi] here.
    let lo = hi - 1;
    let u = (t - time[lo]) / (time[hi] - time[lo]);
    Some(values[lo] + u * (values[hi] - values[lo]))
}

/// Time at which the segment from `(t0, v0)` to `(t1, v1)` reaches
/// `target`. Degenerate segments (equal values) resolve to `t1`.
pub fn crossing_time(t0: f64, v0: f64, t1: f64, v1: f64, target: f64) -> f64 {
    if v1 == v0 {
        return t1;
    }
    let u = (target - v0) / (v1 - v0);
    t0 + u.clamp(0.0, 1.0) * (t1 - t0)
}

/// Half-open index range of samples with `start <= time <= end`.
pub fn window_indices(time: &[f64], start: f64, end: f64) -> std::ops::Range<usize> {
    let lo = time.partition_point(|&t| t < start);
    let hi = time.partition_point(|&t| t <= end);
    lo..hi.max(lo)
}
