//! Feature Windower
//!
//! Turns raw value sequences into fixed-length numeric windows.
//!
//! - Training sweeps every start offset ([`sliding_windows`]).
//! - Live scoring uses only the most recent valid values ([`tail_window`]).
//!
//! Absent or unparseable values are never imputed: a window containing one
//! is not emitted.

use crate::series::RawValue;

/// Fixed-length run of valid values, used as one model input row
#[derive(Debug, Clone, PartialEq)]
pub struct Window(Vec<f64>);

impl Window {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl AsRef<[f64]> for Window {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

/// Parse `"12.5%"` as `0.125`. A bare `"%"` or a non-numeric prefix is invalid.
pub fn parse_percent(text: &str) -> Option<f64> {
    let prefix = text.trim().strip_suffix('%')?.trim();
    if prefix.is_empty() {
        return None;
    }
    prefix
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v / 100.0)
}

/// Normalize one raw value; `None` means absent
pub fn normalize_value(raw: &RawValue) -> Option<f64> {
    match raw {
        RawValue::Number(v) => Some(*v).filter(|v| v.is_finite()),
        RawValue::Text(text) => {
            let text = text.trim();
            if text.ends_with('%') {
                parse_percent(text)
            } else {
                text.parse::<f64>().ok().filter(|v| v.is_finite())
            }
        }
    }
}

pub fn normalize_values(values: &[Option<RawValue>]) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|v| v.as_ref().and_then(normalize_value))
        .collect()
}

/// Every window of `window_size` consecutive present values.
pub fn sliding_windows(values: &[Option<f64>], window_size: usize) -> Vec<Window> {
    if window_size == 0 || values.len() < window_size {
        return Vec::new();
    }

    let mut windows = Vec::new();
    // length of the run of present values ending at index i
    let mut run = 0usize;
    for (i, value) in values.iter().enumerate() {
        if value.is_some() {
            run += 1;
        } else {
            run = 0;
        }
        if run >= window_size {
            let start = i + 1 - window_size;
            let window = values[start..=i].iter().flatten().copied().collect();
            windows.push(Window(window));
        }
    }
    windows
}

/// Normalize then sweep all window positions
pub fn extract_windows(values: &[Option<RawValue>], window_size: usize) -> Vec<Window> {
    sliding_windows(&normalize_values(values), window_size)
}

/// The last `window_size` valid values, in original order.
///
/// Absent entries are dropped before the tail is taken; `None` when fewer
/// than `window_size` valid values exist.
pub fn tail_window(values: &[Option<RawValue>], window_size: usize) -> Option<Window> {
    if window_size == 0 {
        return None;
    }
    let valid: Vec<f64> = normalize_values(values).into_iter().flatten().collect();
    if valid.len() < window_size {
        return None;
    }
    Some(Window(valid[valid.len() - window_size..].to_vec()))
}

/// Compact a column (drop absent entries) and sweep it
pub fn compact_windows(values: &[Option<f64>], window_size: usize) -> Vec<Window> {
    let compact: Vec<Option<f64>> = values.iter().filter(|v| v.is_some()).copied().collect();
    sliding_windows(&compact, window_size)
}
