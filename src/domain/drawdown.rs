//! Maximum drawdown over a value series.

use crate::domain::error::RiskcalcError;

/// Largest peak-to-trough decline, as a fraction of the peak.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Drawdown {
    pub depth: f64,
    pub peak_index: usize,
    pub trough_index: usize,
    /// First index after the trough at which the peak value is regained.
    pub recovery_index: Option<usize>,
}

/// Scans `values` once, tracking the running peak.
///
/// A monotonically rising series yields depth 0 with peak and trough at index 0.
pub fn max_drawdown(values: &[f64]) -> Result<Drawdown, RiskcalcError> {
    let Some(&first) = values.first() else {
        return Err(RiskcalcError::EmptySeries {
            series: "drawdown values".into(),
        });
    };
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(RiskcalcError::invalid(format!(
            "non-finite value {bad} in drawdown series"
        )));
    }

    let mut peak = first;
    let mut peak_idx = 0;
    let mut best = Drawdown {
        depth: 0.0,
        peak_index: 0,
        trough_index: 0,
        recovery_index: None,
    };

    for (i, &v) in values.iter().enumerate() {
        if v > peak {
            peak = v;
            peak_idx = i;
            continue;
        }
        if peak <= 0.0 {
            return Err(RiskcalcError::degenerate(format!(
                "drawdown peak at index {peak_idx} is non-positive ({peak})"
            )));
        }
        let depth = (peak - v) / peak;
        if depth > best.depth {
            best = Drawdown {
                depth,
                peak_index: peak_idx,
                trough_index: i,
                recovery_index: None,
            };
        }
    }

    if best.depth > 0.0 {
        let peak_value = values[best.peak_index];
        best.recovery_index = values[best.trough_index..]
            .iter()
            .position(|&v| v >= peak_value)
            .map(|offset| best.trough_index + offset);
    }
    Ok(best)
}
