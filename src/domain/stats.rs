//! Descriptive statistics shared by the risk and factor engines.

use crate::domain::error::RiskcalcError;
use statrs::function::erf;

/// Denominators at or below this magnitude are treated as zero.
pub const ZERO_TOLERANCE: f64 = 1e-12;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1 denominator).
pub fn sample_variance(values: &[f64], statistic: &str) -> Result<f64, RiskcalcError> {
    if values.len() < 2 {
        return Err(RiskcalcError::insufficient(statistic, values.len(), 2));
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Ok(ss / (values.len() - 1) as f64)
}

pub fn sample_std(values: &[f64], statistic: &str) -> Result<f64, RiskcalcError> {
    sample_variance(values, statistic).map(f64::sqrt)
}

/// Sample covariance of two equally long slices.
pub fn sample_covariance(a: &[f64], b: &[f64], statistic: &str) -> Result<f64, RiskcalcError> {
    if a.len() != b.len() {
        return Err(RiskcalcError::alignment(format!(
            "{statistic}: lengths differ ({} vs {})",
            a.len(),
            b.len()
        )));
    }
    if a.len() < 2 {
        return Err(RiskcalcError::insufficient(statistic, a.len(), 2));
    }
    let (ma, mb) = (mean(a), mean(b));
    let s: f64 = a.iter().zip(b).map(|(x, y)| (x - ma) * (y - mb)).sum();
    Ok(s / (a.len() - 1) as f64)
}

/// Empirical quantile with linear interpolation between order statistics.
/// `sorted` must be ascending and non-empty.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

pub fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Sample skewness (biased moment estimator).
pub fn skewness(values: &[f64]) -> Result<f64, RiskcalcError> {
    let (m2, m3, _) = central_moments(values, "skewness")?;
    if m2 <= ZERO_TOLERANCE {
        return Err(RiskcalcError::degenerate("skewness of a constant series"));
    }
    Ok(m3 / m2.powf(1.5))
}

/// Excess kurtosis (biased moment estimator).
pub fn excess_kurtosis(values: &[f64]) -> Result<f64, RiskcalcError> {
    let (m2, _, m4) = central_moments(values, "kurtosis")?;
    if m2 <= ZERO_TOLERANCE {
        return Err(RiskcalcError::degenerate("kurtosis of a constant series"));
    }
    Ok(m4 / (m2 * m2) - 3.0)
}

fn central_moments(values: &[f64], statistic: &str) -> Result<(f64, f64, f64), RiskcalcError> {
    if values.len() < 2 {
        return Err(RiskcalcError::insufficient(statistic, values.len(), 2));
    }
    let m = mean(values);
    let n = values.len() as f64;
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for v in values {
        let d = v - m;
        m2 += d * d;
        m3 += d * d * d;
        m4 += d * d * d * d;
    }
    Ok((m2 / n, m3 / n, m4 / n))
}

/// Standard normal quantile.
pub fn normal_quantile(p: f64) -> f64 {
    -std::f64::consts::SQRT_2 * erf::erfc_inv(2.0 * p)
}

pub fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}
