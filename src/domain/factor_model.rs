//! Ordinary least squares factor exposures.
//!
//! The response is regressed on an intercept plus one column per factor. The
//! intercept is reported as the specific (alpha) component, never as a factor.

use crate::domain::error::RiskcalcError;
use crate::domain::factor::{FactorDefinition, FactorReturnSeries};
use crate::domain::series::ReturnSeries;
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::hash::{Hash, Hasher};
use tracing::{debug, info};

pub const DEFAULT_SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Relative pivot size below which XᵀX is treated as singular.
const RANK_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FactorModelConfig {
    /// A factor is significant when its p-value is below this level.
    pub significance_level: f64,
}

impl Default for FactorModelConfig {
    fn default() -> Self {
        Self {
            significance_level: DEFAULT_SIGNIFICANCE_LEVEL,
        }
    }
}

// Significance levels are validated finite, so bitwise identity is equality.
impl Eq for FactorModelConfig {}

impl Hash for FactorModelConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significance_level.to_bits().hash(state);
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FactorExposure {
    pub factor: FactorDefinition,
    pub coefficient: f64,
    pub standard_error: f64,
    pub t_statistic: f64,
    pub p_value: f64,
    pub significant: bool,
}

/// The part of the response the factors do not explain.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpecificComponent {
    /// Regression intercept, per period.
    pub alpha: f64,
    pub alpha_t_statistic: f64,
    /// Standard deviation of the residuals (n - k - 1 dof).
    pub residual_std: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FactorExposureResult {
    pub observations: usize,
    pub exposures: Vec<FactorExposure>,
    pub specific: SpecificComponent,
    pub r_squared: f64,
    pub adjusted_r_squared: f64,
}

impl FactorExposureResult {
    pub fn exposure(&self, factor_id: &str) -> Option<&FactorExposure> {
        self.exposures.iter().find(|e| e.factor.id == factor_id)
    }

    /// (factor id, coefficient) pairs in regression order.
    pub fn coefficients(&self) -> Vec<(String, f64)> {
        self.exposures
            .iter()
            .map(|e| (e.factor.id.clone(), e.coefficient))
            .collect()
    }
}

pub fn compute_factor_model(
    response: &ReturnSeries,
    factors: &[FactorReturnSeries],
    config: &FactorModelConfig,
) -> Result<FactorExposureResult, RiskcalcError> {
    if factors.is_empty() {
        return Err(RiskcalcError::invalid("factor model needs at least one factor"));
    }
    let alpha_level = config.significance_level;
    if !(alpha_level > 0.0 && alpha_level < 1.0) {
        return Err(RiskcalcError::invalid(format!(
            "significance level must lie in (0, 1), got {alpha_level}"
        )));
    }
    for factor in factors {
        response.ensure_aligned(&factor.returns, &format!("factor {}", factor.id()))?;
    }

    let n = response.len();
    let k = factors.len();
    if n <= k + 1 {
        return Err(RiskcalcError::insufficient("factor regression", n, k + 2));
    }
    debug!(observations = n, factors = k, "fitting factor model");

    let columns: Vec<Vec<f64>> = factors.iter().map(|f| f.returns.values()).collect();
    let x = DMatrix::from_fn(n, k + 1, |i, j| if j == 0 { 1.0 } else { columns[j - 1][i] });
    let y = DVector::from_vec(response.values());

    let xtx = x.tr_mul(&x);
    let max_diag = xtx.diagonal().max();
    let chol = xtx
        .cholesky()
        .ok_or_else(|| RiskcalcError::degenerate("factor returns are collinear"))?;
    let l = chol.l();
    if (0..=k).any(|j| l[(j, j)] * l[(j, j)] <= RANK_TOLERANCE * max_diag) {
        return Err(RiskcalcError::degenerate("factor returns are collinear"));
    }

    let beta = chol.solve(&x.tr_mul(&y));
    let xtx_inv = chol.inverse();

    let residuals = &y - &x * &beta;
    let sse = residuals.norm_squared();
    let y_mean = y.mean();
    let sst: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    if sst <= f64::EPSILON * y.norm_squared() {
        return Err(RiskcalcError::degenerate("response series is constant"));
    }

    let dof = (n - k - 1) as f64;
    let sigma2 = sse / dof;
    let r_squared = 1.0 - sse / sst;
    let adjusted_r_squared = 1.0 - (1.0 - r_squared) * (n as f64 - 1.0) / dof;

    let t_dist = StudentsT::new(0.0, 1.0, dof).map_err(|e| RiskcalcError::degenerate(e.to_string()))?;
    let stat = |j: usize| -> (f64, f64, f64) {
        let se = (sigma2 * xtx_inv[(j, j)]).max(0.0).sqrt();
        let t = if se > 0.0 {
            beta[j] / se
        } else if beta[j] == 0.0 {
            0.0
        } else {
            f64::INFINITY.copysign(beta[j])
        };
        let p = if t.is_finite() {
            (2.0 * (1.0 - t_dist.cdf(t.abs()))).clamp(0.0, 1.0)
        } else {
            0.0
        };
        (se, t, p)
    };

    let exposures = factors
        .iter()
        .enumerate()
        .map(|(i, factor)| {
            let (standard_error, t_statistic, p_value) = stat(i + 1);
            FactorExposure {
                factor: factor.definition.clone(),
                coefficient: beta[i + 1],
                standard_error,
                t_statistic,
                p_value,
                significant: p_value < alpha_level,
            }
        })
        .collect();

    let (_, alpha_t_statistic, _) = stat(0);
    let result = FactorExposureResult {
        observations: n,
        exposures,
        specific: SpecificComponent {
            alpha: beta[0],
            alpha_t_statistic,
            residual_std: sigma2.sqrt(),
        },
        r_squared,
        adjusted_r_squared,
    };
    info!(
        observations = n,
        factors = k,
        r_squared = result.r_squared,
        "factor model fitted"
    );
    Ok(result)
}
