//! Constrained mean-variance portfolio optimization.
//!
//! Constraints compile to linear rows and every problem is solved by the
//! Clarabel interior-point solver. Its status keeps an empty feasible set
//! apart from a solve that runs out of iterations.

pub mod conic;
pub mod constraints;
pub mod covariance;

pub use constraints::{ConstraintCheck, ConstraintSet, LinearRow, SectorConstraint, WeightLimit};
pub use covariance::{covariance_factor, estimate_inputs, validate_covariance};

use crate::domain::error::RiskcalcError;
use crate::domain::stats::ZERO_TOLERANCE;
use conic::{ConicProblem, NormBound};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

pub const DEFAULT_MAX_ITERATIONS: usize = 200;
pub const DEFAULT_TOLERANCE: f64 = 1e-8;

/// Weights smaller than this in magnitude are reported as zero.
const WEIGHT_CLEAN_THRESHOLD: f64 = 1e-7;

/// Fraction of the return span kept between the last frontier target and the
/// highest feasible return.
const FRONTIER_END_BACKOFF: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationInputs {
    pub symbols: Vec<String>,
    /// Annualized expected returns, one per symbol.
    pub expected_returns: Vec<f64>,
    /// Annualized covariance, symbols × symbols.
    pub covariance: DMatrix<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Objective {
    MaxSharpe { risk_free_rate: f64 },
    MinVolatility,
    /// Minimum volatility subject to an expected return of at least `target`.
    TargetReturn { target: f64 },
    /// Maximum expected return subject to volatility of at most `target_volatility`.
    MaxReturn { target_volatility: f64 },
}

impl Objective {
    pub fn name(&self) -> &'static str {
        match self {
            Objective::MaxSharpe { .. } => "max_sharpe",
            Objective::MinVolatility => "min_volatility",
            Objective::TargetReturn { .. } => "target_return",
            Objective::MaxReturn { .. } => "max_return",
        }
    }

    fn risk_free_rate(&self) -> f64 {
        match self {
            Objective::MaxSharpe { risk_free_rate } => *risk_free_rate,
            _ => 0.0,
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    pub max_iterations: usize,
    /// Feasibility and duality-gap tolerance.
    pub tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptimizationResult {
    pub objective: Objective,
    /// (symbol, weight) in input order.
    pub weights: Vec<(String, f64)>,
    pub expected_return: f64,
    pub volatility: f64,
    /// Excess return per unit volatility against the objective's risk-free
    /// rate (zero for the volatility objectives); None at zero volatility.
    pub sharpe_ratio: Option<f64>,
    pub checks: Vec<ConstraintCheck>,
    pub feasible: bool,
    pub iterations: usize,
}

impl OptimizationResult {
    pub fn weight(&self, symbol: &str) -> Option<f64> {
        self.weights.iter().find(|(s, _)| s == symbol).map(|(_, w)| *w)
    }
}

pub fn optimize_portfolio(
    inputs: &OptimizationInputs,
    constraints: &ConstraintSet,
    objective: &Objective,
    settings: &SolverSettings,
) -> Result<OptimizationResult, RiskcalcError> {
    validate_inputs(inputs)?;
    validate_settings(settings)?;
    let n = inputs.symbols.len();

    let extra_target = match *objective {
        Objective::TargetReturn { target } if !target.is_finite() => {
            return Err(RiskcalcError::invalid("target return must be finite"));
        }
        Objective::TargetReturn { target } => Some(target),
        Objective::MaxSharpe { risk_free_rate } if !risk_free_rate.is_finite() => {
            return Err(RiskcalcError::invalid("risk-free rate must be finite"));
        }
        Objective::MaxReturn { target_volatility }
            if !(target_volatility > 0.0 && target_volatility.is_finite()) =>
        {
            return Err(RiskcalcError::invalid("target volatility must be positive"));
        }
        _ => None,
    };
    let rows = constraints.compile(&inputs.symbols, &inputs.expected_returns, extra_target)?;
    debug!(assets = n, rows = rows.len(), objective = %objective, "optimizing portfolio");

    let (weights, iterations) = match *objective {
        Objective::MinVolatility | Objective::TargetReturn { .. } => {
            min_variance(inputs, &rows, settings)?
        }
        Objective::MaxSharpe { risk_free_rate } => {
            max_sharpe(inputs, constraints, &rows, risk_free_rate, settings)?
        }
        Objective::MaxReturn { target_volatility } => {
            max_return(inputs, &rows, target_volatility, settings)?
        }
    };

    let result = build_result(inputs, &rows, objective, weights, iterations);
    info!(
        objective = %objective,
        expected_return = result.expected_return,
        volatility = result.volatility,
        iterations,
        "optimization complete"
    );
    Ok(result)
}

/// Target-return portfolios between the minimum-volatility return and the
/// highest feasible return, solved in parallel.
pub fn efficient_frontier(
    inputs: &OptimizationInputs,
    constraints: &ConstraintSet,
    points: usize,
    settings: &SolverSettings,
) -> Result<Vec<OptimizationResult>, RiskcalcError> {
    if points < 2 {
        return Err(RiskcalcError::invalid("efficient frontier needs at least two points"));
    }
    let min_vol = optimize_portfolio(inputs, constraints, &Objective::MinVolatility, settings)?;

    let rows = constraints.compile(&inputs.symbols, &inputs.expected_returns, None)?;
    let r_max = maximize_linear(&inputs.expected_returns, &rows, settings)?;
    let r_min = min_vol.expected_return;
    if r_max <= r_min + settings.tolerance {
        return Ok(vec![min_vol]);
    }

    // The LP optimum carries solver error, so the last target sits just inside it.
    let span = r_max - r_min;
    let last = r_max - span * FRONTIER_END_BACKOFF;
    let step = (last - r_min) / (points - 1) as f64;
    (0..points)
        .into_par_iter()
        .map(|i| {
            let target = if i + 1 == points { last } else { r_min + step * i as f64 };
            optimize_portfolio(inputs, constraints, &Objective::TargetReturn { target }, settings)
        })
        .collect()
}

fn validate_inputs(inputs: &OptimizationInputs) -> Result<(), RiskcalcError> {
    let n = inputs.symbols.len();
    if n == 0 {
        return Err(RiskcalcError::invalid("no assets to optimize"));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = inputs.symbols.iter().find(|s| !seen.insert(s.as_str())) {
        return Err(RiskcalcError::invalid(format!("duplicate symbol {dup}")));
    }
    if inputs.expected_returns.len() != n {
        return Err(RiskcalcError::invalid(format!(
            "{n} symbols but {} expected returns",
            inputs.expected_returns.len()
        )));
    }
    if inputs.expected_returns.iter().any(|r| !r.is_finite()) {
        return Err(RiskcalcError::invalid("expected returns must be finite"));
    }
    validate_covariance(&inputs.covariance, n)
}

fn validate_settings(settings: &SolverSettings) -> Result<(), RiskcalcError> {
    if settings.max_iterations == 0 {
        return Err(RiskcalcError::invalid("max_iterations must be positive"));
    }
    if !(settings.tolerance > 0.0 && settings.tolerance.is_finite()) {
        return Err(RiskcalcError::invalid("solver tolerance must be positive"));
    }
    Ok(())
}

fn min_variance(
    inputs: &OptimizationInputs,
    rows: &[LinearRow],
    settings: &SolverSettings,
) -> Result<(Vec<f64>, usize), RiskcalcError> {
    let n = inputs.symbols.len();
    let solution = conic::solve(
        &ConicProblem {
            quadratic: Some(&inputs.covariance),
            linear: &vec![0.0; n],
            rows,
            norm_bound: None,
        },
        settings,
    )?;
    Ok((solution.x, solution.iterations))
}

/// Highest expected return whose volatility stays within `target_volatility`,
/// with the variance bound written as ‖Gw‖ <= σ for GᵀG = Σ.
fn max_return(
    inputs: &OptimizationInputs,
    rows: &[LinearRow],
    target_volatility: f64,
    settings: &SolverSettings,
) -> Result<(Vec<f64>, usize), RiskcalcError> {
    let factor = covariance_factor(&inputs.covariance);
    let negated: Vec<f64> = inputs.expected_returns.iter().map(|r| -r).collect();
    let solution = conic::solve(
        &ConicProblem {
            quadratic: None,
            linear: &negated,
            rows,
            norm_bound: Some(NormBound {
                factor: &factor,
                bound: target_volatility,
            }),
        },
        settings,
    )?;
    Ok((solution.x, solution.iterations))
}

/// Largest value of `coefficients · w` over the feasible set.
fn maximize_linear(
    coefficients: &[f64],
    rows: &[LinearRow],
    settings: &SolverSettings,
) -> Result<f64, RiskcalcError> {
    let negated: Vec<f64> = coefficients.iter().map(|c| -c).collect();
    let solution = conic::solve(
        &ConicProblem {
            quadratic: None,
            linear: &negated,
            rows,
            norm_bound: None,
        },
        settings,
    )?;
    Ok(coefficients.iter().zip(&solution.x).map(|(c, w)| c * w).sum())
}

/// Maximum Sharpe through the homogenized problem over (y, κ):
/// minimize yᵀΣy subject to (μ - rf)ᵀy = 1, κ >= 0 and every row scaled by κ.
/// The weights are y / κ.
fn max_sharpe(
    inputs: &OptimizationInputs,
    constraints: &ConstraintSet,
    rows: &[LinearRow],
    risk_free_rate: f64,
    settings: &SolverSettings,
) -> Result<(Vec<f64>, usize), RiskcalcError> {
    if !constraints.fully_invested {
        return Err(RiskcalcError::invalid(
            "maximum Sharpe requires fully invested portfolios",
        ));
    }
    let n = inputs.symbols.len();
    let excess: Vec<f64> = inputs
        .expected_returns
        .iter()
        .map(|r| r - risk_free_rate)
        .collect();

    let best_excess = maximize_linear(&excess, rows, settings)?;
    if best_excess <= settings.tolerance {
        return Err(RiskcalcError::degenerate(format!(
            "no feasible portfolio earns more than the risk-free rate (best excess {best_excess:e})"
        )));
    }

    let mut homogenized = Vec::with_capacity(2 * rows.len() + 2);
    let lifted = |coefficients: &[f64], kappa: f64| {
        let mut c = coefficients.to_vec();
        c.push(kappa);
        c
    };
    homogenized.push(LinearRow {
        name: "normalization".into(),
        coefficients: lifted(excess.as_slice(), 0.0),
        lower: 1.0,
        upper: 1.0,
    });
    homogenized.push(LinearRow {
        name: "kappa".into(),
        coefficients: lifted(vec![0.0; n].as_slice(), 1.0),
        lower: 0.0,
        upper: f64::INFINITY,
    });
    for row in rows {
        if row.is_equality() {
            homogenized.push(LinearRow {
                name: row.name.clone(),
                coefficients: lifted(row.coefficients.as_slice(), -row.lower),
                lower: 0.0,
                upper: 0.0,
            });
            continue;
        }
        if row.lower.is_finite() {
            homogenized.push(LinearRow {
                name: format!("{}:lower", row.name),
                coefficients: lifted(row.coefficients.as_slice(), -row.lower),
                lower: 0.0,
                upper: f64::INFINITY,
            });
        }
        if row.upper.is_finite() {
            homogenized.push(LinearRow {
                name: format!("{}:upper", row.name),
                coefficients: lifted(row.coefficients.as_slice(), -row.upper),
                lower: f64::NEG_INFINITY,
                upper: 0.0,
            });
        }
    }

    let mut p = DMatrix::zeros(n + 1, n + 1);
    p.view_mut((0, 0), (n, n)).copy_from(&inputs.covariance);
    let solution = conic::solve(
        &ConicProblem {
            quadratic: Some(&p),
            linear: &vec![0.0; n + 1],
            rows: &homogenized,
            norm_bound: None,
        },
        settings,
    )?;

    let kappa = solution.x[n];
    if kappa <= ZERO_TOLERANCE {
        return Err(RiskcalcError::degenerate(
            "maximum Sharpe portfolio is unbounded (scale factor vanished)",
        ));
    }
    let weights = (0..n).map(|i| solution.x[i] / kappa).collect();
    Ok((weights, solution.iterations))
}

fn build_result(
    inputs: &OptimizationInputs,
    rows: &[LinearRow],
    objective: &Objective,
    weights: Vec<f64>,
    iterations: usize,
) -> OptimizationResult {
    let weights: Vec<f64> = weights
        .into_iter()
        .map(|w| if w.abs() < WEIGHT_CLEAN_THRESHOLD { 0.0 } else { w })
        .collect();
    let w = DVector::from_column_slice(&weights);
    let expected_return = inputs
        .expected_returns
        .iter()
        .zip(&weights)
        .map(|(r, w)| r * w)
        .sum::<f64>();
    let volatility = w.dot(&(&inputs.covariance * &w)).max(0.0).sqrt();
    let sharpe_ratio = (volatility > ZERO_TOLERANCE)
        .then(|| (expected_return - objective.risk_free_rate()) / volatility);

    let checks = constraints::check_rows(rows, &weights);
    let feasible = checks.iter().all(|c| c.satisfied);
    OptimizationResult {
        objective: *objective,
        weights: inputs.symbols.iter().cloned().zip(weights).collect(),
        expected_return,
        volatility,
        sharpe_ratio,
        checks,
        feasible,
        iterations,
    }
}
