//! Value-at-Risk and Expected Shortfall.
//!
//! Losses are reported as positive magnitudes: a VaR of 0.02 means a 2% loss.
//! CVaR is never below VaR for the same method and confidence level.

use crate::domain::error::RiskcalcError;
use crate::domain::stats;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use std::fmt;
use tracing::{debug, warn};

pub const DEFAULT_SIMULATIONS: usize = 10_000;
pub const DEFAULT_SEED: u64 = 42;

/// Paths per independently seeded chunk. Fixed so results never depend on the thread count.
const MC_CHUNK: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConfidenceLevel {
    P90,
    #[default]
    P95,
    P99,
}

impl ConfidenceLevel {
    pub const ALL: [ConfidenceLevel; 3] =
        [ConfidenceLevel::P90, ConfidenceLevel::P95, ConfidenceLevel::P99];

    pub fn value(self) -> f64 {
        match self {
            ConfidenceLevel::P90 => 0.90,
            ConfidenceLevel::P95 => 0.95,
            ConfidenceLevel::P99 => 0.99,
        }
    }

    /// Probability mass of the loss tail, 1 - c.
    pub fn tail(self) -> f64 {
        match self {
            ConfidenceLevel::P90 => 0.10,
            ConfidenceLevel::P95 => 0.05,
            ConfidenceLevel::P99 => 0.01,
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.value())
    }
}

impl std::str::FromStr for ConfidenceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches('%');
        let value: f64 = trimmed
            .parse()
            .map_err(|_| format!("'{s}' is not a confidence level"))?;
        let value = if value > 1.0 { value / 100.0 } else { value };
        ConfidenceLevel::ALL
            .into_iter()
            .find(|c| (c.value() - value).abs() < 1e-9)
            .ok_or_else(|| format!("confidence level must be 0.90, 0.95 or 0.99, got {s}"))
    }
}

/// How Monte Carlo outcomes are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum McSampling {
    /// Normal(mean, sample std) fitted to the history.
    #[default]
    Normal,
    /// Resample historical returns with replacement.
    Bootstrap,
}

impl std::str::FromStr for McSampling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(McSampling::Normal),
            "bootstrap" => Ok(McSampling::Bootstrap),
            other => Err(format!("unknown sampling '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MonteCarloParams {
    pub simulations: usize,
    pub seed: u64,
    pub sampling: McSampling,
}

impl Default for MonteCarloParams {
    fn default() -> Self {
        Self {
            simulations: DEFAULT_SIMULATIONS,
            seed: DEFAULT_SEED,
            sampling: McSampling::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VarMethod {
    #[default]
    Historical,
    Parametric,
    MonteCarlo(MonteCarloParams),
}

impl VarMethod {
    pub fn name(&self) -> &'static str {
        match self {
            VarMethod::Historical => "historical",
            VarMethod::Parametric => "parametric",
            VarMethod::MonteCarlo(_) => "montecarlo",
        }
    }
}

impl fmt::Display for VarMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Monte Carlo parses with default parameters.
impl std::str::FromStr for VarMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "historical" => Ok(VarMethod::Historical),
            "parametric" | "variancecovariance" => Ok(VarMethod::Parametric),
            "montecarlo" | "mc" => Ok(VarMethod::MonteCarlo(MonteCarloParams::default())),
            _ => Err(format!("unknown VaR method '{}'", s.trim())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VarEstimate {
    pub method: VarMethod,
    pub confidence: ConfidenceLevel,
    /// Horizon the figures are scaled to; historical estimates are always one period.
    pub horizon_days: u32,
    pub var: f64,
    pub cvar: f64,
}

pub fn compute_var(
    returns: &[f64],
    confidence: ConfidenceLevel,
    method: &VarMethod,
    horizon_days: u32,
) -> Result<VarEstimate, RiskcalcError> {
    if horizon_days == 0 {
        return Err(RiskcalcError::invalid("VaR horizon must be at least one day"));
    }
    if returns.len() < 2 {
        return Err(RiskcalcError::insufficient("value at risk", returns.len(), 2));
    }

    let estimate = match method {
        VarMethod::Historical => {
            if horizon_days > 1 {
                warn!(horizon_days, "historical VaR is not horizon-scaled; reporting one period");
            }
            let (var, cvar) = historical_var(returns, confidence);
            VarEstimate {
                method: *method,
                confidence,
                horizon_days: 1,
                var,
                cvar,
            }
        }
        VarMethod::Parametric => {
            let (var, cvar) = parametric_var(returns, confidence)?;
            scaled(*method, confidence, horizon_days, var, cvar)
        }
        VarMethod::MonteCarlo(params) => {
            let (var, cvar) = monte_carlo_var(returns, confidence, params)?;
            scaled(*method, confidence, horizon_days, var, cvar)
        }
    };

    debug!(
        method = %estimate.method,
        confidence = %confidence,
        var = estimate.var,
        cvar = estimate.cvar,
        "computed value at risk"
    );
    Ok(estimate)
}

fn scaled(
    method: VarMethod,
    confidence: ConfidenceLevel,
    horizon_days: u32,
    var: f64,
    cvar: f64,
) -> VarEstimate {
    let factor = f64::from(horizon_days).sqrt();
    VarEstimate {
        method,
        confidence,
        horizon_days,
        var: var * factor,
        cvar: cvar * factor,
    }
}

/// One-period (VaR, CVaR) from the empirical distribution.
pub fn historical_var(returns: &[f64], confidence: ConfidenceLevel) -> (f64, f64) {
    tail_statistics(&stats::sorted_copy(returns), confidence)
}

/// One-period (VaR, CVaR) assuming Normal(mean, sample std).
pub fn parametric_var(
    returns: &[f64],
    confidence: ConfidenceLevel,
) -> Result<(f64, f64), RiskcalcError> {
    let mu = stats::mean(returns);
    let sigma = stats::sample_std(returns, "parametric VaR")?;
    let z = stats::normal_quantile(confidence.tail());
    let var = -(mu + z * sigma);
    let cvar = -(mu - sigma * stats::normal_pdf(z) / confidence.tail());
    Ok((var, cvar.max(var)))
}

/// One-period (VaR, CVaR) from simulated outcomes. Deterministic for a given seed.
pub fn monte_carlo_var(
    returns: &[f64],
    confidence: ConfidenceLevel,
    params: &MonteCarloParams,
) -> Result<(f64, f64), RiskcalcError> {
    let outcomes = simulate_outcomes(returns, params)?;
    Ok(tail_statistics(&stats::sorted_copy(&outcomes), confidence))
}

/// Simulated one-period returns, in chunk order.
pub fn simulate_outcomes(
    returns: &[f64],
    params: &MonteCarloParams,
) -> Result<Vec<f64>, RiskcalcError> {
    if params.simulations == 0 {
        return Err(RiskcalcError::invalid("Monte Carlo needs at least one simulation"));
    }
    let normal = match params.sampling {
        McSampling::Normal => {
            let mu = stats::mean(returns);
            let sigma = stats::sample_std(returns, "Monte Carlo VaR")?;
            Some(Normal::new(mu, sigma).map_err(|e| RiskcalcError::degenerate(e.to_string()))?)
        }
        McSampling::Bootstrap => None,
    };

    let simulations = params.simulations;
    let chunks = simulations.div_ceil(MC_CHUNK);
    let per_chunk: Vec<Vec<f64>> = (0..chunks)
        .into_par_iter()
        .map(|chunk| {
            let len = MC_CHUNK.min(simulations - chunk * MC_CHUNK);
            let mut rng = StdRng::seed_from_u64(chunk_seed(params.seed, chunk));
            match &normal {
                Some(dist) => (0..len).map(|_| dist.sample(&mut rng)).collect(),
                None => (0..len)
                    .map(|_| returns[rng.gen_range(0..returns.len())])
                    .collect(),
            }
        })
        .collect();

    Ok(per_chunk.into_iter().flatten().collect())
}

fn chunk_seed(seed: u64, chunk: usize) -> u64 {
    seed ^ (chunk as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// (VaR, CVaR) of an ascending sample: the (1 - c) quantile and the mean of
/// outcomes at or below it, both negated into loss magnitudes.
fn tail_statistics(sorted: &[f64], confidence: ConfidenceLevel) -> (f64, f64) {
    let threshold = stats::quantile_sorted(sorted, confidence.tail());
    let tail: Vec<f64> = sorted
        .iter()
        .copied()
        .take_while(|&r| r <= threshold)
        .collect();
    // Rounding in the tail mean can land an ulp above the threshold.
    let tail_mean = stats::mean(&tail).min(threshold);
    (-threshold, -tail_mean)
}
