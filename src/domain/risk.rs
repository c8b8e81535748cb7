//! Risk metrics over return series and the per-portfolio snapshot.

use crate::domain::drawdown::{Drawdown, max_drawdown};
use crate::domain::error::RiskcalcError;
use crate::domain::series::ReturnSeries;
use crate::domain::stats::{self, ZERO_TOLERANCE};
use crate::domain::var::{self, ConfidenceLevel, VarEstimate, VarMethod};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

pub const DEFAULT_TRADING_DAYS_PER_YEAR: u32 = 252;

/// Parameters for a risk snapshot. Hashable so results can be memoized per config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RiskConfig {
    pub confidence: ConfidenceLevel,
    pub method: VarMethod,
    pub horizon_days: u32,
    /// Scale volatility, tracking error and the ratios to annual figures.
    pub annualize: bool,
    pub trading_days_per_year: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            confidence: ConfidenceLevel::P95,
            method: VarMethod::Historical,
            horizon_days: 1,
            annualize: true,
            trading_days_per_year: DEFAULT_TRADING_DAYS_PER_YEAR,
        }
    }
}

impl RiskConfig {
    fn periods(&self) -> f64 {
        f64::from(self.trading_days_per_year)
    }

    /// Multiplier applied to a per-period standard deviation or ratio.
    fn sqrt_scale(&self) -> f64 {
        if self.annualize { self.periods().sqrt() } else { 1.0 }
    }

    fn check(&self) -> Result<(), RiskcalcError> {
        if self.trading_days_per_year == 0 {
            return Err(RiskcalcError::invalid("trading_days_per_year must be positive"));
        }
        if self.horizon_days == 0 {
            return Err(RiskcalcError::invalid("horizon_days must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RiskMetricsSnapshot {
    pub portfolio_id: String,
    pub as_of: NaiveDate,
    pub observations: usize,
    pub annualized: bool,
    pub volatility: f64,
    pub beta: f64,
    pub var: VarEstimate,
    pub tracking_error: f64,
    pub information_ratio: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: Drawdown,
    pub total_return: f64,
    /// None when the series compounds to a total loss.
    pub annualized_return: Option<f64>,
}

/// Sample standard deviation of returns.
pub fn volatility(returns: &ReturnSeries, config: &RiskConfig) -> Result<f64, RiskcalcError> {
    let sd = stats::sample_std(&returns.values(), "volatility")?;
    Ok(sd * config.sqrt_scale())
}

/// cov(portfolio, benchmark) / var(benchmark).
pub fn beta(portfolio: &ReturnSeries, benchmark: &ReturnSeries) -> Result<f64, RiskcalcError> {
    portfolio.ensure_aligned(benchmark, "beta")?;
    let (p, b) = (portfolio.values(), benchmark.values());
    let cov = stats::sample_covariance(&p, &b, "beta")?;
    let var_b = stats::sample_variance(&b, "beta")?;
    if var_b <= ZERO_TOLERANCE * ZERO_TOLERANCE {
        return Err(RiskcalcError::degenerate("benchmark variance is zero"));
    }
    Ok(cov / var_b)
}

fn active_returns(
    portfolio: &ReturnSeries,
    benchmark: &ReturnSeries,
    context: &str,
) -> Result<Vec<f64>, RiskcalcError> {
    portfolio.ensure_aligned(benchmark, context)?;
    Ok(portfolio
        .points()
        .iter()
        .zip(benchmark.points())
        .map(|(p, b)| p.value - b.value)
        .collect())
}

pub fn tracking_error(
    portfolio: &ReturnSeries,
    benchmark: &ReturnSeries,
    config: &RiskConfig,
) -> Result<f64, RiskcalcError> {
    let active = active_returns(portfolio, benchmark, "tracking error")?;
    Ok(stats::sample_std(&active, "tracking error")? * config.sqrt_scale())
}

/// Mean active return per unit of tracking error.
pub fn information_ratio(
    portfolio: &ReturnSeries,
    benchmark: &ReturnSeries,
    config: &RiskConfig,
) -> Result<f64, RiskcalcError> {
    let active = active_returns(portfolio, benchmark, "information ratio")?;
    let te = stats::sample_std(&active, "information ratio")?;
    let ir = ratio(stats::mean(&active), te, "information ratio")?;
    Ok(ir * config.sqrt_scale())
}

fn excess_returns(returns: &ReturnSeries, risk_free_rate: f64, config: &RiskConfig) -> Vec<f64> {
    let rf = risk_free_rate / config.periods();
    returns.points().iter().map(|p| p.value - rf).collect()
}

pub fn sharpe_ratio(
    returns: &ReturnSeries,
    risk_free_rate: f64,
    config: &RiskConfig,
) -> Result<f64, RiskcalcError> {
    let excess = excess_returns(returns, risk_free_rate, config);
    let sd = stats::sample_std(&returns.values(), "sharpe ratio")?;
    Ok(ratio(stats::mean(&excess), sd, "sharpe ratio")? * config.sqrt_scale())
}

/// Mean excess return over the downside deviation, the root mean square of
/// the negative excess returns taken over those periods only.
pub fn sortino_ratio(
    returns: &ReturnSeries,
    risk_free_rate: f64,
    config: &RiskConfig,
) -> Result<f64, RiskcalcError> {
    if returns.len() < 2 {
        return Err(RiskcalcError::insufficient("sortino ratio", returns.len(), 2));
    }
    let excess = excess_returns(returns, risk_free_rate, config);
    let downside: Vec<f64> = excess.iter().copied().filter(|e| *e < 0.0).collect();
    let dd = if downside.is_empty() {
        0.0
    } else {
        (downside.iter().map(|e| e * e).sum::<f64>() / downside.len() as f64).sqrt()
    };
    Ok(ratio(stats::mean(&excess), dd, "sortino ratio")? * config.sqrt_scale())
}

/// Annual rate equivalent to the compounded return of the series.
pub fn annualized_return(
    returns: &ReturnSeries,
    trading_days_per_year: u32,
) -> Result<f64, RiskcalcError> {
    let convention = returns.convention();
    let growth = convention.growth(returns.total_return());
    if growth <= 0.0 {
        return Err(RiskcalcError::degenerate(format!(
            "cannot annualize a total loss (growth factor {growth})"
        )));
    }
    let years = returns.len() as f64 / f64::from(trading_days_per_year);
    Ok(convention.from_growth(growth.powf(1.0 / years)))
}

/// num / den, treating 0 / 0 as 0 and x / 0 as degenerate. Zero means within
/// `ZERO_TOLERANCE`: the dispersion of a constant series is rounding noise.
fn ratio(numerator: f64, denominator: f64, statistic: &str) -> Result<f64, RiskcalcError> {
    if denominator.abs() <= ZERO_TOLERANCE {
        if numerator.abs() <= ZERO_TOLERANCE {
            return Ok(0.0);
        }
        return Err(RiskcalcError::degenerate(format!(
            "{statistic}: zero dispersion with non-zero mean {numerator:e}"
        )));
    }
    Ok(numerator / denominator)
}

/// Every metric for one portfolio against its benchmark. The first failing
/// metric aborts the snapshot, except the annualized return, which is left
/// empty for a series that loses everything.
pub fn compute_risk_metrics(
    portfolio_id: &str,
    portfolio: &ReturnSeries,
    benchmark: &ReturnSeries,
    risk_free_rate: f64,
    config: &RiskConfig,
) -> Result<RiskMetricsSnapshot, RiskcalcError> {
    config.check()?;
    if !risk_free_rate.is_finite() {
        return Err(RiskcalcError::invalid("risk-free rate must be finite"));
    }
    portfolio.ensure_aligned(benchmark, "portfolio vs benchmark")?;
    debug!(
        portfolio_id,
        observations = portfolio.len(),
        method = %config.method,
        "computing risk metrics"
    );

    let annualized = match annualized_return(portfolio, config.trading_days_per_year) {
        Ok(rate) => Some(rate),
        Err(err @ RiskcalcError::DegenerateInput { .. }) => {
            warn!(portfolio_id, error = %err, "annualized return unavailable");
            None
        }
        Err(err) => return Err(err),
    };

    let values = portfolio.values();
    let snapshot = RiskMetricsSnapshot {
        portfolio_id: portfolio_id.to_string(),
        as_of: portfolio.last_date(),
        observations: portfolio.len(),
        annualized: config.annualize,
        volatility: volatility(portfolio, config)?,
        beta: beta(portfolio, benchmark)?,
        var: var::compute_var(&values, config.confidence, &config.method, config.horizon_days)?,
        tracking_error: tracking_error(portfolio, benchmark, config)?,
        information_ratio: information_ratio(portfolio, benchmark, config)?,
        sharpe_ratio: sharpe_ratio(portfolio, risk_free_rate, config)?,
        sortino_ratio: sortino_ratio(portfolio, risk_free_rate, config)?,
        max_drawdown: max_drawdown(&portfolio.wealth_index())?,
        total_return: portfolio.total_return(),
        annualized_return: annualized,
    };

    info!(
        portfolio_id,
        as_of = %snapshot.as_of,
        volatility = snapshot.volatility,
        var = snapshot.var.var,
        "risk snapshot complete"
    );
    Ok(snapshot)
}
