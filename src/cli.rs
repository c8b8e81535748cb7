//! CLI definition and dispatch.
//!
//! Every analysis subcommand runs the same stages: load and validate config,
//! build the engine's value types, load data through the [`DataPort`], run the
//! engine, print results to stdout. Diagnostics go to stderr via `tracing`.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_snapshot_store::CsvSnapshotStore;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::attribution::{self, AttributionResult, PeriodAttribution};
use crate::domain::config_validation::{
    parse_finite, parse_flag, parse_list, parse_positive, parse_rate, parse_security_limits,
    parse_value, sector_sections, validate_config, OBJECTIVES,
};
use crate::domain::error::RiskcalcError;
use crate::domain::factor::{select_factors, FactorReturnSeries, StandardFactorSet};
use crate::domain::factor_model::{
    self, FactorExposureResult, FactorModelConfig, DEFAULT_SIGNIFICANCE_LEVEL,
};
use crate::domain::optimization::{
    self, estimate_inputs, ConstraintSet, Objective, OptimizationResult, SectorConstraint,
    SolverSettings, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE,
};
use crate::domain::returns::{self, GapPolicy, ReturnSource, DEFAULT_MAX_FILL};
use crate::domain::risk::{self, RiskConfig, RiskMetricsSnapshot, DEFAULT_TRADING_DAYS_PER_YEAR};
use crate::domain::series::{PriceSeries, ReturnConvention, ReturnSeries};
use crate::domain::stress::{
    self, AssetShockResult, AssetShocks, Holding, NamedScenario, Scenario, StressTestResult,
};
use crate::domain::var::{MonteCarloParams, VarMethod, DEFAULT_SEED, DEFAULT_SIMULATIONS};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::snapshot_port::{SnapshotPort, SnapshotRecord};

#[derive(Parser, Debug)]
#[command(name = "riskcalc", about = "Portfolio analytics and risk engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// Directory holding <SYMBOL>.csv, factors.csv and positions.csv
    #[arg(short, long)]
    pub data: PathBuf,
    /// INI configuration; engine defaults apply when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// First date to load (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<NaiveDate>,
    /// Last date to load (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<NaiveDate>,
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct TargetArgs {
    /// Analyse the price returns of one symbol
    #[arg(long)]
    pub symbol: Option<String>,
    /// Analyse a portfolio from positions.csv
    #[arg(long)]
    pub portfolio: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print period returns
    Returns {
        #[command(flatten)]
        common: DataArgs,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Compute a risk snapshot against a benchmark
    Risk {
        #[command(flatten)]
        common: DataArgs,
        #[command(flatten)]
        target: TargetArgs,
        /// Benchmark symbol
        #[arg(long)]
        benchmark: String,
        /// Append the snapshot to this CSV store
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Regress returns on factor returns
    Factors {
        #[command(flatten)]
        common: DataArgs,
        #[command(flatten)]
        target: TargetArgs,
        /// ff3, ff5 or a comma-separated list of factor ids
        #[arg(long)]
        factors: Option<String>,
    },
    /// Attribute returns to factor exposures
    Attribute {
        #[command(flatten)]
        common: DataArgs,
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        factors: Option<String>,
        /// Also break the window down by calendar month
        #[arg(long)]
        monthly: bool,
    },
    /// Solve for portfolio weights
    Optimize {
        #[command(flatten)]
        common: DataArgs,
        #[arg(long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
        /// max_sharpe, min_volatility, target_return or max_return
        #[arg(long)]
        objective: Option<String>,
        #[arg(long)]
        target_return: Option<f64>,
        /// Volatility budget for max_return
        #[arg(long)]
        target_volatility: Option<f64>,
        /// Trace an efficient frontier with this many points instead
        #[arg(long)]
        frontier: Option<usize>,
    },
    /// Apply a stress scenario to factor exposures
    Stress {
        #[command(flatten)]
        common: DataArgs,
        #[command(flatten)]
        target: TargetArgs,
        /// Named scenario, or a label for the --shock values
        #[arg(long)]
        scenario: String,
        /// Custom shock as id=return, repeatable
        #[arg(long = "shock")]
        shocks: Vec<String>,
        #[arg(long)]
        factors: Option<String>,
        /// Portfolio value to report the stressed value against
        #[arg(long)]
        value: Option<f64>,
        /// Shock each holding's price instead of the factor exposures
        #[arg(long)]
        assets: bool,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// What a subcommand analyses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Symbol(String),
    Portfolio(String),
}

impl Target {
    pub fn id(&self) -> &str {
        match self {
            Target::Symbol(s) | Target::Portfolio(s) => s,
        }
    }
}

impl TargetArgs {
    pub fn target(&self) -> Result<Target, RiskcalcError> {
        match (&self.symbol, &self.portfolio) {
            (Some(symbol), None) => Ok(Target::Symbol(symbol.clone())),
            (None, Some(portfolio)) => Ok(Target::Portfolio(portfolio.clone())),
            _ => Err(RiskcalcError::InvalidInput {
                reason: "exactly one of --symbol or --portfolio is required".into(),
            }),
        }
    }
}

/// Inclusive date window; an open side is unrestricted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DataArgs {
    fn range(&self) -> DateRange {
        DateRange {
            start: self.start,
            end: self.end,
        }
    }
}

pub fn run(cli: Cli) -> ExitCode {
    let outcome = match cli.command {
        Command::Returns { common, target } => run_returns(&common, &target),
        Command::Risk {
            common,
            target,
            benchmark,
            store,
        } => run_risk(&common, &target, &benchmark, store.as_ref()),
        Command::Factors {
            common,
            target,
            factors,
        } => run_factors(&common, &target, factors.as_deref()),
        Command::Attribute {
            common,
            target,
            factors,
            monthly,
        } => run_attribute(&common, &target, factors.as_deref(), monthly),
        Command::Optimize {
            common,
            symbols,
            objective,
            target_return,
            target_volatility,
            frontier,
        } => {
            let request = ObjectiveRequest {
                name: objective,
                target_return,
                target_volatility,
            };
            run_optimize(&common, &symbols, &request, frontier)
        }
        Command::Stress {
            common,
            target,
            scenario,
            shocks,
            factors,
            value,
            assets,
        } => run_stress(
            &common,
            &target,
            &StressRequest {
                scenario,
                shocks,
                factors,
                value,
                assets,
            },
        ),
        Command::Validate { config } => run_validate(&config),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}: {e}", e.kind());
            (&e).into()
        }
    }
}

/// Loads and validates `path`, or an empty configuration when absent.
pub fn load_config(path: Option<&PathBuf>) -> Result<FileConfigAdapter, RiskcalcError> {
    let adapter = match path {
        Some(path) => FileConfigAdapter::from_file(path)?,
        None => FileConfigAdapter::defaults(),
    };
    info!(source = adapter.source(), "loaded config");
    validate_config(&adapter)?;
    Ok(adapter)
}

pub fn build_returns_config(
    config: &dyn ConfigPort,
) -> Result<(ReturnConvention, GapPolicy), RiskcalcError> {
    let convention = parse_value(config, "returns", "convention")?.unwrap_or_default();
    let max_fill = parse_value(config, "returns", "max_fill_days")?.unwrap_or(DEFAULT_MAX_FILL);
    Ok((convention, GapPolicy { max_fill }))
}

pub fn build_risk_config(config: &dyn ConfigPort) -> Result<RiskConfig, RiskcalcError> {
    let mut method: VarMethod = parse_value(config, "risk", "var_method")?.unwrap_or_default();
    if let VarMethod::MonteCarlo(params) = &mut method {
        *params = MonteCarloParams {
            simulations: parse_positive(config, "risk", "simulations")?
                .unwrap_or(DEFAULT_SIMULATIONS),
            seed: parse_value(config, "risk", "seed")?.unwrap_or(DEFAULT_SEED),
            sampling: parse_value(config, "risk", "sampling")?.unwrap_or_default(),
        };
    }
    Ok(RiskConfig {
        confidence: parse_value(config, "risk", "confidence_level")?.unwrap_or_default(),
        method,
        horizon_days: parse_positive(config, "risk", "horizon_days")?.unwrap_or(1),
        annualize: parse_flag(config, "risk", "annualize")?.unwrap_or(true),
        trading_days_per_year: parse_positive(config, "risk", "trading_days_per_year")?
            .unwrap_or(DEFAULT_TRADING_DAYS_PER_YEAR),
    })
}

/// Annual risk-free rate from `section`, zero when unset.
pub fn build_risk_free_rate(config: &dyn ConfigPort, section: &str) -> Result<f64, RiskcalcError> {
    Ok(parse_rate(config, section, "risk_free_rate")?.unwrap_or(0.0))
}

pub fn build_factor_config(config: &dyn ConfigPort) -> Result<FactorModelConfig, RiskcalcError> {
    Ok(FactorModelConfig {
        significance_level: parse_value(config, "factors", "significance_level")?
            .unwrap_or(DEFAULT_SIGNIFICANCE_LEVEL),
    })
}

/// Objective chosen on the command line; unset fields fall back to `[optimization]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectiveRequest {
    pub name: Option<String>,
    pub target_return: Option<f64>,
    pub target_volatility: Option<f64>,
}

impl ObjectiveRequest {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }
}

/// The objective named on the command line, else in `[optimization]`, else max Sharpe.
pub fn build_objective(
    config: &dyn ConfigPort,
    request: &ObjectiveRequest,
) -> Result<Objective, RiskcalcError> {
    let name = match &request.name {
        Some(name) => name.trim().to_lowercase(),
        None => config
            .get_string("optimization", "objective")
            .map(|o| o.trim().to_lowercase())
            .unwrap_or_else(|| "max_sharpe".to_string()),
    };
    match name.as_str() {
        "max_sharpe" => Ok(Objective::MaxSharpe {
            risk_free_rate: build_risk_free_rate(config, "optimization")?,
        }),
        "min_volatility" => Ok(Objective::MinVolatility),
        "target_return" => {
            let target = match request.target_return {
                Some(target) => target,
                None => parse_finite(config, "optimization", "target_return")?
                    .ok_or_else(|| missing_optimization_key("target_return"))?,
            };
            Ok(Objective::TargetReturn { target })
        }
        "max_return" => {
            let target_volatility = match request.target_volatility {
                Some(volatility) => volatility,
                None => parse_positive(config, "optimization", "target_volatility")?
                    .ok_or_else(|| missing_optimization_key("target_volatility"))?,
            };
            Ok(Objective::MaxReturn { target_volatility })
        }
        other => Err(RiskcalcError::InvalidInput {
            reason: format!("objective '{other}' must be one of {}", OBJECTIVES.join(", ")),
        }),
    }
}

fn missing_optimization_key(key: &str) -> RiskcalcError {
    RiskcalcError::ConfigMissing {
        section: "optimization".into(),
        key: key.into(),
    }
}

/// Constraint set from `[optimization]` and the `[sector.<Name>]` sections. A
/// configured `target_return` is the objective's target under the target
/// objective and a minimum-return constraint otherwise.
pub fn build_constraints(
    config: &dyn ConfigPort,
    objective: &Objective,
) -> Result<ConstraintSet, RiskcalcError> {
    let sectors = sector_sections(config)
        .into_iter()
        .map(|(section, name)| -> Result<SectorConstraint, RiskcalcError> {
            Ok(SectorConstraint {
                members: config.get_list(&section, "members").unwrap_or_default(),
                min: parse_finite(config, &section, "min")?,
                max: parse_finite(config, &section, "max")?,
                name,
            })
        })
        .collect::<Result<Vec<_>, RiskcalcError>>()?;
    let target = parse_finite(config, "optimization", "target_return")?;

    Ok(ConstraintSet {
        long_only: parse_flag(config, "optimization", "long_only")?.unwrap_or(true),
        min_weight: parse_finite(config, "optimization", "min_weight")?,
        max_weight: parse_finite(config, "optimization", "max_weight")?,
        security_limits: parse_security_limits(config)?,
        sectors,
        target_return: match objective {
            Objective::TargetReturn { .. } => None,
            _ => target,
        },
        fully_invested: parse_flag(config, "optimization", "fully_invested")?.unwrap_or(true),
    })
}

pub fn build_solver_settings(config: &dyn ConfigPort) -> Result<SolverSettings, RiskcalcError> {
    Ok(SolverSettings {
        max_iterations: parse_positive(config, "optimization", "max_iterations")?
            .unwrap_or(DEFAULT_MAX_ITERATIONS),
        tolerance: parse_positive(config, "optimization", "tolerance")?
            .unwrap_or(DEFAULT_TOLERANCE),
    })
}

/// Factor ids from `ff3`/`ff5` or a comma-separated list; `None` keeps every factor.
pub fn resolve_factor_ids(selection: Option<&str>) -> Option<Vec<String>> {
    let selection = selection?.trim();
    if selection.is_empty() {
        return None;
    }
    match selection.parse::<StandardFactorSet>() {
        Ok(set) => Some(set.ids().iter().map(|id| id.to_string()).collect()),
        Err(_) => Some(parse_list(selection)),
    }
}

/// Parses `id=value` pairs.
pub fn parse_assignments(pairs: &[String]) -> Result<BTreeMap<String, f64>, RiskcalcError> {
    pairs
        .iter()
        .map(|pair| -> Result<(String, f64), RiskcalcError> {
            let (id, value) = pair.split_once('=').ok_or_else(|| RiskcalcError::InvalidInput {
                reason: format!("'{pair}' is not of the form id=value"),
            })?;
            let value: f64 = value.trim().parse().map_err(|_| RiskcalcError::InvalidInput {
                reason: format!("'{}' in '{pair}' is not a number", value.trim()),
            })?;
            Ok((id.trim().to_string(), value))
        })
        .collect()
}

/// Named scenario, or a custom one when shocks are supplied.
pub fn resolve_scenario(name: &str, shocks: &[String]) -> Result<Scenario, RiskcalcError> {
    if !shocks.is_empty() {
        return Ok(Scenario::Custom {
            name: name.to_string(),
            shocks: parse_assignments(shocks)?,
        });
    }
    name.parse::<NamedScenario>()
        .map(Scenario::Named)
        .map_err(|reason| RiskcalcError::InvalidInput { reason })
}

fn price_history(
    data: &dyn DataPort,
    symbols: &[String],
    range: DateRange,
) -> Result<Vec<PriceSeries>, RiskcalcError> {
    symbols
        .iter()
        .map(|symbol| data.fetch_prices(symbol, range.start, range.end))
        .collect()
}

/// Return series of a symbol or of a portfolio's position book. A portfolio's
/// calendar is the union of its symbols' price dates.
pub fn load_target_returns(
    data: &dyn DataPort,
    target: &Target,
    range: DateRange,
    config: &dyn ConfigPort,
) -> Result<ReturnSeries, RiskcalcError> {
    let (convention, gap_policy) = build_returns_config(config)?;
    match target {
        Target::Symbol(symbol) => {
            let prices = data.fetch_prices(symbol, range.start, range.end)?;
            returns::compute_returns(ReturnSource::Prices(&prices), convention, &gap_policy)
        }
        Target::Portfolio(portfolio_id) => {
            let positions = data.fetch_positions(portfolio_id)?;
            let symbols: Vec<String> = positions
                .iter()
                .map(|p| p.symbol.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let prices = price_history(data, &symbols, range)?;
            let calendar: Vec<NaiveDate> = prices
                .iter()
                .flat_map(|p| p.dates())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            returns::compute_returns(
                ReturnSource::Portfolio {
                    positions: &positions,
                    prices: &prices,
                    calendar: &calendar,
                },
                convention,
                &gap_policy,
            )
        }
    }
}

pub fn risk_pipeline(
    data: &dyn DataPort,
    target: &Target,
    benchmark_symbol: &str,
    range: DateRange,
    config: &dyn ConfigPort,
) -> Result<RiskMetricsSnapshot, RiskcalcError> {
    let risk_config = build_risk_config(config)?;
    let risk_free_rate = build_risk_free_rate(config, "risk")?;
    let portfolio = load_target_returns(data, target, range, config)?;
    let benchmark =
        load_target_returns(data, &Target::Symbol(benchmark_symbol.to_string()), range, config)?;

    let aligned = returns::align_returns(&[&portfolio, &benchmark])?;
    let [portfolio, benchmark] = aligned.as_slice() else {
        return Err(RiskcalcError::SeriesAlignment {
            reason: "portfolio and benchmark could not be aligned".into(),
        });
    };
    risk::compute_risk_metrics(target.id(), portfolio, benchmark, risk_free_rate, &risk_config)
}

/// Target returns and the selected factors, restricted to their common dates.
fn aligned_factor_inputs(
    data: &dyn DataPort,
    target: &Target,
    factor_ids: Option<&[String]>,
    range: DateRange,
    config: &dyn ConfigPort,
) -> Result<(ReturnSeries, Vec<FactorReturnSeries>), RiskcalcError> {
    let response = load_target_returns(data, target, range, config)?;
    let available = data.fetch_factor_returns()?;
    let factors = match factor_ids {
        Some(ids) => {
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            select_factors(&available, &ids)?
        }
        None => available,
    };
    // Factor files hold simple returns; regress in the target's convention.
    let factors = factors
        .into_iter()
        .map(|f| {
            let returns = f.returns.to_convention(response.convention())?;
            Ok(FactorReturnSeries::new(f.definition, returns))
        })
        .collect::<Result<Vec<_>, RiskcalcError>>()?;

    let mut series: Vec<&ReturnSeries> = vec![&response];
    series.extend(factors.iter().map(|f| &f.returns));
    let mut aligned = returns::align_returns(&series)?.into_iter();
    let response = aligned.next().ok_or_else(|| RiskcalcError::EmptySeries {
        series: target.id().to_string(),
    })?;
    let factors = factors
        .into_iter()
        .zip(aligned)
        .map(|(factor, returns)| FactorReturnSeries::new(factor.definition, returns))
        .collect();
    Ok((response, factors))
}

pub fn factor_pipeline(
    data: &dyn DataPort,
    target: &Target,
    factor_ids: Option<&[String]>,
    range: DateRange,
    config: &dyn ConfigPort,
) -> Result<FactorExposureResult, RiskcalcError> {
    let factor_config = build_factor_config(config)?;
    let (response, factors) = aligned_factor_inputs(data, target, factor_ids, range, config)?;
    factor_model::compute_factor_model(&response, &factors, &factor_config)
}

pub fn attribution_pipeline(
    data: &dyn DataPort,
    target: &Target,
    factor_ids: Option<&[String]>,
    range: DateRange,
    config: &dyn ConfigPort,
    monthly: bool,
) -> Result<(AttributionResult, Vec<PeriodAttribution>), RiskcalcError> {
    let factor_config = build_factor_config(config)?;
    let (response, factors) = aligned_factor_inputs(data, target, factor_ids, range, config)?;
    let model = factor_model::compute_factor_model(&response, &factors, &factor_config)?;
    let exposures = model.coefficients();

    let window = attribution::window_attribution(&exposures, &response, &factors)?;
    let periods = if monthly {
        attribution::monthly_attribution(&exposures, &response, &factors)?
    } else {
        Vec::new()
    };
    Ok((window, periods))
}

pub fn optimize_pipeline(
    data: &dyn DataPort,
    symbols: &[String],
    objective: &ObjectiveRequest,
    frontier_points: Option<usize>,
    range: DateRange,
    config: &dyn ConfigPort,
) -> Result<Vec<OptimizationResult>, RiskcalcError> {
    let (convention, gap_policy) = build_returns_config(config)?;
    let objective = build_objective(config, objective)?;
    let constraints = build_constraints(config, &objective)?;
    let settings = build_solver_settings(config)?;
    let periods = parse_positive(config, "risk", "trading_days_per_year")?
        .unwrap_or(DEFAULT_TRADING_DAYS_PER_YEAR);

    let prices = price_history(data, symbols, range)?;
    let series = prices
        .iter()
        .map(|p| returns::compute_returns(ReturnSource::Prices(p), convention, &gap_policy))
        .collect::<Result<Vec<_>, _>>()?;
    let refs: Vec<&ReturnSeries> = series.iter().collect();
    let aligned = returns::align_returns(&refs)?;
    let inputs = estimate_inputs(symbols, &aligned, periods)?;

    match frontier_points {
        Some(points) => optimization::efficient_frontier(&inputs, &constraints, points, &settings),
        None => Ok(vec![optimization::optimize_portfolio(
            &inputs,
            &constraints,
            &objective,
            &settings,
        )?]),
    }
}

/// Options of the `stress` subcommand.
#[derive(Debug, Clone, Default)]
pub struct StressRequest {
    pub scenario: String,
    pub shocks: Vec<String>,
    pub factors: Option<String>,
    pub value: Option<f64>,
    pub assets: bool,
}

/// Factor-level stress: exposures come from regressing the target on the
/// factors, then each exposure is multiplied by its shock.
pub fn stress_pipeline(
    data: &dyn DataPort,
    target: &Target,
    scenario: &Scenario,
    factor_ids: Option<&[String]>,
    range: DateRange,
    config: &dyn ConfigPort,
) -> Result<StressTestResult, RiskcalcError> {
    let model = factor_pipeline(data, target, factor_ids, range, config)?;
    stress::run_stress_test(&model.coefficients(), scenario)
}

/// Asset-level stress on a portfolio's holdings at the last available price.
pub fn asset_stress_pipeline(
    data: &dyn DataPort,
    portfolio_id: &str,
    scenario: &Scenario,
    range: DateRange,
) -> Result<AssetShockResult, RiskcalcError> {
    let shocks = match scenario {
        Scenario::Named(named) => named.asset_shocks(),
        Scenario::Custom { shocks, .. } => AssetShocks {
            returns: shocks.clone(),
            default: None,
        },
    };
    let positions = data.fetch_positions(portfolio_id)?;
    let mut holdings = Vec::new();
    for position in &positions {
        let prices = data.fetch_prices(&position.symbol, range.start, range.end)?;
        let last = prices.last().ok_or_else(|| RiskcalcError::EmptySeries {
            series: position.symbol.clone(),
        })?;
        if !position.is_active(last.date) {
            continue;
        }
        holdings.push(Holding {
            symbol: position.symbol.clone(),
            quantity: position.quantity,
            price: last.price,
        });
    }
    stress::run_asset_shock_test(&holdings, &shocks)
}

fn run_returns(common: &DataArgs, target: &TargetArgs) -> Result<(), RiskcalcError> {
    let config = load_config(common.config.as_ref())?;
    let data = CsvAdapter::new(common.data.clone());
    let series = load_target_returns(&data, &target.target()?, common.range(), &config)?;
    println!("date,return");
    for point in series.points() {
        println!("{},{:.8}", point.date, point.value);
    }
    info!(periods = series.len(), convention = %series.convention(), "returns written");
    Ok(())
}

fn run_risk(
    common: &DataArgs,
    target: &TargetArgs,
    benchmark: &str,
    store: Option<&PathBuf>,
) -> Result<(), RiskcalcError> {
    let config = load_config(common.config.as_ref())?;
    let data = CsvAdapter::new(common.data.clone());
    let snapshot = risk_pipeline(&data, &target.target()?, benchmark, common.range(), &config)?;
    print_snapshot(&snapshot);
    if let Some(path) = store {
        CsvSnapshotStore::new(path.clone()).save(&SnapshotRecord::from(&snapshot))?;
    }
    Ok(())
}

fn run_factors(
    common: &DataArgs,
    target: &TargetArgs,
    factors: Option<&str>,
) -> Result<(), RiskcalcError> {
    let config = load_config(common.config.as_ref())?;
    let data = CsvAdapter::new(common.data.clone());
    let ids = resolve_factor_ids(factors);
    let result = factor_pipeline(
        &data,
        &target.target()?,
        ids.as_deref(),
        common.range(),
        &config,
    )?;

    println!("Observations:     {}", result.observations);
    println!("R²:               {:.4}", result.r_squared);
    println!("Adjusted R²:      {:.4}", result.adjusted_r_squared);
    println!(
        "Alpha:            {:.6} (t = {:.2})",
        result.specific.alpha, result.specific.alpha_t_statistic
    );
    println!("Residual std:     {:.6}", result.specific.residual_std);
    println!();
    println!(
        "{:<12} {:>10} {:>10} {:>8} {:>8}  sig",
        "factor", "beta", "std err", "t", "p"
    );
    for e in &result.exposures {
        println!(
            "{:<12} {:>10.4} {:>10.4} {:>8.2} {:>8.4}  {}",
            e.factor.id,
            e.coefficient,
            e.standard_error,
            e.t_statistic,
            e.p_value,
            if e.significant { "*" } else { "" }
        );
    }
    Ok(())
}

fn run_attribute(
    common: &DataArgs,
    target: &TargetArgs,
    factors: Option<&str>,
    monthly: bool,
) -> Result<(), RiskcalcError> {
    let config = load_config(common.config.as_ref())?;
    let data = CsvAdapter::new(common.data.clone());
    let ids = resolve_factor_ids(factors);
    let (window, periods) = attribution_pipeline(
        &data,
        &target.target()?,
        ids.as_deref(),
        common.range(),
        &config,
        monthly,
    )?;

    print_attribution("window", &window);
    for period in &periods {
        print_attribution(&period.label(), &period.attribution);
    }
    Ok(())
}

fn run_optimize(
    common: &DataArgs,
    symbols: &[String],
    objective: &ObjectiveRequest,
    frontier: Option<usize>,
) -> Result<(), RiskcalcError> {
    let config = load_config(common.config.as_ref())?;
    let data = CsvAdapter::new(common.data.clone());
    let results = optimize_pipeline(
        &data,
        symbols,
        objective,
        frontier,
        common.range(),
        &config,
    )?;

    if frontier.is_some() {
        println!("expected_return,volatility,{}", symbols.join(","));
        for r in &results {
            let weights: Vec<String> = r.weights.iter().map(|(_, w)| format!("{w:.6}")).collect();
            println!("{:.6},{:.6},{}", r.expected_return, r.volatility, weights.join(","));
        }
        return Ok(());
    }
    for r in &results {
        println!("Objective:        {}", r.objective);
        println!("Expected return:  {:.4}", r.expected_return);
        println!("Volatility:       {:.4}", r.volatility);
        match r.sharpe_ratio {
            Some(sharpe) => println!("Sharpe ratio:     {sharpe:.4}"),
            None => println!("Sharpe ratio:     n/a"),
        }
        println!("Iterations:       {}", r.iterations);
        println!();
        for (symbol, weight) in &r.weights {
            println!("  {symbol:<10} {:>8.2}%", weight * 100.0);
        }
        for check in r.checks.iter().filter(|c| !c.satisfied) {
            warn!(constraint = %check.name, value = check.value, "constraint not satisfied");
        }
    }
    Ok(())
}

fn run_stress(
    common: &DataArgs,
    target: &TargetArgs,
    request: &StressRequest,
) -> Result<(), RiskcalcError> {
    let config = load_config(common.config.as_ref())?;
    let data = CsvAdapter::new(common.data.clone());
    let target = target.target()?;
    let scenario = resolve_scenario(&request.scenario, &request.shocks)?;

    if request.assets {
        let Target::Portfolio(portfolio_id) = &target else {
            return Err(RiskcalcError::InvalidInput {
                reason: "--assets needs --portfolio".into(),
            });
        };
        let result = asset_stress_pipeline(&data, portfolio_id, &scenario, common.range())?;
        println!("Scenario:         {}", scenario.name());
        println!("Current value:    {:.2}", result.current_value);
        println!("Stressed value:   {:.2}", result.stressed_value);
        println!("Gross exposure:   {:.2}", result.gross_exposure);
        println!(
            "Change:           {:.2} ({:.2}% of gross)",
            result.absolute_change,
            result.percentage_change * 100.0
        );
        for p in &result.positions {
            println!(
                "  {:<10} {:>8.2}% {:>14.2}",
                p.symbol,
                p.shock * 100.0,
                p.value_change
            );
        }
        return Ok(());
    }

    let ids = resolve_factor_ids(request.factors.as_deref());
    let result = stress_pipeline(
        &data,
        &target,
        &scenario,
        ids.as_deref(),
        common.range(),
        &config,
    )?;
    println!("Scenario:         {}", result.scenario_name);
    println!("Impact:           {:.2}%", result.impact * 100.0);
    if let Some(value) = request.value {
        println!("Stressed value:   {:.2}", result.stressed_value(value));
    }
    for f in &result.factor_impacts {
        println!(
            "  {:<12} exposure {:>8.4}  shock {:>8.2}%  impact {:>8.2}%",
            f.factor_id,
            f.exposure,
            f.shock * 100.0,
            f.impact * 100.0
        );
    }
    if !result.unmatched_shocks.is_empty() {
        println!("Unused shocks:    {}", result.unmatched_shocks.join(", "));
    }
    Ok(())
}

fn run_validate(config_path: &PathBuf) -> Result<(), RiskcalcError> {
    let adapter = load_config(Some(config_path))?;
    let objective = build_objective(&adapter, &ObjectiveRequest::default())?;
    build_risk_config(&adapter)?;
    build_constraints(&adapter, &objective)?;
    println!("Configuration is valid.");
    Ok(())
}

fn print_snapshot(s: &RiskMetricsSnapshot) {
    let basis = if s.annualized { "annualized" } else { "per period" };
    println!("Portfolio:         {}", s.portfolio_id);
    println!("As of:             {}", s.as_of);
    println!("Observations:      {}", s.observations);
    println!("Volatility:        {:.4} ({basis})", s.volatility);
    println!("Beta:              {:.4}", s.beta);
    println!(
        "VaR ({}, {}, {}d): {:.4}",
        s.var.method, s.var.confidence, s.var.horizon_days, s.var.var
    );
    println!("CVaR:              {:.4}", s.var.cvar);
    println!("Tracking error:    {:.4}", s.tracking_error);
    println!("Information ratio: {:.4}", s.information_ratio);
    println!("Sharpe ratio:      {:.4}", s.sharpe_ratio);
    println!("Sortino ratio:     {:.4}", s.sortino_ratio);
    println!("Max drawdown:      -{:.2}%", s.max_drawdown.depth * 100.0);
    println!("Total return:      {:.2}%", s.total_return * 100.0);
    match s.annualized_return {
        Some(rate) => println!("Annualized return: {:.2}%", rate * 100.0),
        None => println!("Annualized return: n/a (total loss)"),
    }
}

fn print_attribution(label: &str, a: &AttributionResult) {
    println!("[{label}] total {:.4}%", a.total_return * 100.0);
    for c in &a.contributions {
        println!(
            "  {:<12} {:>8.4} x {:>8.4}% = {:>8.4}%",
            c.factor_id,
            c.exposure,
            c.factor_return * 100.0,
            c.contribution * 100.0
        );
    }
    println!("  {:<12} {:>32.4}%", "specific", a.specific_return * 100.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::var::{ConfidenceLevel, McSampling};

    fn config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    #[test]
    fn risk_config_defaults() {
        let risk = build_risk_config(&config("")).unwrap();
        assert_eq!(risk, RiskConfig::default());
    }

    #[test]
    fn monte_carlo_params_come_from_risk_section() {
        let risk = build_risk_config(&config(
            "[risk]\nvar_method = montecarlo\nsimulations = 500\nseed = 9\nsampling = bootstrap\nconfidence_level = 99%\n",
        ))
        .unwrap();
        assert_eq!(risk.confidence, ConfidenceLevel::P99);
        assert_eq!(
            risk.method,
            VarMethod::MonteCarlo(MonteCarloParams {
                simulations: 500,
                seed: 9,
                sampling: McSampling::Bootstrap,
            })
        );
    }

    #[test]
    fn objective_defaults_to_max_sharpe() {
        let objective = build_objective(
            &config("[optimization]\nrisk_free_rate = 0.03\n"),
            &ObjectiveRequest::default(),
        )
        .unwrap();
        assert_eq!(objective, Objective::MaxSharpe { risk_free_rate: 0.03 });
    }

    #[test]
    fn objective_override_wins() {
        let objective = build_objective(
            &config("[optimization]\nobjective = max_sharpe\n"),
            &ObjectiveRequest {
                name: Some("target_return".into()),
                target_return: Some(0.12),
                target_volatility: None,
            },
        )
        .unwrap();
        assert_eq!(objective, Objective::TargetReturn { target: 0.12 });
    }

    #[test]
    fn max_return_reads_volatility_budget() {
        let cfg = config("[optimization]\nobjective = max_return\ntarget_volatility = 0.12\n");
        let objective = build_objective(&cfg, &ObjectiveRequest::default()).unwrap();
        assert_eq!(objective, Objective::MaxReturn { target_volatility: 0.12 });

        let request = ObjectiveRequest {
            target_volatility: Some(0.2),
            ..ObjectiveRequest::named("max_return")
        };
        let objective = build_objective(&config(""), &request).unwrap();
        assert_eq!(objective, Objective::MaxReturn { target_volatility: 0.2 });

        let err = build_objective(&config(""), &ObjectiveRequest::named("max_return")).unwrap_err();
        assert!(matches!(err, RiskcalcError::ConfigMissing { ref key, .. } if key == "target_volatility"));
    }

    #[test]
    fn security_limits_come_from_their_section() {
        let set = build_constraints(
            &config("[constraints.security]\nAAA = 0.1, 0.3\nbbb = , 0.25\n"),
            &Objective::MinVolatility,
        )
        .unwrap();
        assert_eq!(set.security_limits.len(), 2);
        assert_eq!(set.security_limits["AAA"].min, Some(0.1));
        assert_eq!(set.security_limits["BBB"].max, Some(0.25));
        assert_eq!(set.security_limits["BBB"].min, None);
    }

    #[test]
    fn configured_target_is_a_constraint_for_other_objectives() {
        let cfg = config("[optimization]\ntarget_return = 0.07\nmax_weight = 0.4\n");
        let set = build_constraints(&cfg, &Objective::MinVolatility).unwrap();
        assert_eq!(set.target_return, Some(0.07));
        assert_eq!(set.max_weight, Some(0.4));
        let set = build_constraints(&cfg, &Objective::TargetReturn { target: 0.07 }).unwrap();
        assert_eq!(set.target_return, None);
    }

    #[test]
    fn sectors_are_built_from_sections() {
        let set = build_constraints(
            &config("[sector.tech]\nmembers = AAPL, MSFT\nmax = 0.5\n"),
            &Objective::MinVolatility,
        )
        .unwrap();
        assert_eq!(
            set.sectors,
            vec![SectorConstraint {
                name: "tech".into(),
                members: vec!["AAPL".into(), "MSFT".into()],
                min: None,
                max: Some(0.5),
            }]
        );
    }

    #[test]
    fn factor_ids_resolve_from_set_or_list() {
        assert_eq!(
            resolve_factor_ids(Some("ff3")),
            Some(vec!["mkt_rf".to_string(), "smb".to_string(), "hml".to_string()])
        );
        assert_eq!(
            resolve_factor_ids(Some("mkt_rf, momentum")),
            Some(vec!["mkt_rf".to_string(), "momentum".to_string()])
        );
        assert_eq!(resolve_factor_ids(None), None);
    }

    #[test]
    fn custom_scenario_from_shocks() {
        let scenario =
            resolve_scenario("rates_up", &["mkt_rf=-0.1".into(), "hml = 0.02".into()]).unwrap();
        let Scenario::Custom { name, shocks } = scenario else {
            panic!("expected custom scenario");
        };
        assert_eq!(name, "rates_up");
        assert_eq!(shocks.get("hml"), Some(&0.02));
    }

    #[test]
    fn bad_shock_is_invalid_input() {
        let err = resolve_scenario("x", &["mkt_rf".into()]).unwrap_err();
        assert!(matches!(err, RiskcalcError::InvalidInput { .. }));
        let err = resolve_scenario("not_a_scenario", &[]).unwrap_err();
        assert!(matches!(err, RiskcalcError::InvalidInput { .. }));
    }
}
