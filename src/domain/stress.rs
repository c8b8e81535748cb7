//! Scenario stress tests over factor exposures and current holdings.
//!
//! Impacts are linear pass-through: exposures are held fixed under the shock.

use crate::domain::error::RiskcalcError;
use crate::domain::factor::{MARKET, MOMENTUM, QUALITY, SIZE, VALUE, VOLATILITY};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Historical episodes with calibrated factor and asset shocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NamedScenario {
    FinancialCrisis2008,
    CovidCrash2020,
    RateShock2022,
}

impl NamedScenario {
    pub const ALL: [NamedScenario; 3] = [
        NamedScenario::FinancialCrisis2008,
        NamedScenario::CovidCrash2020,
        NamedScenario::RateShock2022,
    ];

    pub fn id(self) -> &'static str {
        match self {
            NamedScenario::FinancialCrisis2008 => "financial_crisis_2008",
            NamedScenario::CovidCrash2020 => "covid_crash_2020",
            NamedScenario::RateShock2022 => "rate_shock_2022",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            NamedScenario::FinancialCrisis2008 => "2008 Financial Crisis (Sep-Nov 2008)",
            NamedScenario::CovidCrash2020 => "COVID-19 Market Crash (Feb-Mar 2020)",
            NamedScenario::RateShock2022 => "Interest Rate Shock (H1 2022)",
        }
    }

    /// (start, end) of the episode, ISO dates.
    pub fn period(self) -> (&'static str, &'static str) {
        match self {
            NamedScenario::FinancialCrisis2008 => ("2008-09-01", "2008-11-30"),
            NamedScenario::CovidCrash2020 => ("2020-02-19", "2020-03-23"),
            NamedScenario::RateShock2022 => ("2022-01-01", "2022-06-30"),
        }
    }

    pub fn factor_shocks(self) -> BTreeMap<String, f64> {
        let shocks: [(&str, f64); 6] = match self {
            NamedScenario::FinancialCrisis2008 => [
                (MARKET, -0.30),
                (SIZE, -0.05),
                (VALUE, -0.08),
                (MOMENTUM, 0.06),
                (QUALITY, 0.04),
                (VOLATILITY, 0.12),
            ],
            NamedScenario::CovidCrash2020 => [
                (MARKET, -0.34),
                (SIZE, -0.08),
                (VALUE, -0.12),
                (MOMENTUM, 0.03),
                (QUALITY, 0.05),
                (VOLATILITY, 0.15),
            ],
            NamedScenario::RateShock2022 => [
                (MARKET, -0.20),
                (SIZE, -0.04),
                (VALUE, 0.10),
                (MOMENTUM, -0.03),
                (QUALITY, 0.02),
                (VOLATILITY, 0.05),
            ],
        };
        shocks.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    /// Per-symbol returns over the episode and the return applied to any other symbol.
    pub fn asset_shocks(self) -> AssetShocks {
        let (returns, default): ([(&str, f64); 5], f64) = match self {
            NamedScenario::FinancialCrisis2008 => (
                [("SPY", -0.30), ("QQQ", -0.35), ("EEM", -0.40), ("TLT", 0.10), ("GLD", 0.05)],
                -0.25,
            ),
            NamedScenario::CovidCrash2020 => (
                [("SPY", -0.34), ("QQQ", -0.28), ("EEM", -0.33), ("TLT", 0.15), ("GLD", -0.05)],
                -0.30,
            ),
            NamedScenario::RateShock2022 => (
                [("SPY", -0.20), ("QQQ", -0.30), ("TLT", -0.25), ("HYG", -0.15), ("SHY", -0.05)],
                -0.15,
            ),
        };
        AssetShocks {
            returns: returns.iter().map(|(s, r)| (s.to_string(), *r)).collect(),
            default: Some(default),
        }
    }
}

impl fmt::Display for NamedScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for NamedScenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        NamedScenario::ALL
            .into_iter()
            .find(|n| n.id() == wanted)
            .ok_or_else(|| format!("unknown scenario '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Scenario {
    Named(NamedScenario),
    Custom {
        name: String,
        shocks: BTreeMap<String, f64>,
    },
}

impl Scenario {
    pub fn name(&self) -> &str {
        match self {
            Scenario::Named(named) => named.id(),
            Scenario::Custom { name, .. } => name,
        }
    }

    pub fn factor_shocks(&self) -> BTreeMap<String, f64> {
        match self {
            Scenario::Named(named) => named.factor_shocks(),
            Scenario::Custom { shocks, .. } => shocks.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FactorImpact {
    pub factor_id: String,
    pub exposure: f64,
    pub shock: f64,
    pub impact: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StressTestResult {
    pub scenario_name: String,
    /// Σ exposure × shock, as a fractional return.
    pub impact: f64,
    pub factor_impacts: Vec<FactorImpact>,
    /// Exposed factors the scenario does not shock.
    pub unshocked: Vec<String>,
    /// Shocked factors the portfolio has no exposure to.
    pub unmatched_shocks: Vec<String>,
}

impl StressTestResult {
    pub fn stressed_value(&self, portfolio_value: f64) -> f64 {
        portfolio_value * (1.0 + self.impact)
    }
}

pub fn run_stress_test(
    exposures: &[(String, f64)],
    scenario: &Scenario,
) -> Result<StressTestResult, RiskcalcError> {
    let shocks = scenario.factor_shocks();
    if let Some((id, _)) = exposures.iter().find(|(_, e)| !e.is_finite()) {
        return Err(RiskcalcError::invalid(format!("exposure to {id} is not finite")));
    }
    if let Some((id, _)) = shocks.iter().find(|(_, s)| !s.is_finite()) {
        return Err(RiskcalcError::invalid(format!("shock to {id} is not finite")));
    }

    let mut factor_impacts = Vec::new();
    let mut unshocked = Vec::new();
    for (factor_id, exposure) in exposures {
        match shocks.get(factor_id) {
            Some(&shock) => factor_impacts.push(FactorImpact {
                factor_id: factor_id.clone(),
                exposure: *exposure,
                shock,
                impact: exposure * shock,
            }),
            None => unshocked.push(factor_id.clone()),
        }
    }
    let unmatched_shocks: Vec<String> = shocks
        .keys()
        .filter(|id| !exposures.iter().any(|(e, _)| e == *id))
        .cloned()
        .collect();
    if !unshocked.is_empty() {
        warn!(scenario = scenario.name(), factors = ?unshocked, "exposed factors have no shock");
    }

    let impact: f64 = factor_impacts.iter().map(|f| f.impact).sum();
    debug!(scenario = scenario.name(), impact, "stress test complete");
    Ok(StressTestResult {
        scenario_name: scenario.name().to_string(),
        impact,
        factor_impacts,
        unshocked,
        unmatched_shocks,
    })
}

/// Per-symbol shock returns, with an optional fallback for unlisted symbols.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssetShocks {
    pub returns: BTreeMap<String, f64>,
    pub default: Option<f64>,
}

impl AssetShocks {
    /// Shock for `symbol`; unlisted symbols without a default are unshocked.
    pub fn shock_for(&self, symbol: &str) -> f64 {
        self.returns
            .get(symbol)
            .copied()
            .or(self.default)
            .unwrap_or(0.0)
    }
}

/// Current holding valued at its latest price.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Holding {
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionImpact {
    pub symbol: String,
    pub current_value: f64,
    pub shock: f64,
    pub stressed_value: f64,
    pub value_change: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssetShockResult {
    pub current_value: f64,
    pub stressed_value: f64,
    pub absolute_change: f64,
    /// Σ|quantity × price| over the holdings.
    pub gross_exposure: f64,
    /// Change relative to gross exposure, which equals the current value for a
    /// long-only book and stays meaningful for net-short books.
    pub percentage_change: f64,
    pub positions: Vec<PositionImpact>,
}

pub fn run_asset_shock_test(
    holdings: &[Holding],
    shocks: &AssetShocks,
) -> Result<AssetShockResult, RiskcalcError> {
    if let Some(h) = holdings
        .iter()
        .find(|h| !h.quantity.is_finite() || !h.price.is_finite())
    {
        return Err(RiskcalcError::invalid(format!(
            "holding {} has a non-finite quantity or price",
            h.symbol
        )));
    }

    let positions: Vec<PositionImpact> = holdings
        .iter()
        .map(|h| {
            let current_value = h.quantity * h.price;
            let shock = shocks.shock_for(&h.symbol);
            let stressed_value = current_value * (1.0 + shock);
            PositionImpact {
                symbol: h.symbol.clone(),
                current_value,
                shock,
                stressed_value,
                value_change: stressed_value - current_value,
            }
        })
        .collect();

    let current_value: f64 = positions.iter().map(|p| p.current_value).sum();
    let stressed_value: f64 = positions.iter().map(|p| p.stressed_value).sum();
    let absolute_change = stressed_value - current_value;
    let gross_exposure: f64 = positions.iter().map(|p| p.current_value.abs()).sum();
    if gross_exposure == 0.0 {
        return Err(RiskcalcError::degenerate("holdings have no exposure to shock"));
    }
    Ok(AssetShockResult {
        current_value,
        stressed_value,
        absolute_change,
        gross_exposure,
        percentage_change: absolute_change / gross_exposure,
        positions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn exposures() -> Vec<(String, f64)> {
        vec![
            (MARKET.to_string(), 1.05),
            (SIZE.to_string(), 0.2),
            ("carry".to_string(), 0.4),
        ]
    }

    #[test]
    fn custom_scenario_impact_is_linear() {
        let scenario = Scenario::Custom {
            name: "equity_drop".into(),
            shocks: BTreeMap::from([(MARKET.to_string(), -0.10), (VALUE.to_string(), 0.02)]),
        };
        let result = run_stress_test(&exposures(), &scenario).unwrap();
        assert_relative_eq!(result.impact, -0.105, epsilon = 1e-15);
        assert_eq!(result.unshocked, vec![SIZE.to_string(), "carry".to_string()]);
        assert_eq!(result.unmatched_shocks, vec![VALUE.to_string()]);
        assert_relative_eq!(result.stressed_value(1_000_000.0), 895_000.0, epsilon = 1e-6);
    }

    #[test]
    fn named_scenario_uses_its_factor_shocks() {
        let result = run_stress_test(
            &exposures(),
            &Scenario::Named(NamedScenario::FinancialCrisis2008),
        )
        .unwrap();
        assert_eq!(result.scenario_name, "financial_crisis_2008");
        assert_relative_eq!(result.impact, 1.05 * -0.30 + 0.2 * -0.05, epsilon = 1e-15);
        assert_eq!(result.unshocked, vec!["carry".to_string()]);
    }

    #[test]
    fn asset_shocks_fall_back_to_default() {
        let holdings = vec![
            Holding {
                symbol: "SPY".into(),
                quantity: 10.0,
                price: 400.0,
            },
            Holding {
                symbol: "XYZ".into(),
                quantity: 100.0,
                price: 20.0,
            },
        ];
        let result =
            run_asset_shock_test(&holdings, &NamedScenario::FinancialCrisis2008.asset_shocks())
                .unwrap();
        assert_relative_eq!(result.current_value, 6_000.0);
        assert_relative_eq!(
            result.stressed_value,
            4_000.0 * 0.70 + 2_000.0 * 0.75,
            epsilon = 1e-9
        );
        assert_relative_eq!(result.percentage_change, -1_700.0 / 6_000.0, epsilon = 1e-12);
        assert_eq!(result.positions[1].shock, -0.25);
    }

    #[test]
    fn short_holdings_gain_in_a_sell_off() {
        let holdings = vec![
            Holding {
                symbol: "SPY".into(),
                quantity: 10.0,
                price: 400.0,
            },
            Holding {
                symbol: "QQQ".into(),
                quantity: -20.0,
                price: 300.0,
            },
        ];
        let shocks = AssetShocks {
            returns: [("SPY".to_string(), -0.10), ("QQQ".to_string(), -0.20)]
                .into_iter()
                .collect(),
            default: None,
        };
        let result = run_asset_shock_test(&holdings, &shocks).unwrap();
        // net value -2000, gross 10000: -400 on SPY, +1200 on QQQ
        assert_relative_eq!(result.current_value, -2_000.0);
        assert_relative_eq!(result.gross_exposure, 10_000.0);
        assert_relative_eq!(result.absolute_change, 800.0, epsilon = 1e-9);
        assert_relative_eq!(result.percentage_change, 0.08, epsilon = 1e-12);
    }

    #[test]
    fn book_without_exposure_is_degenerate() {
        let holdings = vec![Holding {
            symbol: "XYZ".into(),
            quantity: 0.0,
            price: 50.0,
        }];
        let err = run_asset_shock_test(&holdings, &AssetShocks::default()).unwrap_err();
        assert!(matches!(err, RiskcalcError::DegenerateInput { .. }));
        let err = run_asset_shock_test(&[], &AssetShocks::default()).unwrap_err();
        assert!(matches!(err, RiskcalcError::DegenerateInput { .. }));
    }

    #[test]
    fn custom_asset_shocks_leave_unlisted_symbols_alone() {
        let holdings = vec![Holding {
            symbol: "XYZ".into(),
            quantity: 1.0,
            price: 50.0,
        }];
        let result = run_asset_shock_test(&holdings, &AssetShocks::default()).unwrap();
        assert_eq!(result.absolute_change, 0.0);
    }

    #[test]
    fn scenario_names_parse() {
        assert_eq!(
            "covid_crash_2020".parse::<NamedScenario>(),
            Ok(NamedScenario::CovidCrash2020)
        );
        assert!("dotcom".parse::<NamedScenario>().is_err());
    }
}
