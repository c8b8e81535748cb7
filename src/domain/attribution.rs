//! Return attribution to factor exposures.

use crate::domain::error::RiskcalcError;
use crate::domain::factor::FactorReturnSeries;
use crate::domain::series::ReturnSeries;
use chrono::Datelike;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FactorContribution {
    pub factor_id: String,
    pub exposure: f64,
    pub factor_return: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributionResult {
    pub total_return: f64,
    pub contributions: Vec<FactorContribution>,
    /// total_return minus every factor contribution.
    pub specific_return: f64,
}

impl AttributionResult {
    pub fn factor_return_explained(&self) -> f64 {
        self.contributions.iter().map(|c| c.contribution).sum()
    }
}

/// Attribution for one calendar month.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeriodAttribution {
    pub year: i32,
    pub month: u32,
    pub attribution: AttributionResult,
}

impl PeriodAttribution {
    /// `YYYY-MM`
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

/// Single-period decomposition: contribution = exposure × factor return.
pub fn compute_attribution(
    exposures: &[(String, f64)],
    period_factor_returns: &HashMap<String, f64>,
    total_return: f64,
) -> Result<AttributionResult, RiskcalcError> {
    if !total_return.is_finite() {
        return Err(RiskcalcError::invalid("total return must be finite"));
    }
    let contributions = exposures
        .iter()
        .map(|(factor_id, exposure)| {
            let factor_return = *period_factor_returns.get(factor_id).ok_or_else(|| {
                RiskcalcError::alignment(format!("no period return for factor '{factor_id}'"))
            })?;
            if !exposure.is_finite() || !factor_return.is_finite() {
                return Err(RiskcalcError::invalid(format!(
                    "non-finite exposure or return for factor '{factor_id}'"
                )));
            }
            Ok(FactorContribution {
                factor_id: factor_id.clone(),
                exposure: *exposure,
                factor_return,
                contribution: exposure * factor_return,
            })
        })
        .collect::<Result<Vec<_>, RiskcalcError>>()?;

    let explained: f64 = contributions.iter().map(|c| c.contribution).sum();
    Ok(AttributionResult {
        total_return,
        contributions,
        specific_return: total_return - explained,
    })
}

/// Attribution over the whole aligned window: the portfolio return is
/// compounded, factor returns are summed.
pub fn window_attribution(
    exposures: &[(String, f64)],
    portfolio: &ReturnSeries,
    factors: &[FactorReturnSeries],
) -> Result<AttributionResult, RiskcalcError> {
    let columns = exposure_columns(exposures, portfolio, factors)?;
    let values = portfolio.values();
    attribute_range(exposures, portfolio, &values, &columns, 0..values.len())
}

/// Calendar-month breakdown. Months are attributed independently and are not
/// linked, so monthly specific returns do not compound to the window's.
pub fn monthly_attribution(
    exposures: &[(String, f64)],
    portfolio: &ReturnSeries,
    factors: &[FactorReturnSeries],
) -> Result<Vec<PeriodAttribution>, RiskcalcError> {
    let columns = exposure_columns(exposures, portfolio, factors)?;
    let values = portfolio.values();
    let dates = portfolio.dates();

    let mut periods = Vec::new();
    let mut start = 0;
    while start < dates.len() {
        let (year, month) = (dates[start].year(), dates[start].month());
        let end = dates[start..]
            .iter()
            .position(|d| d.year() != year || d.month() != month)
            .map_or(dates.len(), |offset| start + offset);
        let attribution = attribute_range(exposures, portfolio, &values, &columns, start..end)?;
        periods.push(PeriodAttribution {
            year,
            month,
            attribution,
        });
        start = end;
    }

    debug!(months = periods.len(), "computed monthly attribution");
    Ok(periods)
}

/// Factor return columns in exposure order, each aligned with the portfolio.
fn exposure_columns(
    exposures: &[(String, f64)],
    portfolio: &ReturnSeries,
    factors: &[FactorReturnSeries],
) -> Result<Vec<Vec<f64>>, RiskcalcError> {
    exposures
        .iter()
        .map(|(id, _)| {
            let factor = factors.iter().find(|f| f.id() == id).ok_or_else(|| {
                RiskcalcError::alignment(format!("no return series for factor '{id}'"))
            })?;
            portfolio.ensure_aligned(&factor.returns, &format!("attribution factor {id}"))?;
            Ok(factor.returns.values())
        })
        .collect()
}

fn attribute_range(
    exposures: &[(String, f64)],
    portfolio: &ReturnSeries,
    values: &[f64],
    columns: &[Vec<f64>],
    range: std::ops::Range<usize>,
) -> Result<AttributionResult, RiskcalcError> {
    let convention = portfolio.convention();
    let growth: f64 = values[range.clone()]
        .iter()
        .map(|r| convention.growth(*r))
        .product();
    let total = convention.from_growth(growth);
    let period_returns: HashMap<String, f64> = exposures
        .iter()
        .zip(columns)
        .map(|((id, _), column)| (id.clone(), column[range.clone()].iter().sum::<f64>()))
        .collect();
    compute_attribution(exposures, &period_returns, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::factor::{FactorDefinition, MARKET, SIZE};
    use crate::domain::series::ReturnConvention;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn exposures() -> Vec<(String, f64)> {
        vec![(MARKET.to_string(), 1.1), (SIZE.to_string(), -0.3)]
    }

    fn dated(values: &[f64]) -> ReturnSeries {
        let dates: Vec<NaiveDate> = [(1, 30), (1, 31), (2, 1), (2, 2), (3, 1)]
            .iter()
            .take(values.len())
            .map(|&(m, d)| NaiveDate::from_ymd_opt(2024, m, d).unwrap())
            .collect();
        ReturnSeries::from_pairs(ReturnConvention::Simple, &dates, values).unwrap()
    }

    fn factor(id: &str, values: &[f64]) -> FactorReturnSeries {
        FactorReturnSeries::new(FactorDefinition::custom(id), dated(values))
    }

    #[test]
    fn single_period_decomposition() {
        let returns = HashMap::from([(MARKET.to_string(), 0.02), (SIZE.to_string(), 0.01)]);
        let result = compute_attribution(&exposures(), &returns, 0.03).unwrap();
        assert_relative_eq!(result.contributions[0].contribution, 0.022, epsilon = 1e-15);
        assert_relative_eq!(result.contributions[1].contribution, -0.003, epsilon = 1e-15);
        assert_relative_eq!(result.specific_return, 0.011, epsilon = 1e-15);
    }

    #[test]
    fn missing_factor_return_is_alignment_error() {
        let returns = HashMap::from([(MARKET.to_string(), 0.02)]);
        let err = compute_attribution(&exposures(), &returns, 0.03).unwrap_err();
        assert!(matches!(err, RiskcalcError::SeriesAlignment { .. }));
    }

    #[test]
    fn monthly_breakdown_groups_calendar_months() {
        let portfolio = dated(&[0.01, 0.02, -0.01, 0.005, 0.03]);
        let factors = vec![
            factor(MARKET, &[0.01, 0.015, -0.012, 0.004, 0.02]),
            factor(SIZE, &[0.0, 0.001, 0.002, -0.001, 0.003]),
        ];
        let months = monthly_attribution(&exposures(), &portfolio, &factors).unwrap();
        assert_eq!(
            months.iter().map(PeriodAttribution::label).collect::<Vec<_>>(),
            vec!["2024-01", "2024-02", "2024-03"]
        );
        let jan = &months[0].attribution;
        assert_relative_eq!(jan.total_return, 1.01 * 1.02 - 1.0, epsilon = 1e-15);
        assert_relative_eq!(jan.contributions[0].factor_return, 0.025, epsilon = 1e-15);
    }

    #[test]
    fn window_attribution_compounds_portfolio() {
        let portfolio = dated(&[0.01, 0.02]);
        let factors = vec![factor(MARKET, &[0.01, 0.01]), factor(SIZE, &[0.0, 0.0])];
        let result = window_attribution(&exposures(), &portfolio, &factors).unwrap();
        assert_relative_eq!(result.total_return, 0.0302, epsilon = 1e-12);
        assert_relative_eq!(result.factor_return_explained(), 0.022, epsilon = 1e-12);
    }

    #[test]
    fn missing_factor_series_is_alignment_error() {
        let portfolio = dated(&[0.01, 0.02]);
        let factors = vec![factor(MARKET, &[0.01, 0.01])];
        let err = monthly_attribution(&exposures(), &portfolio, &factors).unwrap_err();
        assert!(matches!(err, RiskcalcError::SeriesAlignment { .. }));
    }

    proptest! {
        #[test]
        fn contributions_and_specific_sum_to_total(
            pairs in proptest::collection::vec((-3.0f64..3.0, -0.5f64..0.5), 1..12),
            total in -1.0f64..1.0,
        ) {
            let exposures: Vec<(String, f64)> = pairs
                .iter()
                .enumerate()
                .map(|(i, (e, _))| (format!("f{i}"), *e))
                .collect();
            let returns: HashMap<String, f64> = pairs
                .iter()
                .enumerate()
                .map(|(i, (_, r))| (format!("f{i}"), *r))
                .collect();
            let result = compute_attribution(&exposures, &returns, total).unwrap();
            let rebuilt = result.factor_return_explained() + result.specific_return;
            let scale = 1f64.max(total.abs()).max(result.factor_return_explained().abs());
            prop_assert!((rebuilt - total).abs() <= 1e-9 * scale);
        }
    }
}
