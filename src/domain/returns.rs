//! Return series construction from prices or position histories.

use crate::domain::error::RiskcalcError;
use crate::domain::series::{
    PricePoint, PriceSeries, PositionRecord, ReturnConvention, ReturnPoint, ReturnSeries,
};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

pub const DEFAULT_MAX_FILL: usize = 5;

/// Bound on forward-filling when a series misses calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GapPolicy {
    /// Maximum number of consecutive calendar dates that may be filled.
    pub max_fill: usize,
}

impl Default for GapPolicy {
    fn default() -> Self {
        Self {
            max_fill: DEFAULT_MAX_FILL,
        }
    }
}

/// Input to [`compute_returns`].
#[derive(Debug, Clone, Copy)]
pub enum ReturnSource<'a> {
    Prices(&'a PriceSeries),
    Portfolio {
        positions: &'a [PositionRecord],
        prices: &'a [PriceSeries],
        calendar: &'a [NaiveDate],
    },
}

pub fn compute_returns(
    source: ReturnSource<'_>,
    convention: ReturnConvention,
    gap_policy: &GapPolicy,
) -> Result<ReturnSeries, RiskcalcError> {
    match source {
        ReturnSource::Prices(prices) => price_returns(prices, convention),
        ReturnSource::Portfolio {
            positions,
            prices,
            calendar,
        } => portfolio_returns(positions, prices, calendar, convention, gap_policy),
    }
}

/// Period returns between consecutive prices: output length = input length - 1.
pub fn price_returns(
    prices: &PriceSeries,
    convention: ReturnConvention,
) -> Result<ReturnSeries, RiskcalcError> {
    if prices.len() < 2 {
        return Err(RiskcalcError::insufficient(
            &format!("returns of {}", prices.symbol()),
            prices.len(),
            2,
        ));
    }

    let points = prices
        .points()
        .windows(2)
        .map(|w| -> Result<ReturnPoint, RiskcalcError> {
            let value = period_return(w[0].price, w[1].price, convention).ok_or_else(|| {
                RiskcalcError::degenerate(format!(
                    "{}: cannot take a {convention} return from {} to {} on {}",
                    prices.symbol(),
                    w[0].price,
                    w[1].price,
                    w[1].date
                ))
            })?;
            Ok(ReturnPoint {
                date: w[1].date,
                value,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(symbol = prices.symbol(), periods = points.len(), %convention, "computed price returns");
    ReturnSeries::new(convention, points)
}

fn period_return(prev: f64, curr: f64, convention: ReturnConvention) -> Option<f64> {
    if prev == 0.0 {
        return None;
    }
    let ratio = curr / prev;
    match convention {
        ReturnConvention::Simple => Some(ratio - 1.0),
        ReturnConvention::Log if ratio > 0.0 => Some(ratio.ln()),
        ReturnConvention::Log => None,
    }
}

/// Re-indexes `prices` onto `calendar`, forward-filling at most `max_fill`
/// consecutive missing dates. Observations off the calendar are dropped.
pub fn align_to_calendar(
    prices: &PriceSeries,
    calendar: &[NaiveDate],
    gap_policy: &GapPolicy,
) -> Result<PriceSeries, RiskcalcError> {
    let observed = prices.points();
    let mut cursor = 0;
    let mut last: Option<f64> = None;
    let mut filled_run = 0usize;
    let mut points = Vec::with_capacity(calendar.len());

    for &date in calendar {
        while cursor < observed.len() && observed[cursor].date < date {
            last = Some(observed[cursor].price);
            cursor += 1;
        }
        let price = if cursor < observed.len() && observed[cursor].date == date {
            filled_run = 0;
            let p = observed[cursor].price;
            last = Some(p);
            cursor += 1;
            p
        } else {
            let Some(p) = last else {
                return Err(RiskcalcError::alignment(format!(
                    "{}: no price on or before {date}",
                    prices.symbol()
                )));
            };
            filled_run += 1;
            if filled_run > gap_policy.max_fill {
                return Err(RiskcalcError::alignment(format!(
                    "{}: gap of more than {} missing dates ending {date}",
                    prices.symbol(),
                    gap_policy.max_fill
                )));
            }
            p
        };
        points.push(PricePoint { date, price });
    }

    PriceSeries::new(prices.symbol(), points)
}

fn aligned_prices<'a>(
    positions: &[PositionRecord],
    prices: &'a [PriceSeries],
    calendar: &[NaiveDate],
    gap_policy: &GapPolicy,
) -> Result<HashMap<&'a str, Vec<f64>>, RiskcalcError> {
    let held: BTreeSet<&str> = positions.iter().map(|p| p.symbol.as_str()).collect();
    let mut aligned = HashMap::with_capacity(held.len());
    for symbol in held {
        let series = prices
            .iter()
            .find(|s| s.symbol() == symbol)
            .ok_or_else(|| RiskcalcError::invalid(format!("no price series for {symbol}")))?;
        let filled = align_to_calendar(series, calendar, gap_policy)?;
        aligned.insert(series.symbol(), filled.prices());
    }
    Ok(aligned)
}

/// Signed market value of the active positions on each calendar date.
pub fn portfolio_values(
    portfolio_id: &str,
    positions: &[PositionRecord],
    prices: &[PriceSeries],
    calendar: &[NaiveDate],
    gap_policy: &GapPolicy,
) -> Result<PriceSeries, RiskcalcError> {
    let aligned = aligned_prices(positions, prices, calendar, gap_policy)?;
    let points = calendar
        .iter()
        .enumerate()
        .map(|(i, &date)| PricePoint {
            date,
            price: positions
                .iter()
                .filter(|p| p.is_active(date))
                .map(|p| p.market_value(aligned[p.symbol.as_str()][i]))
                .sum(),
        })
        .collect();
    PriceSeries::new(portfolio_id, points)
}

/// Returns of a position book. Each period only counts positions held over the
/// whole period, so entries and exits never show up as performance.
///
/// The period return is the book's profit and loss over its gross exposure
/// Σ|q·p| at the start of the period, so short positions gain when prices fall
/// and a net-short or market-neutral book still has a well-defined return.
pub fn portfolio_returns(
    positions: &[PositionRecord],
    prices: &[PriceSeries],
    calendar: &[NaiveDate],
    convention: ReturnConvention,
    gap_policy: &GapPolicy,
) -> Result<ReturnSeries, RiskcalcError> {
    if calendar.len() < 2 {
        return Err(RiskcalcError::insufficient(
            "portfolio returns",
            calendar.len(),
            2,
        ));
    }
    let aligned = aligned_prices(positions, prices, calendar, gap_policy)?;

    let mut points = Vec::with_capacity(calendar.len() - 1);
    for i in 1..calendar.len() {
        let (prev_date, date) = (calendar[i - 1], calendar[i]);
        let mut gross = 0.0;
        let mut pnl = 0.0;
        for pos in positions
            .iter()
            .filter(|p| p.is_active(prev_date) && p.is_active(date))
        {
            let series = &aligned[pos.symbol.as_str()];
            let start_value = pos.market_value(series[i - 1]);
            gross += start_value.abs();
            pnl += pos.market_value(series[i]) - start_value;
        }
        let value = period_return(gross, gross + pnl, convention).ok_or_else(|| {
            RiskcalcError::degenerate(format!(
                "portfolio has no {convention}-measurable value held over the period ending {date}"
            ))
        })?;
        points.push(ReturnPoint { date, value });
    }

    debug!(positions = positions.len(), periods = points.len(), "computed portfolio returns");
    ReturnSeries::new(convention, points)
}

/// Restricts every series to the dates common to all of them.
pub fn align_returns(series: &[&ReturnSeries]) -> Result<Vec<ReturnSeries>, RiskcalcError> {
    let Some(first) = series.first() else {
        return Ok(Vec::new());
    };
    let mut common: BTreeSet<NaiveDate> = first.dates().into_iter().collect();
    for s in &series[1..] {
        let dates: BTreeSet<NaiveDate> = s.dates().into_iter().collect();
        common = common.intersection(&dates).copied().collect();
    }
    if common.is_empty() {
        return Err(RiskcalcError::alignment("series share no common dates"));
    }
    let dates: Vec<NaiveDate> = common.into_iter().collect();
    series.iter().map(|s| s.select(&dates)).collect()
}
