//! Price, return and position series.
//!
//! Series are validated on construction and immutable afterwards: dates are
//! strictly increasing and every value is finite.

use crate::domain::error::RiskcalcError;
use chrono::NaiveDate;
use std::fmt;

/// How a period return is derived from two consecutive values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReturnConvention {
    /// p1 / p0 - 1
    #[default]
    Simple,
    /// ln(p1 / p0)
    Log,
}

impl ReturnConvention {
    /// Growth factor of one period, i.e. value_t / value_{t-1}.
    pub fn growth(self, r: f64) -> f64 {
        match self {
            ReturnConvention::Simple => 1.0 + r,
            ReturnConvention::Log => r.exp(),
        }
    }

    /// Converts a growth factor back into a return under this convention.
    pub fn from_growth(self, growth: f64) -> f64 {
        match self {
            ReturnConvention::Simple => growth - 1.0,
            ReturnConvention::Log => growth.ln(),
        }
    }
}

impl fmt::Display for ReturnConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnConvention::Simple => write!(f, "simple"),
            ReturnConvention::Log => write!(f, "log"),
        }
    }
}

impl std::str::FromStr for ReturnConvention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" | "arithmetic" => Ok(ReturnConvention::Simple),
            "log" | "logarithmic" => Ok(ReturnConvention::Log),
            other => Err(format!("unknown return convention '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

/// Adjusted close history for one symbol (or the valuation history of a portfolio).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PriceSeries {
    symbol: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, points: Vec<PricePoint>) -> Result<Self, RiskcalcError> {
        let symbol = symbol.into();
        check_dates(points.iter().map(|p| p.date), &symbol)?;
        if let Some(bad) = points.iter().find(|p| !p.price.is_finite()) {
            return Err(RiskcalcError::invalid(format!(
                "{symbol}: non-finite price on {}",
                bad.date
            )));
        }
        Ok(Self { symbol, points })
    }

    /// Convenience constructor from parallel date/price slices.
    pub fn from_pairs(
        symbol: impl Into<String>,
        dates: &[NaiveDate],
        prices: &[f64],
    ) -> Result<Self, RiskcalcError> {
        let symbol = symbol.into();
        if dates.len() != prices.len() {
            return Err(RiskcalcError::alignment(format!(
                "{symbol}: {} dates but {} prices",
                dates.len(),
                prices.len()
            )));
        }
        let points = dates
            .iter()
            .zip(prices)
            .map(|(&date, &price)| PricePoint { date, price })
            .collect();
        Self::new(symbol, points)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price).collect()
    }

    /// Price on `date`, if observed.
    pub fn price_on(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|i| self.points[i].price)
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReturnPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Periodic decimal returns. Never empty.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReturnSeries {
    convention: ReturnConvention,
    points: Vec<ReturnPoint>,
}

impl ReturnSeries {
    pub fn new(
        convention: ReturnConvention,
        points: Vec<ReturnPoint>,
    ) -> Result<Self, RiskcalcError> {
        if points.is_empty() {
            return Err(RiskcalcError::EmptySeries {
                series: "return series".into(),
            });
        }
        check_dates(points.iter().map(|p| p.date), "return series")?;
        if let Some(bad) = points.iter().find(|p| !p.value.is_finite()) {
            return Err(RiskcalcError::invalid(format!(
                "non-finite return on {}",
                bad.date
            )));
        }
        Ok(Self { convention, points })
    }

    pub fn from_pairs(
        convention: ReturnConvention,
        dates: &[NaiveDate],
        values: &[f64],
    ) -> Result<Self, RiskcalcError> {
        if dates.len() != values.len() {
            return Err(RiskcalcError::alignment(format!(
                "{} dates but {} returns",
                dates.len(),
                values.len()
            )));
        }
        let points = dates
            .iter()
            .zip(values)
            .map(|(&date, &value)| ReturnPoint { date, value })
            .collect();
        Self::new(convention, points)
    }

    pub fn convention(&self) -> ReturnConvention {
        self.convention
    }

    pub fn points(&self) -> &[ReturnPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn first_date(&self) -> NaiveDate {
        self.points[0].date
    }

    pub fn last_date(&self) -> NaiveDate {
        self.points[self.points.len() - 1].date
    }

    /// Compounded return over the whole series, expressed in this series' convention.
    pub fn total_return(&self) -> f64 {
        let growth: f64 = self
            .points
            .iter()
            .map(|p| self.convention.growth(p.value))
            .product();
        self.convention.from_growth(growth)
    }

    /// Wealth index starting at 1.0 before the first return: length = len() + 1.
    pub fn wealth_index(&self) -> Vec<f64> {
        let mut wealth = Vec::with_capacity(self.points.len() + 1);
        let mut value = 1.0;
        wealth.push(value);
        for p in &self.points {
            value *= self.convention.growth(p.value);
            wealth.push(value);
        }
        wealth
    }

    /// The same periods expressed under `convention`; each period keeps its growth factor.
    pub fn to_convention(&self, convention: ReturnConvention) -> Result<ReturnSeries, RiskcalcError> {
        if convention == self.convention {
            return Ok(self.clone());
        }
        let mut points = Vec::with_capacity(self.points.len());
        for p in &self.points {
            let growth = self.convention.growth(p.value);
            if growth <= 0.0 {
                return Err(RiskcalcError::degenerate(format!(
                    "return on {} is a total loss with no {convention} equivalent",
                    p.date
                )));
            }
            points.push(ReturnPoint {
                date: p.date,
                value: convention.from_growth(growth),
            });
        }
        ReturnSeries::new(convention, points)
    }

    /// Fails with `SeriesAlignment` unless both series share length, dates and convention.
    pub fn ensure_aligned(&self, other: &ReturnSeries, context: &str) -> Result<(), RiskcalcError> {
        if self.len() != other.len() {
            return Err(RiskcalcError::alignment(format!(
                "{context}: lengths differ ({} vs {})",
                self.len(),
                other.len()
            )));
        }
        if self.convention != other.convention {
            return Err(RiskcalcError::alignment(format!(
                "{context}: conventions differ ({} vs {})",
                self.convention, other.convention
            )));
        }
        if let Some((a, b)) = self
            .points
            .iter()
            .zip(&other.points)
            .find(|(a, b)| a.date != b.date)
        {
            return Err(RiskcalcError::alignment(format!(
                "{context}: dates differ ({} vs {})",
                a.date, b.date
            )));
        }
        Ok(())
    }

    /// Restricts the series to the given dates (which must be a subset, in order).
    pub fn select(&self, dates: &[NaiveDate]) -> Result<ReturnSeries, RiskcalcError> {
        let mut points = Vec::with_capacity(dates.len());
        let mut cursor = 0;
        for &date in dates {
            while cursor < self.points.len() && self.points[cursor].date < date {
                cursor += 1;
            }
            match self.points.get(cursor) {
                Some(p) if p.date == date => points.push(*p),
                _ => {
                    return Err(RiskcalcError::alignment(format!(
                        "date {date} missing from series"
                    )));
                }
            }
        }
        ReturnSeries::new(self.convention, points)
    }
}

/// A holding over a date range. Quantity is signed: negative means short.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionRecord {
    pub symbol: String,
    pub quantity: f64,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: Option<NaiveDate>,
    pub exit_price: Option<f64>,
}

impl PositionRecord {
    /// Active when `entry_date <= date` and the position has not yet been exited.
    pub fn is_active(&self, date: NaiveDate) -> bool {
        self.entry_date <= date && self.exit_date.is_none_or(|exit| date < exit)
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    /// Signed market value at `price`.
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }
}

fn check_dates(
    mut dates: impl Iterator<Item = NaiveDate>,
    what: &str,
) -> Result<(), RiskcalcError> {
    let Some(mut prev) = dates.next() else {
        return Ok(());
    };
    for date in dates {
        if date <= prev {
            return Err(RiskcalcError::invalid(format!(
                "{what}: dates must be strictly increasing ({date} follows {prev})"
            )));
        }
        prev = date;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn price_series_rejects_unsorted_dates() {
        let err = PriceSeries::from_pairs("BHP", &[d(2), d(1)], &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, RiskcalcError::InvalidInput { .. }));
    }

    #[test]
    fn price_series_rejects_duplicate_dates() {
        let err = PriceSeries::from_pairs("BHP", &[d(1), d(1)], &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, RiskcalcError::InvalidInput { .. }));
    }

    #[test]
    fn price_series_rejects_nan() {
        let err = PriceSeries::from_pairs("BHP", &[d(1), d(2)], &[1.0, f64::NAN]).unwrap_err();
        assert!(matches!(err, RiskcalcError::InvalidInput { .. }));
    }

    #[test]
    fn price_on_finds_observed_dates() {
        let series = PriceSeries::from_pairs("BHP", &[d(1), d(3)], &[10.0, 11.0]).unwrap();
        assert_eq!(series.price_on(d(3)), Some(11.0));
        assert_eq!(series.price_on(d(2)), None);
    }

    #[test]
    fn return_series_cannot_be_empty() {
        let err = ReturnSeries::new(ReturnConvention::Simple, vec![]).unwrap_err();
        assert!(matches!(err, RiskcalcError::EmptySeries { .. }));
    }

    #[test]
    fn return_series_rejects_infinite_values() {
        let err =
            ReturnSeries::from_pairs(ReturnConvention::Simple, &[d(1)], &[f64::INFINITY])
                .unwrap_err();
        assert!(matches!(err, RiskcalcError::InvalidInput { .. }));
    }

    #[test]
    fn total_return_compounds_simple_returns() {
        let series =
            ReturnSeries::from_pairs(ReturnConvention::Simple, &[d(1), d(2)], &[0.10, -0.10])
                .unwrap();
        assert!((series.total_return() - (1.1 * 0.9 - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn total_return_sums_log_returns() {
        let series =
            ReturnSeries::from_pairs(ReturnConvention::Log, &[d(1), d(2)], &[0.05, 0.02]).unwrap();
        assert!((series.total_return() - 0.07).abs() < 1e-12);
    }

    #[test]
    fn wealth_index_starts_at_one() {
        let series =
            ReturnSeries::from_pairs(ReturnConvention::Simple, &[d(1), d(2)], &[0.5, -0.5])
                .unwrap();
        assert_eq!(series.wealth_index(), vec![1.0, 1.5, 0.75]);
    }

    #[test]
    fn ensure_aligned_detects_date_mismatch() {
        let a = ReturnSeries::from_pairs(ReturnConvention::Simple, &[d(1), d(2)], &[0.0, 0.0])
            .unwrap();
        let b = ReturnSeries::from_pairs(ReturnConvention::Simple, &[d(1), d(3)], &[0.0, 0.0])
            .unwrap();
        let err = a.ensure_aligned(&b, "test").unwrap_err();
        assert!(matches!(err, RiskcalcError::SeriesAlignment { .. }));
    }

    #[test]
    fn ensure_aligned_detects_convention_mismatch() {
        let a = ReturnSeries::from_pairs(ReturnConvention::Simple, &[d(1)], &[0.0]).unwrap();
        let b = ReturnSeries::from_pairs(ReturnConvention::Log, &[d(1)], &[0.0]).unwrap();
        assert!(a.ensure_aligned(&b, "test").is_err());
    }

    #[test]
    fn select_subsets_dates() {
        let series = ReturnSeries::from_pairs(
            ReturnConvention::Simple,
            &[d(1), d(2), d(3)],
            &[0.1, 0.2, 0.3],
        )
        .unwrap();
        let picked = series.select(&[d(1), d(3)]).unwrap();
        assert_eq!(picked.values(), vec![0.1, 0.3]);
        assert!(series.select(&[d(4)]).is_err());
    }

    #[test]
    fn position_activity_window() {
        let pos = PositionRecord {
            symbol: "CBA".into(),
            quantity: -10.0,
            entry_date: d(2),
            entry_price: 100.0,
            exit_date: Some(d(5)),
            exit_price: Some(95.0),
        };
        assert!(!pos.is_active(d(1)));
        assert!(pos.is_active(d(2)));
        assert!(pos.is_active(d(4)));
        assert!(!pos.is_active(d(5)));
        assert!(pos.is_short());
        assert_eq!(pos.market_value(90.0), -900.0);
    }

    #[test]
    fn convention_parses_from_str() {
        assert_eq!("log".parse::<ReturnConvention>(), Ok(ReturnConvention::Log));
        assert_eq!(
            " Simple ".parse::<ReturnConvention>(),
            Ok(ReturnConvention::Simple)
        );
        assert!("geometric".parse::<ReturnConvention>().is_err());
    }

    #[test]
    fn simple_returns_convert_to_log_and_back() {
        let simple =
            ReturnSeries::from_pairs(ReturnConvention::Simple, &[d(1), d(2)], &[0.10, -0.05])
                .unwrap();
        let log = simple.to_convention(ReturnConvention::Log).unwrap();
        assert_eq!(log.convention(), ReturnConvention::Log);
        assert!((log.values()[0] - 1.10_f64.ln()).abs() < 1e-15);
        assert!((log.total_return() - (1.10_f64 * 0.95).ln()).abs() < 1e-12);
        let back = log.to_convention(ReturnConvention::Simple).unwrap();
        assert!((back.values()[1] + 0.05).abs() < 1e-12);
    }

    #[test]
    fn total_loss_has_no_log_equivalent() {
        let simple =
            ReturnSeries::from_pairs(ReturnConvention::Simple, &[d(1), d(2)], &[0.10, -1.0])
                .unwrap();
        let err = simple.to_convention(ReturnConvention::Log).unwrap_err();
        assert!(matches!(err, RiskcalcError::DegenerateInput { .. }));
    }
}
