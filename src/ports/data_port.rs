//! Data access port trait.

use crate::domain::error::RiskcalcError;
use crate::domain::factor::FactorReturnSeries;
use crate::domain::series::{PositionRecord, PriceSeries};
use chrono::NaiveDate;

pub trait DataPort {
    /// Closing prices for `symbol` within `[start_date, end_date]`; an open
    /// bound is unrestricted.
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<PriceSeries, RiskcalcError>;

    /// Every factor return series on file, as simple returns.
    fn fetch_factor_returns(&self) -> Result<Vec<FactorReturnSeries>, RiskcalcError>;

    fn fetch_positions(&self, portfolio_id: &str) -> Result<Vec<PositionRecord>, RiskcalcError>;

    fn list_symbols(&self) -> Result<Vec<String>, RiskcalcError>;
}
