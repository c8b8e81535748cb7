#![allow(dead_code)]

use chrono::NaiveDate;
use riskcalc::domain::error::RiskcalcError;
use riskcalc::domain::factor::{FactorDefinition, FactorReturnSeries};
use riskcalc::domain::series::{
    PositionRecord, PricePoint, PriceSeries, ReturnConvention, ReturnSeries,
};
use riskcalc::ports::data_port::DataPort;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub struct MockDataPort {
    pub prices: HashMap<String, PriceSeries>,
    pub factors: Vec<FactorReturnSeries>,
    pub positions: HashMap<String, Vec<PositionRecord>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            prices: HashMap::new(),
            factors: Vec::new(),
            positions: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_prices(mut self, symbol: &str, dates: &[NaiveDate], prices: &[f64]) -> Self {
        let series = PriceSeries::from_pairs(symbol, dates, prices).unwrap();
        self.prices.insert(symbol.to_string(), series);
        self
    }

    pub fn with_factor(mut self, id: &str, dates: &[NaiveDate], returns: &[f64]) -> Self {
        let series = ReturnSeries::from_pairs(ReturnConvention::Simple, dates, returns).unwrap();
        self.factors
            .push(FactorReturnSeries::new(FactorDefinition::custom(id), series));
        self
    }

    pub fn with_positions(mut self, portfolio_id: &str, positions: Vec<PositionRecord>) -> Self {
        self.positions.insert(portfolio_id.to_string(), positions);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<PriceSeries, RiskcalcError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(RiskcalcError::Data {
                reason: reason.clone(),
            });
        }
        let series = self.prices.get(symbol).ok_or_else(|| RiskcalcError::Data {
            reason: format!("no prices for {symbol}"),
        })?;
        let points: Vec<PricePoint> = series
            .points()
            .iter()
            .filter(|p| start_date.is_none_or(|s| p.date >= s) && end_date.is_none_or(|e| p.date <= e))
            .copied()
            .collect();
        PriceSeries::new(symbol, points)
    }

    fn fetch_factor_returns(&self) -> Result<Vec<FactorReturnSeries>, RiskcalcError> {
        Ok(self.factors.clone())
    }

    fn fetch_positions(&self, portfolio_id: &str) -> Result<Vec<PositionRecord>, RiskcalcError> {
        self.positions
            .get(portfolio_id)
            .cloned()
            .ok_or_else(|| RiskcalcError::Data {
                reason: format!("no positions for {portfolio_id}"),
            })
    }

    fn list_symbols(&self) -> Result<Vec<String>, RiskcalcError> {
        let mut symbols: Vec<String> = self.prices.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// `count` consecutive calendar days from `start`.
pub fn days(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    (0..count)
        .map(|i| start + chrono::Duration::days(i as i64))
        .collect()
}

/// Deterministic pseudo-random value in [-0.5, 0.5).
pub fn noise(i: usize, seed: f64) -> f64 {
    ((i as f64 * 12.9898 + seed).sin() * 43_758.545_3).fract().abs() - 0.5
}

/// Prices compounding `returns` from `start_price`; one longer than `returns`.
pub fn price_path(start_price: f64, returns: &[f64]) -> Vec<f64> {
    let mut prices = Vec::with_capacity(returns.len() + 1);
    prices.push(start_price);
    for r in returns {
        let last = prices[prices.len() - 1];
        prices.push(last * (1.0 + r));
    }
    prices
}

pub const MARKET_BETA: f64 = 1.2;
pub const SIZE_BETA: f64 = 0.5;
pub const VALUE_BETA: f64 = -0.3;

/// A market of three factors and four stocks over `periods` daily returns.
///
/// `STOCK` is an exact linear combination of the factors plus a constant,
/// `BENCH` follows the market factor, and `AAA`/`BBB`/`CCC` carry
/// independent noise around different drifts.
pub struct SyntheticMarket {
    pub price_dates: Vec<NaiveDate>,
    pub return_dates: Vec<NaiveDate>,
    pub market: Vec<f64>,
    pub size: Vec<f64>,
    pub value: Vec<f64>,
    pub stock: Vec<f64>,
    pub bench: Vec<f64>,
    pub assets: Vec<(String, Vec<f64>)>,
}

impl SyntheticMarket {
    pub fn new(periods: usize) -> Self {
        let price_dates = days(date(2023, 1, 2), periods + 1);
        let return_dates = price_dates[1..].to_vec();
        let market: Vec<f64> = (0..periods).map(|i| 0.0004 + 0.02 * noise(i, 1.0)).collect();
        let size: Vec<f64> = (0..periods).map(|i| 0.01 * noise(i, 2.0)).collect();
        let value: Vec<f64> = (0..periods).map(|i| 0.01 * noise(i, 3.0)).collect();
        let stock: Vec<f64> = (0..periods)
            .map(|i| 0.0001 + MARKET_BETA * market[i] + SIZE_BETA * size[i] + VALUE_BETA * value[i])
            .collect();
        let bench = market.clone();
        let assets = [("AAA", 0.0008, 4.0), ("BBB", 0.0004, 5.0), ("CCC", 0.0002, 6.0)]
            .into_iter()
            .map(|(symbol, drift, seed)| {
                let returns = (0..periods).map(|i| drift + 0.015 * noise(i, seed)).collect();
                (symbol.to_string(), returns)
            })
            .collect();
        Self {
            price_dates,
            return_dates,
            market,
            size,
            value,
            stock,
            bench,
            assets,
        }
    }

    pub fn port(&self) -> MockDataPort {
        let mut port = MockDataPort::new()
            .with_prices("STOCK", &self.price_dates, &price_path(50.0, &self.stock))
            .with_prices("BENCH", &self.price_dates, &price_path(1000.0, &self.bench))
            .with_factor("mkt_rf", &self.return_dates, &self.market)
            .with_factor("smb", &self.return_dates, &self.size)
            .with_factor("hml", &self.return_dates, &self.value);
        for (symbol, returns) in &self.assets {
            port = port.with_prices(symbol, &self.price_dates, &price_path(100.0, returns));
        }
        port
    }

    /// Writes the same data in the CSV layout the command line reads.
    pub fn write_csv(&self, dir: &Path) {
        let mut series = vec![
            ("STOCK".to_string(), price_path(50.0, &self.stock)),
            ("BENCH".to_string(), price_path(1000.0, &self.bench)),
        ];
        for (symbol, returns) in &self.assets {
            series.push((symbol.clone(), price_path(100.0, returns)));
        }
        for (symbol, prices) in &series {
            let mut content = String::from("date,close\n");
            for (d, p) in self.price_dates.iter().zip(prices) {
                content.push_str(&format!("{d},{p}\n"));
            }
            fs::write(dir.join(format!("{symbol}.csv")), content).unwrap();
        }

        let mut factors = String::from("date,mkt_rf,smb,hml\n");
        for i in 0..self.return_dates.len() {
            factors.push_str(&format!(
                "{},{},{},{}\n",
                self.return_dates[i], self.market[i], self.size[i], self.value[i]
            ));
        }
        fs::write(dir.join("factors.csv"), factors).unwrap();

        let start = self.price_dates[0];
        fs::write(
            dir.join("positions.csv"),
            format!(
                "portfolio,symbol,quantity,entry_date,entry_price,exit_date,exit_price\n\
                 balanced,AAA,100,{start},100.0,,\n\
                 balanced,BBB,50,{start},100.0,,\n"
            ),
        )
        .unwrap();
    }
}

pub fn position(symbol: &str, quantity: f64, entry_date: NaiveDate) -> PositionRecord {
    PositionRecord {
        symbol: symbol.to_string(),
        quantity,
        entry_date,
        entry_price: 100.0,
        exit_date: None,
        exit_price: None,
    }
}
