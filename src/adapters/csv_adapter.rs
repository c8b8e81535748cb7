//! CSV file data adapter.
//!
//! Layout under the base directory:
//! - `<SYMBOL>.csv`: `date,close` (extra columns ignored)
//! - `factors.csv`: `date,<factor id>,...` holding periodic simple returns
//! - `positions.csv`: `portfolio,symbol,quantity,entry_date,entry_price,exit_date,exit_price`

use crate::domain::error::RiskcalcError;
use crate::domain::factor::{FactorDefinition, FactorReturnSeries};
use crate::domain::series::{PositionRecord, PricePoint, PriceSeries, ReturnConvention, ReturnSeries};
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use csv::StringRecord;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const FACTORS_FILE: &str = "factors.csv";
pub const POSITIONS_FILE: &str = "positions.csv";

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{symbol}.csv"))
    }
}

impl DataPort for CsvAdapter {
    fn fetch_prices(
        &self,
        symbol: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<PriceSeries, RiskcalcError> {
        let path = self.csv_path(symbol);
        let (headers, records) = read_records(&path)?;
        let date_col = column(&headers, "date", &path)?;
        let close_col = column(&headers, "close", &path)?;

        let mut points = Vec::with_capacity(records.len());
        for record in &records {
            let date = parse_date(field(record, date_col, "date")?)?;
            if start_date.is_some_and(|s| date < s) || end_date.is_some_and(|e| date > e) {
                continue;
            }
            let price = parse_number(field(record, close_col, "close")?, "close")?;
            points.push(PricePoint { date, price });
        }
        points.sort_by_key(|p| p.date);
        debug!(symbol, rows = points.len(), "loaded prices");
        PriceSeries::new(symbol, points)
    }

    fn fetch_factor_returns(&self) -> Result<Vec<FactorReturnSeries>, RiskcalcError> {
        let path = self.base_path.join(FACTORS_FILE);
        let (headers, records) = read_records(&path)?;
        let date_col = column(&headers, "date", &path)?;

        let mut dated = Vec::with_capacity(records.len());
        for record in records {
            let date = parse_date(field(&record, date_col, "date")?)?;
            dated.push((date, record));
        }
        dated.sort_by_key(|(date, _)| *date);
        let dates: Vec<NaiveDate> = dated.iter().map(|(d, _)| *d).collect();

        let mut factors = Vec::new();
        for (col, id) in headers.iter().enumerate() {
            if col == date_col {
                continue;
            }
            let id = id.trim();
            let values = dated
                .iter()
                .map(|(_, record)| parse_number(field(record, col, id)?, id))
                .collect::<Result<Vec<f64>, RiskcalcError>>()?;
            let returns = ReturnSeries::from_pairs(ReturnConvention::Simple, &dates, &values)?;
            factors.push(FactorReturnSeries::new(FactorDefinition::custom(id), returns));
        }
        debug!(factors = factors.len(), rows = dates.len(), "loaded factor returns");
        Ok(factors)
    }

    fn fetch_positions(&self, portfolio_id: &str) -> Result<Vec<PositionRecord>, RiskcalcError> {
        let path = self.base_path.join(POSITIONS_FILE);
        let (headers, records) = read_records(&path)?;
        let col = |name: &str| column(&headers, name, &path);
        let portfolio = col("portfolio")?;
        let symbol = col("symbol")?;
        let quantity = col("quantity")?;
        let entry_date = col("entry_date")?;
        let entry_price = col("entry_price")?;
        let exit_date = col("exit_date")?;
        let exit_price = col("exit_price")?;

        let mut positions = Vec::new();
        for record in &records {
            if field(record, portfolio, "portfolio")?.trim() != portfolio_id {
                continue;
            }
            positions.push(PositionRecord {
                symbol: field(record, symbol, "symbol")?.trim().to_string(),
                quantity: parse_number(field(record, quantity, "quantity")?, "quantity")?,
                entry_date: parse_date(field(record, entry_date, "entry_date")?)?,
                entry_price: parse_number(field(record, entry_price, "entry_price")?, "entry_price")?,
                exit_date: optional(record, exit_date)
                    .map(parse_date)
                    .transpose()?,
                exit_price: optional(record, exit_price)
                    .map(|v| parse_number(v, "exit_price"))
                    .transpose()?,
            });
        }
        if positions.is_empty() {
            return Err(RiskcalcError::Data {
                reason: format!("no positions for portfolio {portfolio_id} in {}", path.display()),
            });
        }
        Ok(positions)
    }

    fn list_symbols(&self) -> Result<Vec<String>, RiskcalcError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| RiskcalcError::Data {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RiskcalcError::Data {
                reason: format!("directory entry error: {}", e),
            })?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == FACTORS_FILE || name == POSITIONS_FILE {
                continue;
            }
            if let Some(symbol) = name.strip_suffix(".csv") {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}

fn read_records(path: &Path) -> Result<(StringRecord, Vec<StringRecord>), RiskcalcError> {
    let content = fs::read_to_string(path).map_err(|e| RiskcalcError::Data {
        reason: format!("failed to read {}: {}", path.display(), e),
    })?;
    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let headers = rdr
        .headers()
        .map_err(|e| RiskcalcError::Data {
            reason: format!("CSV header error in {}: {}", path.display(), e),
        })?
        .clone();
    let records = rdr
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RiskcalcError::Data {
            reason: format!("CSV parse error in {}: {}", path.display(), e),
        })?;
    Ok((headers, records))
}

fn column(headers: &StringRecord, name: &str, path: &Path) -> Result<usize, RiskcalcError> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
        .ok_or_else(|| RiskcalcError::Data {
            reason: format!("missing {name} column in {}", path.display()),
        })
}

fn field<'r>(record: &'r StringRecord, col: usize, name: &str) -> Result<&'r str, RiskcalcError> {
    record.get(col).ok_or_else(|| RiskcalcError::Data {
        reason: format!("missing {name} value"),
    })
}

fn optional(record: &StringRecord, col: usize) -> Option<&str> {
    record.get(col).map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(value: &str) -> Result<NaiveDate, RiskcalcError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| RiskcalcError::Data {
        reason: format!("invalid date '{}': {}", value.trim(), e),
    })
}

fn parse_number(value: &str, name: &str) -> Result<f64, RiskcalcError> {
    value.trim().parse().map_err(|e| RiskcalcError::Data {
        reason: format!("invalid {name} value '{}': {}", value.trim(), e),
    })
}
