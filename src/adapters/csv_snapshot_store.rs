//! Append-only CSV store for risk snapshots.

use crate::domain::error::RiskcalcError;
use crate::ports::snapshot_port::{SnapshotPort, SnapshotRecord};
use chrono::NaiveDate;
use csv::StringRecord;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use tracing::info;

const HEADER: [&str; 18] = [
    "portfolio_id",
    "as_of",
    "observations",
    "annualized",
    "volatility",
    "beta",
    "var_method",
    "confidence",
    "horizon_days",
    "var",
    "cvar",
    "tracking_error",
    "information_ratio",
    "sharpe_ratio",
    "sortino_ratio",
    "max_drawdown",
    "total_return",
    "annualized_return",
];

pub struct CsvSnapshotStore {
    path: PathBuf,
}

impl CsvSnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_all(&self) -> Result<Vec<SnapshotRecord>, RiskcalcError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        rdr.records()
            .map(|record| {
                let record = record.map_err(|e| RiskcalcError::Data {
                    reason: format!("snapshot store {}: {}", self.path.display(), e),
                })?;
                decode(&record)
            })
            .collect()
    }
}

impl SnapshotPort for CsvSnapshotStore {
    fn save(&self, record: &SnapshotRecord) -> Result<(), RiskcalcError> {
        let existing = self.read_all()?;
        if existing
            .iter()
            .any(|r| r.portfolio_id == record.portfolio_id && r.as_of == record.as_of)
        {
            return Err(RiskcalcError::SnapshotExists {
                portfolio_id: record.portfolio_id.clone(),
                date: record.as_of.to_string(),
            });
        }

        let needs_header = fs::metadata(&self.path).map_or(true, |m| m.len() == 0);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);
        let write = |writer: &mut csv::Writer<fs::File>| -> csv::Result<()> {
            if needs_header {
                writer.write_record(HEADER)?;
            }
            writer.write_record(encode(record))?;
            writer.flush()?;
            Ok(())
        };
        write(&mut writer).map_err(|e| RiskcalcError::Data {
            reason: format!("failed to write snapshot: {e}"),
        })?;
        info!(
            portfolio_id = %record.portfolio_id,
            as_of = %record.as_of,
            path = %self.path.display(),
            "snapshot stored"
        );
        Ok(())
    }

    fn load(&self, portfolio_id: &str) -> Result<Vec<SnapshotRecord>, RiskcalcError> {
        let mut rows: Vec<SnapshotRecord> = self
            .read_all()?
            .into_iter()
            .filter(|r| r.portfolio_id == portfolio_id)
            .collect();
        rows.sort_by_key(|r| r.as_of);
        Ok(rows)
    }
}

fn encode(r: &SnapshotRecord) -> Vec<String> {
    vec![
        r.portfolio_id.clone(),
        r.as_of.to_string(),
        r.observations.to_string(),
        r.annualized.to_string(),
        r.volatility.to_string(),
        r.beta.to_string(),
        r.var_method.clone(),
        r.confidence.to_string(),
        r.horizon_days.to_string(),
        r.var.to_string(),
        r.cvar.to_string(),
        r.tracking_error.to_string(),
        r.information_ratio.to_string(),
        r.sharpe_ratio.to_string(),
        r.sortino_ratio.to_string(),
        r.max_drawdown.to_string(),
        r.total_return.to_string(),
        // blank when the series lost everything
        r.annualized_return.map(|v| v.to_string()).unwrap_or_default(),
    ]
}

fn decode(record: &StringRecord) -> Result<SnapshotRecord, RiskcalcError> {
    let get = |i: usize| {
        record.get(i).ok_or_else(|| RiskcalcError::Data {
            reason: format!("snapshot row is missing {}", HEADER[i]),
        })
    };
    let number = |i: usize| -> Result<f64, RiskcalcError> {
        get(i)?.parse().map_err(|_| RiskcalcError::Data {
            reason: format!("snapshot {} is not a number", HEADER[i]),
        })
    };
    let bad = |i: usize| RiskcalcError::Data {
        reason: format!("snapshot {} is malformed", HEADER[i]),
    };

    Ok(SnapshotRecord {
        portfolio_id: get(0)?.to_string(),
        as_of: NaiveDate::parse_from_str(get(1)?, "%Y-%m-%d").map_err(|_| bad(1))?,
        observations: get(2)?.parse().map_err(|_| bad(2))?,
        annualized: get(3)?.parse().map_err(|_| bad(3))?,
        volatility: number(4)?,
        beta: number(5)?,
        var_method: get(6)?.to_string(),
        confidence: number(7)?,
        horizon_days: get(8)?.parse().map_err(|_| bad(8))?,
        var: number(9)?,
        cvar: number(10)?,
        tracking_error: number(11)?,
        information_ratio: number(12)?,
        sharpe_ratio: number(13)?,
        sortino_ratio: number(14)?,
        max_drawdown: number(15)?,
        total_return: number(16)?,
        annualized_return: match get(17)? {
            "" => None,
            _ => Some(number(17)?),
        },
    })
}
