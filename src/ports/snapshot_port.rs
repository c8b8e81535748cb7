//! Risk snapshot persistence port trait.

use crate::domain::error::RiskcalcError;
use crate::domain::risk::RiskMetricsSnapshot;
use chrono::NaiveDate;

/// One stored row, keyed by (portfolio id, as-of date).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SnapshotRecord {
    pub portfolio_id: String,
    pub as_of: NaiveDate,
    pub observations: usize,
    pub annualized: bool,
    pub volatility: f64,
    pub beta: f64,
    pub var_method: String,
    pub confidence: f64,
    pub horizon_days: u32,
    pub var: f64,
    pub cvar: f64,
    pub tracking_error: f64,
    pub information_ratio: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub total_return: f64,
    pub annualized_return: Option<f64>,
}

impl From<&RiskMetricsSnapshot> for SnapshotRecord {
    fn from(s: &RiskMetricsSnapshot) -> Self {
        Self {
            portfolio_id: s.portfolio_id.clone(),
            as_of: s.as_of,
            observations: s.observations,
            annualized: s.annualized,
            volatility: s.volatility,
            beta: s.beta,
            var_method: s.var.method.name().to_string(),
            confidence: s.var.confidence.value(),
            horizon_days: s.var.horizon_days,
            var: s.var.var,
            cvar: s.var.cvar,
            tracking_error: s.tracking_error,
            information_ratio: s.information_ratio,
            sharpe_ratio: s.sharpe_ratio,
            sortino_ratio: s.sortino_ratio,
            max_drawdown: s.max_drawdown.depth,
            total_return: s.total_return,
            annualized_return: s.annualized_return,
        }
    }
}

/// Append-only store: a row is never replaced once written.
pub trait SnapshotPort {
    /// Fails with `SnapshotExists` when the key is already stored.
    fn save(&self, record: &SnapshotRecord) -> Result<(), RiskcalcError>;

    /// Rows for `portfolio_id` in date order.
    fn load(&self, portfolio_id: &str) -> Result<Vec<SnapshotRecord>, RiskcalcError>;
}
