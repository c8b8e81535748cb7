//! Portfolio constraints and their compilation to linear rows `l <= a·w <= u`.

use crate::domain::error::RiskcalcError;
use std::collections::BTreeMap;

/// Tolerance used when reporting whether a solution satisfies a row.
pub const CHECK_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeightLimit {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorConstraint {
    pub name: String,
    pub members: Vec<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstraintSet {
    pub long_only: bool,
    pub min_weight: Option<f64>,
    pub max_weight: Option<f64>,
    /// Per-symbol bounds, intersected with the global ones.
    pub security_limits: BTreeMap<String, WeightLimit>,
    pub sectors: Vec<SectorConstraint>,
    /// Minimum expected portfolio return.
    pub target_return: Option<f64>,
    /// Weights sum to exactly one; otherwise to at most one.
    pub fully_invested: bool,
}

impl Default for ConstraintSet {
    fn default() -> Self {
        Self {
            long_only: true,
            min_weight: None,
            max_weight: None,
            security_limits: BTreeMap::new(),
            sectors: Vec::new(),
            target_return: None,
            fully_invested: true,
        }
    }
}

/// One linear constraint over the weight vector. Either bound may be infinite.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRow {
    pub name: String,
    pub coefficients: Vec<f64>,
    pub lower: f64,
    pub upper: f64,
}

impl LinearRow {
    pub fn value(&self, w: &[f64]) -> f64 {
        self.coefficients.iter().zip(w).map(|(a, x)| a * x).sum()
    }

    pub fn is_equality(&self) -> bool {
        self.lower == self.upper
    }

    fn unit(n: usize, i: usize) -> Vec<f64> {
        let mut a = vec![0.0; n];
        a[i] = 1.0;
        a
    }
}

/// Outcome of evaluating one row at a solution.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstraintCheck {
    pub name: String,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
    pub satisfied: bool,
}

impl ConstraintSet {
    /// Compiles the set into linear rows over `symbols`. `extra_target`
    /// adds a second minimum-return row (used by target-return objectives).
    pub fn compile(
        &self,
        symbols: &[String],
        expected_returns: &[f64],
        extra_target: Option<f64>,
    ) -> Result<Vec<LinearRow>, RiskcalcError> {
        self.check_values()?;
        let n = symbols.len();
        let index = |symbol: &str, context: &str| {
            symbols.iter().position(|s| s == symbol).ok_or_else(|| {
                RiskcalcError::invalid(format!("{context} names unknown symbol '{symbol}'"))
            })
        };

        let mut lower = vec![if self.long_only { 0.0 } else { f64::NEG_INFINITY }; n];
        let mut upper = vec![f64::INFINITY; n];
        for i in 0..n {
            if let Some(min) = self.min_weight {
                lower[i] = lower[i].max(min);
            }
            if let Some(max) = self.max_weight {
                upper[i] = upper[i].min(max);
            }
        }
        for (symbol, limit) in &self.security_limits {
            let i = index(symbol, "security limit")?;
            if let Some(min) = limit.min {
                lower[i] = lower[i].max(min);
            }
            if let Some(max) = limit.max {
                upper[i] = upper[i].min(max);
            }
        }

        let mut rows = Vec::new();
        for (i, symbol) in symbols.iter().enumerate() {
            if lower[i] > upper[i] {
                return Err(RiskcalcError::InfeasibleConstraints {
                    reason: format!(
                        "weight bounds for {symbol} are empty ({} > {})",
                        lower[i], upper[i]
                    ),
                });
            }
            if lower[i].is_finite() || upper[i].is_finite() {
                rows.push(LinearRow {
                    name: format!("weight[{symbol}]"),
                    coefficients: LinearRow::unit(n, i),
                    lower: lower[i],
                    upper: upper[i],
                });
            }
        }

        rows.push(LinearRow {
            name: "budget".into(),
            coefficients: vec![1.0; n],
            lower: if self.fully_invested { 1.0 } else { f64::NEG_INFINITY },
            upper: 1.0,
        });

        for sector in &self.sectors {
            if sector.min.is_none() && sector.max.is_none() {
                continue;
            }
            let mut coefficients = vec![0.0; n];
            for member in &sector.members {
                coefficients[index(member, &format!("sector {}", sector.name))?] = 1.0;
            }
            rows.push(LinearRow {
                name: format!("sector[{}]", sector.name),
                coefficients,
                lower: sector.min.unwrap_or(f64::NEG_INFINITY),
                upper: sector.max.unwrap_or(f64::INFINITY),
            });
        }

        for (name, target) in [
            ("target_return", self.target_return),
            ("objective_target_return", extra_target),
        ] {
            if let Some(target) = target {
                rows.push(LinearRow {
                    name: name.into(),
                    coefficients: expected_returns.to_vec(),
                    lower: target,
                    upper: f64::INFINITY,
                });
            }
        }
        Ok(rows)
    }

    fn check_values(&self) -> Result<(), RiskcalcError> {
        let bounds = [
            ("min_weight", self.min_weight),
            ("max_weight", self.max_weight),
            ("target_return", self.target_return),
        ];
        let limits = self
            .security_limits
            .iter()
            .flat_map(|(s, l)| [(s.as_str(), l.min), (s.as_str(), l.max)]);
        let sectors = self
            .sectors
            .iter()
            .flat_map(|s| [(s.name.as_str(), s.min), (s.name.as_str(), s.max)]);
        if let Some((name, _)) = bounds
            .into_iter()
            .chain(limits)
            .chain(sectors)
            .find(|(_, v)| v.is_some_and(|v| !v.is_finite()))
        {
            return Err(RiskcalcError::invalid(format!("constraint {name} is not finite")));
        }
        if let Some(sector) = self
            .sectors
            .iter()
            .find(|s| matches!((s.min, s.max), (Some(lo), Some(hi)) if lo > hi))
        {
            return Err(RiskcalcError::InfeasibleConstraints {
                reason: format!("sector {} has min above max", sector.name),
            });
        }
        Ok(())
    }
}

/// Evaluates every row at `w`.
pub fn check_rows(rows: &[LinearRow], w: &[f64]) -> Vec<ConstraintCheck> {
    rows.iter()
        .map(|row| {
            let value = row.value(w);
            ConstraintCheck {
                name: row.name.clone(),
                value,
                lower: row.lower,
                upper: row.upper,
                satisfied: value >= row.lower - CHECK_TOLERANCE
                    && value <= row.upper + CHECK_TOLERANCE,
            }
        })
        .collect()
}
