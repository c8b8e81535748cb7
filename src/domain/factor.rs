//! Factor definitions, factor return series and the standard factor sets.

use crate::domain::error::RiskcalcError;
use crate::domain::series::ReturnSeries;
use std::fmt;

pub const MARKET: &str = "mkt_rf";
pub const SIZE: &str = "smb";
pub const VALUE: &str = "hml";
pub const PROFITABILITY: &str = "rmw";
pub const INVESTMENT: &str = "cma";
pub const MOMENTUM: &str = "momentum";
pub const QUALITY: &str = "quality";
pub const VOLATILITY: &str = "volatility";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FactorCategory {
    Market,
    Style,
    Industry,
    Macro,
    Custom,
}

impl fmt::Display for FactorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FactorCategory::Market => "market",
            FactorCategory::Style => "style",
            FactorCategory::Industry => "industry",
            FactorCategory::Macro => "macro",
            FactorCategory::Custom => "custom",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FactorDefinition {
    pub id: String,
    pub name: String,
    pub category: FactorCategory,
}

impl FactorDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: FactorCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
        }
    }

    /// Definition for an id outside the standard sets.
    pub fn custom(id: impl Into<String>) -> Self {
        let id = id.into();
        let name = standard_name(&id).map_or_else(|| id.clone(), str::to_string);
        let category = standard_category(&id).unwrap_or(FactorCategory::Custom);
        Self { id, name, category }
    }
}

fn standard_name(id: &str) -> Option<&'static str> {
    match id {
        MARKET => Some("Market"),
        SIZE => Some("Size"),
        VALUE => Some("Value"),
        PROFITABILITY => Some("Profitability"),
        INVESTMENT => Some("Investment"),
        MOMENTUM => Some("Momentum"),
        QUALITY => Some("Quality"),
        VOLATILITY => Some("Volatility"),
        _ => None,
    }
}

fn standard_category(id: &str) -> Option<FactorCategory> {
    match id {
        MARKET => Some(FactorCategory::Market),
        SIZE | VALUE | PROFITABILITY | INVESTMENT | MOMENTUM | QUALITY | VOLATILITY => {
            Some(FactorCategory::Style)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FactorReturnSeries {
    pub definition: FactorDefinition,
    pub returns: ReturnSeries,
}

impl FactorReturnSeries {
    pub fn new(definition: FactorDefinition, returns: ReturnSeries) -> Self {
        Self {
            definition,
            returns,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }
}

/// Published factor sets the data port knows how to supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StandardFactorSet {
    FamaFrench3,
    FamaFrench5,
}

impl StandardFactorSet {
    pub fn ids(self) -> &'static [&'static str] {
        match self {
            StandardFactorSet::FamaFrench3 => &[MARKET, SIZE, VALUE],
            StandardFactorSet::FamaFrench5 => &[MARKET, SIZE, VALUE, PROFITABILITY, INVESTMENT],
        }
    }

    pub fn definitions(self) -> Vec<FactorDefinition> {
        self.ids().iter().map(|id| FactorDefinition::custom(*id)).collect()
    }
}

impl std::str::FromStr for StandardFactorSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "ff3" | "fama_french_3" => Ok(StandardFactorSet::FamaFrench3),
            "ff5" | "fama_french_5" => Ok(StandardFactorSet::FamaFrench5),
            other => Err(format!("unknown factor set '{other}'")),
        }
    }
}

/// Picks the factors named by `ids` out of `available`, in the order given.
pub fn select_factors(
    available: &[FactorReturnSeries],
    ids: &[&str],
) -> Result<Vec<FactorReturnSeries>, RiskcalcError> {
    ids.iter()
        .map(|id| {
            available
                .iter()
                .find(|f| f.id() == *id)
                .cloned()
                .ok_or_else(|| RiskcalcError::invalid(format!("factor '{id}' not available")))
        })
        .collect()
}
