//! Configuration validation.
//!
//! Every key is optional and falls back to the engine default, but a key that
//! is present must parse and be in range. Validation runs before any data is
//! loaded.

use crate::domain::error::RiskcalcError;
use crate::domain::optimization::WeightLimit;
use crate::domain::series::ReturnConvention;
use crate::domain::var::{ConfidenceLevel, McSampling, VarMethod};
use crate::ports::config_port::ConfigPort;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

/// Sections named `[sector.<Name>]` declare sector constraints.
pub const SECTOR_PREFIX: &str = "sector.";

/// `SYMBOL = min, max` per line; either side may be left blank.
pub const SECURITY_LIMITS_SECTION: &str = "constraints.security";

pub const OBJECTIVES: [&str; 4] = ["max_sharpe", "min_volatility", "target_return", "max_return"];

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), RiskcalcError> {
    validate_returns_config(config)?;
    validate_risk_config(config)?;
    validate_factor_config(config)?;
    validate_optimization_config(config)?;
    Ok(())
}

pub fn validate_returns_config(config: &dyn ConfigPort) -> Result<(), RiskcalcError> {
    parse_value::<ReturnConvention>(config, "returns", "convention")?;
    parse_value::<usize>(config, "returns", "max_fill_days")?;
    Ok(())
}

pub fn validate_risk_config(config: &dyn ConfigPort) -> Result<(), RiskcalcError> {
    parse_value::<ConfidenceLevel>(config, "risk", "confidence_level")?;
    parse_value::<VarMethod>(config, "risk", "var_method")?;
    parse_positive::<u32>(config, "risk", "horizon_days")?;
    parse_flag(config, "risk", "annualize")?;
    parse_positive::<u32>(config, "risk", "trading_days_per_year")?;
    parse_rate(config, "risk", "risk_free_rate")?;
    parse_positive::<usize>(config, "risk", "simulations")?;
    parse_value::<u64>(config, "risk", "seed")?;
    parse_value::<McSampling>(config, "risk", "sampling")?;
    Ok(())
}

pub fn validate_factor_config(config: &dyn ConfigPort) -> Result<(), RiskcalcError> {
    if let Some(level) = parse_value::<f64>(config, "factors", "significance_level")? {
        if !(level > 0.0 && level < 1.0) {
            return Err(invalid(
                "factors",
                "significance_level",
                "significance_level must be between 0 and 1",
            ));
        }
    }
    Ok(())
}

pub fn validate_optimization_config(config: &dyn ConfigPort) -> Result<(), RiskcalcError> {
    let objective = config
        .get_string("optimization", "objective")
        .map(|o| o.trim().to_lowercase());
    if let Some(objective) = &objective {
        if !OBJECTIVES.contains(&objective.as_str()) {
            return Err(invalid(
                "optimization",
                "objective",
                format!("objective must be one of {}", OBJECTIVES.join(", ")),
            ));
        }
    }
    parse_rate(config, "optimization", "risk_free_rate")?;
    let target = parse_finite(config, "optimization", "target_return")?;
    if objective.as_deref() == Some("target_return") && target.is_none() {
        return Err(RiskcalcError::ConfigMissing {
            section: "optimization".into(),
            key: "target_return".into(),
        });
    }
    let target_volatility = parse_positive::<f64>(config, "optimization", "target_volatility")?;
    if objective.as_deref() == Some("max_return") && target_volatility.is_none() {
        return Err(RiskcalcError::ConfigMissing {
            section: "optimization".into(),
            key: "target_volatility".into(),
        });
    }
    parse_flag(config, "optimization", "long_only")?;
    parse_flag(config, "optimization", "fully_invested")?;
    let min = parse_finite(config, "optimization", "min_weight")?;
    let max = parse_finite(config, "optimization", "max_weight")?;
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(invalid(
                "optimization",
                "min_weight",
                "min_weight must not exceed max_weight",
            ));
        }
    }
    parse_positive::<usize>(config, "optimization", "max_iterations")?;
    parse_positive::<f64>(config, "optimization", "tolerance")?;

    for (section, _) in sector_sections(config) {
        validate_sector(config, &section)?;
    }
    parse_security_limits(config)?;
    Ok(())
}

/// Per-symbol weight bounds from `[constraints.security]`, keyed by upper-case
/// symbol.
pub fn parse_security_limits(
    config: &dyn ConfigPort,
) -> Result<BTreeMap<String, WeightLimit>, RiskcalcError> {
    let section = SECURITY_LIMITS_SECTION;
    let mut limits = BTreeMap::new();
    for key in config.keys(section) {
        let raw = config.get_string(section, &key).unwrap_or_default();
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        let [min, max] = parts.as_slice() else {
            return Err(invalid(section, &key, format!("'{}' is not 'min, max'", raw.trim())));
        };
        let bound = |text: &str| -> Result<Option<f64>, RiskcalcError> {
            if text.is_empty() {
                return Ok(None);
            }
            match text.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Some(v)),
                _ => Err(invalid(section, &key, format!("'{text}' is not a finite weight"))),
            }
        };
        let limit = WeightLimit {
            min: bound(*min)?,
            max: bound(*max)?,
        };
        if let (Some(min), Some(max)) = (limit.min, limit.max) {
            if min > max {
                return Err(invalid(section, &key, "min must not exceed max"));
            }
        }
        limits.insert(key.to_uppercase(), limit);
    }
    Ok(limits)
}

fn validate_sector(config: &dyn ConfigPort, section: &str) -> Result<(), RiskcalcError> {
    let members = config
        .get_list(section, "members")
        .ok_or_else(|| RiskcalcError::ConfigMissing {
            section: section.to_string(),
            key: "members".into(),
        })?;
    if members.is_empty() {
        return Err(invalid(section, "members", "members must name at least one symbol"));
    }
    let min = parse_finite(config, section, "min")?;
    let max = parse_finite(config, section, "max")?;
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(invalid(section, "min", "min must not exceed max"));
        }
    }
    Ok(())
}

/// `true|yes|1` and `false|no|0`, case-insensitive.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Comma-separated list with blanks dropped.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `(section, sector name)` for every sector section, sorted by name.
pub fn sector_sections(config: &dyn ConfigPort) -> Vec<(String, String)> {
    let mut sectors: Vec<(String, String)> = config
        .sections()
        .into_iter()
        .filter_map(|section| {
            let name = section.strip_prefix(SECTOR_PREFIX)?.trim().to_string();
            (!name.is_empty()).then_some((section, name))
        })
        .collect();
    sectors.sort_by(|a, b| a.1.cmp(&b.1));
    sectors
}

/// Parses a present, non-blank key; absent or blank keys yield `None`.
pub(crate) fn parse_value<T>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, RiskcalcError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = config.get_string(section, key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| invalid(section, key, format!("'{raw}': {e}")))
}

pub(crate) fn parse_flag(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<bool>, RiskcalcError> {
    match config.get_string(section, key) {
        Some(raw) if !raw.trim().is_empty() => parse_bool(&raw)
            .map(Some)
            .ok_or_else(|| invalid(section, key, format!("'{}' is not a boolean", raw.trim()))),
        _ => Ok(None),
    }
}

pub(crate) fn parse_finite(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<f64>, RiskcalcError> {
    match parse_value::<f64>(config, section, key)? {
        Some(v) if !v.is_finite() => Err(invalid(section, key, format!("{key} must be finite"))),
        other => Ok(other),
    }
}

pub(crate) fn parse_positive<T>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, RiskcalcError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: Display,
{
    match parse_value::<T>(config, section, key)? {
        Some(v) if !(v > T::default()) => {
            Err(invalid(section, key, format!("{key} must be positive")))
        }
        other => Ok(other),
    }
}

/// A per-annum rate strictly between -1 and 1.
pub(crate) fn parse_rate(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<f64>, RiskcalcError> {
    match parse_finite(config, section, key)? {
        Some(v) if v <= -1.0 || v >= 1.0 => Err(invalid(
            section,
            key,
            format!("{key} must be between -1 and 1"),
        )),
        other => Ok(other),
    }
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> RiskcalcError {
    RiskcalcError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    fn assert_invalid(content: &str, expected_key: &str) {
        let err = validate_config(&make_config(content)).unwrap_err();
        match err {
            RiskcalcError::ConfigInvalid { key, .. } => assert_eq!(key, expected_key),
            other => panic!("expected ConfigInvalid for {expected_key}, got {other:?}"),
        }
    }

    #[test]
    fn empty_config_passes() {
        assert!(validate_config(&make_config("")).is_ok());
    }

    #[test]
    fn full_config_passes() {
        let config = make_config(
            r#"
[returns]
convention = log
max_fill_days = 3

[risk]
confidence_level = 0.99
var_method = monte_carlo
horizon_days = 10
annualize = yes
trading_days_per_year = 252
risk_free_rate = 0.02
simulations = 5000
seed = 7
sampling = bootstrap

[factors]
significance_level = 0.01

[optimization]
objective = target_return
target_return = 0.08
long_only = true
min_weight = 0.0
max_weight = 0.4
fully_invested = true
max_iterations = 5000
tolerance = 1e-8

[sector.tech]
members = AAPL, MSFT
max = 0.5
"#,
        );
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn unknown_convention_fails() {
        assert_invalid("[returns]\nconvention = geometric\n", "convention");
    }

    #[test]
    fn unsupported_confidence_level_fails() {
        assert_invalid("[risk]\nconfidence_level = 0.975\n", "confidence_level");
    }

    #[test]
    fn unknown_var_method_fails() {
        assert_invalid("[risk]\nvar_method = garch\n", "var_method");
    }

    #[test]
    fn zero_horizon_fails() {
        assert_invalid("[risk]\nhorizon_days = 0\n", "horizon_days");
    }

    #[test]
    fn non_boolean_annualize_fails() {
        assert_invalid("[risk]\nannualize = sometimes\n", "annualize");
    }

    #[test]
    fn risk_free_rate_out_of_range_fails() {
        assert_invalid("[risk]\nrisk_free_rate = 1.5\n", "risk_free_rate");
    }

    #[test]
    fn non_numeric_seed_fails() {
        assert_invalid("[risk]\nseed = abc\n", "seed");
    }

    #[test]
    fn significance_level_out_of_range_fails() {
        assert_invalid("[factors]\nsignificance_level = 1.0\n", "significance_level");
    }

    #[test]
    fn unknown_objective_fails() {
        assert_invalid("[optimization]\nobjective = max_drawdown\n", "objective");
    }

    #[test]
    fn max_return_objective_requires_volatility_budget() {
        let err =
            validate_config(&make_config("[optimization]\nobjective = max_return\n")).unwrap_err();
        assert!(matches!(
            err,
            RiskcalcError::ConfigMissing { ref key, .. } if key == "target_volatility"
        ));
        assert!(
            validate_config(&make_config(
                "[optimization]\nobjective = max_return\ntarget_volatility = 0.12\n"
            ))
            .is_ok()
        );
    }

    #[test]
    fn non_positive_volatility_budget_fails() {
        assert_invalid("[optimization]\ntarget_volatility = 0\n", "target_volatility");
    }

    #[test]
    fn security_limits_parse_with_open_sides() {
        let config = make_config("[constraints.security]\naapl = 0.05, 0.4\nMSFT = , 0.3\n");
        let limits = parse_security_limits(&config).unwrap();
        assert_eq!(limits.len(), 2);
        assert_eq!(
            limits["AAPL"],
            WeightLimit {
                min: Some(0.05),
                max: Some(0.4)
            }
        );
        assert_eq!(limits["MSFT"], WeightLimit { min: None, max: Some(0.3) });
    }

    #[test]
    fn malformed_security_limits_fail() {
        assert_invalid("[constraints.security]\naapl = 0.4\n", "aapl");
        assert_invalid("[constraints.security]\naapl = 0.1, x\n", "aapl");
        assert_invalid("[constraints.security]\naapl = 0.5, 0.2\n", "aapl");
    }

    #[test]
    fn target_objective_requires_target() {
        let err =
            validate_config(&make_config("[optimization]\nobjective = target_return\n")).unwrap_err();
        assert!(matches!(
            err,
            RiskcalcError::ConfigMissing { ref key, .. } if key == "target_return"
        ));
    }

    #[test]
    fn crossed_weight_bounds_fail() {
        assert_invalid("[optimization]\nmin_weight = 0.5\nmax_weight = 0.2\n", "min_weight");
    }

    #[test]
    fn negative_tolerance_fails() {
        assert_invalid("[optimization]\ntolerance = -1e-6\n", "tolerance");
    }

    #[test]
    fn sector_without_members_fails() {
        let err = validate_config(&make_config("[sector.energy]\nmax = 0.2\n")).unwrap_err();
        assert!(matches!(
            err,
            RiskcalcError::ConfigMissing { ref section, .. } if section == "sector.energy"
        ));
    }

    #[test]
    fn sector_with_crossed_bounds_fails() {
        assert_invalid("[sector.energy]\nmembers = XOM\nmin = 0.3\nmax = 0.1\n", "min");
    }

    #[test]
    fn sector_sections_are_sorted_by_name() {
        let config = make_config(
            "[sector.utilities]\nmembers = NEE\n[risk]\n[sector.energy]\nmembers = XOM\n",
        );
        let names: Vec<String> = sector_sections(&config).into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["energy", "utilities"]);
    }

    #[test]
    fn list_parsing_drops_blanks() {
        assert_eq!(parse_list(" AAPL, ,MSFT ,"), vec!["AAPL", "MSFT"]);
    }
}
