//! Error taxonomy shared by the engine and its adapters.

/// Top-level error type for riskcalc.
///
/// The first block of variants are raised by the calculation engine and are
/// always recoverable by the caller; the rest come from adapters and the CLI.
#[derive(Debug, thiserror::Error)]
pub enum RiskcalcError {
    #[error("insufficient data for {statistic}: have {have} observations, need {need}")]
    InsufficientData {
        statistic: String,
        have: usize,
        need: usize,
    },

    #[error("series alignment error: {reason}")]
    SeriesAlignment { reason: String },

    #[error("degenerate input: {reason}")]
    DegenerateInput { reason: String },

    #[error("empty series: {series}")]
    EmptySeries { series: String },

    #[error("invalid covariance matrix: {reason}")]
    InvalidCovariance { reason: String },

    #[error("infeasible constraints: {reason}")]
    InfeasibleConstraints { reason: String },

    #[error("optimization did not converge after {iterations} iterations (residual {residual:e})")]
    OptimizationDidNotConverge { iterations: usize, residual: f64 },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("snapshot for {portfolio_id} on {date} already exists")]
    SnapshotExists { portfolio_id: String, date: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RiskcalcError {
    pub(crate) fn insufficient(statistic: &str, have: usize, need: usize) -> Self {
        RiskcalcError::InsufficientData {
            statistic: statistic.to_string(),
            have,
            need,
        }
    }

    pub(crate) fn alignment(reason: impl Into<String>) -> Self {
        RiskcalcError::SeriesAlignment {
            reason: reason.into(),
        }
    }

    pub(crate) fn degenerate(reason: impl Into<String>) -> Self {
        RiskcalcError::DegenerateInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        RiskcalcError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Stable error-kind name, surfaced verbatim to the requesting layer.
    pub fn kind(&self) -> &'static str {
        match self {
            RiskcalcError::InsufficientData { .. } => "InsufficientDataError",
            RiskcalcError::SeriesAlignment { .. } => "SeriesAlignmentError",
            RiskcalcError::DegenerateInput { .. } => "DegenerateInputError",
            RiskcalcError::EmptySeries { .. } => "EmptySeriesError",
            RiskcalcError::InvalidCovariance { .. } => "InvalidCovarianceError",
            RiskcalcError::InfeasibleConstraints { .. } => "InfeasibleConstraintsError",
            RiskcalcError::OptimizationDidNotConverge { .. } => "OptimizationDidNotConvergeError",
            RiskcalcError::InvalidInput { .. } => "InvalidInputError",
            RiskcalcError::ConfigParse { .. } => "ConfigParseError",
            RiskcalcError::ConfigMissing { .. } => "ConfigMissingError",
            RiskcalcError::ConfigInvalid { .. } => "ConfigInvalidError",
            RiskcalcError::Data { .. } => "DataError",
            RiskcalcError::SnapshotExists { .. } => "SnapshotExistsError",
            RiskcalcError::Io(_) => "IoError",
        }
    }
}

impl From<&RiskcalcError> for std::process::ExitCode {
    fn from(err: &RiskcalcError) -> Self {
        let code: u8 = match err {
            RiskcalcError::Io(_) => 1,
            RiskcalcError::ConfigParse { .. }
            | RiskcalcError::ConfigMissing { .. }
            | RiskcalcError::ConfigInvalid { .. } => 2,
            RiskcalcError::Data { .. } | RiskcalcError::SnapshotExists { .. } => 3,
            RiskcalcError::InvalidInput { .. } => 4,
            RiskcalcError::InsufficientData { .. }
            | RiskcalcError::SeriesAlignment { .. }
            | RiskcalcError::EmptySeries { .. } => 5,
            RiskcalcError::DegenerateInput { .. } | RiskcalcError::InvalidCovariance { .. } => 6,
            RiskcalcError::InfeasibleConstraints { .. }
            | RiskcalcError::OptimizationDidNotConverge { .. } => 7,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(
            RiskcalcError::insufficient("volatility", 1, 2).kind(),
            "InsufficientDataError"
        );
        assert_eq!(
            RiskcalcError::alignment("length").kind(),
            "SeriesAlignmentError"
        );
        assert_eq!(
            RiskcalcError::EmptySeries {
                series: "prices".into()
            }
            .kind(),
            "EmptySeriesError"
        );
        assert_eq!(
            RiskcalcError::OptimizationDidNotConverge {
                iterations: 10,
                residual: 1.0
            }
            .kind(),
            "OptimizationDidNotConvergeError"
        );
    }

    #[test]
    fn insufficient_data_message() {
        let err = RiskcalcError::insufficient("volatility", 1, 2);
        assert_eq!(
            err.to_string(),
            "insufficient data for volatility: have 1 observations, need 2"
        );
    }

    #[test]
    fn config_missing_message() {
        let err = RiskcalcError::ConfigMissing {
            section: "risk".into(),
            key: "confidence_level".into(),
        };
        assert_eq!(err.to_string(), "missing config key [risk] confidence_level");
        assert_eq!(err.kind(), "ConfigMissingError");
    }
}
