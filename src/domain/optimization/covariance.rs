//! Covariance validation and estimation of optimizer inputs from history.

use crate::domain::error::RiskcalcError;
use crate::domain::series::ReturnSeries;
use crate::domain::stats;
use nalgebra::{DMatrix, SymmetricEigen};

/// Relative tolerance for symmetry and for negative eigenvalues.
const PSD_TOLERANCE: f64 = 1e-10;

/// Checks that `cov` is an n×n finite, symmetric, positive semi-definite matrix.
pub fn validate_covariance(cov: &DMatrix<f64>, n: usize) -> Result<(), RiskcalcError> {
    let invalid = |reason: String| RiskcalcError::InvalidCovariance { reason };

    if !cov.is_square() {
        return Err(invalid(format!(
            "matrix is {}x{}, not square",
            cov.nrows(),
            cov.ncols()
        )));
    }
    if cov.nrows() != n {
        return Err(invalid(format!(
            "dimension {} does not match {n} expected returns",
            cov.nrows()
        )));
    }
    if cov.iter().any(|v| !v.is_finite()) {
        return Err(invalid("matrix has non-finite entries".into()));
    }

    let scale = cov.amax().max(1.0);
    for i in 0..n {
        for j in (i + 1)..n {
            if (cov[(i, j)] - cov[(j, i)]).abs() > PSD_TOLERANCE * scale {
                return Err(invalid(format!("entry ({i}, {j}) differs from ({j}, {i})")));
            }
        }
    }

    let eigen = SymmetricEigen::new(cov.clone());
    let min_eig = eigen.eigenvalues.min();
    if min_eig < -PSD_TOLERANCE * scale {
        return Err(invalid(format!(
            "matrix is not positive semi-definite (min eigenvalue {min_eig:e})"
        )));
    }
    Ok(())
}

/// G with GᵀG = cov, so that ‖Gw‖ is the volatility of weights w.
///
/// Built from the eigen decomposition rather than Cholesky so that singular
/// covariances still factor; tiny negative eigenvalues are clipped to zero.
pub fn covariance_factor(cov: &DMatrix<f64>) -> DMatrix<f64> {
    let eigen = SymmetricEigen::new(cov.clone());
    let n = cov.nrows();
    DMatrix::from_fn(n, n, |k, j| {
        eigen.eigenvalues[k].max(0.0).sqrt() * eigen.eigenvectors[(j, k)]
    })
}

/// Sample covariance (n - 1) of equally long columns.
pub fn sample_covariance_matrix(columns: &[Vec<f64>]) -> Result<DMatrix<f64>, RiskcalcError> {
    let k = columns.len();
    let mut cov = DMatrix::zeros(k, k);
    for i in 0..k {
        for j in i..k {
            let c = stats::sample_covariance(&columns[i], &columns[j], "covariance matrix")?;
            cov[(i, j)] = c;
            cov[(j, i)] = c;
        }
    }
    Ok(cov)
}

/// Annualized expected returns and covariance estimated from aligned history.
///
/// Expected returns are the compounded growth rate over the window; the
/// covariance is the sample covariance scaled by the periods per year.
pub fn estimate_inputs(
    symbols: &[String],
    returns: &[ReturnSeries],
    periods_per_year: u32,
) -> Result<super::OptimizationInputs, RiskcalcError> {
    if symbols.len() != returns.len() {
        return Err(RiskcalcError::invalid(format!(
            "{} symbols but {} return series",
            symbols.len(),
            returns.len()
        )));
    }
    let Some(first) = returns.first() else {
        return Err(RiskcalcError::invalid("no return series to estimate from"));
    };
    if periods_per_year == 0 {
        return Err(RiskcalcError::invalid("periods_per_year must be positive"));
    }
    for (symbol, series) in symbols.iter().zip(returns).skip(1) {
        first.ensure_aligned(series, &format!("optimizer input {symbol}"))?;
    }

    let periods = f64::from(periods_per_year);
    let years = first.len() as f64 / periods;
    let expected_returns = returns
        .iter()
        .map(|r| {
            let convention = r.convention();
            let growth = convention.growth(r.total_return());
            if growth <= 0.0 {
                return Err(RiskcalcError::degenerate(
                    "cannot annualize a series that lost everything",
                ));
            }
            Ok(convention.from_growth(growth.powf(1.0 / years)))
        })
        .collect::<Result<Vec<_>, RiskcalcError>>()?;

    let columns: Vec<Vec<f64>> = returns.iter().map(ReturnSeries::values).collect();
    let covariance = sample_covariance_matrix(&columns)? * periods;

    Ok(super::OptimizationInputs {
        symbols: symbols.to_vec(),
        expected_returns,
        covariance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::ReturnConvention;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    #[test]
    fn accepts_psd_matrix() {
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.01, 0.01, 0.09]);
        assert!(validate_covariance(&cov, 2).is_ok());
    }

    #[test]
    fn accepts_singular_psd_matrix() {
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.04, 0.04, 0.04]);
        assert!(validate_covariance(&cov, 2).is_ok());
    }

    #[test]
    fn rejects_indefinite_matrix() {
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.10, 0.10, 0.04]);
        let err = validate_covariance(&cov, 2).unwrap_err();
        assert!(matches!(err, RiskcalcError::InvalidCovariance { .. }));
    }

    #[test]
    fn rejects_asymmetric_matrix() {
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.01, 0.02, 0.09]);
        assert!(matches!(
            validate_covariance(&cov, 2),
            Err(RiskcalcError::InvalidCovariance { .. })
        ));
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.01, 0.01, 0.09]);
        assert!(matches!(
            validate_covariance(&cov, 3),
            Err(RiskcalcError::InvalidCovariance { .. })
        ));
    }

    #[test]
    fn estimates_annualized_inputs() {
        let dates: Vec<NaiveDate> = (1..=4)
            .map(|d| NaiveDate::from_ymd_opt(2024, 5, d).unwrap())
            .collect();
        let a = ReturnSeries::from_pairs(ReturnConvention::Log, &dates, &[0.01, -0.01, 0.02, 0.0])
            .unwrap();
        let b = ReturnSeries::from_pairs(ReturnConvention::Log, &dates, &[0.0, 0.01, 0.01, 0.02])
            .unwrap();
        let inputs = estimate_inputs(&["A".into(), "B".into()], &[a.clone(), b], 252).unwrap();
        assert_relative_eq!(inputs.expected_returns[0], 0.005 * 252.0, epsilon = 1e-10);
        let var_a = stats::sample_variance(&a.values(), "t").unwrap() * 252.0;
        assert_relative_eq!(inputs.covariance[(0, 0)], var_a, epsilon = 1e-12);
        assert_eq!(inputs.covariance[(0, 1)], inputs.covariance[(1, 0)]);
    }

    #[test]
    fn factor_reproduces_singular_covariance() {
        // Perfectly correlated assets: rank one.
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.06, 0.06, 0.09]);
        let g = covariance_factor(&cov);
        let rebuilt = g.transpose() * &g;
        for (a, b) in rebuilt.iter().zip(cov.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }
}
