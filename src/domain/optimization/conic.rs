//! Optimization problems over the weight vector, handed to Clarabel.
//!
//! Every problem is minimize ½xᵀPx + qᵀx over compiled [`LinearRow`]s and an
//! optional norm bound ‖Gx‖ <= t, which becomes a second-order cone.

use super::SolverSettings;
use super::constraints::LinearRow;
use crate::domain::error::RiskcalcError;
use clarabel::algebra::*;
use clarabel::solver::*;
use nalgebra::DMatrix;
use tracing::debug;

/// ‖factor · x‖ <= bound.
pub struct NormBound<'a> {
    pub factor: &'a DMatrix<f64>,
    pub bound: f64,
}

pub struct ConicProblem<'a> {
    /// Quadratic term, `None` for a linear objective. Only the upper triangle
    /// is read.
    pub quadratic: Option<&'a DMatrix<f64>>,
    pub linear: &'a [f64],
    pub rows: &'a [LinearRow],
    pub norm_bound: Option<NormBound<'a>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConicSolution {
    pub x: Vec<f64>,
    pub iterations: usize,
}

pub fn solve(
    problem: &ConicProblem<'_>,
    settings: &SolverSettings,
) -> Result<ConicSolution, RiskcalcError> {
    let n = problem.linear.len();

    let p = match problem.quadratic {
        Some(quadratic) => csc(n, n, |i, j| if i <= j { quadratic[(i, j)] } else { 0.0 }),
        None => csc(n, n, |_, _| 0.0),
    };

    // Ax + s = b with s in the zero cone (equalities), then the nonnegative
    // cone (a·x <= u and -a·x <= -l), then the second-order cone.
    let mut equalities: Vec<(Vec<f64>, f64)> = Vec::new();
    let mut inequalities: Vec<(Vec<f64>, f64)> = Vec::new();
    for row in problem.rows {
        if row.is_equality() {
            equalities.push((row.coefficients.clone(), row.lower));
            continue;
        }
        if row.upper.is_finite() {
            inequalities.push((row.coefficients.clone(), row.upper));
        }
        if row.lower.is_finite() {
            inequalities.push((row.coefficients.iter().map(|a| -a).collect(), -row.lower));
        }
    }
    let mut cone_rows: Vec<(Vec<f64>, f64)> = Vec::new();
    if let Some(bound) = &problem.norm_bound {
        cone_rows.push((vec![0.0; n], bound.bound));
        for k in 0..bound.factor.nrows() {
            let row = (0..n).map(|j| -bound.factor[(k, j)]).collect();
            cone_rows.push((row, 0.0));
        }
    }

    let mut cones = Vec::new();
    if !equalities.is_empty() {
        cones.push(ZeroConeT(equalities.len()));
    }
    if !inequalities.is_empty() {
        cones.push(NonnegativeConeT(inequalities.len()));
    }
    if !cone_rows.is_empty() {
        cones.push(SecondOrderConeT(cone_rows.len()));
    }
    let stacked: Vec<(Vec<f64>, f64)> = equalities
        .into_iter()
        .chain(inequalities)
        .chain(cone_rows)
        .collect();
    let a = csc(stacked.len(), n, |i, j| stacked[i].0[j]);
    let b: Vec<f64> = stacked.iter().map(|(_, rhs)| *rhs).collect();

    let solver_settings = DefaultSettingsBuilder::default()
        .max_iter(u32::try_from(settings.max_iterations).unwrap_or(u32::MAX))
        .tol_gap_abs(settings.tolerance)
        .tol_gap_rel(settings.tolerance)
        .tol_feas(settings.tolerance)
        .verbose(false)
        .build()
        .map_err(|e| RiskcalcError::invalid(format!("solver settings: {e}")))?;

    let mut solver = DefaultSolver::new(&p, problem.linear, &a, &b, &cones, solver_settings)
        .map_err(|e| RiskcalcError::invalid(format!("solver setup: {e:?}")))?;
    solver.solve();

    let solution = &solver.solution;
    let iterations = solution.iterations as usize;
    debug!(
        variables = n,
        rows = b.len(),
        status = ?solution.status,
        iterations,
        "conic solve finished"
    );

    match solution.status {
        SolverStatus::Solved | SolverStatus::AlmostSolved => Ok(ConicSolution {
            x: solution.x.clone(),
            iterations,
        }),
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
            Err(RiskcalcError::InfeasibleConstraints {
                reason: "no portfolio satisfies every constraint".into(),
            })
        }
        SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => Err(
            RiskcalcError::invalid("objective is unbounded under these constraints"),
        ),
        _ => Err(RiskcalcError::OptimizationDidNotConverge {
            iterations,
            residual: max_violation(problem.rows, &solution.x),
        }),
    }
}

/// Largest amount by which `x` breaks a row bound.
fn max_violation(rows: &[LinearRow], x: &[f64]) -> f64 {
    rows.iter()
        .map(|row| {
            let value = row.value(x);
            (row.lower - value).max(value - row.upper).max(0.0)
        })
        .fold(0.0, f64::max)
}

/// Column-compressed matrix of the nonzero `entry(i, j)`.
fn csc(rows: usize, cols: usize, entry: impl Fn(usize, usize) -> f64) -> CscMatrix<f64> {
    let mut colptr = Vec::with_capacity(cols + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);
    for j in 0..cols {
        for i in 0..rows {
            let v = entry(i, j);
            if v != 0.0 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr.push(nzval.len());
    }
    CscMatrix::new(rows, cols, colptr, rowval, nzval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn budget(n: usize) -> LinearRow {
        LinearRow {
            name: "budget".into(),
            coefficients: vec![1.0; n],
            lower: 1.0,
            upper: 1.0,
        }
    }

    fn long_only(n: usize) -> Vec<LinearRow> {
        (0..n)
            .map(|i| {
                let mut coefficients = vec![0.0; n];
                coefficients[i] = 1.0;
                LinearRow {
                    name: format!("w{i}"),
                    coefficients,
                    lower: 0.0,
                    upper: f64::INFINITY,
                }
            })
            .collect()
    }

    #[test]
    fn linear_program_picks_the_best_vertex() {
        let mut rows = long_only(3);
        rows.push(budget(3));
        let problem = ConicProblem {
            quadratic: None,
            linear: &[-0.05, -0.08, -0.02],
            rows: &rows,
            norm_bound: None,
        };
        let solution = solve(&problem, &SolverSettings::default()).unwrap();
        assert_relative_eq!(solution.x[1], 1.0, epsilon = 1e-6);
        assert!(solution.iterations > 0);
    }

    #[test]
    fn norm_bound_caps_the_position() {
        // maximize x0 subject to |2 x0| <= 1
        let factor = DMatrix::from_row_slice(1, 1, &[2.0]);
        let problem = ConicProblem {
            quadratic: None,
            linear: &[-1.0],
            rows: &[],
            norm_bound: Some(NormBound {
                factor: &factor,
                bound: 1.0,
            }),
        };
        let solution = solve(&problem, &SolverSettings::default()).unwrap();
        assert_relative_eq!(solution.x[0], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn contradictory_rows_are_infeasible() {
        let rows = vec![
            LinearRow {
                name: "low".into(),
                coefficients: vec![1.0, 1.0],
                lower: 2.0,
                upper: f64::INFINITY,
            },
            budget(2),
        ];
        let problem = ConicProblem {
            quadratic: None,
            linear: &[0.0, 0.0],
            rows: &rows,
            norm_bound: None,
        };
        let err = solve(&problem, &SolverSettings::default()).unwrap_err();
        assert!(matches!(err, RiskcalcError::InfeasibleConstraints { .. }));
    }

    #[test]
    fn unbounded_objective_is_invalid_input() {
        let rows = vec![budget(2)];
        let problem = ConicProblem {
            quadratic: None,
            linear: &[-1.0, 0.0],
            rows: &rows,
            norm_bound: None,
        };
        let err = solve(&problem, &SolverSettings::default()).unwrap_err();
        assert!(matches!(err, RiskcalcError::InvalidInput { .. }));
    }

    #[test]
    fn compressed_columns_skip_zeros() {
        let m = csc(2, 2, |i, j| if i == j { 1.0 } else { 0.0 });
        assert_eq!(m.colptr, vec![0, 1, 2]);
        assert_eq!(m.rowval, vec![0, 1]);
    }
}
