//! Implements a solver interface for Clarabel
//!
//! Clarabel solves `min 1/2 x'Px + q'x` subject to `Ax + s = b`, `s` in a product of cones.
//! Equalities (and fixed variables) go in a zero cone, everything else is written as
//! `a'x <= b` rows in a nonnegative cone. Maximization negates `q`.

use crate::optimize::objective::ObjectiveSense;
use crate::optimize::solvers::{Solver, SolverError, StagedProblem};
use crate::optimize::{OptimizationStatus, ProblemSolution};
use clarabel::algebra::CscMatrix;
use clarabel::solver::{DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT};

#[derive(Clone, Debug, Default)]
pub struct ClarabelSolver {
    staged: StagedProblem,
}

/// Rows of the constraint matrix, split by the cone they belong to
#[derive(Default)]
struct ConeRows {
    zero: Vec<(Vec<(usize, f64)>, f64)>,
    nonnegative: Vec<(Vec<(usize, f64)>, f64)>,
}

impl ConeRows {
    fn from_staged(staged: &StagedProblem) -> Self {
        let mut rows = ConeRows::default();
        for (row, equals) in &staged.equalities {
            rows.zero.push((row.clone(), *equals));
        }
        for (row, lower, upper) in &staged.inequalities {
            rows.push_range(row, *lower, *upper);
        }
        for (index, (lower, upper)) in staged.variables.iter().enumerate() {
            rows.push_range(&[(index, 1.)], *lower, *upper);
        }
        rows
    }

    fn push_range(&mut self, row: &[(usize, f64)], lower: f64, upper: f64) {
        if lower == upper {
            self.zero.push((row.to_vec(), lower));
            return;
        }
        if upper.is_finite() {
            self.nonnegative.push((row.to_vec(), upper));
        }
        if lower.is_finite() {
            let negated = row.iter().map(|(var, coef)| (*var, -coef)).collect();
            self.nonnegative.push((negated, -lower));
        }
    }

    /// Assemble A (compressed sparse column) and b
    fn assemble(&self, num_variables: usize) -> (CscMatrix<f64>, Vec<f64>) {
        let all_rows: Vec<&(Vec<(usize, f64)>, f64)> =
            self.zero.iter().chain(self.nonnegative.iter()).collect();
        let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); num_variables];
        for (row_index, (row, _)) in all_rows.iter().enumerate() {
            for (var, coef) in row {
                columns[*var].push((row_index, *coef));
            }
        }
        let mut colptr = Vec::with_capacity(num_variables + 1);
        let mut rowval = Vec::new();
        let mut nzval = Vec::new();
        colptr.push(0);
        for column in columns {
            for (row_index, coef) in column {
                rowval.push(row_index);
                nzval.push(coef);
            }
            colptr.push(rowval.len());
        }
        let b = all_rows.iter().map(|(_, rhs)| *rhs).collect();
        (
            CscMatrix::new(all_rows.len(), num_variables, colptr, rowval, nzval),
            b,
        )
    }
}

impl Solver for ClarabelSolver {
    fn staged(&mut self) -> &mut StagedProblem {
        &mut self.staged
    }

    fn solve(&mut self) -> Result<ProblemSolution, SolverError> {
        let staged = &self.staged;
        let n = staged.variables.len();
        let sign = match staged.sense {
            ObjectiveSense::Minimize => 1.,
            ObjectiveSense::Maximize => -1.,
        };
        let q: Vec<f64> = staged.objective.iter().map(|coef| sign * coef).collect();
        let p = CscMatrix::new(n, n, vec![0; n + 1], Vec::new(), Vec::new());

        let rows = ConeRows::from_staged(staged);
        let (a, b) = rows.assemble(n);
        let mut cones = Vec::new();
        if !rows.zero.is_empty() {
            cones.push(SupportedConeT::ZeroConeT(rows.zero.len()));
        }
        if !rows.nonnegative.is_empty() {
            cones.push(SupportedConeT::NonnegativeConeT(rows.nonnegative.len()));
        }

        let settings = DefaultSettingsBuilder::default()
            .verbose(false)
            .build()
            .map_err(|err| SolverError::Setup(err.to_string()))?;
        let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings);
        solver.solve();

        let status = match solver.solution.status {
            SolverStatus::Solved => OptimizationStatus::Optimal,
            SolverStatus::AlmostSolved => OptimizationStatus::AlmostOptimal,
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                OptimizationStatus::Infeasible
            }
            SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
                OptimizationStatus::Unbounded
            }
            SolverStatus::NumericalError => OptimizationStatus::NumericalError,
            _ => OptimizationStatus::SolverHalted,
        };
        match status {
            OptimizationStatus::Optimal | OptimizationStatus::AlmostOptimal => Ok(ProblemSolution {
                status,
                objective_value: Some(sign * solver.solution.obj_val),
                variable_values: Some(solver.solution.x.clone()),
            }),
            _ => Ok(ProblemSolution::without_values(status)),
        }
    }
}
