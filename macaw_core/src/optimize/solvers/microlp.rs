//! Solver interface for the microlp simplex solver

use crate::optimize::objective::ObjectiveSense;
use crate::optimize::solvers::{Solver, SolverError, StagedProblem};
use crate::optimize::{OptimizationStatus, ProblemSolution};
use microlp::{ComparisonOp, LinearExpr, OptimizationDirection};

#[derive(Clone, Debug, Default)]
pub struct MicroLpSolver {
    staged: StagedProblem,
}

fn expression(row: &[(usize, f64)], variables: &[microlp::Variable]) -> LinearExpr {
    let mut expr = LinearExpr::empty();
    for (index, coef) in row {
        expr.add(variables[*index], *coef);
    }
    expr
}

impl Solver for MicroLpSolver {
    fn staged(&mut self) -> &mut StagedProblem {
        &mut self.staged
    }

    fn solve(&mut self) -> Result<ProblemSolution, SolverError> {
        let staged = &self.staged;
        let direction = match staged.sense {
            ObjectiveSense::Minimize => OptimizationDirection::Minimize,
            ObjectiveSense::Maximize => OptimizationDirection::Maximize,
        };
        let mut problem = microlp::Problem::new(direction);
        let variables: Vec<microlp::Variable> = staged
            .variables
            .iter()
            .zip(&staged.objective)
            .map(|(bounds, coef)| problem.add_var(*coef, *bounds))
            .collect();

        for (row, equals) in &staged.equalities {
            if row.is_empty() {
                if *equals != 0. {
                    return Ok(ProblemSolution::without_values(OptimizationStatus::Infeasible));
                }
                continue;
            }
            problem.add_constraint(expression(row, &variables), ComparisonOp::Eq, *equals);
        }
        for (row, lower, upper) in &staged.inequalities {
            if row.is_empty() {
                if *lower > 0. || *upper < 0. {
                    return Ok(ProblemSolution::without_values(OptimizationStatus::Infeasible));
                }
                continue;
            }
            if lower == upper {
                problem.add_constraint(expression(row, &variables), ComparisonOp::Eq, *lower);
                continue;
            }
            if lower.is_finite() {
                problem.add_constraint(expression(row, &variables), ComparisonOp::Ge, *lower);
            }
            if upper.is_finite() {
                problem.add_constraint(expression(row, &variables), ComparisonOp::Le, *upper);
            }
        }

        match problem.solve() {
            Ok(solution) => Ok(ProblemSolution {
                status: OptimizationStatus::Optimal,
                objective_value: Some(solution.objective()),
                variable_values: Some(variables.iter().map(|var| *solution.var_value(*var)).collect()),
            }),
            Err(microlp::Error::Infeasible) => {
                Ok(ProblemSolution::without_values(OptimizationStatus::Infeasible))
            }
            Err(microlp::Error::Unbounded) => {
                Ok(ProblemSolution::without_values(OptimizationStatus::Unbounded))
            }
            Err(microlp::Error::InternalError(message)) => Err(SolverError::Backend(message)),
        }
    }
}
