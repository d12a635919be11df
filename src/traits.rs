use anyhow::Result;
use sparsetools::coo::Coo;
use sparsetools::csc::CSC;
use sparsetools::csr::CSR;

pub trait LinearSolver {
    fn solve(&self, a_mat: CSC<usize, f64>, b: &[f64]) -> Result<Vec<f64>>;
}

impl<S: spsolve::Solver<usize, f64>> LinearSolver for S {
    fn solve(&self, a_mat: CSC<usize, f64>, b: &[f64]) -> Result<Vec<f64>> {
        let mut x = b.to_vec();
        spsolve::Solver::solve(
            self,
            a_mat.cols(),
            a_mat.rowidx(),
            a_mat.colptr(),
            a_mat.values(),
            &mut x,
            false,
        )?;
        Ok(x)
    }
}

pub trait ObjectiveFunction {
    /// Evaluates the objective function and its gradient for a given
    /// value of `x`.
    fn f(&self, x: &[f64]) -> (f64, Vec<f64>);
}

/// Values and Jacobians of the nonlinear constraints. Jacobian rows are
/// constraints and columns are variables.
pub struct Constraints {
    pub h: Vec<f64>,
    pub g: Vec<f64>,
    pub dh: CSR<usize, f64>,
    pub dg: CSR<usize, f64>,
}

pub trait NonlinearConstraint {
    /// Evaluates the inequality constraints `h(x) <= 0`, the equality
    /// constraints `g(x) = 0` and their Jacobians.
    fn gh(&self, x: &[f64]) -> Result<Constraints>;

    /// Computes the Hessian of the Lagrangian for given values of `x`,
    /// `lam` and `mu`, where `lam` and `mu` are the multipliers on the
    /// equality and inequality constraints, `g` and `h`, respectively.
    /// The objective term is scaled by `cost_mult`. Duplicate entries
    /// are summed.
    fn hess(&self, x: &[f64], lam: &[f64], mu: &[f64], cost_mult: f64) -> Result<Coo<usize, f64>>;
}

/// Switches variables between free and fixed-at-limit between iterations.
pub trait BoundControl {
    /// Called after each step with the gradient of the Lagrangian.
    /// May move `x` onto a limit and update the `fixed` mask.
    /// Returns the number of variables switched.
    fn update(&mut self, x: &mut [f64], l_x: &[f64], fixed: &mut [bool]) -> usize;
}

/// Called on each iteration of the solver with the current iteration
/// number, feasibility condition, gradient condition, complementarity
/// condition, cost condition, barrier coefficient, step size, objective
/// function value and trust radius.
pub trait ProgressMonitor {
    fn update(
        &self,
        i: usize,
        feas_cond: f64,
        grad_cond: f64,
        comp_cond: f64,
        cost_cond: f64,
        gamma: f64,
        step_size: f64,
        obj: f64,
        radius: f64,
    );
}
