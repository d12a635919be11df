use sparsetools::coo::Coo;
use sparsetools::csr::CSR;

use crate::debug::format_f64_vec;
use crate::error::Result;
use crate::jac::check_structure;
use crate::math::{dot, max, norm, norm_inf};
use crate::traits::{
    BoundControl, Constraints, LinearSolver, NonlinearConstraint, ObjectiveFunction,
    ProgressMonitor,
};

/// Reason a solve stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Converged,
    MaxIterations,
    /// The Newton system could not be solved.
    SingularJacobian,
    /// The trust region radius fell below its minimum.
    TrustRegionCollapsed,
    /// A step length below the minimum or a non-finite value.
    NumericalFailure,
    /// Nothing to solve: the case has no energized buses.
    Degenerate,
}

/// Interior point method options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Termination tolerance on the feasibility, gradient and
    /// complementarity conditions.
    pub tolerance: f64,
    pub max_iterations: usize,
    pub trust_radius: f64,
    pub trust_radius_min: f64,
    pub trust_radius_max: f64,
    pub trust_shrink: f64,
    pub xi: f64,
    pub sigma: f64,
    pub z0: f64,
    pub alpha_min: f64,
    /// Scale factor for the objective function.
    pub cost_mult: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 150,
            trust_radius: 1.0,
            trust_radius_min: 1e-8,
            trust_radius_max: 1e3,
            trust_shrink: 0.5,
            xi: 0.99995,
            sigma: 0.1,
            z0: 1.0,
            alpha_min: 1e-8,
            cost_mult: 1.0,
        }
    }
}

/// Final state of an interior point solve. Multipliers are unscaled.
#[derive(Debug, Clone)]
pub struct Solution {
    pub x: Vec<f64>,
    /// Objective function value.
    pub f: f64,
    pub converged: bool,
    pub status: Status,
    pub iterations: usize,
    /// Multipliers on the equality constraints.
    pub lam: Vec<f64>,
    /// Multipliers on the nonlinear inequality constraints.
    pub mu: Vec<f64>,
    /// Multipliers on the variable bounds. Zero for unbounded and fixed
    /// variables.
    pub mu_lower: Vec<f64>,
    pub mu_upper: Vec<f64>,
    /// Gradient of the Lagrangian. Non-zero entries at fixed variables
    /// give the multipliers of the fixing constraints.
    pub lx: Vec<f64>,
    pub fixed: Vec<bool>,
    pub feas_cond: f64,
    pub grad_cond: f64,
    pub comp_cond: f64,
}

impl Solution {
    /// Largest of the termination conditions.
    pub fn error(&self) -> f64 {
        self.feas_cond.max(self.grad_cond).max(self.comp_cond)
    }
}

// Finite variable bounds handled as linear inequality rows after the
// nonlinear ones: `xmin - x <= 0` then `x - xmax <= 0`.
struct BoundRows {
    lower: Vec<usize>,
    upper: Vec<usize>,
    xmin: Vec<f64>,
    xmax: Vec<f64>,
}

impl BoundRows {
    fn len(&self) -> usize {
        self.lower.len() + self.upper.len()
    }
}

struct Eval {
    f: f64,
    df: Vec<f64>,
    c: Constraints,
    /// Nonlinear then bound inequality values.
    h: Vec<f64>,
}

fn evaluate<P>(problem: &P, x: &[f64], bounds: &BoundRows, cost_mult: f64) -> Result<Eval>
where
    P: ObjectiveFunction + NonlinearConstraint,
{
    let (f, df) = problem.f(x);
    let c = problem.gh(x)?;

    let mut h = Vec::with_capacity(c.h.len() + bounds.len());
    h.extend_from_slice(&c.h);
    h.extend(bounds.lower.iter().map(|&i| bounds.xmin[i] - x[i]));
    h.extend(bounds.upper.iter().map(|&i| x[i] - bounds.xmax[i]));

    Ok(Eval {
        f: f * cost_mult,
        df: df.iter().map(|d| d * cost_mult).collect(),
        c,
        h,
    })
}

fn row(a: &CSR<usize, f64>, k: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
    let (start, end) = (a.rowptr()[k], a.rowptr()[k + 1]);
    a.colidx()[start..end]
        .iter()
        .copied()
        .zip(a.values()[start..end].iter().copied())
}

// out += a' * y
fn add_t_mul(a: &CSR<usize, f64>, y: &[f64], out: &mut [f64]) {
    for (k, &yk) in y.iter().enumerate() {
        if yk != 0.0 {
            for (j, v) in row(a, k) {
                out[j] += v * yk;
            }
        }
    }
}

fn grad_lagrangian(ev: &Eval, lam: &[f64], mu: &[f64], bounds: &BoundRows) -> Vec<f64> {
    let nl = ev.c.h.len();
    let nlow = bounds.lower.len();
    let mut lx = ev.df.clone();
    add_t_mul(&ev.c.dg, lam, &mut lx);
    add_t_mul(&ev.c.dh, &mu[..nl], &mut lx);
    for (k, &i) in bounds.lower.iter().enumerate() {
        lx[i] -= mu[nl + k];
    }
    for (k, &i) in bounds.upper.iter().enumerate() {
        lx[i] += mu[nl + nlow + k];
    }
    lx
}

fn conditions(
    ev: &Eval,
    x: &[f64],
    z: &[f64],
    lam: &[f64],
    mu: &[f64],
    lx: &[f64],
    fixed: &[bool],
) -> (f64, f64, f64) {
    let norm_g = norm_inf(&ev.c.g);
    let infeas = match max(&ev.h) {
        Some(maxh) => norm_g.max(maxh),
        None => norm_g,
    };
    let feas_cond = infeas / (1.0 + norm_inf(x).max(norm_inf(z)));

    let lx_free: Vec<f64> = lx
        .iter()
        .zip(fixed)
        .filter(|(_, &fx)| !fx)
        .map(|(l, _)| *l)
        .collect();
    let grad_cond = norm_inf(&lx_free) / (1.0 + norm_inf(lam).max(norm_inf(mu)));

    let comp_cond = dot(z, mu) / (1.0 + norm_inf(x));

    (feas_cond, grad_cond, comp_cond)
}

// Step length that keeps `v + alpha * dv` strictly positive.
fn max_step(v: &[f64], dv: &[f64], xi: f64) -> f64 {
    let ratio = v
        .iter()
        .zip(dv)
        .filter(|(_, &d)| d < 0.0)
        .map(|(&v, &d)| -v / d)
        .fold(f64::INFINITY, f64::min);
    (xi * ratio).min(1.0)
}

/// Primal-dual interior point method for NLP (nonlinear programming).
/// Minimize a function `f(x)` beginning from a starting point `x0`,
/// subject to nonlinear equality `g(x) = 0` and inequality `h(x) <= 0`
/// constraints, and variable bounds `xmin <= x <= xmax`. Variables with
/// `xmin == xmax` are held fixed.
///
/// The Newton step is limited to a trust region whose radius grows when a
/// truncated step reduces infeasibility and shrinks when infeasibility
/// increases. The barrier parameter never increases.
///
/// Numerical breakdowns are reported through `Solution::status`. Only
/// errors raised by the problem callbacks give `Err`.
pub fn nlp<P>(
    problem: &P,
    x0: &[f64],
    xmin: &[f64],
    xmax: &[f64],
    mut bound_control: Option<&mut dyn BoundControl>,
    lin_solver: &dyn LinearSolver,
    opt: &Options,
    progress: Option<&dyn ProgressMonitor>,
) -> Result<Solution>
where
    P: ObjectiveFunction + NonlinearConstraint,
{
    // numerical noise in the feasibility condition is not allowed to
    // shrink the trust region
    const FEAS_NOISE: f64 = 1e-10;
    const MU_THRESHOLD: f64 = 1e-5;

    let nx = x0.len();
    let cost_mult = opt.cost_mult;

    let mut fixed: Vec<bool> = (0..nx)
        .map(|i| {
            xmin[i].is_finite()
                && xmax[i].is_finite()
                && (xmax[i] - xmin[i]).abs() <= 1e-12 * (1.0 + xmin[i].abs())
        })
        .collect();
    let mut x: Vec<f64> = (0..nx)
        .map(|i| {
            if fixed[i] {
                xmin[i]
            } else {
                x0[i].max(xmin[i]).min(xmax[i])
            }
        })
        .collect();

    let bounds = BoundRows {
        lower: (0..nx)
            .filter(|&i| !fixed[i] && xmin[i].is_finite())
            .collect(),
        upper: (0..nx)
            .filter(|&i| !fixed[i] && xmax[i].is_finite())
            .collect(),
        xmin: xmin.to_vec(),
        xmax: xmax.to_vec(),
    };

    let mut ev = evaluate(problem, &x, &bounds, cost_mult)?;
    let nl = ev.c.h.len();
    let neq = ev.c.g.len();
    let niq = ev.h.len();

    // initialize gamma, lam, mu, z
    let mut gamma = 1.0;
    let mut lam = vec![0.0; neq];
    let mut z: Vec<f64> = ev
        .h
        .iter()
        .map(|&h| if h < -opt.z0 { -h } else { opt.z0 })
        .collect();
    let mut mu: Vec<f64> = ev
        .h
        .iter()
        .zip(&z)
        .map(|(&h, &z)| if h < -opt.z0 { gamma / z } else { opt.z0 })
        .collect();
    let mut radius = opt.trust_radius;

    let mut lx = grad_lagrangian(&ev, &lam, &mu, &bounds);
    let (mut feas_cond, mut grad_cond, mut comp_cond) =
        conditions(&ev, &x, &z, &lam, &mu, &lx, &fixed);
    let mut f0 = ev.f;

    log::debug!(
        "nlp: {} variables ({} fixed), {} equality, {} inequality constraints",
        nx,
        fixed.iter().filter(|&&f| f).count(),
        neq,
        niq
    );

    if let Some(pm) = progress {
        pm.update(0, feas_cond, grad_cond, comp_cond, 0.0, gamma, 0.0, ev.f / cost_mult, radius);
    }

    let tol = opt.tolerance;
    let mut i = 0;
    let mut status = Status::MaxIterations;
    let mut converged = feas_cond < tol && grad_cond < tol && comp_cond < tol;
    if converged {
        status = Status::Converged;
    }

    while !converged && i < opt.max_iterations {
        i += 1;

        // compute update step
        let lxx = problem.hess(&x, &lam, &mu[..nl], cost_mult)?;

        let n = nx + neq;
        let mut kkt = Coo::with_capacity(n, n, lxx.nnz() + 2 * ev.c.dg.nnz() + 4 * ev.c.dh.nnz() + nx);
        for ((&r, &c), &v) in lxx.rowidx().iter().zip(lxx.colidx()).zip(lxx.values()) {
            if !fixed[r] && !fixed[c] {
                kkt.push(r, c, v);
            }
        }

        // M = Lxx + dh * Z^-1 * Mu * dh'
        // N = Lx + dh * Z^-1 * (Mu * h + gamma * e)
        let mut nv = lx.clone();
        for k in 0..nl {
            let w = mu[k] / z[k];
            let u = (mu[k] * ev.h[k] + gamma) / z[k];
            let entries: Vec<(usize, f64)> = row(&ev.c.dh, k).filter(|(j, _)| !fixed[*j]).collect();
            for &(a, va) in &entries {
                nv[a] += u * va;
                for &(b, vb) in &entries {
                    kkt.push(a, b, w * va * vb);
                }
            }
        }
        for (k, &j) in bounds.lower.iter().enumerate() {
            let m = nl + k;
            kkt.push(j, j, mu[m] / z[m]);
            nv[j] -= (mu[m] * ev.h[m] + gamma) / z[m];
        }
        for (k, &j) in bounds.upper.iter().enumerate() {
            let m = nl + bounds.lower.len() + k;
            kkt.push(j, j, mu[m] / z[m]);
            nv[j] += (mu[m] * ev.h[m] + gamma) / z[m];
        }
        for r in 0..neq {
            for (c, v) in row(&ev.c.dg, r) {
                if !fixed[c] {
                    kkt.push(nx + r, c, v);
                    kkt.push(c, nx + r, v);
                }
            }
        }
        for j in 0..nx {
            if fixed[j] {
                kkt.push(j, j, 1.0);
                nv[j] = 0.0;
            }
        }

        let kkt = kkt.to_csc();
        if let Err(err) = check_structure(&kkt) {
            log::warn!("nlp: Newton system is singular at iteration {}: {}", i, err);
            status = Status::SingularJacobian;
            break;
        }

        let rhs: Vec<f64> = nv.iter().chain(&ev.c.g).map(|v| -v).collect();
        let sol = match lin_solver.solve(kkt, &rhs) {
            Ok(sol) if sol.iter().all(|v| v.is_finite()) => sol,
            Ok(_) => {
                log::warn!("nlp: non-finite Newton step at iteration {}", i);
                status = Status::SingularJacobian;
                break;
            }
            Err(err) => {
                log::warn!("nlp: Newton system not solved at iteration {}: {}", i, err);
                status = Status::SingularJacobian;
                break;
            }
        };
        let mut dx = sol[..nx].to_vec();
        let mut dlam = sol[nx..].to_vec();

        // dz = -h - z - dh' * dx
        let mut dz: Vec<f64> = (0..niq).map(|k| -ev.h[k] - z[k]).collect();
        for (k, dz) in dz.iter_mut().enumerate().take(nl) {
            *dz -= row(&ev.c.dh, k).map(|(j, v)| v * dx[j]).sum::<f64>();
        }
        for (k, &j) in bounds.lower.iter().enumerate() {
            dz[nl + k] += dx[j];
        }
        for (k, &j) in bounds.upper.iter().enumerate() {
            dz[nl + bounds.lower.len() + k] -= dx[j];
        }
        // dmu = -mu + Z^-1 * (gamma * e - Mu * dz)
        let mut dmu: Vec<f64> = (0..niq)
            .map(|k| -mu[k] + (gamma - mu[k] * dz[k]) / z[k])
            .collect();

        // trust region
        let step = norm(&dx);
        let truncated = step > radius;
        if truncated {
            let s = radius / step;
            for v in dx.iter_mut().chain(dlam.iter_mut()).chain(dz.iter_mut()).chain(dmu.iter_mut()) {
                *v *= s;
            }
        }

        // do the update
        let alphap = max_step(&z, &dz, opt.xi);
        let alphad = max_step(&mu, &dmu, opt.xi);
        if !(alphap >= opt.alpha_min && alphad >= opt.alpha_min) {
            log::warn!(
                "nlp: step length too small at iteration {} (primal {}, dual {})",
                i,
                alphap,
                alphad
            );
            status = Status::NumericalFailure;
            break;
        }
        for j in 0..nx {
            x[j] += alphap * dx[j];
        }
        for k in 0..niq {
            z[k] += alphap * dz[k];
            mu[k] += alphad * dmu[k];
        }
        for k in 0..neq {
            lam[k] += alphad * dlam[k];
        }
        if niq > 0 {
            gamma = gamma.min(opt.sigma * dot(&z, &mu) / niq as f64);
        }

        ev = evaluate(problem, &x, &bounds, cost_mult)?;
        lx = grad_lagrangian(&ev, &lam, &mu, &bounds);

        let mut switched = 0;
        if let Some(bc) = bound_control.as_mut() {
            switched = bc.update(&mut x, &lx, &mut fixed);
            if switched > 0 {
                log::debug!("nlp: {} variables switched at iteration {}", switched, i);
                ev = evaluate(problem, &x, &bounds, cost_mult)?;
                lx = grad_lagrangian(&ev, &lam, &mu, &bounds);
            }
        }

        let feas_old = feas_cond;
        (feas_cond, grad_cond, comp_cond) = conditions(&ev, &x, &z, &lam, &mu, &lx, &fixed);
        let cost_cond = (ev.f - f0).abs() / (1.0 + f0.abs());
        f0 = ev.f;

        if let Some(pm) = progress {
            pm.update(
                i,
                feas_cond,
                grad_cond,
                comp_cond,
                cost_cond,
                gamma,
                alphap * norm(&dx),
                ev.f / cost_mult,
                radius,
            );
        }

        if !(ev.f.is_finite() && feas_cond.is_finite() && grad_cond.is_finite() && comp_cond.is_finite())
        {
            log::warn!("nlp: numerically failed at iteration {}", i);
            status = Status::NumericalFailure;
            break;
        }

        if switched == 0 && feas_cond < tol && grad_cond < tol && comp_cond < tol {
            converged = true;
            status = Status::Converged;
            break;
        }

        if feas_cond < feas_old && truncated {
            radius = (2.0 * radius).min(opt.trust_radius_max);
        } else if feas_cond > feas_old && feas_cond > FEAS_NOISE {
            radius *= opt.trust_shrink;
            if radius < opt.trust_radius_min {
                log::warn!("nlp: trust region collapsed at iteration {}", i);
                status = Status::TrustRegionCollapsed;
                break;
            }
        }
    }

    if converged {
        log::info!("Converged in {} iterations.", i);
        // zero out multipliers on non-binding constraints
        for k in 0..niq {
            if ev.h[k] < -tol && mu[k] < MU_THRESHOLD {
                mu[k] = 0.0;
            }
        }
    } else {
        log::info!("Did not converge in {} iterations ({:?}).", i, status);
    }

    // undo the objective scaling
    let unscale = |v: &mut Vec<f64>| v.iter_mut().for_each(|v| *v /= cost_mult);
    unscale(&mut lam);
    unscale(&mut mu);
    unscale(&mut lx);

    let mut mu_lower = vec![0.0; nx];
    let mut mu_upper = vec![0.0; nx];
    for (k, &j) in bounds.lower.iter().enumerate() {
        mu_lower[j] = mu[nl + k];
    }
    for (k, &j) in bounds.upper.iter().enumerate() {
        mu_upper[j] = mu[nl + bounds.lower.len() + k];
    }
    mu.truncate(nl);
    log::trace!("x: {}", format_f64_vec(&x));

    Ok(Solution {
        x,
        f: ev.f / cost_mult,
        converged,
        status,
        iterations: i,
        lam,
        mu,
        mu_lower,
        mu_upper,
        lx,
        fixed,
        feas_cond,
        grad_cond,
        comp_cond,
    })
}
