use num_complex::Complex64;
use sparsetools::csr::CSR;

use crate::debug::format_polar_vec;
use crate::error::{Error, Result};
use crate::jac::{make_jac, ConverterState, PfLayout};
use crate::math::norm_inf;
use crate::mpopt::PFConfig;
use crate::network::Network;
use crate::sbus::SBus;
use crate::traits::LinearSolver;

pub trait NewtonProgress {
    fn update(&self, i: usize, norm_f: f64);
}

/// State reached by a Newton power flow run.
#[derive(Debug, Clone)]
pub struct NewtonSolution {
    pub v: Vec<Complex64>,
    pub conv: Vec<ConverterState>,
    pub converged: bool,
    pub iterations: usize,
    pub norm_f: f64,
}

/// Solves power flow using full Newton's method (power/polar) over the
/// AC and DC buses and converters in `layout`.
///
/// Returns `SingularJacobian` if the Jacobian is structurally singular,
/// the linear solver fails or the update is not finite.
pub(crate) fn newtonpf(
    net: &Network,
    layout: &PfLayout,
    y_bus: &CSR<usize, Complex64>,
    s_bus: &dyn SBus,
    v0: &[Complex64],
    conv0: &[ConverterState],
    lin_solver: &dyn LinearSolver,
    config: &PFConfig,
    progress: Option<&dyn NewtonProgress>,
) -> Result<NewtonSolution> {
    let tol = config.tolerance;
    let max_it = config.max_iterations;

    let mut converged = false;
    let mut i = 0;
    let mut v = v0.to_vec();
    let mut conv = conv0.to_vec();
    let mut va: Vec<f64> = v.iter().map(|v| v.arg()).collect();
    let mut vm: Vec<f64> = v.iter().map(|v| v.norm()).collect();

    log::debug!("V0: {}", format_polar_vec(&v));

    // evaluate F(x0)
    let mut f = layout.mismatch(net, y_bus, s_bus, &v, &conv);

    // check tolerance
    let mut norm_f = norm_inf(&f);
    if let Some(pm) = progress {
        pm.update(i, norm_f);
    }
    if norm_f < tol {
        converged = true;
        log::info!("Newton's method power flow converged at the initial point.");
    }

    // do Newton iterations
    while !converged && i < max_it {
        i += 1;

        let jac = make_jac(net, layout, y_bus, s_bus, &v, &conv)?;

        let neg_f: Vec<f64> = f.iter().map(|f| -f).collect();
        let dx = lin_solver
            .solve(jac, &neg_f)
            .map_err(|err| Error::SingularJacobian(err.to_string()))?;
        if dx.iter().any(|d| !d.is_finite()) {
            return Err(Error::SingularJacobian(format!(
                "non-finite update at iteration {}",
                i
            )));
        }

        layout.update(&dx, &mut va, &mut vm, &mut conv);

        // update Vm and Va again in case we wrapped around with a negative Vm
        v = vm
            .iter()
            .zip(&va)
            .map(|(&vm, &va)| Complex64::from_polar(vm, va))
            .collect();
        va = v.iter().map(|v| v.arg()).collect();
        vm = v.iter().map(|v| v.norm()).collect();

        // evaluate F(x)
        f = layout.mismatch(net, y_bus, s_bus, &v, &conv);

        // check for convergence
        norm_f = norm_inf(&f);
        if let Some(pm) = progress {
            pm.update(i, norm_f);
        }
        if norm_f < tol {
            converged = true;
            log::info!(
                "Newton's method power flow (power balance, polar) converged in {} iterations.",
                i
            );
        }
    }

    if !converged {
        log::info!(
            "Newton's method power flow (power balance, polar) did not converge in {} iterations.",
            i
        );
    }

    Ok(NewtonSolution {
        v,
        conv,
        converged,
        iterations: i,
        norm_f,
    })
}
