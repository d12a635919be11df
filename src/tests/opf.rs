use anyhow::{format_err, Result};

use super::cases::*;
use super::init_logging;
use crate::error::Error;
use crate::ipm::Status;
use crate::mpopt::{AcOpfMode, OPFConfig, OPFConfigBuilder};
use crate::network::Network;
use crate::opf::{run_opf, OPFResult};

fn check_objective(res: &OPFResult, expect: f64) -> Result<()> {
    if !res.converged {
        return Err(format_err!(
            "did not converge after {} iterations: {:?}",
            res.iterations,
            res.status
        ));
    }
    let rel = (res.objective - expect).abs() / expect;
    if rel > 1e-4 {
        return Err(format_err!("objective {} differs from {} by {:e}", res.objective, expect, rel));
    }
    Ok(())
}

fn check_limits(net: &Network, res: &OPFResult, tol: f64) -> Result<()> {
    for (g, gen) in net.generators().iter().enumerate() {
        if res.gen_p[g] > gen.pmax + tol || res.gen_p[g] < gen.pmin - tol {
            return Err(format_err!("gen {} P = {}", g, res.gen_p[g]));
        }
        if res.gen_q[g] > gen.qmax + tol || res.gen_q[g] < gen.qmin - tol {
            return Err(format_err!("gen {} Q = {}", g, res.gen_q[g]));
        }
    }
    for (i, bus) in net.buses().iter().enumerate() {
        let vm = res.voltage[i].norm();
        if vm > bus.vmax + tol || vm < bus.vmin - tol {
            return Err(format_err!("bus {} Vm = {}", bus.id, vm));
        }
    }
    Ok(())
}

#[test]
fn test_case14() -> Result<()> {
    init_logging();
    let net = case14()?;
    for mode in [AcOpfMode::Standard, AcOpfMode::WithSlacks] {
        for init_with_pf in [false, true] {
            let config = OPFConfigBuilder::default()
                .ips_tolerance(1e-6)
                .ips_iterations(40)
                .acopf_mode(mode)
                .ips_init_with_pf(init_with_pf)
                .build()?;
            let res = run_opf(&net, &config)?;
            check_objective(&res, CASE14_OBJECTIVE)
                .map_err(|err| format_err!("{:?}, pf init {}: {}", mode, init_with_pf, err))?;
            check_limits(&net, &res, 1e-5)?;
        }
    }
    Ok(())
}

#[test]
fn test_case14_prices() -> Result<()> {
    init_logging();
    let net = case14()?;
    let res = run_opf(&net, &OPFConfig::default())?;
    check_objective(&res, CASE14_OBJECTIVE)?;

    // unconstrained units run at the price of their bus
    for (g, gen) in net.generators().iter().enumerate() {
        let p = res.gen_p[g];
        if p > gen.pmin + 1e-3 && p < gen.pmax - 1e-3 {
            let marginal = 2.0 * gen.cost.c2 * p + gen.cost.c1;
            let lmp = res.lmp_p[net.gen_bus(g)];
            if (lmp - marginal).abs() > 1e-3 {
                return Err(format_err!("gen {}: lmp {} != marginal cost {}", g, lmp, marginal));
            }
        }
    }
    // Q of the first unit sits on its lower limit
    if res.multipliers.mu_qmin[0] <= 0.0 {
        return Err(format_err!("expected a binding qmin at gen 0: {:?}", res.multipliers.mu_qmin));
    }
    if (res.losses.total.re - (res.gen_p.iter().sum::<f64>() - 259.0)).abs() > 1e-6 {
        return Err(format_err!("losses do not balance generation and load"));
    }
    Ok(())
}

#[test]
fn test_q_limit_control() -> Result<()> {
    init_logging();
    let net = case14()?;
    let config = OPFConfigBuilder::default()
        .ips_control_q_limits(true)
        .build()?;
    let res = run_opf(&net, &config)?;
    if !res.converged {
        return Err(format_err!("did not converge: {:?}", res.status));
    }
    check_limits(&net, &res, 1e-6)?;
    if (res.objective - CASE14_OBJECTIVE).abs() / CASE14_OBJECTIVE > 1e-3 {
        return Err(format_err!("objective {}", res.objective));
    }
    Ok(())
}

#[test]
fn test_idempotence() -> Result<()> {
    init_logging();
    let net = case14()?;
    let config = OPFConfig::default();
    let a = run_opf(&net, &config)?;
    let b = run_opf(&net, &config)?;

    let same = a.voltage == b.voltage
        && a.gen_p == b.gen_p
        && a.gen_q == b.gen_q
        && a.lmp_p == b.lmp_p
        && a.lmp_q == b.lmp_q
        && a.multipliers == b.multipliers
        && a.branch_flows == b.branch_flows
        && a.losses == b.losses
        && a.objective.to_bits() == b.objective.to_bits()
        && a.error.to_bits() == b.error.to_bits()
        && a.iterations == b.iterations
        && a.status == b.status;
    if !same {
        return Err(format_err!("repeated solves differ"));
    }
    Ok(())
}

#[test]
fn test_tolerance_monotonicity() -> Result<()> {
    init_logging();
    let net = case14()?;
    let mut last = f64::INFINITY;
    for tol in [1e-3, 1e-4, 1e-6, 1e-7] {
        let config = OPFConfigBuilder::default().ips_tolerance(tol).build()?;
        let res = run_opf(&net, &config)?;
        if !res.converged {
            return Err(format_err!("tolerance {:e}: {:?}", tol, res.status));
        }
        if res.error > last {
            return Err(format_err!("tolerance {:e} gave error {:e} > {:e}", tol, res.error, last));
        }
        last = res.error;
    }
    Ok(())
}

#[test]
fn test_hvdc_dispatch() -> Result<()> {
    init_logging();
    let net = case6_hvdc()?;
    let res = run_opf(&net, &OPFConfig::default())?;
    if !res.converged {
        return Err(format_err!("did not converge: {:?}", res.status));
    }
    // cheap generation in the sending area fills the link
    if (res.hvdc_p[0] - 60.0).abs() > 1e-3 {
        return Err(format_err!("hvdc transfer {} MW", res.hvdc_p[0]));
    }
    check_limits(&net, &res, 1e-5)?;
    Ok(())
}

#[test]
fn test_vsc_dispatch() -> Result<()> {
    init_logging();
    let net = case6_vsc()?;
    let res = run_opf(&net, &OPFConfig::default())?;
    if !res.converged {
        return Err(format_err!("did not converge: {:?}", res.status));
    }
    // converter losses are paid by the generator
    let load = 60.0 + 45.0 + 20.0;
    if (res.gen_p[0] - load - res.losses.total.re).abs() > 1e-5 {
        return Err(format_err!(
            "generation {} MW != load {} + losses {}",
            res.gen_p[0],
            load,
            res.losses.total.re
        ));
    }
    Ok(())
}

#[test]
fn test_no_generators() -> Result<()> {
    init_logging();
    let net = case_unsupplied()?;
    match run_opf(&net, &OPFConfig::default()) {
        Err(Error::InvalidConfig(_)) => Ok(()),
        Err(err) => Err(format_err!("unexpected error: {}", err)),
        Ok(res) => Err(format_err!("expected invalid config, solved: {:?}", res.status)),
    }
}

#[test]
fn test_warm_start_length() -> Result<()> {
    let net = case14()?;
    let config = OPFConfigBuilder::default()
        .acopf_v0(vec![Default::default(); 3])
        .build()?;
    match run_opf(&net, &config) {
        Err(Error::InvalidConfig(_)) => Ok(()),
        other => Err(format_err!("expected invalid config: {:?}", other.map(|r| r.status))),
    }
}

#[test]
fn test_iteration_limit() -> Result<()> {
    let net = case14()?;
    let config = OPFConfigBuilder::default().ips_iterations(2).build()?;
    let res = run_opf(&net, &config)?;
    if res.converged || res.status != Status::MaxIterations || res.iterations != 2 {
        return Err(format_err!(
            "expected max iterations, got {:?} after {}",
            res.status,
            res.iterations
        ));
    }
    Ok(())
}
