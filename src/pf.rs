use std::f64::consts::PI;
use std::time::{Duration, Instant};

use num_complex::Complex64;
use spsolve::rlu::RLU;

use crate::bus_types::{bus_types, BusTypes};
use crate::d_sbus_dv::s_net;
use crate::error::{Error, Result};
use crate::ipm::Status;
use crate::jac::{ConverterState, PfLayout};
use crate::mpopt::{GenQLimits, PFConfig};
use crate::network::{BranchKind, Network, VscControl};
use crate::debug::{format_rect_vec, PrintProgress};
use crate::newton::{newtonpf, NewtonProgress, NewtonSolution};
use crate::results::{branch_flows, losses, BranchFlow, Losses};
use crate::sbus::{gen_setpoints, hvdc_setpoints, make_sbus, MakeSBus};
use crate::ybus::make_ybus;
use crate::zip::{make_sdzip, ZipLoads};

/// Power flow solution.
#[derive(Debug, Clone)]
pub struct PFResult {
    /// Bus voltages (p.u.). DC buses have zero angle.
    pub voltage: Vec<Complex64>,
    /// Scheduled bus injections (p.u.) with the solved generator outputs.
    pub sbus: Vec<Complex64>,
    pub converters: Vec<ConverterState>,
    /// HVDC transfers (p.u.), one per `Network::hvdc_branches` entry.
    pub hvdc_p: Vec<f64>,
    pub converged: bool,
    /// Final mismatch norm.
    pub error: f64,
    pub iterations: usize,
    pub status: Status,
    /// Generator outputs (MW/MVAr). Off-line units are zero.
    pub gen_p: Vec<f64>,
    pub gen_q: Vec<f64>,
    pub branch_flows: Vec<BranchFlow>,
    pub losses: Losses,
    pub elapsed: Duration,
}

/// Runs a Newton-Raphson power flow.
///
/// Solver breakdowns are reported through `converged` and `status`.
/// Only invalid input gives `Err`.
pub fn run_power_flow(net: &Network, config: &PFConfig) -> Result<PFResult> {
    let t0 = Instant::now();
    let nb = net.bus_count();

    let mut bt = bus_types(net);
    let y_bus = make_ybus(net);
    let sd = make_sdzip(net);
    let hvdc_p = hvdc_setpoints(net);
    let mut sg = gen_setpoints(net);
    let mut v = initial_voltage(net, &bt, config.flat_start);
    let mut conv = initial_converters(net);

    if bt.refs.len() + bt.pv.len() + bt.pq.len() + bt.dc.len() == 0 {
        log::warn!("Power flow not valid: case contains no connected buses");
        return Ok(assemble(
            net,
            v,
            &sd,
            sg,
            hvdc_p,
            conv,
            (false, f64::INFINITY, 0, Status::Degenerate),
            t0,
        ));
    }

    let solver = RLU::default();
    let printer = PrintProgress;
    let progress: Option<&dyn NewtonProgress> = if config.verbose {
        Some(&printer)
    } else {
        None
    };
    let mut q_fixed = vec![false; net.generator_count()];
    let mut its = 0;
    let mut norm_f = f64::INFINITY;
    let mut converged = false;
    let mut status = Status::MaxIterations;

    loop {
        let layout = PfLayout::new(net, &bt);
        let s_bus = MakeSBus {
            net,
            sd: &sd,
            sg: &sg,
            hvdc_p: &hvdc_p,
        };
        let sol: NewtonSolution =
            match newtonpf(net, &layout, &y_bus, &s_bus, &v, &conv, &solver, config, progress) {
                Ok(sol) => sol,
                Err(Error::SingularJacobian(msg)) => {
                    log::warn!("power flow stopped, singular jacobian: {}", msg);
                    converged = false;
                    status = Status::SingularJacobian;
                    break;
                }
                Err(err) => return Err(err),
            };
        its += sol.iterations;
        v = sol.v;
        conv = sol.conv;
        norm_f = sol.norm_f;
        converged = sol.converged;
        status = if converged {
            Status::Converged
        } else {
            Status::MaxIterations
        };

        update_gens(net, &bt, &y_bus, &sd, &hvdc_p, &conv, &v, &mut sg);

        if !converged || config.enforce_q_limits == GenQLimits::Ignore {
            break;
        }

        let mut violated = q_violations(net, &bt, &sg, &q_fixed);
        if violated.is_empty() {
            break;
        }
        if config.enforce_q_limits == GenQLimits::OneAtATime {
            violated.sort_by(|a, b| b.2.total_cmp(&a.2));
            violated.truncate(1);
        }
        for (g, q_lim, _) in violated {
            let i = net.gen_bus(g);
            log::info!(
                "Gen {} at bus {} at Q limit ({} MVAr), converting to PQ bus",
                g,
                net.buses()[i].id,
                q_lim * net.base_mva()
            );
            sg[g].im = q_lim;
            for g2 in net.online_gens() {
                if net.gen_bus(g2) == i {
                    q_fixed[g2] = true;
                }
            }
            bt.pv_to_pq(i);
        }
    }

    log::debug!(
        "power flow: {} buses, converged {} in {} iterations",
        nb,
        converged,
        its
    );
    log::trace!("Sg: {}", format_rect_vec(&sg));

    Ok(assemble(
        net,
        v,
        &sd,
        sg,
        hvdc_p,
        conv,
        (converged, norm_f, its, status),
        t0,
    ))
}

fn assemble(
    net: &Network,
    v: Vec<Complex64>,
    sd: &ZipLoads,
    sg: Vec<Complex64>,
    hvdc_p: Vec<f64>,
    conv: Vec<ConverterState>,
    outcome: (bool, f64, usize, Status),
    t0: Instant,
) -> PFResult {
    let (converged, error, iterations, status) = outcome;
    let base_mva = net.base_mva();
    let vm: Vec<f64> = v.iter().map(|v| v.norm()).collect();

    let mut sbus = make_sbus(net, sd, &vm, &sg, &hvdc_p);
    add_converter_injections(net, &conv, &mut sbus);

    let online = net.online_gens();
    let mut gen_p = vec![0.0; net.generator_count()];
    let mut gen_q = vec![0.0; net.generator_count()];
    for &g in &online {
        gen_p[g] = sg[g].re * base_mva;
        gen_q[g] = sg[g].im * base_mva;
    }

    let flows = branch_flows(net, &v, &hvdc_p, &conv);
    let losses = losses(&flows);

    PFResult {
        voltage: v,
        sbus,
        converters: conv,
        hvdc_p,
        converged,
        error,
        iterations,
        status,
        gen_p,
        gen_q,
        branch_flows: flows,
        losses,
        elapsed: t0.elapsed(),
    }
}

/// Bus voltages from the case data, with generator and converter voltage
/// set-points applied.
pub(crate) fn initial_voltage(net: &Network, bt: &BusTypes, flat_start: bool) -> Vec<Complex64> {
    let mut v: Vec<Complex64> = net
        .buses()
        .iter()
        .map(|b| {
            if b.is_dc {
                Complex64::new(if flat_start { 1.0 } else { b.vm }, 0.0)
            } else if flat_start {
                Complex64::from_polar(1.0, 0.0)
            } else {
                Complex64::from_polar(b.vm, b.va * PI / 180.0)
            }
        })
        .collect();
    for &r in &bt.refs {
        let va = net.buses()[r].va * PI / 180.0;
        v[r] = Complex64::from_polar(v[r].norm(), va);
    }

    let regulated = |i: usize| bt.refs.contains(&i) || bt.pv.contains(&i);
    for g in net.online_gens() {
        let i = net.gen_bus(g);
        if regulated(i) {
            v[i] = Complex64::from_polar(net.generators()[g].vg, v[i].arg());
        }
    }

    for l in net.vsc_branches() {
        let (f, t) = net.branch_ends(l);
        if let Some((c1, c2)) = net.branches()[l].control() {
            for c in [c1, c2] {
                match c {
                    VscControl::Vac(vm) => v[t] = Complex64::from_polar(vm, v[t].arg()),
                    VscControl::Vdc(vm) => v[f] = Complex64::new(vm, 0.0),
                    VscControl::Angle(deg) => v[t] = Complex64::from_polar(v[t].norm(), deg * PI / 180.0),
                    _ => {}
                }
            }
        }
    }
    v
}

/// Converter states at their power set-points.
pub(crate) fn initial_converters(net: &Network) -> Vec<ConverterState> {
    let base_mva = net.base_mva();
    net.vsc_branches()
        .iter()
        .map(|&l| {
            let mut cs = ConverterState::default();
            if let Some((c1, c2)) = net.branches()[l].control() {
                for c in [c1, c2] {
                    match c {
                        VscControl::Pdc(p) => cs.p_dc = p / base_mva,
                        VscControl::Qac(q) => cs.q_ac = q / base_mva,
                        _ => {}
                    }
                }
            }
            cs.p_ac = cs.p_dc;
            cs
        })
        .collect()
}

fn add_converter_injections(net: &Network, conv: &[ConverterState], s_bus: &mut [Complex64]) {
    for (&l, cs) in net.vsc_branches().iter().zip(conv) {
        if let BranchKind::Vsc(_) = net.branches()[l].kind {
            let (f, t) = net.branch_ends(l);
            s_bus[f] -= cs.p_dc;
            s_bus[t] += Complex64::new(cs.p_ac, cs.q_ac);
        }
    }
}

/// Updates slack generator P and the Q of generators at voltage
/// controlled buses from the solved voltages.
///
/// Buses with more than one generator have the total reactive power
/// divided in proportion to the reactive range of each unit.
fn update_gens(
    net: &Network,
    bt: &BusTypes,
    y_bus: &sparsetools::csr::CSR<usize, Complex64>,
    sd: &ZipLoads,
    hvdc_p: &[f64],
    conv: &[ConverterState],
    v: &[Complex64],
    sg: &mut [Complex64],
) {
    let vm: Vec<f64> = v.iter().map(|v| v.norm()).collect();
    let none = vec![Complex64::default(); sg.len()];
    let mut s_other = make_sbus(net, sd, &vm, &none, hvdc_p);
    add_converter_injections(net, conv, &mut s_other);
    let s_inj = s_net(y_bus, v);

    let online = net.online_gens();
    let at_bus = |i: usize| -> Vec<usize> {
        online
            .iter()
            .copied()
            .filter(|&g| net.gen_bus(g) == i)
            .collect()
    };

    for &i in bt.refs.iter().chain(&bt.pv) {
        let gens = at_bus(i);
        if gens.is_empty() {
            continue;
        }
        let total = s_inj[i] - s_other[i];

        let q = split_q(net, &gens, total.im);
        for (&g, q) in gens.iter().zip(q) {
            sg[g].im = q;
        }

        if bt.refs.contains(&i) {
            // other gens at the ref bus keep their dispatch
            let others: f64 = gens[1..].iter().map(|&g| sg[g].re).sum();
            sg[gens[0]].re = total.re - others;
        }
    }
}

// Divides `q_tot` (p.u.) between the generators at one bus.
fn split_q(net: &Network, gens: &[usize], q_tot: f64) -> Vec<f64> {
    let base_mva = net.base_mva();
    if gens.len() == 1 {
        return vec![q_tot];
    }
    let units: Vec<_> = gens.iter().map(|&g| &net.generators()[g]).collect();

    // proxy for infinite limits
    let m = q_tot.abs()
        + units
            .iter()
            .map(|u| {
                let qmax = if u.qmax.is_finite() { u.qmax.abs() } else { 0.0 };
                let qmin = if u.qmin.is_finite() { u.qmin.abs() } else { 0.0 };
                (qmax + qmin) / base_mva
            })
            .sum::<f64>();
    let proxy = |q: f64| {
        if q.is_finite() {
            q / base_mva
        } else if q > 0.0 {
            m
        } else {
            -m
        }
    };
    let qmin: Vec<f64> = units.iter().map(|u| proxy(u.qmin)).collect();
    let qmax: Vec<f64> = units.iter().map(|u| proxy(u.qmax)).collect();
    let (qg_min, qg_max): (f64, f64) = (qmin.iter().sum(), qmax.iter().sum());

    if (qg_max - qg_min).abs() > 1e-13 {
        let frac = (q_tot - qg_min) / (qg_max - qg_min);
        (0..gens.len())
            .map(|k| qmin[k] + frac * (qmax[k] - qmin[k]))
            .collect()
    } else {
        // zero range: all units violate their limits by the same amount
        let mis = (q_tot - qg_min) / gens.len() as f64;
        qmin.iter().map(|q| q + mis).collect()
    }
}

// Generators at PV buses outside their reactive limits, with the
// violated limit (p.u.) and the size of the violation.
fn q_violations(
    net: &Network,
    bt: &BusTypes,
    sg: &[Complex64],
    q_fixed: &[bool],
) -> Vec<(usize, f64, f64)> {
    const EPS: f64 = 1e-7;
    let base_mva = net.base_mva();
    net.online_gens()
        .into_iter()
        .filter(|&g| !q_fixed[g] && bt.pv.contains(&net.gen_bus(g)))
        .filter_map(|g| {
            let gen = &net.generators()[g];
            let q = sg[g].im * base_mva;
            if q > gen.qmax + EPS {
                Some((g, gen.qmax / base_mva, q - gen.qmax))
            } else if q < gen.qmin - EPS {
                Some((g, gen.qmin / base_mva, gen.qmin - q))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use anyhow::{format_err, Result};

    use super::*;
    use crate::network::{Branch, Bus, Generator, NetworkBuilder};

    #[test]
    fn test_split_q() -> Result<()> {
        let mut nb = NetworkBuilder::new("split", 100.0);
        nb.add_bus(Bus::new(1, 135.0).slack())?;
        nb.add_bus(Bus::new(2, 135.0))?;
        nb.add_branch(Branch::line(1, 2, 0.0, 0.1, 0.0))?;
        nb.add_generator(Generator::new(1).q_limits(-10.0, 30.0))?;
        nb.add_generator(Generator::new(1).q_limits(-10.0, 10.0))?;
        let net = nb.build()?;

        let q = split_q(&net, &[0, 1], 0.2);
        // range -0.2..0.4, 2/3 of the way up
        let expect = [-0.1 + (2.0 / 3.0) * 0.4, -0.1 + (2.0 / 3.0) * 0.2];
        for k in 0..2 {
            if (q[k] - expect[k]).abs() > 1e-12 {
                return Err(format_err!("q[{}] = {}, expected {}", k, q[k], expect[k]));
            }
        }
        if (q.iter().sum::<f64>() - 0.2).abs() > 1e-12 {
            return Err(format_err!("split must preserve the total"));
        }
        Ok(())
    }
}
