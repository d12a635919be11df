use anyhow::Result;
use num_complex::Complex64;

use crate::d_sbus_dv::s_net;
use crate::network::{Branch, BranchKind, Bus, Generator, Hvdc, Load, Network, NetworkBuilder, Vsc, VscControl};
use crate::ybus::make_ybus;

// bus_i, type, Pd, Qd, Gs, Bs, Vm, Va, baseKV, Vmax, Vmin
const CASE14_BUS: [[f64; 11]; 14] = [
    [1.0, 3.0, 0.0, 0.0, 0.0, 0.0, 1.06, 0.0, 0.0, 1.06, 0.94],
    [2.0, 2.0, 21.7, 12.7, 0.0, 0.0, 1.045, -4.98, 0.0, 1.06, 0.94],
    [3.0, 2.0, 94.2, 19.0, 0.0, 0.0, 1.01, -12.72, 0.0, 1.06, 0.94],
    [4.0, 1.0, 47.8, -3.9, 0.0, 0.0, 1.019, -10.33, 0.0, 1.06, 0.94],
    [5.0, 1.0, 7.6, 1.6, 0.0, 0.0, 1.02, -8.78, 0.0, 1.06, 0.94],
    [6.0, 2.0, 11.2, 7.5, 0.0, 0.0, 1.07, -14.22, 0.0, 1.06, 0.94],
    [7.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.062, -13.37, 0.0, 1.06, 0.94],
    [8.0, 2.0, 0.0, 0.0, 0.0, 0.0, 1.09, -13.36, 0.0, 1.06, 0.94],
    [9.0, 1.0, 29.5, 16.6, 0.0, 19.0, 1.056, -14.94, 0.0, 1.06, 0.94],
    [10.0, 1.0, 9.0, 5.8, 0.0, 0.0, 1.051, -15.1, 0.0, 1.06, 0.94],
    [11.0, 1.0, 3.5, 1.8, 0.0, 0.0, 1.057, -14.79, 0.0, 1.06, 0.94],
    [12.0, 1.0, 6.1, 1.6, 0.0, 0.0, 1.055, -15.07, 0.0, 1.06, 0.94],
    [13.0, 1.0, 13.5, 5.8, 0.0, 0.0, 1.05, -15.16, 0.0, 1.06, 0.94],
    [14.0, 1.0, 14.9, 5.0, 0.0, 0.0, 1.036, -16.04, 0.0, 1.06, 0.94],
];

// bus, Pg, Qg, Qmax, Qmin, Vg, Pmax, Pmin, c2, c1, c0
const CASE14_GEN: [[f64; 11]; 5] = [
    [1.0, 232.4, -16.9, 10.0, 0.0, 1.06, 332.4, 0.0, 0.0430292599, 20.0, 0.0],
    [2.0, 40.0, 42.4, 50.0, -40.0, 1.045, 140.0, 0.0, 0.25, 20.0, 0.0],
    [3.0, 0.0, 23.4, 40.0, 0.0, 1.01, 100.0, 0.0, 0.01, 40.0, 0.0],
    [6.0, 0.0, 12.2, 24.0, -6.0, 1.07, 100.0, 0.0, 0.01, 40.0, 0.0],
    [8.0, 0.0, 17.4, 24.0, -6.0, 1.09, 100.0, 0.0, 0.01, 40.0, 0.0],
];

// fbus, tbus, r, x, b, ratio
const CASE14_BRANCH: [[f64; 6]; 20] = [
    [1.0, 2.0, 0.01938, 0.05917, 0.0528, 0.0],
    [1.0, 5.0, 0.05403, 0.22304, 0.0492, 0.0],
    [2.0, 3.0, 0.04699, 0.19797, 0.0438, 0.0],
    [2.0, 4.0, 0.05811, 0.17632, 0.034, 0.0],
    [2.0, 5.0, 0.05695, 0.17388, 0.0346, 0.0],
    [3.0, 4.0, 0.06701, 0.17103, 0.0128, 0.0],
    [4.0, 5.0, 0.01335, 0.04211, 0.0, 0.0],
    [4.0, 7.0, 0.0, 0.20912, 0.0, 0.978],
    [4.0, 9.0, 0.0, 0.55618, 0.0, 0.969],
    [5.0, 6.0, 0.0, 0.25202, 0.0, 0.932],
    [6.0, 11.0, 0.09498, 0.1989, 0.0, 0.0],
    [6.0, 12.0, 0.12291, 0.25581, 0.0, 0.0],
    [6.0, 13.0, 0.06615, 0.13027, 0.0, 0.0],
    [7.0, 8.0, 0.0, 0.17615, 0.0, 0.0],
    [7.0, 9.0, 0.0, 0.11001, 0.0, 0.0],
    [9.0, 10.0, 0.03181, 0.0845, 0.0, 0.0],
    [9.0, 14.0, 0.12711, 0.27038, 0.0, 0.0],
    [10.0, 11.0, 0.08205, 0.19207, 0.0, 0.0],
    [12.0, 13.0, 0.22092, 0.19988, 0.0, 0.0],
    [13.0, 14.0, 0.17093, 0.34802, 0.0, 0.0],
];

/// Objective of the IEEE 14 bus OPF ($/h).
pub(super) const CASE14_OBJECTIVE: f64 = 8081.53;

/// IEEE 14 bus test case.
pub(super) fn case14() -> Result<Network> {
    let mut nb = NetworkBuilder::new("case14", 100.0);
    for b in CASE14_BUS.iter() {
        let id = b[0] as usize;
        let bus = Bus::new(id, b[8])
            .voltage(b[6], b[7])
            .limits(b[10], b[9])
            .shunt(b[4], b[5]);
        nb.add_bus(match b[1] as usize {
            3 => bus.slack(),
            2 => bus.pv(),
            _ => bus,
        })?;
        if b[2] != 0.0 || b[3] != 0.0 {
            nb.add_load(Load::new(id, b[2], b[3]))?;
        }
    }
    for g in CASE14_GEN.iter() {
        nb.add_generator(
            Generator::new(g[0] as usize)
                .dispatch(g[1], g[5])
                .p_limits(g[7], g[6])
                .q_limits(g[4], g[3])
                .cost(g[8], g[9], g[10]),
        )?;
    }
    for br in CASE14_BRANCH.iter() {
        let (f, t) = (br[0] as usize, br[1] as usize);
        if br[5] != 0.0 {
            nb.add_branch(Branch::transformer(f, t, br[2], br[3], br[5], 0.0))?;
        } else {
            nb.add_branch(Branch::line(f, t, br[2], br[3], br[4]))?;
        }
    }
    Ok(nb.build()?)
}

/// Radial four bus case whose injections are derived from `voltage`:
/// bus 1 is the slack, bus 2 a generator and buses 3 and 4 loads.
pub(super) fn case4_from(voltage: &[Complex64; 4]) -> Result<Network> {
    let lines = [(1, 2, 0.01, 0.05, 0.02), (2, 3, 0.02, 0.08, 0.01), (2, 4, 0.03, 0.1, 0.01)];
    let build = |gen_p: f64, loads: [Complex64; 2]| -> Result<Network> {
        let mut nb = NetworkBuilder::new("case4", 100.0);
        nb.add_bus(Bus::new(1, 138.0).slack().voltage(voltage[0].norm(), voltage[0].arg().to_degrees()))?;
        nb.add_bus(Bus::new(2, 138.0).pv())?;
        nb.add_bus(Bus::new(3, 138.0))?;
        nb.add_bus(Bus::new(4, 138.0))?;
        for &(f, t, r, x, b) in lines.iter() {
            nb.add_branch(Branch::line(f, t, r, x, b))?;
        }
        nb.add_generator(Generator::new(1).dispatch(0.0, voltage[0].norm()))?;
        nb.add_generator(Generator::new(2).dispatch(gen_p, voltage[1].norm()))?;
        nb.add_load(Load::new(3, loads[0].re, loads[0].im))?;
        nb.add_load(Load::new(4, loads[1].re, loads[1].im))?;
        Ok(nb.build()?)
    };

    // Injections from the chosen profile.
    let topology = build(0.0, [Complex64::default(); 2])?;
    let y_bus = make_ybus(&topology);
    let s = s_net(&y_bus, voltage);
    let base_mva = topology.base_mva();

    build(s[1].re * base_mva, [-s[2] * base_mva, -s[3] * base_mva])
}

/// Two AC areas joined by an HVDC link from bus 3 to bus 4.
pub(super) fn case6_hvdc() -> Result<Network> {
    let mut nb = NetworkBuilder::new("case6_hvdc", 100.0);
    nb.add_bus(Bus::new(1, 230.0).slack())?;
    nb.add_bus(Bus::new(2, 230.0))?;
    nb.add_bus(Bus::new(3, 230.0))?;
    nb.add_bus(Bus::new(4, 230.0).slack())?;
    nb.add_bus(Bus::new(5, 230.0))?;
    nb.add_bus(Bus::new(6, 230.0))?;
    for (f, t) in [(1, 2), (2, 3), (1, 3), (4, 5), (5, 6), (4, 6)] {
        nb.add_branch(Branch::line(f, t, 0.01, 0.08, 0.02))?;
    }
    nb.add_branch(Branch::new(
        3,
        4,
        BranchKind::Hvdc(Hvdc {
            p_set: 30.0,
            loss0: 0.5,
            loss1: 0.02,
            q_from: -5.0,
            q_to: 3.0,
            pmin: 0.0,
            pmax: 60.0,
        }),
    ))?;
    nb.add_generator(Generator::new(1).dispatch(100.0, 1.02).p_limits(0.0, 200.0).cost(0.01, 15.0, 0.0))?;
    nb.add_generator(Generator::new(4).dispatch(40.0, 1.01).p_limits(0.0, 150.0).cost(0.02, 30.0, 0.0))?;
    nb.add_load(Load::new(2, 40.0, 10.0))?;
    nb.add_load(Load::new(3, 30.0, 8.0))?;
    nb.add_load(Load::new(5, 35.0, 9.0))?;
    nb.add_load(Load::new(6, 25.0, 6.0))?;
    Ok(nb.build()?)
}

/// Set-points of the converters in `case6_vsc`.
pub(super) const VSC_VAC: f64 = 1.01;
pub(super) const VSC_VDC: f64 = 1.0;
pub(super) const VSC_PDC: f64 = 20.0;
pub(super) const VSC_QAC: f64 = 5.0;

/// AC network with a parallel DC path through two converters. The first
/// converter holds the DC voltage and its AC voltage, the second its DC
/// power and reactive output.
pub(super) fn case6_vsc() -> Result<Network> {
    let mut nb = NetworkBuilder::new("case6_vsc", 100.0);
    nb.add_bus(Bus::new(1, 230.0).slack())?;
    nb.add_bus(Bus::new(2, 230.0))?;
    nb.add_bus(Bus::new(3, 230.0))?;
    nb.add_bus(Bus::new(6, 230.0))?;
    nb.add_bus(Bus::dc(4, 300.0))?;
    nb.add_bus(Bus::dc(5, 300.0))?;
    for (f, t) in [(1, 2), (2, 3), (3, 6), (1, 6)] {
        nb.add_branch(Branch::line(f, t, 0.01, 0.06, 0.03))?;
    }
    nb.add_branch(Branch::dc_line(4, 5, 0.02))?;
    nb.add_branch(Branch::new(
        4,
        2,
        BranchKind::Vsc(Vsc {
            loss: [0.001, 0.0, 0.01],
            control1: VscControl::Vdc(VSC_VDC),
            control2: VscControl::Vac(VSC_VAC),
        }),
    ))?;
    nb.add_branch(Branch::new(
        5,
        3,
        BranchKind::Vsc(Vsc {
            loss: [0.001, 0.0, 0.01],
            control1: VscControl::Pdc(VSC_PDC),
            control2: VscControl::Qac(VSC_QAC),
        }),
    ))?;
    nb.add_generator(Generator::new(1).dispatch(0.0, 1.03).cost(0.01, 10.0, 0.0))?;
    nb.add_load(Load::new(3, 60.0, 15.0))?;
    nb.add_load(Load::new(6, 45.0, 10.0))?;
    nb.add_load(Load::new(2, 20.0, 5.0))?;
    Ok(nb.build()?)
}

/// A lone DC bus fed by a converter that fixes its DC power: nothing
/// determines the DC voltage.
pub(super) fn case_floating_dc() -> Result<Network> {
    let mut nb = NetworkBuilder::new("floating_dc", 100.0);
    nb.add_bus(Bus::new(1, 230.0).slack())?;
    nb.add_bus(Bus::new(2, 230.0))?;
    nb.add_bus(Bus::dc(3, 300.0))?;
    nb.add_branch(Branch::line(1, 2, 0.01, 0.06, 0.0))?;
    nb.add_branch(Branch::new(
        3,
        2,
        BranchKind::Vsc(Vsc {
            loss: [0.0, 0.01, 0.0],
            control1: VscControl::Pdc(10.0),
            control2: VscControl::Qac(0.0),
        }),
    ))?;
    nb.add_generator(Generator::new(1).dispatch(0.0, 1.0))?;
    nb.add_load(Load::new(2, 10.0, 2.0))?;
    Ok(nb.build()?)
}

/// Two connected buses with neither load nor generation.
pub(super) fn case_unsupplied() -> Result<Network> {
    let mut nb = NetworkBuilder::new("unsupplied", 100.0);
    nb.add_bus(Bus::new(1, 230.0))?;
    nb.add_bus(Bus::new(2, 230.0))?;
    nb.add_branch(Branch::line(1, 2, 0.01, 0.1, 0.0))?;
    Ok(nb.build()?)
}
