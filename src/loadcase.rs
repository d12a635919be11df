use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use caseformat::{read_dir, read_zip, Branch as CaseBranch, Bus as CaseBus, Case, DCLine, Gen, GenCost};
use caseformat::{NONE, POLYNOMIAL, PV, REF};

use crate::error::{Error, Result};
use crate::network::{Branch, BranchKind, Bus, Generator, Hvdc, Load, Network, NetworkBuilder};

/// Parsed case file contents.
#[derive(Clone)]
pub struct CaseData {
    pub case: Case,
    pub bus: Vec<CaseBus>,
    pub gen: Vec<Gen>,
    pub branch: Vec<CaseBranch>,
    pub gencost: Vec<GenCost>,
    pub dcline: Vec<DCLine>,
}

/// Reads a zipped `.case` file or a case directory.
pub fn read_case(case_path: &Path) -> Result<CaseData> {
    let is_case = match case_path.extension() {
        None => false,
        Some(os_str) => os_str.to_str() == Some("case"),
    };

    let (case, bus, gen, branch, gencost, dcline, _readme, _license) = if is_case {
        let file = File::open(case_path).map_err(anyhow::Error::from)?;
        read_zip(file)?
    } else {
        read_dir(&PathBuf::from(case_path))?
    };

    Ok(CaseData {
        case,
        bus,
        gen,
        branch,
        gencost,
        dcline,
    })
}

/// Converts MATPOWER-style case data into a validated [Network].
///
/// Buses of type NONE are dropped together with everything attached to
/// them. A zero `rate_a` means unlimited. Only polynomial costs of
/// order two or less are supported.
pub fn load_network(data: &CaseData) -> Result<Network> {
    let base_mva = data.case.base_mva;
    let mut nb = NetworkBuilder::new(data.case.name.clone(), base_mva);

    let dropped: HashSet<usize> = data
        .bus
        .iter()
        .filter(|b| b.bus_type == NONE)
        .map(|b| b.bus_i)
        .collect();

    for b in data.bus.iter().filter(|b| b.bus_type != NONE) {
        let mut bus = Bus::new(b.bus_i, b.base_kv)
            .voltage(b.vm, b.va)
            .limits(b.vmin, b.vmax)
            .shunt(b.gs, b.bs);
        bus = match b.bus_type {
            REF => bus.slack(),
            PV => bus.pv(),
            _ => bus,
        };
        nb.add_bus(bus)?;

        if b.pd != 0.0 || b.qd != 0.0 {
            nb.add_load(Load::new(b.bus_i, b.pd, b.qd))?;
        }
    }

    if !data.gencost.is_empty() && data.gencost.len() < data.gen.len() {
        return Err(Error::InvalidCase(format!(
            "{} generators but only {} cost functions",
            data.gen.len(),
            data.gencost.len()
        )));
    }

    for (i, g) in data.gen.iter().enumerate() {
        if dropped.contains(&g.gen_bus) {
            continue;
        }
        let mut gen = Generator::new(g.gen_bus)
            .dispatch(g.pg, g.vg)
            .p_limits(g.pmin, g.pmax)
            .q_limits(g.qmin, g.qmax);
        gen.qg = g.qg;
        gen.status = g.is_on();

        if let Some(cost) = data.gencost.get(i) {
            let [c2, c1, c0] = polynomial_cost(i, cost)?;
            gen = gen.cost(c2, c1, c0);
        }
        nb.add_generator(gen)?;
    }

    for br in data.branch.iter() {
        if dropped.contains(&br.f_bus) || dropped.contains(&br.t_bus) {
            continue;
        }
        let kind = if (br.tap == 0.0 || br.tap == 1.0) && br.shift == 0.0 {
            BranchKind::Line {
                r: br.br_r,
                x: br.br_x,
                b: br.br_b,
            }
        } else {
            BranchKind::Transformer {
                r: br.br_r,
                x: br.br_x,
                b: br.br_b,
                tap: br.tap,
                shift: br.shift,
            }
        };
        // a zero angle limit means unconstrained
        let angmin = br.angmin.filter(|&a| a != 0.0).unwrap_or(-360.0);
        let angmax = br.angmax.filter(|&a| a != 0.0).unwrap_or(360.0);
        let mut branch = Branch::new(br.f_bus, br.t_bus, kind).angle_limits(angmin, angmax);
        if br.rate_a > 0.0 {
            branch = branch.rating(br.rate_a);
        }
        if !br.is_on() {
            branch = branch.out_of_service();
        }
        nb.add_branch(branch)?;
    }

    for dc in data.dcline.iter() {
        if dropped.contains(&dc.f_bus) || dropped.contains(&dc.t_bus) {
            continue;
        }
        let mut branch = Branch::new(
            dc.f_bus,
            dc.t_bus,
            BranchKind::Hvdc(Hvdc {
                p_set: dc.pf,
                loss0: dc.loss0,
                loss1: dc.loss1,
                q_from: dc.qf,
                q_to: dc.qt,
                pmin: dc.pmin,
                pmax: dc.pmax,
            }),
        );
        if !dc.is_on() {
            branch = branch.out_of_service();
        }
        nb.add_branch(branch)?;
    }

    nb.build()
}

fn polynomial_cost(i: usize, cost: &GenCost) -> Result<[f64; 3]> {
    if cost.model != POLYNOMIAL {
        return Err(Error::InvalidCase(format!(
            "generator {}: piecewise linear costs are not supported",
            i
        )));
    }
    let coeffs = cost.coeffs.as_deref().unwrap_or_default();
    if coeffs.len() > 3 {
        // Higher order terms are accepted if they vanish.
        let (hi, _) = coeffs.split_at(coeffs.len() - 3);
        if hi.iter().any(|&c| c != 0.0) {
            return Err(Error::InvalidCase(format!(
                "generator {}: polynomial cost of order {} is not supported",
                i,
                coeffs.len() - 1
            )));
        }
    }
    // Coefficients are stored highest order first.
    let mut c = [0.0; 3];
    for (k, &v) in coeffs.iter().rev().take(3).enumerate() {
        c[2 - k] = v;
    }
    Ok(c)
}
