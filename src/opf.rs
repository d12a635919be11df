use std::f64::consts::PI;
use std::time::{Duration, Instant};

use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csr::CSR;
use spsolve::rlu::RLU;

use crate::bus_types::bus_types;
use crate::d_sbr_dv::{d2_abr_d_v2, d_sbr_d_v};
use crate::d_sbus_dv::{d2_sbus_d_v2, d_sbus_d_v, s_net};
use crate::debug::PrintProgress;
use crate::error::{Error, Result};
use crate::ipm::{nlp, Options, Solution, Status};
use crate::jac::ConverterState;
use crate::mpopt::{AcOpfMode, OPFConfig};
use crate::network::{BranchKind, Network, TwoPort, VscControl};
use crate::pf::{initial_converters, run_power_flow};
use crate::results::{branch_flows, flow_multiplier, lmps, losses, BranchFlow, Losses, Multipliers};
use crate::traits::{BoundControl, Constraints, NonlinearConstraint, ObjectiveFunction, ProgressMonitor};
use crate::ybus::make_ybus;
use crate::zip::{make_sdzip, ZipLoads};

/// Number of times a generator may switch between free and fixed at a
/// reactive limit.
pub const MAX_Q_SWITCHES: usize = 4;

const COST_MULT: f64 = 1e-4;

/// Optimal power flow solution.
#[derive(Debug, Clone)]
pub struct OPFResult {
    /// Bus voltages (p.u.).
    pub voltage: Vec<Complex64>,
    /// Generator dispatch (MW/MVAr). Off-line units are zero.
    pub gen_p: Vec<f64>,
    pub gen_q: Vec<f64>,
    /// HVDC transfers (MW), one per `Network::hvdc_branches` entry.
    pub hvdc_p: Vec<f64>,
    pub converters: Vec<ConverterState>,
    pub branch_flows: Vec<BranchFlow>,
    pub losses: Losses,
    /// Locational marginal prices ($/MWh, $/MVArh).
    pub lmp_p: Vec<f64>,
    pub lmp_q: Vec<f64>,
    pub multipliers: Multipliers,
    /// Objective function value ($/h).
    pub objective: f64,
    pub converged: bool,
    pub error: f64,
    pub primal_error: f64,
    pub dual_error: f64,
    pub complementarity: f64,
    pub iterations: usize,
    pub status: Status,
    pub elapsed: Duration,
}

/// Offsets of each variable group in the OPF vector
/// `x = [Va, Vm, Pg, Qg, Phvdc, Pdc, Pac, Qac, slacks]`.
#[derive(Debug, Clone, Default)]
pub struct VarIndex {
    pub va: usize,
    pub vm: usize,
    pub pg: usize,
    pub qg: usize,
    pub phvdc: usize,
    pub pdc: usize,
    pub pac: usize,
    pub qac: usize,
    pub s_flow: usize,
    pub s_vm: usize,
    pub nx: usize,
}

struct FlowLimit {
    l: usize,
    f: usize,
    t: usize,
    y: TwoPort,
    rate2: f64,
    slack: Option<usize>,
}

struct AngleLimit {
    l: usize,
    f: usize,
    t: usize,
    /// +1 for `angmax`, -1 for `angmin`.
    sign: f64,
    limit: f64,
}

/// Polar AC optimal power flow problem.
pub struct AcOpf<'a> {
    net: &'a Network,
    mode: AcOpfMode,
    control_q: bool,
    penalty: f64,

    y_bus: CSR<usize, Complex64>,
    sd: ZipLoads,
    ix: VarIndex,

    gens: Vec<usize>,
    hvdc: Vec<usize>,
    vsc: Vec<usize>,

    p_row: Vec<Option<usize>>,
    q_row: Vec<Option<usize>>,
    loss_row: usize,
    neq: usize,

    flows: Vec<FlowLimit>,
    angles: Vec<AngleLimit>,
    vsc_ratings: Vec<(usize, f64)>,
    soft_v: Vec<usize>,
}

impl<'a> AcOpf<'a> {
    pub fn new(net: &'a Network, config: &OPFConfig) -> Self {
        let nb = net.bus_count();
        let base_mva = net.base_mva();
        let slacks = config.acopf_mode == AcOpfMode::WithSlacks;
        let isolated = net.isolated();

        let gens = net.online_gens();
        let hvdc = net.hvdc_branches();
        let vsc = net.vsc_branches();

        let mut p_row = vec![None; nb];
        let mut q_row = vec![None; nb];
        let mut neq = 0;
        for i in (0..nb).filter(|&i| !isolated[i]) {
            p_row[i] = Some(neq);
            neq += 1;
        }
        for i in (0..nb).filter(|&i| !isolated[i] && !net.buses()[i].is_dc) {
            q_row[i] = Some(neq);
            neq += 1;
        }
        let loss_row = neq;
        neq += vsc.len();

        let mut flows = Vec::new();
        let mut angles = Vec::new();
        for l in net.branches_where(|_| true) {
            let br = &net.branches()[l];
            let (f, t) = net.branch_ends(l);
            if let (Some(y), Some(rate)) = (br.admittance(), br.rating) {
                flows.push(FlowLimit {
                    l,
                    f,
                    t,
                    y,
                    rate2: (rate / base_mva).powi(2),
                    slack: None,
                });
            }
            if br.is_ac() {
                if let Some((lo, hi)) = br.angle_limits_rad() {
                    if lo.is_finite() {
                        angles.push(AngleLimit { l, f, t, sign: -1.0, limit: lo });
                    }
                    if hi.is_finite() {
                        angles.push(AngleLimit { l, f, t, sign: 1.0, limit: hi });
                    }
                }
            }
        }
        let vsc_ratings: Vec<(usize, f64)> = vsc
            .iter()
            .enumerate()
            .filter_map(|(c, &l)| {
                net.branches()[l]
                    .rating
                    .map(|rate| (c, (rate / base_mva).powi(2)))
            })
            .collect();
        let soft_v: Vec<usize> = if slacks {
            (0..nb).filter(|&i| !isolated[i]).collect()
        } else {
            Vec::new()
        };

        let mut ix = VarIndex::default();
        ix.va = 0;
        ix.vm = ix.va + nb;
        ix.pg = ix.vm + nb;
        ix.qg = ix.pg + gens.len();
        ix.phvdc = ix.qg + gens.len();
        ix.pdc = ix.phvdc + hvdc.len();
        ix.pac = ix.pdc + vsc.len();
        ix.qac = ix.pac + vsc.len();
        ix.s_flow = ix.qac + vsc.len();
        ix.s_vm = ix.s_flow;
        if slacks {
            for (k, fl) in flows.iter_mut().enumerate() {
                fl.slack = Some(ix.s_flow + k);
            }
            ix.s_vm = ix.s_flow + flows.len();
        }
        ix.nx = ix.s_vm + soft_v.len();

        let y_bus = make_ybus(net);

        Self {
            net,
            mode: config.acopf_mode,
            control_q: config.ips_control_q_limits,
            penalty: config.slack_penalty,
            y_bus,
            sd: make_sdzip(net),
            ix,
            gens,
            hvdc,
            vsc,
            p_row,
            q_row,
            loss_row,
            neq,
            flows,
            angles,
            vsc_ratings,
            soft_v,
        }
    }

    pub fn var_index(&self) -> &VarIndex {
        &self.ix
    }

    fn voltages(&self, x: &[f64]) -> Vec<Complex64> {
        let nb = self.net.bus_count();
        (0..nb)
            .map(|i| Complex64::from_polar(x[self.ix.vm + i], x[self.ix.va + i]))
            .collect()
    }

    fn n_rows(&self) -> usize {
        2 * self.flows.len() + self.angles.len() + self.vsc_ratings.len() + 2 * self.soft_v.len()
    }

    /// Variable limits. Equal limits fix a variable.
    pub fn bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let net = self.net;
        let ix = &self.ix;
        let base_mva = net.base_mva();
        let inf = f64::INFINITY;
        let mut xmin = vec![-inf; ix.nx];
        let mut xmax = vec![inf; ix.nx];

        let bt = bus_types(net);
        let mut fix = |j: usize, v: f64| {
            xmin[j] = v;
            xmax[j] = v;
        };

        for &r in &bt.refs {
            fix(ix.va + r, net.buses()[r].va * PI / 180.0);
        }
        for &i in &bt.dc {
            fix(ix.va + i, 0.0);
        }
        for &i in &bt.isolated {
            let b = &net.buses()[i];
            fix(ix.va + i, if b.is_dc { 0.0 } else { b.va * PI / 180.0 });
            fix(ix.vm + i, b.vm);
        }
        // converters holding the angle of an island without a slack bus
        for &l in &self.vsc {
            let (_, t) = net.branch_ends(l);
            let referenced = net
                .islands()
                .iter()
                .any(|isl| isl.reference.is_some() && isl.buses.contains(&t));
            if let (false, Some((c1, c2))) = (referenced, net.branches()[l].control()) {
                for c in [c1, c2] {
                    if let VscControl::Angle(deg) = c {
                        fix(ix.va + t, deg * PI / 180.0);
                    }
                }
            }
        }

        for (k, &g) in self.gens.iter().enumerate() {
            let gen = &net.generators()[g];
            if gen.controllable {
                xmin[ix.pg + k] = gen.pmin / base_mva;
                xmax[ix.pg + k] = gen.pmax / base_mva;
            } else {
                xmin[ix.pg + k] = gen.pg / base_mva;
                xmax[ix.pg + k] = gen.pg / base_mva;
            }
            if !self.control_q {
                xmin[ix.qg + k] = gen.qmin / base_mva;
                xmax[ix.qg + k] = gen.qmax / base_mva;
            }
        }

        for i in bt.refs.iter().chain(&bt.pv).chain(&bt.pq).chain(&bt.dc) {
            let b = &net.buses()[*i];
            if self.mode == AcOpfMode::Standard {
                xmin[ix.vm + i] = b.vmin;
                xmax[ix.vm + i] = b.vmax;
            } else {
                // soft limits are inequality rows, the magnitude stays positive
                xmin[ix.vm + i] = 0.0;
            }
        }

        for (k, &l) in self.hvdc.iter().enumerate() {
            if let BranchKind::Hvdc(hvdc) = &net.branches()[l].kind {
                xmin[ix.phvdc + k] = hvdc.pmin / base_mva;
                xmax[ix.phvdc + k] = hvdc.pmax / base_mva;
            }
        }

        for j in ix.s_flow..ix.nx {
            xmin[j] = 0.0;
        }

        (xmin, xmax)
    }

    /// Starting point from bound midpoints and case data, overridden by
    /// any warm start values given.
    pub fn initial_point(&self, start: &WarmStart, xmin: &[f64], xmax: &[f64]) -> Vec<f64> {
        let net = self.net;
        let ix = &self.ix;
        let base_mva = net.base_mva();
        let mut x = vec![0.0; ix.nx];

        let mid = |j: usize, fallback: f64| {
            if xmin[j].is_finite() && xmax[j].is_finite() {
                (xmin[j] + xmax[j]) / 2.0
            } else {
                fallback
            }
        };

        let bt = bus_types(net);
        let va_ref = bt
            .refs
            .first()
            .map(|&r| net.buses()[r].va * PI / 180.0)
            .unwrap_or(0.0);
        for (i, b) in net.buses().iter().enumerate() {
            x[ix.va + i] = if b.is_dc { 0.0 } else { va_ref };
            x[ix.vm + i] = mid(ix.vm + i, b.vm);
        }
        for (k, &g) in self.gens.iter().enumerate() {
            let gen = &net.generators()[g];
            x[ix.pg + k] = mid(ix.pg + k, gen.pg / base_mva);
            x[ix.qg + k] = if gen.qmin.is_finite() && gen.qmax.is_finite() {
                (gen.qmin + gen.qmax) / (2.0 * base_mva)
            } else {
                gen.qg / base_mva
            };
        }
        for (k, &l) in self.hvdc.iter().enumerate() {
            if let BranchKind::Hvdc(hvdc) = &net.branches()[l].kind {
                x[ix.phvdc + k] = mid(ix.phvdc + k, hvdc.p_set / base_mva);
            }
        }
        for (c, cs) in initial_converters(net).iter().enumerate() {
            x[ix.pdc + c] = cs.p_dc;
            x[ix.pac + c] = cs.p_ac;
            x[ix.qac + c] = cs.q_ac;
        }

        if let Some(v0) = &start.voltage {
            for (i, v) in v0.iter().enumerate() {
                x[ix.va + i] = v.arg();
                x[ix.vm + i] = v.norm();
            }
        }
        if let Some(s0) = &start.gen {
            for (k, &g) in self.gens.iter().enumerate() {
                x[ix.pg + k] = s0[g].re / base_mva;
                x[ix.qg + k] = s0[g].im / base_mva;
            }
        }
        if let Some(p) = &start.hvdc_p {
            for (k, p) in p.iter().enumerate() {
                x[ix.phvdc + k] = *p;
            }
        }
        if let Some(conv) = &start.converters {
            for (c, cs) in conv.iter().enumerate() {
                x[ix.pdc + c] = cs.p_dc;
                x[ix.pac + c] = cs.p_ac;
                x[ix.qac + c] = cs.q_ac;
            }
        }

        if self.control_q {
            for (k, &g) in self.gens.iter().enumerate() {
                let gen = &net.generators()[g];
                let q = &mut x[ix.qg + k];
                *q = q.max(gen.qmin / base_mva).min(gen.qmax / base_mva);
            }
        }
        x
    }

    /// Bound switching for generator reactive limits.
    pub fn q_control(&self) -> QLimitControl {
        let base_mva = self.net.base_mva();
        let units = self.gens.iter().map(|&g| &self.net.generators()[g]);
        QLimitControl {
            offset: self.ix.qg,
            qmin: units.clone().map(|u| u.qmin / base_mva).collect(),
            qmax: units.map(|u| u.qmax / base_mva).collect(),
            at: vec![None; self.gens.len()],
            switches: vec![0; self.gens.len()],
        }
    }

    // Mismatch S_net(V) - S_inj(x) at every bus.
    fn mismatch(&self, x: &[f64], v: &[Complex64]) -> Vec<Complex64> {
        let net = self.net;
        let ix = &self.ix;
        let s = s_net(&self.y_bus, v);
        let mut mis: Vec<Complex64> = s
            .iter()
            .enumerate()
            .map(|(i, s)| s + self.sd.demand(i, v[i].norm()))
            .collect();
        for (k, &g) in self.gens.iter().enumerate() {
            mis[net.gen_bus(g)] -= Complex64::new(x[ix.pg + k], x[ix.qg + k]);
        }
        for (k, &l) in self.hvdc.iter().enumerate() {
            if let BranchKind::Hvdc(hvdc) = &net.branches()[l].kind {
                let (inj_f, inj_t) = hvdc.injections(x[ix.phvdc + k], net.base_mva());
                let (f, t) = net.branch_ends(l);
                mis[f] -= inj_f;
                mis[t] -= inj_t;
            }
        }
        for (c, &l) in self.vsc.iter().enumerate() {
            let (f, t) = net.branch_ends(l);
            mis[f] += x[ix.pdc + c];
            mis[t] -= Complex64::new(x[ix.pac + c], x[ix.qac + c]);
        }
        mis
    }

    fn vsc_loss(&self, c: usize, x: &[f64]) -> Option<(usize, crate::vsc::VscLoss)> {
        let l = self.vsc[c];
        let (_, t) = self.net.branch_ends(l);
        match &self.net.branches()[l].kind {
            BranchKind::Vsc(vsc) => Some((
                t,
                vsc.loss_at(x[self.ix.pac + c], x[self.ix.qac + c], x[self.ix.vm + t]),
            )),
            _ => None,
        }
    }
}

/// Initial values that replace the default starting point.
#[derive(Debug, Clone, Default)]
pub struct WarmStart {
    pub voltage: Option<Vec<Complex64>>,
    /// Generator outputs (MVA), one per generator.
    pub gen: Option<Vec<Complex64>>,
    /// HVDC transfers (p.u.).
    pub hvdc_p: Option<Vec<f64>>,
    pub converters: Option<Vec<ConverterState>>,
}

impl<'a> ObjectiveFunction for AcOpf<'a> {
    fn f(&self, x: &[f64]) -> (f64, Vec<f64>) {
        let base_mva = self.net.base_mva();
        let ix = &self.ix;
        let mut f = 0.0;
        let mut df = vec![0.0; ix.nx];
        for (k, &g) in self.gens.iter().enumerate() {
            let cost = &self.net.generators()[g].cost;
            let p = x[ix.pg + k] * base_mva;
            f += cost.eval(p);
            df[ix.pg + k] = (2.0 * cost.c2 * p + cost.c1) * base_mva;
        }
        for j in ix.s_flow..ix.nx {
            f += self.penalty * x[j];
            df[j] = self.penalty;
        }
        (f, df)
    }
}

impl<'a> NonlinearConstraint for AcOpf<'a> {
    fn gh(&self, x: &[f64]) -> anyhow::Result<Constraints> {
        let net = self.net;
        let ix = &self.ix;
        let nb = net.bus_count();
        let v = self.voltages(x);
        let vm: Vec<f64> = v.iter().map(|v| v.norm()).collect();

        // equality constraints
        let mis = self.mismatch(x, &v);
        let mut g = vec![0.0; self.neq];
        for i in 0..nb {
            if let Some(r) = self.p_row[i] {
                g[r] = mis[i].re;
            }
            if let Some(r) = self.q_row[i] {
                g[r] = mis[i].im;
            }
        }

        let (d_va, d_vm) = d_sbus_d_v(&self.y_bus, &v);
        let mut dg = Coo::with_capacity(self.neq, ix.nx, 2 * (d_va.nnz() + d_vm.nnz()) + 4 * nb);
        let push_bus = |dg: &mut Coo<usize, f64>, i: usize, j: usize, d: Complex64| {
            if let Some(r) = self.p_row[i] {
                dg.push(r, j, d.re);
            }
            if let Some(r) = self.q_row[i] {
                dg.push(r, j, d.im);
            }
        };
        for ((&i, &j), &d) in d_va.rowidx().iter().zip(d_va.colidx()).zip(d_va.values()) {
            push_bus(&mut dg, i, ix.va + j, d);
        }
        for ((&i, &j), &d) in d_vm.rowidx().iter().zip(d_vm.colidx()).zip(d_vm.values()) {
            push_bus(&mut dg, i, ix.vm + j, d);
        }
        for i in 0..nb {
            let dd = self.sd.d_demand_d_vm(i, vm[i]);
            if dd != Complex64::default() {
                push_bus(&mut dg, i, ix.vm + i, dd);
            }
        }
        for (k, &gi) in self.gens.iter().enumerate() {
            let i = net.gen_bus(gi);
            push_bus(&mut dg, i, ix.pg + k, Complex64::new(-1.0, 0.0));
            push_bus(&mut dg, i, ix.qg + k, Complex64::new(0.0, -1.0));
        }
        for (k, &l) in self.hvdc.iter().enumerate() {
            if let BranchKind::Hvdc(hvdc) = &net.branches()[l].kind {
                let (f, t) = net.branch_ends(l);
                push_bus(&mut dg, f, ix.phvdc + k, Complex64::new(1.0, 0.0));
                push_bus(&mut dg, t, ix.phvdc + k, Complex64::new(hvdc.loss1 - 1.0, 0.0));
            }
        }
        for c in 0..self.vsc.len() {
            let (f, _) = net.branch_ends(self.vsc[c]);
            push_bus(&mut dg, f, ix.pdc + c, Complex64::new(1.0, 0.0));
            if let Some((t, loss)) = self.vsc_loss(c, x) {
                push_bus(&mut dg, t, ix.pac + c, Complex64::new(-1.0, 0.0));
                push_bus(&mut dg, t, ix.qac + c, Complex64::new(0.0, -1.0));

                let r = self.loss_row + c;
                g[r] = x[ix.pdc + c] - x[ix.pac + c] - loss.value;
                dg.push(r, ix.pdc + c, 1.0);
                dg.push(r, ix.pac + c, -1.0 - loss.d[0]);
                dg.push(r, ix.qac + c, -loss.d[1]);
                dg.push(r, ix.vm + t, -loss.d[2]);
            }
        }

        // inequality constraints
        let niq = self.n_rows();
        let mut h = Vec::with_capacity(niq);
        let mut dh = Coo::with_capacity(niq, ix.nx, 10 * self.flows.len() + 2 * niq);

        for fl in &self.flows {
            let (sf, st) = d_sbr_d_v(&fl.y, v[fl.f], v[fl.t]);
            let cols = [ix.va + fl.f, ix.va + fl.t, ix.vm + fl.f, ix.vm + fl.t];
            for end in [sf, st] {
                let (a2, grad, _) = end.abs2();
                let k = h.len();
                let s = fl.slack.map(|j| x[j]).unwrap_or(0.0);
                h.push(a2 - fl.rate2 - s);
                for (&j, &d) in cols.iter().zip(&grad) {
                    dh.push(k, j, d);
                }
                if let Some(j) = fl.slack {
                    dh.push(k, j, -1.0);
                }
            }
        }
        for al in &self.angles {
            let k = h.len();
            let delta = x[ix.va + al.f] - x[ix.va + al.t];
            h.push(al.sign * (delta - al.limit));
            dh.push(k, ix.va + al.f, al.sign);
            dh.push(k, ix.va + al.t, -al.sign);
        }
        for &(c, rate2) in &self.vsc_ratings {
            let k = h.len();
            let (p, q) = (x[ix.pac + c], x[ix.qac + c]);
            h.push(p * p + q * q - rate2);
            dh.push(k, ix.pac + c, 2.0 * p);
            dh.push(k, ix.qac + c, 2.0 * q);
        }
        for (n, &i) in self.soft_v.iter().enumerate() {
            let b = &net.buses()[i];
            let s = ix.s_vm + n;
            let k = h.len();
            h.push(vm[i] - b.vmax - x[s]);
            dh.push(k, ix.vm + i, 1.0);
            dh.push(k, s, -1.0);
            h.push(b.vmin - vm[i] - x[s]);
            dh.push(k + 1, ix.vm + i, -1.0);
            dh.push(k + 1, s, -1.0);
        }

        Ok(Constraints {
            h,
            g,
            dh: dh.to_csr(),
            dg: dg.to_csr(),
        })
    }

    fn hess(&self, x: &[f64], lam: &[f64], mu: &[f64], cost_mult: f64) -> anyhow::Result<Coo<usize, f64>> {
        let net = self.net;
        let ix = &self.ix;
        let nb = net.bus_count();
        let base_mva = net.base_mva();
        let v = self.voltages(x);

        let mut d2 = Coo::with_capacity(ix.nx, ix.nx, 20 * self.y_bus.nnz() + 16 * self.flows.len());

        // objective
        for (k, &g) in self.gens.iter().enumerate() {
            let c2 = self.net.generators()[g].cost.c2;
            if c2 != 0.0 {
                d2.push(ix.pg + k, ix.pg + k, 2.0 * c2 * base_mva * base_mva * cost_mult);
            }
        }

        // power balance
        let lam_at = |row: Option<usize>| row.map(|r| lam[r]).unwrap_or(0.0);
        let c: Vec<Complex64> = (0..nb)
            .map(|i| Complex64::new(lam_at(self.p_row[i]), -lam_at(self.q_row[i])))
            .collect();
        let gxx = d2_sbus_d_v2(&self.y_bus, &v, &c);
        let col = |k: usize| if k < nb { ix.va + k } else { ix.vm + k - nb };
        for ((&r, &k), &w) in gxx.rowidx().iter().zip(gxx.colidx()).zip(gxx.values()) {
            d2.push(col(r), col(k), w);
        }
        for i in 0..nb {
            let z2 = self.sd.d2_demand_d_vm2(i);
            let w = lam_at(self.p_row[i]) * z2.re + lam_at(self.q_row[i]) * z2.im;
            if w != 0.0 {
                d2.push(ix.vm + i, ix.vm + i, w);
            }
        }

        // converter losses
        for c in 0..self.vsc.len() {
            if let Some((t, loss)) = self.vsc_loss(c, x) {
                let w = lam[self.loss_row + c];
                let cols = [ix.pac + c, ix.qac + c, ix.vm + t];
                for a in 0..3 {
                    for b in 0..3 {
                        d2.push(cols[a], cols[b], -w * loss.d2[a][b]);
                    }
                }
            }
        }

        // flow limits
        let mut k = 0;
        for fl in &self.flows {
            let (mu_f, mu_t) = (mu[k], mu[k + 1]);
            if mu_f != 0.0 || mu_t != 0.0 {
                let hh = d2_abr_d_v2(&fl.y, v[fl.f], v[fl.t], mu_f, mu_t);
                let cols = [ix.va + fl.f, ix.va + fl.t, ix.vm + fl.f, ix.vm + fl.t];
                for a in 0..4 {
                    for b in 0..4 {
                        d2.push(cols[a], cols[b], hh[a][b]);
                    }
                }
            }
            k += 2;
        }
        k += self.angles.len();
        for &(c, _) in &self.vsc_ratings {
            d2.push(ix.pac + c, ix.pac + c, 2.0 * mu[k]);
            d2.push(ix.qac + c, ix.qac + c, 2.0 * mu[k]);
            k += 1;
        }

        Ok(d2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Limit {
    Lower,
    Upper,
}

/// Holds generators at their reactive limits by fixing the variable
/// instead of enforcing the limit with a barrier.
pub struct QLimitControl {
    offset: usize,
    qmin: Vec<f64>,
    qmax: Vec<f64>,
    at: Vec<Option<Limit>>,
    switches: Vec<usize>,
}

impl BoundControl for QLimitControl {
    fn update(&mut self, x: &mut [f64], l_x: &[f64], fixed: &mut [bool]) -> usize {
        let mut n = 0;
        for k in 0..self.at.len() {
            let j = self.offset + k;
            match self.at[k] {
                None => {
                    let lim = if x[j] > self.qmax[k] {
                        Some((Limit::Upper, self.qmax[k]))
                    } else if x[j] < self.qmin[k] {
                        Some((Limit::Lower, self.qmin[k]))
                    } else {
                        None
                    };
                    if let Some((side, q)) = lim {
                        x[j] = q;
                        fixed[j] = true;
                        self.at[k] = Some(side);
                        self.switches[k] += 1;
                        n += 1;
                    }
                }
                Some(side) => {
                    // release when the reduced gradient points inside,
                    // leaving room to fix the unit again
                    let inward = match side {
                        Limit::Upper => l_x[j] > 0.0,
                        Limit::Lower => l_x[j] < 0.0,
                    };
                    if inward && self.switches[k] + 2 <= MAX_Q_SWITCHES {
                        fixed[j] = false;
                        self.at[k] = None;
                        self.switches[k] += 1;
                        n += 1;
                    }
                }
            }
        }
        n
    }
}

/// Runs an AC optimal power flow.
///
/// Returns `InvalidConfig` if the network has no generator in service or a
/// warm start does not match the network. Solver breakdowns are reported
/// through `converged` and `status`.
pub fn run_opf(net: &Network, config: &OPFConfig) -> Result<OPFResult> {
    let t0 = Instant::now();
    let base_mva = net.base_mva();

    if net.online_gens().is_empty() {
        return Err(Error::InvalidConfig(format!(
            "{}: no generators in service",
            net.name()
        )));
    }
    if let Some(v0) = &config.acopf_v0 {
        if v0.len() != net.bus_count() {
            return Err(Error::InvalidConfig(format!(
                "acopf_v0 has {} values for {} buses",
                v0.len(),
                net.bus_count()
            )));
        }
    }
    if let Some(s0) = &config.acopf_s0 {
        if s0.len() != net.generator_count() {
            return Err(Error::InvalidConfig(format!(
                "acopf_s0 has {} values for {} generators",
                s0.len(),
                net.generator_count()
            )));
        }
    }

    let problem = AcOpf::new(net, config);
    let ix = problem.var_index().clone();
    let (xmin, xmax) = problem.bounds();

    let mut start = WarmStart {
        voltage: config.acopf_v0.clone(),
        gen: config.acopf_s0.clone(),
        ..WarmStart::default()
    };
    if config.ips_init_with_pf {
        let pf = run_power_flow(net, &config.power_flow_options)?;
        if pf.converged {
            start.voltage = Some(pf.voltage);
            start.gen = Some(
                pf.gen_p
                    .iter()
                    .zip(&pf.gen_q)
                    .map(|(&p, &q)| Complex64::new(p, q))
                    .collect(),
            );
            start.hvdc_p = Some(pf.hvdc_p);
            start.converters = Some(pf.converters);
        } else {
            log::warn!(
                "initializing power flow did not converge ({:?}), using default start",
                pf.status
            );
        }
    }
    let x0 = problem.initial_point(&start, &xmin, &xmax);

    let opt = Options {
        tolerance: config.ips_tolerance,
        max_iterations: config.ips_iterations,
        trust_radius: config.ips_trust_radius,
        trust_radius_min: config.trust_radius_min,
        trust_radius_max: config.trust_radius_max,
        trust_shrink: config.trust_shrink,
        xi: config.xi,
        sigma: config.sigma,
        z0: config.z0,
        alpha_min: config.alpha_min,
        cost_mult: COST_MULT,
    };
    let printer = PrintProgress;
    let progress: Option<&dyn ProgressMonitor> = if config.verbose {
        Some(&printer)
    } else {
        None
    };
    let mut q_control = config.ips_control_q_limits.then(|| problem.q_control());

    let sol = nlp(
        &problem,
        &x0,
        &xmin,
        &xmax,
        q_control.as_mut().map(|c| c as &mut dyn BoundControl),
        &RLU::default(),
        &opt,
        progress,
    )?;

    if sol.converged {
        log::info!("{}: objective {:.4} $/h", net.name(), sol.f);
    } else {
        log::warn!(
            "{}: OPF did not converge after {} iterations ({:?})",
            net.name(),
            sol.iterations,
            sol.status
        );
    }

    Ok(assemble(&problem, &ix, &sol, t0, base_mva))
}

fn assemble(problem: &AcOpf, ix: &VarIndex, sol: &Solution, t0: Instant, base_mva: f64) -> OPFResult {
    let net = problem.net;
    let nb = net.bus_count();
    let nl = net.branch_count();
    let ng = net.generator_count();
    let x = &sol.x;

    let voltage = problem.voltages(x);

    let mut gen_p = vec![0.0; ng];
    let mut gen_q = vec![0.0; ng];
    for (k, &g) in problem.gens.iter().enumerate() {
        gen_p[g] = x[ix.pg + k] * base_mva;
        gen_q[g] = x[ix.qg + k] * base_mva;
    }

    let hvdc_pu: Vec<f64> = (0..problem.hvdc.len()).map(|k| x[ix.phvdc + k]).collect();
    let converters: Vec<ConverterState> = (0..problem.vsc.len())
        .map(|c| ConverterState {
            p_dc: x[ix.pdc + c],
            p_ac: x[ix.pac + c],
            q_ac: x[ix.qac + c],
        })
        .collect();

    let flows = branch_flows(net, &voltage, &hvdc_pu, &converters);
    let losses = losses(&flows);

    let lam_at = |row: Option<usize>| row.map(|r| sol.lam[r]).unwrap_or(0.0);
    let lam_p: Vec<f64> = problem.p_row.iter().map(|&r| lam_at(r)).collect();
    let lam_q: Vec<f64> = problem.q_row.iter().map(|&r| lam_at(r)).collect();
    let (lmp_p, lmp_q) = lmps(base_mva, &lam_p, &lam_q);

    let mut mu = Multipliers {
        mu_vmin: vec![0.0; nb],
        mu_vmax: vec![0.0; nb],
        mu_pmin: vec![0.0; ng],
        mu_pmax: vec![0.0; ng],
        mu_qmin: vec![0.0; ng],
        mu_qmax: vec![0.0; ng],
        mu_sf: vec![0.0; nl],
        mu_st: vec![0.0; nl],
        mu_angmin: vec![0.0; nl],
        mu_angmax: vec![0.0; nl],
    };
    for i in 0..nb {
        mu.mu_vmin[i] = sol.mu_lower[ix.vm + i];
        mu.mu_vmax[i] = sol.mu_upper[ix.vm + i];
    }
    for (k, &g) in problem.gens.iter().enumerate() {
        mu.mu_pmin[g] = sol.mu_lower[ix.pg + k] / base_mva;
        mu.mu_pmax[g] = sol.mu_upper[ix.pg + k] / base_mva;
        mu.mu_qmin[g] = sol.mu_lower[ix.qg + k] / base_mva;
        mu.mu_qmax[g] = sol.mu_upper[ix.qg + k] / base_mva;
        if problem.control_q && sol.fixed[ix.qg + k] {
            let lx = sol.lx[ix.qg + k] / base_mva;
            let gen = &net.generators()[g];
            if x[ix.qg + k] >= gen.qmax / base_mva {
                mu.mu_qmax[g] = (-lx).max(0.0);
            } else {
                mu.mu_qmin[g] = lx.max(0.0);
            }
        }
    }
    let mut k = 0;
    for fl in &problem.flows {
        let rate = fl.rate2.sqrt() * base_mva;
        mu.mu_sf[fl.l] = flow_multiplier(sol.mu[k], rate, base_mva);
        mu.mu_st[fl.l] = flow_multiplier(sol.mu[k + 1], rate, base_mva);
        k += 2;
    }
    for al in &problem.angles {
        let m = sol.mu[k] * PI / 180.0;
        if al.sign > 0.0 {
            mu.mu_angmax[al.l] = m;
        } else {
            mu.mu_angmin[al.l] = m;
        }
        k += 1;
    }
    k += problem.vsc_ratings.len();
    for &i in &problem.soft_v {
        mu.mu_vmax[i] = sol.mu[k];
        mu.mu_vmin[i] = sol.mu[k + 1];
        k += 2;
    }

    OPFResult {
        voltage,
        gen_p,
        gen_q,
        hvdc_p: hvdc_pu.iter().map(|p| p * base_mva).collect(),
        converters,
        branch_flows: flows,
        losses,
        lmp_p,
        lmp_q,
        multipliers: mu,
        objective: sol.f,
        converged: sol.converged,
        error: sol.error(),
        primal_error: sol.feas_cond,
        dual_error: sol.grad_cond,
        complementarity: sol.comp_cond,
        iterations: sol.iterations,
        status: sol.status,
        elapsed: t0.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{format_err, Result};

    use super::*;
    use crate::network::{Branch, Bus, Generator, Load, NetworkBuilder};

    fn two_bus() -> Result<Network> {
        let mut nb = NetworkBuilder::new("two", 100.0);
        nb.add_bus(Bus::new(1, 230.0).slack().limits(0.95, 1.05))?;
        nb.add_bus(Bus::new(2, 230.0).limits(0.95, 1.05))?;
        nb.add_branch(Branch::line(1, 2, 0.01, 0.1, 0.02).rating(150.0))?;
        nb.add_generator(
            Generator::new(1)
                .p_limits(0.0, 200.0)
                .q_limits(-100.0, 100.0)
                .cost(0.01, 10.0, 0.0),
        )?;
        nb.add_load(Load::new(2, 80.0, 20.0))?;
        Ok(nb.build()?)
    }

    fn dense(a: &CSR<usize, f64>) -> Vec<Vec<f64>> {
        let mut d = vec![vec![0.0; a.cols()]; a.rows()];
        for i in 0..a.rows() {
            for k in a.rowptr()[i]..a.rowptr()[i + 1] {
                d[i][a.colidx()[k]] += a.values()[k];
            }
        }
        d
    }

    // Finite difference check of the constraint Jacobians and the
    // Lagrangian Hessian.
    #[test]
    fn test_derivatives() -> Result<()> {
        let net = two_bus()?;
        let config = OPFConfig {
            acopf_mode: AcOpfMode::WithSlacks,
            ..OPFConfig::default()
        };
        let problem = AcOpf::new(&net, &config);
        let nx = problem.var_index().nx;
        let x: Vec<f64> = (0..nx).map(|j| 0.3 + 0.1 * ((j * 7 % 5) as f64)).collect();

        let c0 = problem.gh(&x)?;
        let lam: Vec<f64> = (0..c0.g.len()).map(|k| 1.0 + k as f64).collect();
        let mu: Vec<f64> = (0..c0.h.len()).map(|k| 0.5 + k as f64).collect();
        let hess = problem.hess(&x, &lam, &mu, 1.0)?.to_csr();
        let (dg, dh) = (dense(&c0.dg), dense(&c0.dh));

        let lagrangian_grad = |x: &[f64]| -> Result<Vec<f64>> {
            let c = problem.gh(x)?;
            let (_, df) = problem.f(x);
            let (dg, dh) = (dense(&c.dg), dense(&c.dh));
            Ok((0..nx)
                .map(|j| {
                    df[j]
                        + (0..lam.len()).map(|r| dg[r][j] * lam[r]).sum::<f64>()
                        + (0..mu.len()).map(|r| dh[r][j] * mu[r]).sum::<f64>()
                })
                .collect())
        };

        let step = 1e-6;
        for j in 0..nx {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[j] += step;
            xm[j] -= step;
            let (cp, cm) = (problem.gh(&xp)?, problem.gh(&xm)?);
            for r in 0..c0.g.len() {
                let fd = (cp.g[r] - cm.g[r]) / (2.0 * step);
                if (fd - dg[r][j]).abs() > 1e-5 {
                    return Err(format_err!("dg[{}][{}] = {}, fd {}", r, j, dg[r][j], fd));
                }
            }
            for r in 0..c0.h.len() {
                let fd = (cp.h[r] - cm.h[r]) / (2.0 * step);
                if (fd - dh[r][j]).abs() > 1e-5 {
                    return Err(format_err!("dh[{}][{}] = {}, fd {}", r, j, dh[r][j], fd));
                }
            }
            let (lp, lm) = (lagrangian_grad(&xp)?, lagrangian_grad(&xm)?);
            for i in 0..nx {
                let fd = (lp[i] - lm[i]) / (2.0 * step);
                let an = hess.get(i, j);
                if (fd - an).abs() > 1e-4 * (1.0 + an.abs()) {
                    return Err(format_err!("Lxx[{}][{}] = {}, fd {}", i, j, an, fd));
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_two_bus_dispatch() -> Result<()> {
        let net = two_bus()?;
        let res = run_opf(&net, &OPFConfig::default())?;
        if !res.converged {
            return Err(format_err!("did not converge: {:?}", res.status));
        }
        // single unit covers load plus losses
        let supplied = res.gen_p[0] - res.losses.total.re;
        if (supplied - 80.0).abs() > 1e-4 {
            return Err(format_err!("generation minus losses = {}", supplied));
        }
        // LMP at the generator bus equals its marginal cost
        let marginal = 2.0 * 0.01 * res.gen_p[0] + 10.0;
        if (res.lmp_p[0] - marginal).abs() > 1e-3 {
            return Err(format_err!("lmp {} != marginal cost {}", res.lmp_p[0], marginal));
        }
        Ok(())
    }

    #[test]
    fn test_soft_voltage_bounds() -> Result<()> {
        let net = two_bus()?;
        let config = OPFConfig {
            acopf_mode: AcOpfMode::WithSlacks,
            ..OPFConfig::default()
        };
        let problem = AcOpf::new(&net, &config);
        let ix = problem.var_index();
        let (xmin, xmax) = problem.bounds();
        for i in 0..net.bus_count() {
            if xmin[ix.vm + i] != 0.0 || xmax[ix.vm + i] != f64::INFINITY {
                return Err(format_err!(
                    "Vm[{}] bounds [{}, {}], expected [0, inf]",
                    i,
                    xmin[ix.vm + i],
                    xmax[ix.vm + i]
                ));
            }
        }
        let res = run_opf(&net, &config)?;
        if !res.converged || res.voltage.iter().any(|v| v.norm() < 0.9) {
            return Err(format_err!("{:?}: {:?}", res.status, res.voltage));
        }
        Ok(())
    }

    #[test]
    fn test_q_control_switching() -> Result<()> {
        let mut ctl = QLimitControl {
            offset: 1,
            qmin: vec![-0.5],
            qmax: vec![0.5],
            at: vec![None],
            switches: vec![0],
        };
        let mut x = vec![0.0, 0.7];
        let mut fixed = vec![false, false];

        if ctl.update(&mut x, &[0.0, 0.0], &mut fixed) != 1 || x[1] != 0.5 || !fixed[1] {
            return Err(format_err!("unit must be clipped and fixed at qmax"));
        }
        // gradient says raising Q would lower the Lagrangian: stay fixed
        if ctl.update(&mut x, &[0.0, -1.0], &mut fixed) != 0 {
            return Err(format_err!("unit must stay at its limit"));
        }
        if ctl.update(&mut x, &[0.0, 1.0], &mut fixed) != 1 || fixed[1] {
            return Err(format_err!("unit must be released"));
        }
        x[1] = -0.9;
        ctl.update(&mut x, &[0.0, 0.0], &mut fixed);
        if x[1] != -0.5 || !fixed[1] {
            return Err(format_err!("unit must be fixed at qmin"));
        }
        // switch budget spent: no further release
        if ctl.update(&mut x, &[0.0, -1.0], &mut fixed) != 0 || !fixed[1] {
            return Err(format_err!("switch limit exceeded"));
        }
        Ok(())
    }
}
