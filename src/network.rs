use std::collections::HashMap;
use std::f64::consts::PI;

use num_complex::Complex64;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    Slack,
    PV,
    PQ,
}

/// A network node. Voltage magnitude is in p.u., angle in degrees and
/// shunt values in MW/MVAr consumed at 1 p.u. voltage.
#[derive(Debug, Clone, PartialEq)]
pub struct Bus {
    pub id: usize,
    pub base_kv: f64,
    pub bus_type: BusType,
    pub vm: f64,
    pub va: f64,
    pub vmin: f64,
    pub vmax: f64,
    pub gs: f64,
    pub bs: f64,
    /// DC buses carry a real voltage only and ignore `bus_type`.
    pub is_dc: bool,
}

impl Bus {
    pub fn new(id: usize, base_kv: f64) -> Self {
        Self {
            id,
            base_kv,
            bus_type: BusType::PQ,
            vm: 1.0,
            va: 0.0,
            vmin: 0.9,
            vmax: 1.1,
            gs: 0.0,
            bs: 0.0,
            is_dc: false,
        }
    }

    pub fn dc(id: usize, base_kv: f64) -> Self {
        Self {
            is_dc: true,
            ..Self::new(id, base_kv)
        }
    }

    pub fn slack(mut self) -> Self {
        self.bus_type = BusType::Slack;
        self
    }

    pub fn pv(mut self) -> Self {
        self.bus_type = BusType::PV;
        self
    }

    pub fn voltage(mut self, vm: f64, va: f64) -> Self {
        self.vm = vm;
        self.va = va;
        self
    }

    pub fn limits(mut self, vmin: f64, vmax: f64) -> Self {
        self.vmin = vmin;
        self.vmax = vmax;
        self
    }

    pub fn shunt(mut self, gs: f64, bs: f64) -> Self {
        self.gs = gs;
        self.bs = bs;
        self
    }
}

/// Set-points a converter may hold. Voltages are in p.u., powers in
/// MW/MVAr and angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VscControl {
    /// AC-side voltage magnitude.
    Vac(f64),
    /// DC-side voltage.
    Vdc(f64),
    /// Power withdrawn from the DC bus.
    Pdc(f64),
    /// Reactive power injected into the AC bus.
    Qac(f64),
    /// AC-side voltage angle.
    Angle(f64),
}

impl VscControl {
    fn kind(&self) -> usize {
        match self {
            VscControl::Vac(_) => 0,
            VscControl::Vdc(_) => 1,
            VscControl::Pdc(_) => 2,
            VscControl::Qac(_) => 3,
            VscControl::Angle(_) => 4,
        }
    }
}

/// Point-to-point DC link modelled as a pair of injections.
#[derive(Debug, Clone, PartialEq)]
pub struct Hvdc {
    /// Power withdrawn at the from bus (MW).
    pub p_set: f64,
    /// Constant loss (MW).
    pub loss0: f64,
    /// Linear loss coefficient.
    pub loss1: f64,
    /// Reactive injection at the from bus (MVAr).
    pub q_from: f64,
    /// Reactive injection at the to bus (MVAr).
    pub q_to: f64,
    pub pmin: f64,
    pub pmax: f64,
}

impl Hvdc {
    /// Complex injections (p.u.) at the from and to buses for a
    /// transfer of `p` (p.u.).
    pub fn injections(&self, p: f64, base_mva: f64) -> (Complex64, Complex64) {
        let loss = self.loss0 / base_mva + self.loss1 * p;
        (
            Complex64::new(-p, self.q_from / base_mva),
            Complex64::new(p - loss, self.q_to / base_mva),
        )
    }
}

/// AC/DC converter. The from bus is the DC side, the to bus the AC side.
#[derive(Debug, Clone, PartialEq)]
pub struct Vsc {
    /// Loss coefficients `[a1, a2, a3]` of `a1 + a2*I + a3*I^2` (p.u.).
    pub loss: [f64; 3],
    pub control1: VscControl,
    pub control2: VscControl,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BranchKind {
    Line {
        r: f64,
        x: f64,
        b: f64,
    },
    Transformer {
        r: f64,
        x: f64,
        b: f64,
        tap: f64,
        /// Phase shift (degrees).
        shift: f64,
    },
    DcLine {
        r: f64,
    },
    Hvdc(Hvdc),
    Vsc(Vsc),
}

impl BranchKind {
    pub fn name(&self) -> &'static str {
        match self {
            BranchKind::Line { .. } => "line",
            BranchKind::Transformer { .. } => "transformer",
            BranchKind::DcLine { .. } => "dc line",
            BranchKind::Hvdc(_) => "hvdc link",
            BranchKind::Vsc(_) => "converter",
        }
    }
}

/// Admittance parameters of a two-port branch model.
#[derive(Debug, Clone, Copy)]
pub struct TwoPort {
    pub yff: Complex64,
    pub yft: Complex64,
    pub ytf: Complex64,
    pub ytt: Complex64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub from: usize,
    pub to: usize,
    pub status: bool,
    /// Apparent power limit (MVA). `None` is unlimited.
    pub rating: Option<f64>,
    /// Angle difference limits (degrees).
    pub angmin: f64,
    pub angmax: f64,
    pub kind: BranchKind,
}

impl Branch {
    pub fn new(from: usize, to: usize, kind: BranchKind) -> Self {
        Self {
            from,
            to,
            status: true,
            rating: None,
            angmin: -360.0,
            angmax: 360.0,
            kind,
        }
    }

    pub fn line(from: usize, to: usize, r: f64, x: f64, b: f64) -> Self {
        Self::new(from, to, BranchKind::Line { r, x, b })
    }

    pub fn transformer(from: usize, to: usize, r: f64, x: f64, tap: f64, shift: f64) -> Self {
        Self::new(
            from,
            to,
            BranchKind::Transformer {
                r,
                x,
                b: 0.0,
                tap,
                shift,
            },
        )
    }

    pub fn dc_line(from: usize, to: usize, r: f64) -> Self {
        Self::new(from, to, BranchKind::DcLine { r })
    }

    pub fn rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn angle_limits(mut self, angmin: f64, angmax: f64) -> Self {
        self.angmin = angmin;
        self.angmax = angmax;
        self
    }

    pub fn out_of_service(mut self) -> Self {
        self.status = false;
        self
    }

    /// Pi-model admittances, for branches that have one.
    pub fn admittance(&self) -> Option<TwoPort> {
        if !self.status {
            return None;
        }
        match &self.kind {
            BranchKind::Line { r, x, b } => Some(pi_model(*r, *x, *b, 1.0, 0.0)),
            BranchKind::Transformer {
                r,
                x,
                b,
                tap,
                shift,
            } => Some(pi_model(*r, *x, *b, *tap, *shift)),
            BranchKind::DcLine { r } => {
                let g = Complex64::new(1.0 / r, 0.0);
                Some(TwoPort {
                    yff: g,
                    yft: -g,
                    ytf: -g,
                    ytt: g,
                })
            }
            BranchKind::Hvdc(_) | BranchKind::Vsc(_) => None,
        }
    }

    /// Complex power (p.u.) entering the branch at each end.
    pub fn flow(&self, vf: Complex64, vt: Complex64) -> Option<(Complex64, Complex64)> {
        self.admittance().map(|y| {
            let i_f = y.yff * vf + y.yft * vt;
            let i_t = y.ytf * vf + y.ytt * vt;
            (vf * i_f.conj(), vt * i_t.conj())
        })
    }

    pub fn control(&self) -> Option<(VscControl, VscControl)> {
        match &self.kind {
            BranchKind::Vsc(vsc) => Some((vsc.control1, vsc.control2)),
            _ => None,
        }
    }

    /// True for branches that tie the AC buses at both ends into one island.
    pub fn is_ac(&self) -> bool {
        matches!(
            self.kind,
            BranchKind::Line { .. } | BranchKind::Transformer { .. }
        )
    }

    /// Finite angle difference limits in radians.
    pub fn angle_limits_rad(&self) -> Option<(f64, f64)> {
        let lo = if self.angmin > -360.0 {
            self.angmin * PI / 180.0
        } else {
            f64::NEG_INFINITY
        };
        let hi = if self.angmax < 360.0 {
            self.angmax * PI / 180.0
        } else {
            f64::INFINITY
        };
        if lo.is_finite() || hi.is_finite() {
            Some((lo, hi))
        } else {
            None
        }
    }
}

fn pi_model(r: f64, x: f64, b: f64, tap: f64, shift: f64) -> TwoPort {
    let y_s = Complex64::new(1.0, 0.0) / Complex64::new(r, x);
    let t = if tap == 0.0 { 1.0 } else { tap };
    let tap = Complex64::from_polar(t, shift * PI / 180.0);

    let y_tt = y_s + Complex64::new(0.0, b / 2.0);
    TwoPort {
        yff: y_tt / (tap * tap.conj()),
        yft: -y_s / tap.conj(),
        ytf: -y_s / tap,
        ytt: y_tt,
    }
}

/// Quadratic generator cost `c2*P^2 + c1*P + c0` with `P` in MW.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GenCost {
    pub c2: f64,
    pub c1: f64,
    pub c0: f64,
}

impl GenCost {
    pub fn eval(&self, p: f64) -> f64 {
        (self.c2 * p + self.c1) * p + self.c0
    }
}

/// Powers are in MW/MVAr.
#[derive(Debug, Clone, PartialEq)]
pub struct Generator {
    pub bus: usize,
    pub status: bool,
    pub pg: f64,
    pub qg: f64,
    pub pmin: f64,
    pub pmax: f64,
    pub qmin: f64,
    pub qmax: f64,
    pub vg: f64,
    pub cost: GenCost,
    /// Dispatchable in the OPF. Otherwise held at `pg`.
    pub controllable: bool,
}

impl Generator {
    pub fn new(bus: usize) -> Self {
        Self {
            bus,
            status: true,
            pg: 0.0,
            qg: 0.0,
            pmin: 0.0,
            pmax: f64::INFINITY,
            qmin: f64::NEG_INFINITY,
            qmax: f64::INFINITY,
            vg: 1.0,
            cost: GenCost::default(),
            controllable: true,
        }
    }

    pub fn dispatch(mut self, pg: f64, vg: f64) -> Self {
        self.pg = pg;
        self.vg = vg;
        self
    }

    pub fn p_limits(mut self, pmin: f64, pmax: f64) -> Self {
        self.pmin = pmin;
        self.pmax = pmax;
        self
    }

    pub fn q_limits(mut self, qmin: f64, qmax: f64) -> Self {
        self.qmin = qmin;
        self.qmax = qmax;
        self
    }

    pub fn cost(mut self, c2: f64, c1: f64, c0: f64) -> Self {
        self.cost = GenCost { c2, c1, c0 };
        self
    }

    pub fn fixed(mut self) -> Self {
        self.controllable = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadModel {
    ConstantPower,
    /// Fractions of constant power, current and impedance, in that order,
    /// for the active and reactive parts.
    Zip { pw: [f64; 3], qw: [f64; 3] },
}

impl LoadModel {
    pub(crate) fn weights(&self) -> ([f64; 3], [f64; 3]) {
        match self {
            LoadModel::ConstantPower => ([1.0, 0.0, 0.0], [1.0, 0.0, 0.0]),
            LoadModel::Zip { pw, qw } => (*pw, *qw),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Load {
    pub bus: usize,
    pub p: f64,
    pub q: f64,
    pub model: LoadModel,
}

impl Load {
    pub fn new(bus: usize, p: f64, q: f64) -> Self {
        Self {
            bus,
            p,
            q,
            model: LoadModel::ConstantPower,
        }
    }

    pub fn zip(mut self, pw: [f64; 3], qw: [f64; 3]) -> Self {
        self.model = LoadModel::Zip { pw, qw };
        self
    }
}

/// Mutable network under construction.
pub struct NetworkBuilder {
    name: String,
    base_mva: f64,
    buses: Vec<Bus>,
    index: HashMap<usize, usize>,
    branches: Vec<Branch>,
    generators: Vec<Generator>,
    loads: Vec<Load>,
}

impl NetworkBuilder {
    pub fn new(name: impl Into<String>, base_mva: f64) -> Self {
        Self {
            name: name.into(),
            base_mva,
            buses: Vec::new(),
            index: HashMap::new(),
            branches: Vec::new(),
            generators: Vec::new(),
            loads: Vec::new(),
        }
    }

    fn bus(&self, id: usize) -> Result<&Bus> {
        self.index
            .get(&id)
            .map(|&i| &self.buses[i])
            .ok_or(Error::UnknownBus(id))
    }

    pub fn add_bus(&mut self, bus: Bus) -> Result<&mut Self> {
        if self.index.contains_key(&bus.id) {
            return Err(Error::DuplicateBus(bus.id));
        }
        self.index.insert(bus.id, self.buses.len());
        self.buses.push(bus);
        Ok(self)
    }

    pub fn add_branch(&mut self, branch: Branch) -> Result<&mut Self> {
        let f_dc = self.bus(branch.from)?.is_dc;
        let t_dc = self.bus(branch.to)?.is_dc;
        if branch.from == branch.to {
            return Err(Error::Topology(format!(
                "branch {}-{} connects a bus to itself",
                branch.from, branch.to
            )));
        }
        if let Some(rating) = branch.rating {
            if rating <= 0.0 {
                return Err(Error::Topology(format!(
                    "branch {}-{} rating must be positive: {}",
                    branch.from, branch.to, rating
                )));
            }
        }
        let ends_ok = match &branch.kind {
            BranchKind::Line { .. } | BranchKind::Transformer { .. } | BranchKind::Hvdc(_) => {
                !f_dc && !t_dc
            }
            BranchKind::DcLine { r } => {
                if *r <= 0.0 {
                    return Err(Error::Topology(format!(
                        "dc line {}-{} resistance must be positive",
                        branch.from, branch.to
                    )));
                }
                f_dc && t_dc
            }
            BranchKind::Vsc(vsc) => {
                if vsc.control1.kind() == vsc.control2.kind() {
                    return Err(Error::Topology(format!(
                        "converter {}-{} must hold two different set-points",
                        branch.from, branch.to
                    )));
                }
                f_dc && !t_dc
            }
        };
        if !ends_ok {
            return Err(Error::Topology(format!(
                "{} {}-{} connects incompatible bus kinds",
                branch.kind.name(),
                branch.from,
                branch.to
            )));
        }
        self.branches.push(branch);
        Ok(self)
    }

    pub fn add_generator(&mut self, gen: Generator) -> Result<&mut Self> {
        if self.bus(gen.bus)?.is_dc {
            return Err(Error::Topology(format!(
                "generator connected to dc bus {}",
                gen.bus
            )));
        }
        self.generators.push(gen);
        Ok(self)
    }

    pub fn add_load(&mut self, load: Load) -> Result<&mut Self> {
        self.bus(load.bus)?;
        self.loads.push(load);
        Ok(self)
    }

    /// Validates the topology and freezes the network.
    pub fn build(self) -> Result<Network> {
        let nb = self.buses.len();
        let ix = |id: usize| self.index[&id];

        let f: Vec<usize> = self.branches.iter().map(|br| ix(br.from)).collect();
        let t: Vec<usize> = self.branches.iter().map(|br| ix(br.to)).collect();
        let gen_bus: Vec<usize> = self.generators.iter().map(|g| ix(g.bus)).collect();
        let load_bus: Vec<usize> = self.loads.iter().map(|d| ix(d.bus)).collect();

        // Buses joined by in-service lines, transformers and dc lines.
        let mut uf = UnionFind::new(nb);
        for (l, br) in self.branches.iter().enumerate() {
            if br.status && (br.is_ac() || matches!(br.kind, BranchKind::DcLine { .. })) {
                uf.union(f[l], t[l]);
            }
        }
        let mut island_of = vec![0; nb];
        let mut islands: Vec<Island> = Vec::new();
        let mut roots = HashMap::<usize, usize>::new();
        for i in 0..nb {
            let root = uf.find(i);
            let k = *roots.entry(root).or_insert_with(|| {
                islands.push(Island {
                    buses: Vec::new(),
                    is_dc: self.buses[i].is_dc,
                    reference: None,
                    energized: false,
                });
                islands.len() - 1
            });
            island_of[i] = k;
            islands[k].buses.push(i);
        }

        let mut has_gen = vec![false; islands.len()];
        for (g, gen) in self.generators.iter().enumerate() {
            if gen.status {
                has_gen[island_of[gen_bus[g]]] = true;
            }
        }
        let mut has_load = vec![false; islands.len()];
        for (d, load) in self.loads.iter().enumerate() {
            if load.p != 0.0 || load.q != 0.0 {
                has_load[island_of[load_bus[d]]] = true;
            }
        }
        let mut has_vsc = vec![false; islands.len()];
        let mut angle_ref = vec![false; islands.len()];
        let mut hvdc_end = vec![false; islands.len()];
        for (l, br) in self.branches.iter().enumerate() {
            if !br.status {
                continue;
            }
            match &br.kind {
                BranchKind::Vsc(vsc) => {
                    has_vsc[island_of[f[l]]] = true;
                    has_vsc[island_of[t[l]]] = true;
                    if matches!(vsc.control1, VscControl::Angle(_))
                        || matches!(vsc.control2, VscControl::Angle(_))
                    {
                        angle_ref[island_of[t[l]]] = true;
                    }
                }
                BranchKind::Hvdc(_) => {
                    hvdc_end[island_of[f[l]]] = true;
                    hvdc_end[island_of[t[l]]] = true;
                }
                _ => {}
            }
        }

        let mut bus_types: Vec<BusType> = self.buses.iter().map(|b| b.bus_type).collect();
        let gen_at: Vec<bool> = {
            let mut v = vec![false; nb];
            for (g, gen) in self.generators.iter().enumerate() {
                if gen.status {
                    v[gen_bus[g]] = true;
                }
            }
            v
        };
        for (i, bt) in bus_types.iter_mut().enumerate() {
            if self.buses[i].is_dc {
                *bt = BusType::PQ;
            } else if *bt == BusType::PV && !gen_at[i] {
                log::debug!("bus {} has no generator in service, treated as PQ", self.buses[i].id);
                *bt = BusType::PQ;
            }
        }

        for (k, island) in islands.iter_mut().enumerate() {
            if island.is_dc {
                island.energized = has_vsc[k];
                continue;
            }
            let slack: Vec<usize> = island
                .buses
                .iter()
                .copied()
                .filter(|&i| self.buses[i].bus_type == BusType::Slack)
                .collect();
            if slack.len() > 1 {
                return Err(Error::Topology(format!(
                    "island has {} slack buses: {:?}",
                    slack.len(),
                    slack.iter().map(|&i| self.buses[i].id).collect::<Vec<_>>()
                )));
            }
            let slack = match slack.first() {
                Some(&s) if !gen_at[s] => {
                    log::warn!(
                        "slack bus {} has no generator in service, treated as PQ",
                        self.buses[s].id
                    );
                    bus_types[s] = BusType::PQ;
                    None
                }
                other => other.copied(),
            };
            if let Some(s) = slack {
                island.reference = Some(s);
                island.energized = true;
            } else if has_gen[k] {
                let (g, _) = self
                    .generators
                    .iter()
                    .enumerate()
                    .filter(|(g, gen)| gen.status && island_of[gen_bus[*g]] == k)
                    .fold((usize::MAX, f64::NEG_INFINITY), |best, (g, gen)| {
                        if gen.pmax > best.1 {
                            (g, gen.pmax)
                        } else {
                            best
                        }
                    });
                let s = gen_bus[g];
                log::warn!(
                    "island without slack bus, using bus {} as reference",
                    self.buses[s].id
                );
                bus_types[s] = BusType::Slack;
                island.reference = Some(s);
                island.energized = true;
            } else if angle_ref[k] {
                island.energized = true;
            } else if has_load[k] || hvdc_end[k] || has_vsc[k] {
                return Err(Error::Topology(format!(
                    "island containing bus {} has load but no source or reference",
                    self.buses[island.buses[0]].id
                )));
            }
        }

        // Converters may not override a generator voltage or reference angle.
        for (l, br) in self.branches.iter().enumerate() {
            if let (true, Some((c1, c2))) = (br.status, br.control()) {
                for c in [c1, c2] {
                    if matches!(c, VscControl::Vac(_) | VscControl::Angle(_))
                        && bus_types[t[l]] != BusType::PQ
                    {
                        return Err(Error::Topology(format!(
                            "converter {}-{} controls voltage at generator bus {}",
                            br.from, br.to, br.to
                        )));
                    }
                }
            }
        }

        let isolated: Vec<bool> = (0..nb).map(|i| !islands[island_of[i]].energized).collect();

        log::debug!(
            "{}: {} buses, {} branches, {} generators, {} islands",
            self.name,
            nb,
            self.branches.len(),
            self.generators.len(),
            islands.len()
        );

        Ok(Network {
            name: self.name,
            base_mva: self.base_mva,
            buses: self.buses,
            index: self.index,
            branches: self.branches,
            generators: self.generators,
            loads: self.loads,
            f,
            t,
            gen_bus,
            load_bus,
            bus_types,
            isolated,
            islands,
        })
    }
}

/// Connected group of buses.
#[derive(Debug, Clone)]
pub struct Island {
    pub buses: Vec<usize>,
    pub is_dc: bool,
    /// Internal index of the reference bus.
    pub reference: Option<usize>,
    /// False for groups with nothing to supply them.
    pub energized: bool,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// Immutable, validated network snapshot. Internal bus indexes follow
/// the order in which buses were added.
#[derive(Debug, Clone)]
pub struct Network {
    name: String,
    base_mva: f64,
    buses: Vec<Bus>,
    index: HashMap<usize, usize>,
    branches: Vec<Branch>,
    generators: Vec<Generator>,
    loads: Vec<Load>,

    f: Vec<usize>,
    t: Vec<usize>,
    gen_bus: Vec<usize>,
    load_bus: Vec<usize>,
    bus_types: Vec<BusType>,
    isolated: Vec<bool>,
    islands: Vec<Island>,
}

impl Network {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn base_mva(&self) -> f64 {
        self.base_mva
    }
    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }
    pub fn generators(&self) -> &[Generator] {
        &self.generators
    }
    pub fn loads(&self) -> &[Load] {
        &self.loads
    }
    pub fn islands(&self) -> &[Island] {
        &self.islands
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }
    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }
    pub fn generator_count(&self) -> usize {
        self.generators.len()
    }

    pub fn bus_index(&self, id: usize) -> Result<usize> {
        self.index.get(&id).copied().ok_or(Error::UnknownBus(id))
    }

    /// Internal indexes of the from and to buses of branch `l`.
    pub fn branch_ends(&self, l: usize) -> (usize, usize) {
        (self.f[l], self.t[l])
    }
    pub fn gen_bus(&self, g: usize) -> usize {
        self.gen_bus[g]
    }
    pub fn load_bus(&self, d: usize) -> usize {
        self.load_bus[d]
    }

    /// Bus types after demoting generator-less PV buses and promoting
    /// island references.
    pub fn bus_types(&self) -> &[BusType] {
        &self.bus_types
    }

    /// Buses in de-energized islands.
    pub fn isolated(&self) -> &[bool] {
        &self.isolated
    }

    /// Indexes of in-service generators.
    pub fn online_gens(&self) -> Vec<usize> {
        (0..self.generators.len())
            .filter(|&g| self.generators[g].status && !self.isolated[self.gen_bus[g]])
            .collect()
    }

    /// Indexes of in-service branches of the given kind.
    pub fn branches_where(&self, pred: impl Fn(&BranchKind) -> bool) -> Vec<usize> {
        self.branches
            .iter()
            .enumerate()
            .filter(|(l, br)| br.status && !self.isolated[self.f[*l]] && pred(&br.kind))
            .map(|(l, _)| l)
            .collect()
    }

    pub fn vsc_branches(&self) -> Vec<usize> {
        self.branches_where(|k| matches!(k, BranchKind::Vsc(_)))
    }

    pub fn hvdc_branches(&self) -> Vec<usize> {
        self.branches_where(|k| matches!(k, BranchKind::Hvdc(_)))
    }
}
