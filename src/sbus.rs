use num_complex::Complex64;

use crate::network::{BranchKind, Network};
use crate::zip::ZipLoads;

pub trait SBus {
    /// Net complex bus injections (p.u.) for the given voltage magnitudes.
    fn s_bus(&self, v_m: &[f64]) -> Vec<Complex64>;

    /// Diagonal of the derivative of `s_bus` w.r.t. voltage magnitude.
    fn d_sbus_d_vm(&self, v_m: &[f64]) -> Vec<Complex64>;
}

pub struct MakeSBus<'a> {
    pub net: &'a Network,
    pub sd: &'a ZipLoads,
    /// Complex power (p.u.) of each generator. Off-line units are ignored.
    pub sg: &'a [Complex64],
    /// Transfer (p.u.) of each HVDC link listed by `Network::hvdc_branches`.
    pub hvdc_p: &'a [f64],
}

impl<'a> SBus for MakeSBus<'a> {
    fn s_bus(&self, v_m: &[f64]) -> Vec<Complex64> {
        make_sbus(self.net, self.sd, v_m, self.sg, self.hvdc_p)
    }

    fn d_sbus_d_vm(&self, v_m: &[f64]) -> Vec<Complex64> {
        make_d_sbus_d_vm(self.sd, v_m)
    }
}

/// Builds the vector of complex bus power injections, that is, generation
/// minus load plus HVDC injections, in per unit. ZIP loads are evaluated
/// at `vm`.
pub fn make_sbus(
    net: &Network,
    sd: &ZipLoads,
    vm: &[f64],
    sg: &[Complex64],
    hvdc_p: &[f64],
) -> Vec<Complex64> {
    let nb = net.bus_count();
    let mut s_bus: Vec<Complex64> = (0..nb).map(|k| -sd.demand(k, vm[k])).collect();

    for g in net.online_gens() {
        s_bus[net.gen_bus(g)] += sg[g];
    }

    for (&l, &p) in net.hvdc_branches().iter().zip(hvdc_p) {
        if let BranchKind::Hvdc(hvdc) = &net.branches()[l].kind {
            let (s_f, s_t) = hvdc.injections(p, net.base_mva());
            let (f, t) = net.branch_ends(l);
            s_bus[f] += s_f;
            s_bus[t] += s_t;
        }
    }

    s_bus
}

/// Computes the derivative of the bus injections with respect to
/// voltage magnitude. Only voltage dependent loads contribute.
pub fn make_d_sbus_d_vm(sd: &ZipLoads, vm: &[f64]) -> Vec<Complex64> {
    vm.iter()
        .enumerate()
        .map(|(k, &vm)| -sd.d_demand_d_vm(k, vm))
        .collect()
}

/// Complex generator outputs (p.u.) from the generator set-points.
pub fn gen_setpoints(net: &Network) -> Vec<Complex64> {
    let base_mva = net.base_mva();
    net.generators()
        .iter()
        .map(|g| Complex64::new(g.pg, g.qg) / base_mva)
        .collect()
}

/// HVDC transfers (p.u.) at their scheduled values.
pub fn hvdc_setpoints(net: &Network) -> Vec<f64> {
    net.hvdc_branches()
        .iter()
        .map(|&l| match &net.branches()[l].kind {
            BranchKind::Hvdc(hvdc) => hvdc.p_set / net.base_mva(),
            _ => 0.0,
        })
        .collect()
}
