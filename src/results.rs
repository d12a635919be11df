use num_complex::Complex64;

use crate::jac::ConverterState;
use crate::network::{BranchKind, Network};

/// Complex power (MVA) entering a branch at its from and to ends.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BranchFlow {
    pub s_from: Complex64,
    pub s_to: Complex64,
}

impl BranchFlow {
    pub fn loss(&self) -> Complex64 {
        self.s_from + self.s_to
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Losses {
    /// Series losses of each branch (MW + jMVAr).
    pub branch: Vec<Complex64>,
    pub total: Complex64,
}

/// Computes the flows at both ends of every branch. Out-of-service
/// branches and branches in isolated islands carry zero flow.
///
/// `hvdc_p` holds the transfer (p.u.) of each link returned by
/// `Network::hvdc_branches` and `conv` the state of each converter
/// returned by `Network::vsc_branches`.
pub fn branch_flows(
    net: &Network,
    v: &[Complex64],
    hvdc_p: &[f64],
    conv: &[ConverterState],
) -> Vec<BranchFlow> {
    let base_mva = net.base_mva();
    let mut flows = vec![BranchFlow::default(); net.branch_count()];

    for l in net.branches_where(|_| true) {
        let br = &net.branches()[l];
        let (f, t) = net.branch_ends(l);
        if let Some((s_f, s_t)) = br.flow(v[f], v[t]) {
            flows[l] = BranchFlow {
                s_from: s_f * base_mva,
                s_to: s_t * base_mva,
            };
        }
    }

    for (&l, &p) in net.hvdc_branches().iter().zip(hvdc_p) {
        if let BranchKind::Hvdc(hvdc) = &net.branches()[l].kind {
            let (inj_f, inj_t) = hvdc.injections(p, base_mva);
            flows[l] = BranchFlow {
                s_from: -inj_f * base_mva,
                s_to: -inj_t * base_mva,
            };
        }
    }

    for (&l, cs) in net.vsc_branches().iter().zip(conv) {
        flows[l] = BranchFlow {
            s_from: Complex64::new(cs.p_dc, 0.0) * base_mva,
            s_to: -Complex64::new(cs.p_ac, cs.q_ac) * base_mva,
        };
    }

    flows
}

pub fn losses(flows: &[BranchFlow]) -> Losses {
    let branch: Vec<Complex64> = flows.iter().map(|fl| fl.loss()).collect();
    let total = branch.iter().sum();
    Losses { branch, total }
}

/// Converts power balance multipliers (unscaled, $/h per p.u.) into
/// locational marginal prices in $/MWh and $/MVArh.
pub fn lmps(base_mva: f64, lam_p: &[f64], lam_q: &[f64]) -> (Vec<f64>, Vec<f64>) {
    (
        lam_p.iter().map(|lam| lam / base_mva).collect(),
        lam_q.iter().map(|lam| lam / base_mva).collect(),
    )
}

/// Kuhn-Tucker multipliers of the limits. Voltage multipliers are per
/// p.u., generator and branch flow multipliers per MW/MVAr/MVA and angle
/// multipliers per degree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Multipliers {
    pub mu_vmin: Vec<f64>,
    pub mu_vmax: Vec<f64>,
    pub mu_pmin: Vec<f64>,
    pub mu_pmax: Vec<f64>,
    pub mu_qmin: Vec<f64>,
    pub mu_qmax: Vec<f64>,
    pub mu_sf: Vec<f64>,
    pub mu_st: Vec<f64>,
    pub mu_angmin: Vec<f64>,
    pub mu_angmax: Vec<f64>,
}

/// Converts the multiplier of a squared flow limit `|S|^2 <= rate^2`
/// (p.u.) into the multiplier of `|S| <= rate` in $/MVAh.
pub fn flow_multiplier(mu: f64, rate_mva: f64, base_mva: f64) -> f64 {
    2.0 * mu * (rate_mva / base_mva) / base_mva
}

#[cfg(test)]
mod tests {
    use anyhow::{format_err, Result};
    use num_complex::Complex64;

    use super::*;
    use crate::network::{Branch, Bus, Generator, Hvdc, Load, NetworkBuilder};

    #[test]
    fn test_flows_and_losses() -> Result<()> {
        let mut nb = NetworkBuilder::new("flows", 100.0);
        nb.add_bus(Bus::new(1, 230.0).slack())?;
        nb.add_bus(Bus::new(2, 230.0))?;
        nb.add_bus(Bus::new(3, 230.0))?;
        nb.add_branch(Branch::line(1, 2, 0.02, 0.2, 0.0))?;
        nb.add_branch(Branch::line(2, 3, 0.02, 0.2, 0.0))?;
        nb.add_branch(Branch::line(1, 3, 0.02, 0.2, 0.0).out_of_service())?;
        nb.add_branch(Branch::new(
            1,
            3,
            BranchKind::Hvdc(Hvdc {
                p_set: 20.0,
                loss0: 1.0,
                loss1: 0.01,
                q_from: 0.0,
                q_to: 5.0,
                pmin: 0.0,
                pmax: 50.0,
            }),
        ))?;
        nb.add_generator(Generator::new(1))?;
        nb.add_load(Load::new(2, 10.0, 0.0))?;
        nb.add_load(Load::new(3, 10.0, 0.0))?;
        let net = nb.build()?;

        let v = vec![
            Complex64::new(1.0, 0.0),
            Complex64::from_polar(0.98, -0.05),
            Complex64::new(1.0, 0.0),
        ];
        let flows = branch_flows(&net, &v, &[0.2], &[]);

        if flows[2] != BranchFlow::default() {
            return Err(format_err!("out-of-service branch must carry no flow"));
        }
        // Series loss of a line equals r |I|^2.
        let i = (v[0] - v[1]) / Complex64::new(0.02, 0.2);
        let expect = 0.02 * i.norm_sqr() * 100.0;
        if (flows[0].loss().re - expect).abs() > 1e-9 {
            return Err(format_err!("line loss {} != {}", flows[0].loss().re, expect));
        }
        // 1 MW fixed + 1% of 20 MW.
        if (flows[3].loss().re - 1.2).abs() > 1e-9 {
            return Err(format_err!("hvdc loss {}", flows[3].loss().re));
        }

        let ls = losses(&flows);
        if (ls.total - ls.branch.iter().sum::<Complex64>()).norm() > 1e-12 {
            return Err(format_err!("total loss is not the branch sum"));
        }
        Ok(())
    }
}
