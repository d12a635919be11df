use std::f64::consts::PI;

use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csc::CSC;
use sparsetools::csr::CSR;

use crate::bus_types::BusTypes;
use crate::d_sbus_dv::{d_sbus_d_v, s_net};
use crate::error::{Error, Result};
use crate::network::{BranchKind, Network, Vsc, VscControl};
use crate::sbus::SBus;

/// Operating point of a converter, in per unit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConverterState {
    /// Power withdrawn from the DC bus.
    pub p_dc: f64,
    /// Active power injected into the AC bus.
    pub p_ac: f64,
    /// Reactive power injected into the AC bus.
    pub q_ac: f64,
}

/// Maps power flow unknowns and equations to bus and converter indexes.
///
/// Unknowns are `[Va(pv, pq), Vm(pq, dc), (Pdc, Pac, Qac) per converter]`.
/// Equations are `[P(pv, pq, dc), Q(pq), (loss, control1, control2) per
/// converter]`.
#[derive(Debug, Clone)]
pub struct PfLayout {
    pub vsc: Vec<usize>,
    va_col: Vec<Option<usize>>,
    vm_col: Vec<Option<usize>>,
    p_row: Vec<Option<usize>>,
    q_row: Vec<Option<usize>>,
    n_bus_vars: usize,
    n_bus_eqs: usize,
}

impl PfLayout {
    pub fn new(net: &Network, bt: &BusTypes) -> Self {
        let nb = net.bus_count();
        let mut va_col = vec![None; nb];
        let mut vm_col = vec![None; nb];
        let mut p_row = vec![None; nb];
        let mut q_row = vec![None; nb];

        let mut k = 0;
        for &i in bt.pv.iter().chain(&bt.pq) {
            va_col[i] = Some(k);
            k += 1;
        }
        for &i in bt.pq.iter().chain(&bt.dc) {
            vm_col[i] = Some(k);
            k += 1;
        }
        let n_bus_vars = k;

        k = 0;
        for &i in bt.pv.iter().chain(&bt.pq).chain(&bt.dc) {
            p_row[i] = Some(k);
            k += 1;
        }
        for &i in bt.pq.iter() {
            q_row[i] = Some(k);
            k += 1;
        }

        Self {
            vsc: net.vsc_branches(),
            va_col,
            vm_col,
            p_row,
            q_row,
            n_bus_vars,
            n_bus_eqs: k,
        }
    }

    /// Number of unknowns (and equations).
    pub fn nx(&self) -> usize {
        self.n_bus_vars + 3 * self.vsc.len()
    }

    fn conv_col(&self, c: usize) -> usize {
        self.n_bus_vars + 3 * c
    }

    fn conv_row(&self, c: usize) -> usize {
        self.n_bus_eqs + 3 * c
    }

    /// Applies the Newton update `dx` to the voltage and converter state.
    pub fn update(
        &self,
        dx: &[f64],
        va: &mut [f64],
        vm: &mut [f64],
        conv: &mut [ConverterState],
    ) {
        for (i, col) in self.va_col.iter().enumerate() {
            if let Some(j) = col {
                va[i] += dx[*j];
            }
        }
        for (i, col) in self.vm_col.iter().enumerate() {
            if let Some(j) = col {
                vm[i] += dx[*j];
            }
        }
        for (c, cs) in conv.iter_mut().enumerate() {
            let j = self.conv_col(c);
            cs.p_dc += dx[j];
            cs.p_ac += dx[j + 1];
            cs.q_ac += dx[j + 2];
        }
    }

    /// Evaluates the mismatch vector `F(x)`.
    pub fn mismatch(
        &self,
        net: &Network,
        y_bus: &CSR<usize, Complex64>,
        s_bus: &dyn SBus,
        v: &[Complex64],
        conv: &[ConverterState],
    ) -> Vec<f64> {
        let vm: Vec<f64> = v.iter().map(|v| v.norm()).collect();
        let mut mis: Vec<Complex64> = s_net(y_bus, v)
            .iter()
            .zip(s_bus.s_bus(&vm))
            .map(|(s, sb)| s - sb)
            .collect();
        for (c, &l) in self.vsc.iter().enumerate() {
            let (f, t) = net.branch_ends(l);
            mis[f] += conv[c].p_dc;
            mis[t] -= Complex64::new(conv[c].p_ac, conv[c].q_ac);
        }

        let mut fx = vec![0.0; self.nx()];
        for (i, m) in mis.iter().enumerate() {
            if let Some(r) = self.p_row[i] {
                fx[r] = m.re;
            }
            if let Some(r) = self.q_row[i] {
                fx[r] = m.im;
            }
        }

        for (c, &l) in self.vsc.iter().enumerate() {
            let (f, t) = net.branch_ends(l);
            if let BranchKind::Vsc(vsc) = &net.branches()[l].kind {
                let cs = conv[c];
                let r = self.conv_row(c);
                let loss = vsc.loss_at(cs.p_ac, cs.q_ac, vm[t]).value;
                fx[r] = cs.p_dc - cs.p_ac - loss;
                for (k, ctrl) in [vsc.control1, vsc.control2].iter().enumerate() {
                    fx[r + 1 + k] = control_residual(ctrl, net.base_mva(), &cs, v[f], v[t]);
                }
            }
        }
        fx
    }
}

fn control_residual(
    ctrl: &VscControl,
    base_mva: f64,
    cs: &ConverterState,
    v_dc: Complex64,
    v_ac: Complex64,
) -> f64 {
    match *ctrl {
        VscControl::Vac(vset) => v_ac.norm() - vset,
        VscControl::Vdc(vset) => v_dc.norm() - vset,
        VscControl::Pdc(p) => cs.p_dc - p / base_mva,
        VscControl::Qac(q) => cs.q_ac - q / base_mva,
        VscControl::Angle(a) => v_ac.arg() - a * PI / 180.0,
    }
}

/// Forms the power flow Jacobian for the mixed AC/DC formulation
/// described by `layout`.
///
/// The units for all quantities are in per unit with radians for voltage
/// angles. Returns `SingularJacobian` if any row or column is empty.
pub fn make_jac(
    net: &Network,
    layout: &PfLayout,
    y_bus: &CSR<usize, Complex64>,
    s_bus: &dyn SBus,
    v: &[Complex64],
    conv: &[ConverterState],
) -> Result<CSC<usize, f64>> {
    let n = layout.nx();
    let vm: Vec<f64> = v.iter().map(|v| v.norm()).collect();

    let (d_va, d_vm) = d_sbus_d_v(y_bus, v);
    let mut jac = Coo::with_capacity(n, n, 2 * (d_va.nnz() + d_vm.nnz()));

    let mut push_bus = |jac: &mut Coo<usize, f64>, i: usize, col: Option<usize>, d: Complex64| {
        if let Some(c) = col {
            if let Some(r) = layout.p_row[i] {
                jac.push(r, c, d.re);
            }
            if let Some(r) = layout.q_row[i] {
                jac.push(r, c, d.im);
            }
        }
    };
    for ((&i, &j), &d) in d_va.rowidx().iter().zip(d_va.colidx()).zip(d_va.values()) {
        push_bus(&mut jac, i, layout.va_col[j], d);
    }
    for ((&i, &j), &d) in d_vm.rowidx().iter().zip(d_vm.colidx()).zip(d_vm.values()) {
        push_bus(&mut jac, i, layout.vm_col[j], d);
    }
    for (i, d) in s_bus.d_sbus_d_vm(&vm).into_iter().enumerate() {
        if d != Complex64::default() {
            push_bus(&mut jac, i, layout.vm_col[i], -d);
        }
    }

    for (c, &l) in layout.vsc.iter().enumerate() {
        let (f, t) = net.branch_ends(l);
        let vsc: &Vsc = match &net.branches()[l].kind {
            BranchKind::Vsc(vsc) => vsc,
            _ => continue,
        };
        let cs = conv[c];
        let (j_pdc, j_pac, j_qac) = {
            let j = layout.conv_col(c);
            (j, j + 1, j + 2)
        };
        let r = layout.conv_row(c);

        // bus injections
        if let Some(rf) = layout.p_row[f] {
            jac.push(rf, j_pdc, 1.0);
        }
        if let Some(rt) = layout.p_row[t] {
            jac.push(rt, j_pac, -1.0);
        }
        if let Some(rt) = layout.q_row[t] {
            jac.push(rt, j_qac, -1.0);
        }

        // loss balance
        let loss = vsc.loss_at(cs.p_ac, cs.q_ac, vm[t]);
        jac.push(r, j_pdc, 1.0);
        jac.push(r, j_pac, -1.0 - loss.d[0]);
        jac.push(r, j_qac, -loss.d[1]);
        if let Some(c_vm) = layout.vm_col[t] {
            jac.push(r, c_vm, -loss.d[2]);
        }

        for (k, ctrl) in [vsc.control1, vsc.control2].iter().enumerate() {
            let row = r + 1 + k;
            let col = match ctrl {
                VscControl::Vac(_) => layout.vm_col[t],
                VscControl::Vdc(_) => layout.vm_col[f],
                VscControl::Pdc(_) => Some(j_pdc),
                VscControl::Qac(_) => Some(j_qac),
                VscControl::Angle(_) => layout.va_col[t],
            };
            match col {
                Some(col) => jac.push(row, col, 1.0),
                None => {
                    return Err(Error::SingularJacobian(format!(
                        "converter {} controls a quantity that is not free",
                        l
                    )))
                }
            }
        }
    }

    let jac = jac.to_csc();
    check_structure(&jac)?;
    log::trace!("J:\n{}", jac.to_csr().to_table());

    Ok(jac)
}

/// Rejects matrices with an empty or all-zero row or column.
pub fn check_structure(a: &CSC<usize, f64>) -> Result<()> {
    let n = a.cols();
    let mut row_nz = vec![false; a.rows()];
    for j in 0..n {
        let (start, end) = (a.colptr()[j], a.colptr()[j + 1]);
        let mut col_nz = false;
        for k in start..end {
            if a.values()[k] != 0.0 {
                col_nz = true;
                row_nz[a.rowidx()[k]] = true;
            }
        }
        if !col_nz {
            return Err(Error::SingularJacobian(format!("column {} is zero", j)));
        }
    }
    if let Some(i) = row_nz.iter().position(|nz| !nz) {
        return Err(Error::SingularJacobian(format!("row {} is zero", i)));
    }
    Ok(())
}
