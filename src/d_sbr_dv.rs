use num_complex::Complex64;

use crate::d_sbus_dv::{pair_term, self_term};
use crate::network::TwoPort;

/// Complex power flow at one branch end with its derivatives w.r.t.
/// `(Va_f, Va_t, Vm_f, Vm_t)`.
#[derive(Debug, Clone, Copy)]
pub struct FlowDerivs {
    pub s: Complex64,
    pub d: [Complex64; 4],
    pub d2: [[Complex64; 4]; 4],
}

impl FlowDerivs {
    /// Squared apparent power `|S|^2` with its gradient and Hessian.
    pub fn abs2(&self) -> (f64, [f64; 4], [[f64; 4]; 4]) {
        let sc = self.s.conj();
        let mut g = [0.0; 4];
        let mut h = [[0.0; 4]; 4];
        for a in 0..4 {
            g[a] = 2.0 * (sc * self.d[a]).re;
            for b in 0..4 {
                h[a][b] = 2.0 * (self.d[a].conj() * self.d[b]).re + 2.0 * (sc * self.d2[a][b]).re;
            }
        }
        (self.s.norm_sqr(), g, h)
    }
}

// Flow at the end with voltage (vm_s, va_s) given its self admittance
// and the mutual admittance towards the other end. Derivative order is
// (va_s, va_o, vm_s, vm_o).
fn end_flow(y_self: Complex64, y_mutual: Complex64, vm_s: f64, vm_o: f64, delta: f64) -> FlowDerivs {
    let (s0, d0, d20) = self_term(y_self, vm_s);
    let p = pair_term(y_mutual, vm_s, vm_o, delta);
    let mut d = p.d;
    let mut d2 = p.d2;
    d[2] += d0;
    d2[2][2] += d20;
    FlowDerivs {
        s: s0 + p.value,
        d,
        d2,
    }
}

/// Computes the branch flows `Sf`, `St` and their first and second
/// partial derivatives w.r.t. the voltages at both ends.
pub fn d_sbr_d_v(y: &TwoPort, vf: Complex64, vt: Complex64) -> (FlowDerivs, FlowDerivs) {
    let (vm_f, vm_t) = (vf.norm(), vt.norm());
    let delta = vf.arg() - vt.arg();

    let sf = end_flow(y.yff, y.yft, vm_f, vm_t, delta);

    // reorder (va_t, va_f, vm_t, vm_f) to (va_f, va_t, vm_f, vm_t)
    let st = end_flow(y.ytt, y.ytf, vm_t, vm_f, -delta);
    const P: [usize; 4] = [1, 0, 3, 2];
    let mut d = [Complex64::default(); 4];
    let mut d2 = [[Complex64::default(); 4]; 4];
    for a in 0..4 {
        d[P[a]] = st.d[a];
        for b in 0..4 {
            d2[P[a]][P[b]] = st.d2[a][b];
        }
    }

    (sf, FlowDerivs { s: st.s, d, d2 })
}

/// Hessian of `mu_f |Sf|^2 + mu_t |St|^2` w.r.t.
/// `(Va_f, Va_t, Vm_f, Vm_t)`.
pub fn d2_abr_d_v2(y: &TwoPort, vf: Complex64, vt: Complex64, mu_f: f64, mu_t: f64) -> [[f64; 4]; 4] {
    let (sf, st) = d_sbr_d_v(y, vf, vt);
    let (_, _, hf) = sf.abs2();
    let (_, _, ht) = st.abs2();
    let mut h = [[0.0; 4]; 4];
    for a in 0..4 {
        for b in 0..4 {
            h[a][b] = mu_f * hf[a][b] + mu_t * ht[a][b];
        }
    }
    h
}
