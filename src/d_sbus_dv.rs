use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csr::CSR;

use crate::math::J;

/// Value and polar derivatives of a mutual power term
/// `vm_s * vm_o * conj(y) * exp(j*(va_s - va_o))`.
///
/// Derivatives are ordered `(va_s, va_o, vm_s, vm_o)`.
#[derive(Debug, Clone, Copy)]
pub struct PairTerm {
    pub value: Complex64,
    pub d: [Complex64; 4],
    pub d2: [[Complex64; 4]; 4],
}

pub fn pair_term(y: Complex64, vm_s: f64, vm_o: f64, delta: f64) -> PairTerm {
    let e = y.conj() * Complex64::from_polar(1.0, delta);
    let b = e * (vm_s * vm_o);
    let b_s = e * vm_o; // b / vm_s
    let b_o = e * vm_s; // b / vm_o
    let zero = Complex64::default();

    PairTerm {
        value: b,
        d: [J * b, -J * b, b_s, b_o],
        d2: [
            [-b, b, J * b_s, J * b_o],
            [b, -b, -J * b_s, -J * b_o],
            [J * b_s, -J * b_s, zero, e],
            [J * b_o, -J * b_o, e, zero],
        ],
    }
}

/// Value, first and second derivative w.r.t. `vm` of the self term
/// `vm^2 * conj(y)`.
pub fn self_term(y: Complex64, vm: f64) -> (Complex64, Complex64, Complex64) {
    let yc = y.conj();
    (yc * (vm * vm), yc * (2.0 * vm), yc * 2.0)
}

/// Complex power `V .* conj(Ybus * V)` drawn by the network at each bus.
pub fn s_net(y_bus: &CSR<usize, Complex64>, v: &[Complex64]) -> Vec<Complex64> {
    let nb = v.len();
    let mut s = vec![Complex64::default(); nb];
    for i in 0..nb {
        let mut i_bus = Complex64::default();
        for k in y_bus.rowptr()[i]..y_bus.rowptr()[i + 1] {
            i_bus += y_bus.values()[k] * v[y_bus.colidx()[k]];
        }
        s[i] = v[i] * i_bus.conj();
    }
    s
}

/// Computes partial derivatives of the network injections w.r.t. voltage
/// angle and magnitude, element by element from the admittance terms.
///
/// Returns `(dS/dVa, dS/dVm)`, each `nb x nb`.
pub fn d_sbus_d_v(
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
) -> (Coo<usize, Complex64>, Coo<usize, Complex64>) {
    let nb = v.len();
    let nnz = y_bus.nnz();
    let mut d_va = Coo::with_capacity(nb, nb, 2 * nnz);
    let mut d_vm = Coo::with_capacity(nb, nb, 2 * nnz);

    for i in 0..nb {
        for k in y_bus.rowptr()[i]..y_bus.rowptr()[i + 1] {
            let j = y_bus.colidx()[k];
            let y = y_bus.values()[k];
            if i == j {
                let (_, d, _) = self_term(y, v[i].norm());
                d_vm.push(i, i, d);
            } else {
                let p = pair_term(y, v[i].norm(), v[j].norm(), v[i].arg() - v[j].arg());
                d_va.push(i, i, p.d[0]);
                d_va.push(i, j, p.d[1]);
                d_vm.push(i, i, p.d[2]);
                d_vm.push(i, j, p.d[3]);
            }
        }
    }
    (d_va, d_vm)
}

/// Computes the second derivatives of the network injections weighted by
/// the complex multipliers `c = lam_p - j*lam_q`, that is the Hessian of
/// `sum(lam_p .* real(S) + lam_q .* imag(S))`.
///
/// Rows and columns are ordered `[Va, Vm]`, giving a `2nb x 2nb` matrix
/// with duplicate entries.
pub fn d2_sbus_d_v2(
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
    c: &[Complex64],
) -> Coo<usize, f64> {
    let nb = v.len();
    let mut h = Coo::with_capacity(2 * nb, 2 * nb, 16 * y_bus.nnz());

    for i in 0..nb {
        if c[i] == Complex64::default() {
            continue;
        }
        for k in y_bus.rowptr()[i]..y_bus.rowptr()[i + 1] {
            let j = y_bus.colidx()[k];
            let y = y_bus.values()[k];
            if i == j {
                let (_, _, d2) = self_term(y, v[i].norm());
                h.push(nb + i, nb + i, (c[i] * d2).re);
            } else {
                let p = pair_term(y, v[i].norm(), v[j].norm(), v[i].arg() - v[j].arg());
                let ix = [i, j, nb + i, nb + j];
                for a in 0..4 {
                    for b in 0..4 {
                        let w = (c[i] * p.d2[a][b]).re;
                        if w != 0.0 {
                            h.push(ix[a], ix[b], w);
                        }
                    }
                }
            }
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use anyhow::{format_err, Result};
    use num_complex::Complex64;

    use super::*;

    fn eval(y: Complex64, x: [f64; 4]) -> Complex64 {
        pair_term(y, x[2], x[3], x[0] - x[1]).value
    }

    #[test]
    fn test_pair_term_derivatives() -> Result<()> {
        let y = Complex64::new(-3.2, 11.5);
        let x = [0.12, -0.05, 1.03, 0.97];
        let p = pair_term(y, x[2], x[3], x[0] - x[1]);
        let h = 1e-6;

        for a in 0..4 {
            let mut xp = x;
            let mut xm = x;
            xp[a] += h;
            xm[a] -= h;
            let fd = (eval(y, xp) - eval(y, xm)) / (2.0 * h);
            if (fd - p.d[a]).norm() > 1e-6 {
                return Err(format_err!("d[{}] = {}, finite difference {}", a, p.d[a], fd));
            }
            for b in 0..4 {
                let dp = pair_term(y, xp[2], xp[3], xp[0] - xp[1]).d[b];
                let dm = pair_term(y, xm[2], xm[3], xm[0] - xm[1]).d[b];
                let fd2 = (dp - dm) / (2.0 * h);
                if (fd2 - p.d2[a][b]).norm() > 1e-5 {
                    return Err(format_err!(
                        "d2[{}][{}] = {}, finite difference {}",
                        a,
                        b,
                        p.d2[a][b],
                        fd2
                    ));
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_d_sbus_d_v() -> Result<()> {
        let mut y = Coo::with_size(3, 3);
        let ys = [Complex64::new(1.0, -10.0), Complex64::new(2.0, -5.0)];
        for (k, (f, t)) in [(0, 1), (1, 2)].into_iter().enumerate() {
            y.push(f, f, ys[k]);
            y.push(t, t, ys[k]);
            y.push(f, t, -ys[k]);
            y.push(t, f, -ys[k]);
        }
        y.push(2, 2, Complex64::new(0.0, 0.3));
        let y_bus = y.to_csr();

        let va = [0.0, -0.05, -0.1];
        let vm = [1.02, 0.99, 0.97];
        let v: Vec<Complex64> = (0..3).map(|i| Complex64::from_polar(vm[i], va[i])).collect();
        let (d_va, d_vm) = d_sbus_d_v(&y_bus, &v);
        let (d_va, d_vm) = (d_va.to_csr(), d_vm.to_csr());

        let h = 1e-7;
        for j in 0..3 {
            let mut vp = v.clone();
            vp[j] = Complex64::from_polar(vm[j], va[j] + h);
            let sp = s_net(&y_bus, &vp);
            let s0 = s_net(&y_bus, &v);
            for i in 0..3 {
                let fd = (sp[i] - s0[i]) / h;
                if (fd - d_va.get(i, j)).norm() > 1e-5 {
                    return Err(format_err!("dS/dVa[{},{}] mismatch", i, j));
                }
            }
            vp[j] = Complex64::from_polar(vm[j] + h, va[j]);
            let sp = s_net(&y_bus, &vp);
            for i in 0..3 {
                let fd = (sp[i] - s0[i]) / h;
                if (fd - d_vm.get(i, j)).norm() > 1e-5 {
                    return Err(format_err!("dS/dVm[{},{}] mismatch", i, j));
                }
            }
        }
        Ok(())
    }
}
