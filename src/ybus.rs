use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csr::CSR;

use crate::network::Network;

/// Builds the bus admittance matrix.
///
/// Branches without a two-port model (HVDC links and converters) and
/// out-of-service branches contribute nothing. DC lines appear as real
/// conductances between DC buses.
pub fn make_ybus(net: &Network) -> CSR<usize, Complex64> {
    let nb = net.bus_count();
    let nl = net.branch_count();

    //      | If |   | Yff  Yft |   | Vf |
    //      |    | = |          | * |    |
    //      | It |   | Ytf  Ytt |   | Vt |
    let mut y_bus = Coo::with_capacity(nb, nb, 4 * nl + nb);

    for (l, br) in net.branches().iter().enumerate() {
        let y = match br.admittance() {
            Some(y) => y,
            None => continue,
        };
        let (f, t) = net.branch_ends(l);

        y_bus.push(f, f, y.yff);
        y_bus.push(f, t, y.yft);
        y_bus.push(t, f, y.ytf);
        y_bus.push(t, t, y.ytt);
    }

    // Psh - j Qsh = V * conj(Ysh * V) = conj(Ysh) = Gs - j Bs at 1 p.u.
    let base_mva = net.base_mva();
    for (i, b) in net.buses().iter().enumerate() {
        if b.gs != 0.0 || b.bs != 0.0 {
            y_bus.push(i, i, Complex64::new(b.gs, b.bs) / base_mva);
        }
    }

    y_bus.to_csr()
}
