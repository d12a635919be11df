use num_complex::Complex64;

use crate::network::Network;

/// Nominal complex bus demands (p.u. at 1 p.u. voltage) of the constant
/// impedance, constant current and constant power parts of the ZIP
/// load model, one entry per bus.
#[derive(Debug, Clone)]
pub struct ZipLoads {
    pub z: Vec<Complex64>,
    pub i: Vec<Complex64>,
    pub p: Vec<Complex64>,
}

impl ZipLoads {
    /// Demand at bus `k` for voltage magnitude `vm`.
    pub fn demand(&self, k: usize, vm: f64) -> Complex64 {
        self.p[k] + self.i[k] * vm + self.z[k] * (vm * vm)
    }

    pub fn d_demand_d_vm(&self, k: usize, vm: f64) -> Complex64 {
        self.i[k] + self.z[k] * (2.0 * vm)
    }

    pub fn d2_demand_d_vm2(&self, k: usize) -> Complex64 {
        self.z[k] * 2.0
    }
}

/// Builds the per-bus ZIP demand vectors.
pub fn make_sdzip(net: &Network) -> ZipLoads {
    let nb = net.bus_count();
    let base_mva = net.base_mva();

    let mut sd = ZipLoads {
        z: vec![Complex64::default(); nb],
        i: vec![Complex64::default(); nb],
        p: vec![Complex64::default(); nb],
    };
    for (d, load) in net.loads().iter().enumerate() {
        let k = net.load_bus(d);
        let (pw, qw) = load.model.weights();

        sd.z[k] += Complex64::new(load.p * pw[2], load.q * qw[2]) / base_mva;
        sd.i[k] += Complex64::new(load.p * pw[1], load.q * qw[1]) / base_mva;
        sd.p[k] += Complex64::new(load.p * pw[0], load.q * qw[0]) / base_mva;
    }
    sd
}
