use crate::network::Vsc;

/// Smoothing term that keeps the converter current differentiable at
/// zero power.
const EPS: f64 = 1e-8;

/// Converter loss with derivatives w.r.t. `(Pac, Qac, Vm_ac)`.
#[derive(Debug, Clone, Copy)]
pub struct VscLoss {
    pub value: f64,
    pub d: [f64; 3],
    pub d2: [[f64; 3]; 3],
}

impl Vsc {
    /// Evaluates `a1 + a2*I + a3*I^2` with the AC-side current
    /// `I = |Pac + jQac| / Vm_ac`, all in per unit.
    pub fn loss_at(&self, p_ac: f64, q_ac: f64, vm: f64) -> VscLoss {
        let [a1, a2, a3] = self.loss;

        let s = (p_ac * p_ac + q_ac * q_ac + EPS * EPS).sqrt();
        let i = s / vm;

        let di = [p_ac / (s * vm), q_ac / (s * vm), -s / (vm * vm)];

        let s3 = s * s * s;
        let d2i = [
            [
                (s * s - p_ac * p_ac) / (s3 * vm),
                -p_ac * q_ac / (s3 * vm),
                -p_ac / (s * vm * vm),
            ],
            [
                -p_ac * q_ac / (s3 * vm),
                (s * s - q_ac * q_ac) / (s3 * vm),
                -q_ac / (s * vm * vm),
            ],
            [
                -p_ac / (s * vm * vm),
                -q_ac / (s * vm * vm),
                2.0 * s / (vm * vm * vm),
            ],
        ];

        let dl_di = a2 + 2.0 * a3 * i;
        let mut d = [0.0; 3];
        let mut d2 = [[0.0; 3]; 3];
        for a in 0..3 {
            d[a] = dl_di * di[a];
            for b in 0..3 {
                d2[a][b] = dl_di * d2i[a][b] + 2.0 * a3 * di[a] * di[b];
            }
        }

        VscLoss {
            value: a1 + a2 * i + a3 * i * i,
            d,
            d2,
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{format_err, Result};

    use crate::network::{Vsc, VscControl};

    #[test]
    fn test_loss_derivatives() -> Result<()> {
        let vsc = Vsc {
            loss: [0.001, 0.015, 0.01],
            control1: VscControl::Vac(1.0),
            control2: VscControl::Pdc(20.0),
        };
        let x = [0.35, -0.12, 1.02];
        let at = |x: [f64; 3]| vsc.loss_at(x[0], x[1], x[2]);
        let l = at(x);

        let expect = 0.001 + 0.015 * 0.3700 / 1.02 + 0.01 * (0.3700f64 / 1.02).powi(2);
        if (l.value - expect).abs() > 1e-5 {
            return Err(format_err!("loss = {}, expected about {}", l.value, expect));
        }

        let h = 1e-6;
        for a in 0..3 {
            let mut xp = x;
            let mut xm = x;
            xp[a] += h;
            xm[a] -= h;
            let fd = (at(xp).value - at(xm).value) / (2.0 * h);
            if (fd - l.d[a]).abs() > 1e-7 {
                return Err(format_err!("d[{}] = {}, fd {}", a, l.d[a], fd));
            }
            for b in 0..3 {
                let fd2 = (at(xp).d[b] - at(xm).d[b]) / (2.0 * h);
                if (fd2 - l.d2[a][b]).abs() > 1e-6 {
                    return Err(format_err!("d2[{}][{}] = {}, fd {}", a, b, l.d2[a][b], fd2));
                }
            }
        }
        Ok(())
    }
}
