use num_complex::Complex64;
use pretty_dtoa::{dtoa, FmtFloatConfig};
use std::f64::consts::PI;

use crate::newton::NewtonProgress;
use crate::traits::ProgressMonitor;

const FLOAT_CONFIG: FmtFloatConfig = FmtFloatConfig::default()
    .add_point_zero(false)
    .max_significant_digits(9);

pub fn format_f64_vec(v: &[f64]) -> String {
    let a: Vec<String> = v.iter().map(|f| dtoa(*f, FLOAT_CONFIG)).collect();
    format!("[{}]", a.join(", "))
}

fn format_complex(z: &Complex64) -> String {
    format!(
        "{}{}j{}",
        dtoa(z.re, FLOAT_CONFIG),
        if z.im.signum() < 0.0 { "-" } else { "+" },
        dtoa(z.im.abs(), FLOAT_CONFIG)
    )
    .to_string()
}

pub fn format_rect_vec(v: &[Complex64]) -> String {
    let a: Vec<String> = v.iter().map(|z| format_complex(z)).collect();
    format!("[{}]", a.join(", "))
}

fn format_polar(z: &Complex64) -> String {
    format!(
        "{}\u{2220}{}\u{00B0}",
        dtoa(z.norm(), FLOAT_CONFIG),
        dtoa(z.arg() * 180.0 / PI, FLOAT_CONFIG)
    )
    .to_string()
}

pub fn format_polar_vec(v: &[Complex64]) -> String {
    let a: Vec<String> = v.iter().map(|z| format_polar(z)).collect();
    format!("[{}]", a.join(", "))
}

/// Prints solver progress tables to stdout.
pub struct PrintProgress;

impl ProgressMonitor for PrintProgress {
    fn update(
        &self,
        i: usize,
        feas_cond: f64,
        grad_cond: f64,
        comp_cond: f64,
        cost_cond: f64,
        gamma: f64,
        step_size: f64,
        obj: f64,
        radius: f64,
    ) {
        if i == 0 {
            println!(
                " it    objective   step size   feascond     gradcond     compcond     costcond     gamma      radius"
            );
            println!(
                "----  ------------ --------- ------------ ------------ ------------ ------------ --------- ---------"
            );
            println!(
                "{:3}  {:12.8} {:>9} {:12.6e} {:12.6e} {:12.6e} {:12.6e} {:9.2e} {:9.2e}",
                i, obj, "", feas_cond, grad_cond, comp_cond, cost_cond, gamma, radius
            );
        } else {
            println!(
                "{:3}  {:12.8} {:9.5e} {:12.6e} {:12.6e} {:12.6e} {:12.6e} {:9.2e} {:9.2e}",
                i, obj, step_size, feas_cond, grad_cond, comp_cond, cost_cond, gamma, radius
            );
        }
    }
}

impl NewtonProgress for PrintProgress {
    fn update(&self, i: usize, norm_f: f64) {
        if i == 0 {
            println!(" it    max P & Q mismatch (p.u.)");
            println!("----  ---------------------------");
        }
        println!("{:3}        {:10.3e}", i, norm_f);
    }
}
