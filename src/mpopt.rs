use derive_builder::Builder;
use num_complex::Complex64;

use crate::error::{Error, Result};

/// OPF solution algorithm.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum Solver {
    /// Primal-dual nonlinear interior point method.
    #[default]
    NonlinearIps,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum AcOpfMode {
    /// Branch flow and voltage limits are hard constraints.
    #[default]
    Standard,
    /// Branch flow and voltage limits may be violated at a penalty.
    WithSlacks,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum GenQLimits {
    #[default]
    Ignore,
    /// Simultaneous bus type conversion.
    Simultaneous,
    /// One-at-a-time bus type conversion.
    OneAtATime,
}

/// Power flow options.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(default, build_fn(name = "pre_build", validate = "Self::validate"))]
pub struct PFConfig {
    /// Termination tolerance on per unit P & Q mismatch.
    pub tolerance: f64,

    /// Maximum number of Newton iterations.
    pub max_iterations: usize,

    /// Start from 1 p.u. voltages and zero angles instead of the case data.
    pub flat_start: bool,

    /// Enforce gen reactive power limits at expense of |V|.
    pub enforce_q_limits: GenQLimits,

    /// Print the mismatch at each iteration.
    pub verbose: bool,
}

impl Default for PFConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 20,
            flat_start: false,
            enforce_q_limits: GenQLimits::Ignore,
            verbose: false,
        }
    }
}

impl PFConfigBuilder {
    pub fn build(&self) -> Result<PFConfig> {
        self.pre_build()
            .map_err(|err| Error::InvalidConfig(err.to_string()))
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(tol) = self.tolerance {
            if !(tol > 0.0) {
                return Err(format!("tolerance must be positive: {}", tol));
            }
        }
        if let Some(0) = self.max_iterations {
            return Err("max_iterations must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Optimal power flow options.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(default, build_fn(name = "pre_build", validate = "Self::validate"))]
pub struct OPFConfig {
    pub solver: Solver,

    /// Options for the initializing power flow.
    pub power_flow_options: PFConfig,

    /// Start from a power flow solution.
    pub ips_init_with_pf: bool,

    /// Termination tolerance on feasibility, gradient and complementarity.
    pub ips_tolerance: f64,

    /// Maximum number of interior point iterations.
    pub ips_iterations: usize,

    /// Initial trust region radius.
    pub ips_trust_radius: f64,

    /// Handle generator reactive limits by fixing units at a limit
    /// instead of by barrier constraints.
    pub ips_control_q_limits: bool,

    pub acopf_mode: AcOpfMode,

    /// Initial bus voltages (p.u.).
    #[builder(setter(strip_option))]
    pub acopf_v0: Option<Vec<Complex64>>,

    /// Initial generator outputs (MVA).
    #[builder(setter(strip_option))]
    pub acopf_s0: Option<Vec<Complex64>>,

    /// The solve stops when the trust radius shrinks below this.
    pub trust_radius_min: f64,

    pub trust_radius_max: f64,

    /// Radius reduction factor when infeasibility grows.
    pub trust_shrink: f64,

    /// Cost of one p.u. of limit violation in `WithSlacks` mode ($/h).
    pub slack_penalty: f64,

    /// Fraction-to-boundary parameter.
    pub xi: f64,

    /// Centering parameter.
    pub sigma: f64,

    /// Initial value of slacks and inequality multipliers.
    pub z0: f64,

    /// Smallest acceptable step length.
    pub alpha_min: f64,

    /// Print the iteration table.
    pub verbose: bool,
}

impl Default for OPFConfig {
    fn default() -> Self {
        Self {
            solver: Solver::NonlinearIps,
            power_flow_options: PFConfig::default(),
            ips_init_with_pf: false,
            ips_tolerance: 1e-6,
            ips_iterations: 100,
            ips_trust_radius: 1.0,
            ips_control_q_limits: false,
            acopf_mode: AcOpfMode::Standard,
            acopf_v0: None,
            acopf_s0: None,
            trust_radius_min: 1e-8,
            trust_radius_max: 1e3,
            trust_shrink: 0.5,
            slack_penalty: 1e5,
            xi: 0.99995,
            sigma: 0.1,
            z0: 1.0,
            alpha_min: 1e-8,
            verbose: false,
        }
    }
}

impl OPFConfigBuilder {
    pub fn build(&self) -> Result<OPFConfig> {
        self.pre_build()
            .map_err(|err| Error::InvalidConfig(err.to_string()))
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let d = OPFConfig::default();
        let positive = [
            ("ips_tolerance", self.ips_tolerance),
            ("ips_trust_radius", self.ips_trust_radius),
            ("trust_radius_min", self.trust_radius_min),
            ("slack_penalty", self.slack_penalty),
            ("z0", self.z0),
            ("alpha_min", self.alpha_min),
        ];
        for (name, value) in positive {
            if let Some(v) = value {
                if !(v > 0.0) {
                    return Err(format!("{} must be positive: {}", name, v));
                }
            }
        }
        if let Some(0) = self.ips_iterations {
            return Err("ips_iterations must be at least 1".to_string());
        }

        let radius = self.ips_trust_radius.unwrap_or(d.ips_trust_radius);
        let r_min = self.trust_radius_min.unwrap_or(d.trust_radius_min);
        let r_max = self.trust_radius_max.unwrap_or(d.trust_radius_max);
        if r_min >= radius {
            return Err(format!(
                "trust_radius_min ({}) must be below ips_trust_radius ({})",
                r_min, radius
            ));
        }
        if r_max < radius {
            return Err(format!(
                "trust_radius_max ({}) must be at least ips_trust_radius ({})",
                r_max, radius
            ));
        }

        if let Some(s) = self.trust_shrink {
            if !(s > 0.0 && s < 1.0) {
                return Err(format!("trust_shrink must be in (0, 1): {}", s));
            }
        }
        if let Some(xi) = self.xi {
            if !(0.5..1.0).contains(&xi) {
                return Err(format!("xi must be in [0.5, 1): {}", xi));
            }
        }
        if let Some(sigma) = self.sigma {
            if !(sigma > 0.0 && sigma <= 1.0) {
                return Err(format!("sigma must be in (0, 1]: {}", sigma));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{format_err, Result};

    use super::*;

    #[test]
    fn test_defaults() -> Result<()> {
        let opt = OPFConfigBuilder::default().build()?;
        if opt != OPFConfig::default() {
            return Err(format_err!("builder defaults differ from Default"));
        }
        if opt.power_flow_options.tolerance != 1e-8 || opt.ips_iterations != 100 {
            return Err(format_err!("unexpected defaults: {:?}", opt));
        }
        Ok(())
    }

    #[test]
    fn test_validation() -> Result<()> {
        let bad = [
            OPFConfigBuilder::default().ips_tolerance(0.0).build(),
            OPFConfigBuilder::default().ips_iterations(0).build(),
            OPFConfigBuilder::default().trust_shrink(1.0).build(),
            OPFConfigBuilder::default().xi(0.2).build(),
            OPFConfigBuilder::default()
                .ips_trust_radius(0.5)
                .trust_radius_max(0.1)
                .build(),
            OPFConfigBuilder::default().trust_radius_min(2.0).build(),
        ];
        for (k, res) in bad.iter().enumerate() {
            match res {
                Err(Error::InvalidConfig(_)) => {}
                other => return Err(format_err!("case {}: expected invalid config: {:?}", k, other)),
            }
        }
        match PFConfigBuilder::default().tolerance(-1.0).build() {
            Err(Error::InvalidConfig(_)) => {}
            other => return Err(format_err!("expected invalid config: {:?}", other)),
        }

        let opt = OPFConfigBuilder::default()
            .ips_tolerance(1e-8)
            .acopf_mode(AcOpfMode::WithSlacks)
            .build()?;
        if opt.acopf_mode != AcOpfMode::WithSlacks || opt.ips_tolerance != 1e-8 {
            return Err(format_err!("options not applied"));
        }
        Ok(())
    }
}
