//! Conductance-based single-compartment units
//!
//! `Cm dV/dt = I + sum_k g_k (E_k - V) + (El - V) / Rm`, the leak term only
//! present when `Rm > 0`.
//!
//! A compartment without Conductance ports that is given a membrane time
//! constant `tau` relaxes instead towards `El + I * Rm` with that constant.

use super::{Module, ModuleParams, PortInputs, PortSpec};
use crate::{error::*, grid::{Grid, GridShape}};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Integration scheme for the membrane equation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integration {
    /// Explicit forward Euler
    Euler,
    /// Exponential Euler, exact for inputs held over the step
    Exponential,
}

/// Parameters for [`SingleCompartment`]
#[derive(Debug, Clone, PartialEq)]
pub struct SingleCompartmentParams {
    /// Number of Current connections accepted
    pub current_ports: usize,
    /// Number of Conductance ports
    pub conductance_ports: usize,
    /// Membrane resistance; 0 disables the leak
    pub rm: f64,
    /// Membrane capacitance
    pub cm: f64,
    /// Reversal potential of each Conductance port
    pub reversal: Vec<f64>,
    /// Leak reversal potential
    pub leak_reversal: f64,
    /// Potential at trial start
    pub v0: f64,
    /// Membrane time constant of the current-only compartment (ms)
    pub membrane_tau: Option<f64>,
    /// Integration scheme
    pub integration: Integration,
}

impl Default for SingleCompartmentParams {
    fn default() -> Self {
        Self {
            current_ports: 1,
            conductance_ports: 0,
            rm: 0.0,
            cm: 1.0,
            reversal: Vec::new(),
            leak_reversal: 0.0,
            v0: 0.0,
            membrane_tau: None,
            integration: Integration::Euler,
        }
    }
}

impl SingleCompartmentParams {
    /// Create a pure integrator/leaky integrator with validation
    pub fn new(rm: f64, cm: f64) -> Result<Self> {
        let params = Self {
            rm,
            cm,
            ..Default::default()
        };
        params.validate()?;
        Ok(params)
    }

    /// Declare Conductance ports with their reversal potentials
    pub fn with_conductances(mut self, reversal: Vec<f64>) -> Self {
        self.conductance_ports = reversal.len();
        self.reversal = reversal;
        self
    }

    /// Set the number of Current connections accepted
    pub fn with_current_ports(mut self, ports: usize) -> Self {
        self.current_ports = ports;
        self
    }

    /// Set the leak reversal potential
    pub fn with_leak_reversal(mut self, el: f64) -> Self {
        self.leak_reversal = el;
        self
    }

    /// Set the trial-start potential
    pub fn with_initial_potential(mut self, v0: f64) -> Self {
        self.v0 = v0;
        self
    }

    /// Relax a current-only compartment with time constant `tau_ms`
    pub fn with_membrane_tau(mut self, tau_ms: f64) -> Self {
        self.membrane_tau = Some(tau_ms);
        self
    }

    /// Select the integration scheme
    pub fn with_integration(mut self, integration: Integration) -> Self {
        self.integration = integration;
        self
    }

    /// Read the compartment parameter map
    pub fn from_params(params: &ModuleParams) -> Result<Self> {
        params.ensure_known(
            "SingleCompartment",
            &[
                "number_current_ports",
                "number_conductance_ports",
                "Rm",
                "Cm",
                "E",
                "El",
                "V0",
                "tau",
                "integration",
            ],
        )?;

        let conductance_ports = params.count_or("number_conductance_ports", 0)?;
        let e = params.numbers("E")?;
        let (reversal, default_el) = match e {
            None => (vec![0.0; conductance_ports], 0.0),
            Some(v) if v.len() == 1 => (vec![v[0]; conductance_ports], v[0]),
            Some(v) => (v, 0.0),
        };

        let integration = match params.text("integration")? {
            None | Some("Euler") => Integration::Euler,
            Some("Exponential") => Integration::Exponential,
            Some(other) => {
                return Err(RuntimeError::invalid_parameter(
                    "integration",
                    other,
                    "'Euler' or 'Exponential'",
                ))
            }
        };

        let p = Self {
            current_ports: params.count_or("number_current_ports", 1)?,
            conductance_ports,
            rm: params.number_or("Rm", 0.0)?,
            cm: params.number_or("Cm", 1.0)?,
            reversal,
            leak_reversal: params.number_or("El", default_el)?,
            v0: params.number_or("V0", 0.0)?,
            membrane_tau: params.number("tau")?,
            integration,
        };
        p.validate()?;
        if p.membrane_tau.is_some() && p.conductance_ports > 0 {
            log::warn!(
                "SingleCompartment 'tau' is unused with {} conductance port(s); Cm over the total conductance sets the time constant",
                p.conductance_ports
            );
        }
        Ok(p)
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if !(self.cm > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "Cm",
                self.cm.to_string(),
                "> 0.0",
            ));
        }
        if !(self.rm >= 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "Rm",
                self.rm.to_string(),
                ">= 0.0",
            ));
        }
        if let Some(tau) = self.membrane_tau {
            if !(tau > 0.0) {
                return Err(RuntimeError::invalid_parameter(
                    "tau",
                    tau.to_string(),
                    "> 0.0",
                ));
            }
        }
        if self.reversal.len() != self.conductance_ports {
            return Err(RuntimeError::invalid_parameter(
                "E",
                format!("{:?}", self.reversal),
                format!("one value per conductance port ({})", self.conductance_ports),
            ));
        }
        Ok(())
    }

    /// Time constant of the relaxation path, when it applies
    fn relaxation_tau(&self) -> Option<f64> {
        if self.conductance_ports == 0 {
            self.membrane_tau
        } else {
            None
        }
    }

    fn leak_conductance(&self) -> f64 {
        if self.rm > 0.0 {
            1.0 / self.rm
        } else {
            0.0
        }
    }
}

/// Leaky integrator over one potential per pixel
#[derive(Debug, Clone)]
pub struct SingleCompartment {
    params: SingleCompartmentParams,
    /// Membrane potential; doubles as the module output
    potential: Grid,
}

impl SingleCompartment {
    /// Create a compartment layer sized for `shape`
    pub fn new(params: SingleCompartmentParams, shape: &GridShape) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            potential: Grid::filled(shape.columns, shape.rows, params.v0),
            params,
        })
    }

    /// Compartment parameters
    pub fn params(&self) -> &SingleCompartmentParams {
        &self.params
    }
}

impl Module for SingleCompartment {
    fn type_tag(&self) -> &'static str {
        "SingleCompartment"
    }

    fn ports(&self) -> PortSpec {
        PortSpec {
            current: Some(self.params.current_ports),
            conductance: self.params.conductance_ports,
        }
    }

    fn reset(&mut self) {
        self.potential.fill(self.params.v0);
    }

    fn step(&mut self, dt_ms: f64, inputs: &PortInputs) -> Result<()> {
        self.potential.ensure_same_shape(&inputs.current)?;
        for g in &inputs.conductances {
            self.potential.ensure_same_shape(g)?;
        }

        let p = &self.params;
        let gl = p.leak_conductance();
        let current = inputs.current.as_slice();
        let conductances = &inputs.conductances[..inputs.conductances.len().min(p.conductance_ports)];

        let relax = p.relaxation_tau();

        let update = |(i, v): (usize, &mut f64)| {
            if let Some(tau) = relax {
                let v_inf = p.leak_reversal + current[i] * p.rm;
                match p.integration {
                    Integration::Euler => *v += dt_ms * (v_inf - *v) / tau,
                    Integration::Exponential => *v = v_inf + (*v - v_inf) * (-dt_ms / tau).exp(),
                }
                return;
            }
            let (mut g_sum, mut g_rev) = (0.0, 0.0);
            for (g, e) in conductances.iter().zip(&p.reversal) {
                let g = g.as_slice()[i];
                g_sum += g;
                g_rev += g * e;
            }
            match p.integration {
                Integration::Euler => {
                    let dv = current[i] + g_rev - g_sum * *v + gl * (p.leak_reversal - *v);
                    *v += dt_ms * dv / p.cm;
                }
                Integration::Exponential => {
                    let g_tot = g_sum + gl;
                    if g_tot == 0.0 {
                        *v += dt_ms * current[i] / p.cm;
                    } else {
                        let v_inf = (current[i] + g_rev + gl * p.leak_reversal) / g_tot;
                        *v = v_inf + (*v - v_inf) * (-dt_ms * g_tot / p.cm).exp();
                    }
                }
            }
        };

        #[cfg(feature = "parallel")]
        self.potential
            .as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(update);

        #[cfg(not(feature = "parallel"))]
        self.potential
            .as_mut_slice()
            .iter_mut()
            .enumerate()
            .for_each(update);

        Ok(())
    }

    fn output(&self) -> &Grid {
        &self.potential
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> GridShape {
        GridShape::new(2, 1, 1.0).unwrap()
    }

    #[test]
    fn test_pure_integrator_is_linear_in_time() {
        let (i, cm, dt) = (2.0, 4.0, 0.5);
        let mut c = SingleCompartment::new(SingleCompartmentParams::new(0.0, cm).unwrap(), &shape()).unwrap();
        let drive = PortInputs::current(Grid::filled(2, 1, i));
        for k in 1..=40 {
            c.step(dt, &drive).unwrap();
            let t = k as f64 * dt;
            assert!((c.output().get(0, 0).unwrap() - i / cm * t).abs() < 1e-12);
        }
    }

    #[test]
    fn test_exponential_leak_matches_analytic() {
        let (rm, cm, i, dt) = (2.0, 5.0, 1.5, 1.0);
        let params = SingleCompartmentParams::new(rm, cm)
            .unwrap()
            .with_integration(Integration::Exponential);
        let mut c = SingleCompartment::new(params, &shape()).unwrap();
        let drive = PortInputs::current(Grid::filled(2, 1, i));
        for k in 1..=30 {
            c.step(dt, &drive).unwrap();
            let t = k as f64 * dt;
            let expected = i * rm * (1.0 - (-t / (rm * cm)).exp());
            assert!((c.output().get(1, 0).unwrap() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_euler_leak_settles_at_steady_state() {
        let params = SingleCompartmentParams::new(1.0, 10.0)
            .unwrap()
            .with_leak_reversal(-60.0)
            .with_initial_potential(-60.0);
        let mut c = SingleCompartment::new(params, &shape()).unwrap();
        let drive = PortInputs::current(Grid::filled(2, 1, 5.0));
        for _ in 0..2000 {
            c.step(0.1, &drive).unwrap();
        }
        assert!((c.output().get(0, 0).unwrap() - (-55.0)).abs() < 1e-6);
    }

    #[test]
    fn test_conductance_pulls_towards_reversal() {
        let params = SingleCompartmentParams::new(0.0, 1.0)
            .unwrap()
            .with_conductances(vec![-70.0])
            .with_integration(Integration::Exponential);
        let mut c = SingleCompartment::new(params, &shape()).unwrap();
        let inputs = PortInputs {
            current: Grid::new(2, 1),
            conductances: vec![Grid::filled(2, 1, 2.0)],
        };
        for _ in 0..50 {
            c.step(1.0, &inputs).unwrap();
        }
        assert!((c.output().get(0, 0).unwrap() + 70.0).abs() < 1e-9);
        c.reset();
        assert_eq!(c.output().get(0, 0), Some(0.0));
    }

    #[test]
    fn test_from_params_ports_and_reversal() {
        let params = ModuleParams::new()
            .with("number_current_ports", 2.0)
            .with("number_conductance_ports", 2.0)
            .with("Rm", 0.0)
            .with("Cm", 100.0)
            .with("E", 0.0);
        let p = SingleCompartmentParams::from_params(&params).unwrap();
        assert_eq!(p.reversal, vec![0.0, 0.0]);
        assert_eq!(p.current_ports, 2);
        assert_eq!(p.membrane_tau, None);

        let ragged = ModuleParams::new()
            .with("number_conductance_ports", 2.0)
            .with("E", vec![0.0, -70.0, 10.0]);
        assert!(SingleCompartmentParams::from_params(&ragged).is_err());

        let no_cm = ModuleParams::new().with("Cm", 0.0);
        assert!(SingleCompartmentParams::from_params(&no_cm).is_err());

        let bad_tau = ModuleParams::new().with("tau", 0.0);
        assert!(matches!(
            SingleCompartmentParams::from_params(&bad_tau),
            Err(RuntimeError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_tau_sets_current_only_relaxation() {
        let (rm, el, i, tau) = (2.0, 1.0, 3.0, 10.0);
        let params = ModuleParams::new()
            .with("Rm", rm)
            .with("El", el)
            .with("tau", tau)
            .with("integration", "Exponential");
        let p = SingleCompartmentParams::from_params(&params).unwrap();
        assert_eq!(p.membrane_tau, Some(tau));

        let mut c = SingleCompartment::new(p, &shape()).unwrap();
        let drive = PortInputs::current(Grid::filled(2, 1, i));
        let v_inf = el + i * rm;
        for k in 1..=40 {
            c.step(1.0, &drive).unwrap();
            let t = k as f64;
            let expected = v_inf * (1.0 - (-t / tau).exp());
            assert!((c.output().get(0, 0).unwrap() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_tau_euler_settles_at_relaxation_target() {
        let params = SingleCompartmentParams::new(0.5, 1.0)
            .unwrap()
            .with_leak_reversal(-60.0)
            .with_membrane_tau(5.0);
        let mut c = SingleCompartment::new(params, &shape()).unwrap();
        let drive = PortInputs::current(Grid::filled(2, 1, 4.0));
        c.step(0.5, &drive).unwrap();
        // one Euler step from 0 towards -58 with dt/tau = 0.1
        assert!((c.output().get(1, 0).unwrap() - (-5.8)).abs() < 1e-12);
        for _ in 0..2000 {
            c.step(0.5, &drive).unwrap();
        }
        assert!((c.output().get(1, 0).unwrap() - (-58.0)).abs() < 1e-9);
    }

    #[test]
    fn test_tau_ignored_with_conductance_ports() {
        let base = SingleCompartmentParams::new(0.0, 1.0)
            .unwrap()
            .with_conductances(vec![-70.0])
            .with_integration(Integration::Exponential);
        let inputs = PortInputs {
            current: Grid::filled(2, 1, 1.0),
            conductances: vec![Grid::filled(2, 1, 0.5)],
        };
        let mut plain = SingleCompartment::new(base.clone(), &shape()).unwrap();
        let mut with_tau = SingleCompartment::new(base.with_membrane_tau(3.0), &shape()).unwrap();
        for _ in 0..10 {
            plain.step(1.0, &inputs).unwrap();
            with_tau.step(1.0, &inputs).unwrap();
        }
        assert_eq!(plain.output(), with_tau.output());
    }
}
